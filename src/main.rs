//! Randomizer link server.
//!
//! Serves `/r/{slug}` redirects on the public listener and the admin API used
//! by the configuration store and the bot health source on a separate,
//! loopback-by-default listener. Configuration comes from the YAML file named
//! by `RANDOMIZER_CONFIG`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bot_randomizer::http::{self, AppState, Surface};
use bot_randomizer::routing::{AllowAll, StatusFeed};
use bot_randomizer::{
    BotRegistry, Config, JsonLinesSink, Router, TracingSink, VisitRecorder, VisitSink,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        listen = %config.listen,
        admin_listen = %config.admin_listen,
        redirect_base = %config.redirect_base,
        cloak_timeout_ms = config.cloak_timeout_ms,
        "bot-randomizer starting"
    );

    let registry = Arc::new(BotRegistry::new(config.redirect_base.clone()));
    let sink: Arc<dyn VisitSink> = match &config.visit_log {
        Some(path) => Arc::new(
            JsonLinesSink::open(path)
                .await
                .with_context(|| format!("opening visit log {}", path.display()))?,
        ),
        None => Arc::new(TracingSink),
    };
    let (recorder, recorder_task) = VisitRecorder::spawn(sink, config.recorder_capacity);
    let router = Router::new(registry, recorder.clone())
        .with_cloak_gate(Arc::new(AllowAll), config.cloak_timeout());
    let (feed, feed_task) =
        StatusFeed::spawn(Arc::clone(router.availability()), config.status_feed_capacity);

    let state = Arc::new(AppState {
        router,
        feed,
        safe_url: config.safe_url.clone(),
        fallback_url: config.fallback_url.clone(),
        admin_token: config.admin_token.clone(),
    });

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!(addr = %config.listen, "public listener ready");

    let admin_listener = TcpListener::bind(config.admin_listen)
        .await
        .with_context(|| format!("binding {}", config.admin_listen))?;
    if config.admin_token.is_none() {
        tracing::warn!(
            addr = %config.admin_listen,
            "admin API has no token; keep it on a private interface"
        );
    }
    tracing::info!(addr = %config.admin_listen, "admin listener ready");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    tokio::select! {
        result = http::serve(listener, Arc::clone(&state), Surface::Public) => {
            result.context("public http server failed")?;
        }
        result = http::serve(admin_listener, Arc::clone(&state), Surface::Admin) => {
            result.context("admin http server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    // Flush queued visits before exit.
    recorder.close();
    if let Err(e) = recorder_task.await {
        tracing::error!(error = %e, "visit recorder task failed");
    }
    feed_task.abort();

    let stats = recorder.stats();
    tracing::info!(
        recorded = stats.recorded,
        dropped = stats.dropped,
        failed = stats.failed,
        "bot-randomizer stopped"
    );
    Ok(())
}
