//! JSON admin control plane.
//!
//! The configuration store publishes randomizer snapshots and bot
//! identities here. The health source posts bot status observations, which
//! go through the status feed rather than touching the tracker directly.
//!
//! Served only on the admin listener. When an admin token is configured,
//! every request must carry `Authorization: Bearer <token>`.

use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::FeedError;
use crate::model::{Bot, BotId, BotStatus, RandomizerConfig, RandomizerId};
use crate::routing::StatusReport;
use crate::store::PublishOutcome;

use super::{json, AppState, BoxError};

/// Largest accepted admin request body.
const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct BotUpsert {
    id: BotId,
    handle: String,
    #[serde(default)]
    status: Option<BotStatus>,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: BotStatus,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

/// Dispatches `/admin/...` requests.
pub(super) async fn handle_admin<B>(state: &AppState, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    if !authorized(state.admin_token.as_deref(), req.headers()) {
        tracing::warn!(path = req.uri().path(), "rejected unauthenticated admin request");
        let mut response = error(StatusCode::UNAUTHORIZED, "missing or invalid admin token");
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        return response;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let segments: Vec<&str> = path
        .trim_start_matches("/admin/")
        .trim_end_matches('/')
        .split('/')
        .collect();

    match (&method, segments.as_slice()) {
        (&Method::PUT, ["randomizers"]) => match read_json::<_, RandomizerConfig>(req).await {
            Ok(config) => publish_randomizer(state, config),
            Err(response) => response,
        },
        (&Method::GET, ["randomizers", id]) => get_randomizer(state, &RandomizerId::new(*id)),
        (&Method::DELETE, ["randomizers", id]) => {
            let Some(version) = query.as_deref().and_then(version_param) else {
                return error(StatusCode::BAD_REQUEST, "missing or invalid version parameter");
            };
            let outcome = state.router.retire(&RandomizerId::new(*id), version);
            publish_response(outcome)
        }
        (&Method::PUT, ["bots"]) => match read_json::<_, BotUpsert>(req).await {
            Ok(upsert) => upsert_bot(state, upsert),
            Err(response) => response,
        },
        (&Method::DELETE, ["bots", id]) => {
            let removed = state.router.remove_bot(&BotId::new(*id));
            json(StatusCode::OK, &json!({ "removed": removed }))
        }
        (&Method::POST, ["bots", id, "status"]) => {
            let bot_id = BotId::new(*id);
            match read_json::<_, StatusUpdate>(req).await {
                Ok(update) => queue_status(state, bot_id, update),
                Err(response) => response,
            }
        }
        (&Method::GET, ["stats"]) => stats(state),
        _ => error(StatusCode::NOT_FOUND, "unknown admin endpoint"),
    }
}

fn authorized(token: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = token else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| constant_time_eq(presented.trim().as_bytes(), expected.as_bytes()))
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn publish_randomizer(state: &AppState, config: RandomizerConfig) -> Response<Full<Bytes>> {
    match state.router.publish_snapshot(config) {
        Ok(outcome) => publish_response(outcome),
        Err(e) => error(StatusCode::CONFLICT, &e.to_string()),
    }
}

fn publish_response(outcome: PublishOutcome) -> Response<Full<Bytes>> {
    let body = match outcome {
        PublishOutcome::Applied { version } => json!({ "result": "applied", "version": version }),
        PublishOutcome::Unchanged { version } => {
            json!({ "result": "unchanged", "version": version })
        }
        PublishOutcome::Stale { current } => json!({ "result": "stale", "version": current }),
    };
    json(StatusCode::OK, &body)
}

fn get_randomizer(state: &AppState, id: &RandomizerId) -> Response<Full<Bytes>> {
    let Some(snapshot) = state.router.table().get(id) else {
        return error(StatusCode::NOT_FOUND, "unknown randomizer");
    };

    let members = |kind| {
        snapshot
            .pool(kind)
            .members()
            .iter()
            .map(|m| json!({ "bot_id": m.bot_id, "weight": m.weight, "sort_order": m.sort_order }))
            .collect::<Vec<_>>()
    };

    json(
        StatusCode::OK,
        &json!({
            "id": snapshot.id,
            "slug": snapshot.slug,
            "version": snapshot.version,
            "mode": snapshot.mode,
            "active": snapshot.active,
            "cloaker_enabled": snapshot.cloaker_enabled,
            "primary": members(crate::store::PoolKind::Primary),
            "reserve": members(crate::store::PoolKind::Reserve),
        }),
    )
}

fn upsert_bot(state: &AppState, upsert: BotUpsert) -> Response<Full<Bytes>> {
    if upsert.handle.trim_start_matches('@').is_empty() {
        return error(StatusCode::BAD_REQUEST, "bot handle must not be empty");
    }

    let status = upsert
        .status
        .map(|status| (status, upsert.observed_at.unwrap_or_else(Utc::now)));
    let bot = Bot {
        id: upsert.id.clone(),
        handle: upsert.handle,
    };
    state.router.register_bot(bot, status);

    json(
        StatusCode::OK,
        &json!({
            "id": upsert.id,
            "redirect_url": state.router.registry().redirect_url(&upsert.id),
        }),
    )
}

fn queue_status(state: &AppState, bot_id: BotId, update: StatusUpdate) -> Response<Full<Bytes>> {
    let report = StatusReport {
        bot_id,
        status: update.status,
        observed_at: update.observed_at.unwrap_or_else(Utc::now),
    };

    match state.feed.try_push(report) {
        Ok(()) => json(StatusCode::ACCEPTED, &json!({ "queued": true })),
        Err(FeedError::Full) => {
            tracing::warn!("status feed full, report rejected");
            error(StatusCode::SERVICE_UNAVAILABLE, "status feed full")
        }
        Err(FeedError::Closed) => error(StatusCode::SERVICE_UNAVAILABLE, "status feed closed"),
    }
}

fn stats(state: &AppState) -> Response<Full<Bytes>> {
    let table = state.router.table();
    json(
        StatusCode::OK,
        &json!({
            "randomizers": table.len(),
            "generation": table.generation(),
            "bots": state.router.registry().len(),
            "statuses": state.router.availability().counts(),
            "recorder": state.router.recorder().stats(),
        }),
    )
}

async fn read_json<B, T>(req: Request<B>) -> Result<T, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<BoxError>,
    T: serde::de::DeserializeOwned,
{
    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return Err(error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"));
        }
        Err(e) => {
            tracing::debug!(error = %e, "failed to read admin request body");
            return Err(error(StatusCode::BAD_REQUEST, "unreadable request body"));
        }
    };

    serde_json::from_slice(&body).map_err(|e| error(StatusCode::BAD_REQUEST, &e.to_string()))
}

fn version_param(query: &str) -> Option<u64> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "version")
        .and_then(|(_, value)| value.parse().ok())
}

fn error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json(status, &json!({ "error": message }))
}
