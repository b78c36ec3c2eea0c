//! HTTP front end.
//!
//! Two listeners share one dispatcher. The public one serves the randomizer
//! links (`/r/{slug}`); the admin one serves the JSON control plane used by
//! the configuration store and the health source. Both answer the
//! `/healthz` and `/readyz` health checks.

mod admin;
mod public;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::routing::{Router, StatusFeed};

pub use public::{extract_client_ip, visit_context};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub router: Router,
    pub feed: StatusFeed,
    pub safe_url: String,
    pub fallback_url: Option<String>,
    /// Bearer token required on the admin listener. `None` disables the check.
    pub admin_token: Option<String>,
}

/// Which listener a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Public,
    Admin,
}

/// Dispatches a request to the health checks or the handlers of its surface.
///
/// Paths belonging to the other surface answer 404.
pub async fn handle<B>(
    state: Arc<AppState>,
    surface: Surface,
    remote: SocketAddr,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (surface, &method, path.as_str()) {
        (_, &Method::GET, "/healthz") | (_, &Method::GET, "/readyz") => {
            text(StatusCode::OK, "ok")
        }
        (Surface::Public, &Method::GET, p) if p.starts_with("/r/") => {
            let visit = visit_context(req.headers(), req.uri().query(), remote);
            public::handle_visit(&state, &p[3..], visit).await
        }
        (Surface::Public, &Method::HEAD, p) if p.starts_with("/r/") => {
            public::handle_preview(&state, &p[3..])
        }
        (Surface::Admin, _, p) if p.starts_with("/admin/") => {
            admin::handle_admin(&state, req).await
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

/// Accepts connections for one surface until the listener fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    surface: Surface,
) -> std::io::Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service =
                service_fn(move |req| handle(Arc::clone(&state), surface, remote, req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "http connection error");
            }
        });
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn json(status: StatusCode, value: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Temporary redirect that browsers must not cache, so every visit is
/// routed afresh.
fn redirect(location: &str) -> Response<Full<Bytes>> {
    let Ok(value) = HeaderValue::from_str(location) else {
        tracing::error!(location = location, "redirect target is not a valid header value");
        return text(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect target");
    };

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(LOCATION, value);
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
