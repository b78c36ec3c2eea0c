//! Public randomizer links.

use std::net::{IpAddr, SocketAddr};

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, ACCEPT_LANGUAGE, CACHE_CONTROL, REFERER, USER_AGENT};
use hyper::{HeaderMap, Response, StatusCode};

use crate::model::VisitContext;
use crate::routing::{Rejection, RouteDecision};

use super::{redirect, text, AppState};

/// Routes one visit to `/r/{slug}` and turns the decision into a response.
///
/// - routed: 302 to the bot
/// - unknown or inactive randomizer: 404
/// - no eligible bot: 302 to the fallback page, or 503 without one
/// - cloaked: 302 to the safe page
pub(super) async fn handle_visit(
    state: &AppState,
    slug: &str,
    visit: VisitContext,
) -> Response<Full<Bytes>> {
    let Some(slug) = normalize_slug(slug) else {
        return text(StatusCode::NOT_FOUND, "not found");
    };

    match state.router.route(slug, &visit).await {
        RouteDecision::Redirect(target) => redirect(&target.url),
        RouteDecision::Rejected(Rejection::NotFound) => text(StatusCode::NOT_FOUND, "not found"),
        RouteDecision::Rejected(Rejection::Inactive(_)) => {
            text(StatusCode::NOT_FOUND, "randomizer inactive")
        }
        RouteDecision::Rejected(Rejection::NoEligibleBot(_)) => match &state.fallback_url {
            Some(url) => redirect(url),
            None => text(StatusCode::SERVICE_UNAVAILABLE, "no bot available"),
        },
        RouteDecision::Rejected(Rejection::Cloaked(_)) => redirect(&state.safe_url),
    }
}

/// Answers `HEAD /r/{slug}` without routing or recording a visit.
///
/// Link checkers and unfurlers send HEAD; they learn whether the link is
/// live but never consume a selection.
pub(super) fn handle_preview(state: &AppState, slug: &str) -> Response<Full<Bytes>> {
    let live = normalize_slug(slug)
        .and_then(|slug| state.router.table().resolve(slug))
        .is_some_and(|snapshot| snapshot.active);
    if !live {
        return text(StatusCode::NOT_FOUND, "");
    }

    let mut response = text(StatusCode::OK, "");
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn normalize_slug(slug: &str) -> Option<&str> {
    let slug = slug.trim_end_matches('/');
    (!slug.is_empty() && !slug.contains('/')).then_some(slug)
}

/// Collects the request attributes handed to the cloak gate.
pub fn visit_context(headers: &HeaderMap, query: Option<&str>, remote: SocketAddr) -> VisitContext {
    let header = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let forwarded = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());

    VisitContext {
        client_ip: Some(extract_client_ip(forwarded, remote.ip())),
        user_agent: header(USER_AGENT),
        referer: header(REFERER),
        accept_language: header(ACCEPT_LANGUAGE),
        query: query.filter(|q| !q.is_empty()).map(str::to_string),
    }
}

/// Extracts the visitor's IP address.
///
/// Priority:
/// 1. First valid address in `X-Forwarded-For`
/// 2. Peer address of the connection
pub fn extract_client_ip(forwarded_for: Option<&str>, peer: IpAddr) -> IpAddr {
    forwarded_for
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
}
