//! HTTP boundary of the causal-token transport.
//!
//! Inbound, the middleware turns the routing cookie into a
//! [`CausalContext`] stored in request extensions; outbound, it emits the
//! refreshed cookie after successful writes. Attach it with
//! `axum::middleware::from_fn_with_state`:
//!
//! ```ignore
//! let config = Arc::new(RouterConfig::new().enabled(true));
//! let app = Router::new()
//!     .route("/orders", post(create_order))
//!     .layer(middleware::from_fn_with_state(config, causal_middleware));
//! ```
//!
//! Handlers extract the context with `Extension<CausalContext>` and pass it
//! to the façade.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::config::{ConsistencyLevel, RouterConfig};
use crate::context::{CausalContext, CausalToken};
use crate::core::RouterError;
use crate::lsn::Lsn;

/// Reads the named cookie and parses it as an LSN.
///
/// Lenient by contract: a missing, empty, or malformed cookie yields `None`
/// and the request proceeds without a causal requirement.
pub fn lsn_from_cookie_header(headers: &HeaderMap, cookie_name: &str) -> Option<Lsn> {
    for header_value in headers.get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            if name.trim() == cookie_name {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

/// Renders the `Set-Cookie` value for a captured LSN.
///
/// Returns `None` for the zero LSN, which must never reach a cookie.
pub fn format_causal_cookie(lsn: Lsn, config: &RouterConfig) -> Option<String> {
    if lsn.is_zero() {
        return None;
    }

    let mut cookie = format!(
        "{}={}; Max-Age={}; HttpOnly; SameSite=Lax; Path=/",
        config.cookie_name,
        lsn,
        config.cookie_max_age.as_secs()
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    Some(cookie)
}

/// Appends the causal cookie to a response header map. Explicit emission
/// helper for handlers that bypass the middleware.
pub fn set_causal_cookie(headers: &mut HeaderMap, lsn: Lsn, config: &RouterConfig) {
    let Some(cookie) = format_causal_cookie(lsn, config) else {
        return;
    };
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        Err(err) => warn!(error = %err, "causal cookie is not a valid header value"),
    }
}

/// Axum middleware carrying the causal token across the request boundary.
///
/// A [`CausalContext`] is attached to every request — pre-loaded with a
/// read-your-writes token when the inbound cookie parses, empty otherwise.
/// A round-tripped cookie always demands read-your-writes; a stricter
/// configured level is enforced by the router, not encoded into the token.
/// After the handler runs, a refreshed cookie is emitted iff the context
/// saw a write, the response is 2xx, and the captured LSN is non-zero.
pub async fn causal_middleware(
    State(config): State<Arc<RouterConfig>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = match lsn_from_cookie_header(request.headers(), &config.cookie_name) {
        Some(lsn) => CausalContext::with_token(CausalToken::new(
            lsn,
            ConsistencyLevel::ReadYourWrites,
        )),
        None => CausalContext::new(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;

    if response.status().is_success() && ctx.write_occurred() {
        if let Some(token) = ctx.token() {
            set_causal_cookie(response.headers_mut(), token.required_lsn, &config);
        }
    }

    response
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RouterError::LsnParse(_) => (StatusCode::BAD_REQUEST, "invalid_lsn"),
            RouterError::NoPrimaryAvailable => (StatusCode::SERVICE_UNAVAILABLE, "no_primary"),
            RouterError::NoReplicaCaughtUp => {
                (StatusCode::SERVICE_UNAVAILABLE, "replica_lagging")
            }
            RouterError::ProbeTimeout => (StatusCode::GATEWAY_TIMEOUT, "lsn_query_timeout"),
            RouterError::ProbeFailed(_) => (StatusCode::BAD_GATEWAY, "lsn_query_failed"),
            RouterError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "connection_error"),
            RouterError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "backend_error"),
            RouterError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
