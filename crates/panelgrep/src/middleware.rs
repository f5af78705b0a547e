//! Request guardrails, composed in order: rate limit, concurrency cap,
//! authentication, authorization.
//!
//! Authentication reads `Authorization: Bearer <token>`, validates it
//! through the credential service, and attaches the resolved user to the
//! request extensions. Authorization compares that user's role against the
//! route's requirement. Both fail closed.

use crate::http::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use panelgrep_core::{Role, User};
use std::net::{IpAddr, SocketAddr};

/// Request-scoped authenticated user. The well-known key other layers read.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

pub(crate) fn error_body(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}

/// Rate-limiter key: the peer IP without the port.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let ip = client_ip(&req);
    if !state.limiter.allow(ip) {
        tracing::debug!(%ip, "rate limited");
        return error_body(StatusCode::TOO_MANY_REQUESTS, "too many requests");
    }
    next.run(req).await
}

/// Fixed-capacity semaphore over all handlers. Requests past the cap wait
/// for a slot rather than failing; the permit is released however the
/// handler exits.
pub async fn concurrency_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let permit = match state.concurrency.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return error_body(StatusCode::SERVICE_UNAVAILABLE, "capacity exceeded"),
    };
    let response = next.run(req).await;
    drop(permit);
    response
}

async fn resolve_user(
    state: &AppState,
    req: &Request,
) -> Option<panelgrep_core::Result<User>> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    if token.is_empty() {
        return None;
    }
    Some(state.auth.validate_token(token).await)
}

pub async fn authn_required(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match resolve_user(&state, &req).await {
        Some(Ok(user)) => {
            tracing::debug!(username = %user.username, role = %user.role, "authenticated");
            req.extensions_mut().insert(CurrentUser(user));
            next.run(req).await
        }
        Some(Err(err)) => {
            tracing::debug!(%err, "token validation failed");
            error_body(StatusCode::UNAUTHORIZED, "unauthorized")
        }
        None => error_body(StatusCode::UNAUTHORIZED, "unauthorized"),
    }
}

/// Like [`authn_required`], but a missing or invalid token passes through
/// with no user in the request context.
pub async fn authn_optional(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match resolve_user(&state, &req).await {
        Some(Ok(user)) => {
            req.extensions_mut().insert(CurrentUser(user));
        }
        Some(Err(err)) => {
            tracing::debug!(%err, "token validation failed; continuing unauthenticated");
        }
        None => {}
    }
    next.run(req).await
}

fn authorize(req: &Request, required: Role) -> Option<Response> {
    match req.extensions().get::<CurrentUser>() {
        Some(CurrentUser(user)) if user.role.satisfies(required) => None,
        Some(CurrentUser(user)) => {
            tracing::debug!(
                username = %user.username,
                role = %user.role,
                %required,
                "insufficient role"
            );
            Some(error_body(StatusCode::FORBIDDEN, "forbidden"))
        }
        None => Some(error_body(StatusCode::FORBIDDEN, "forbidden")),
    }
}

pub async fn require_admin(req: Request, next: Next) -> Response {
    match authorize(&req, Role::Admin) {
        Some(denied) => denied,
        None => next.run(req).await,
    }
}

pub async fn require_user(req: Request, next: Next) -> Response {
    match authorize(&req, Role::User) {
        Some(denied) => denied,
        None => next.run(req).await,
    }
}
