//! The catalog service's HTTP surface.
//!
//! Routes compose with the guardrails as
//! `rate_limit ∘ concurrency_limit ∘ authn ∘ authz ∘ handler`:
//!
//! - `POST /update`    - admin only; crawls the remote and reports counts
//! - `GET  /pics`      - any authenticated user; ranked image URLs
//! - `POST /login`     - open
//! - `POST /register`  - optional auth; creating an admin needs an admin

use crate::limiter::RateLimiter;
use crate::middleware::{self, error_body, CurrentUser};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use panelgrep_core::{AuthService, ComicService, Error, NewUser, Role};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn ComicService>,
    pub auth: Arc<dyn AuthService>,
    pub limiter: Arc<RateLimiter>,
    pub concurrency: Arc<Semaphore>,
    /// Server base context; cancelled on shutdown signals.
    pub cancel: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/update", post(update))
        .route_layer(from_fn(middleware::require_admin))
        .route_layer(from_fn_with_state::<_, AppState, _>(
            state.clone(),
            middleware::authn_required,
        ));

    let authed = Router::new()
        .route("/pics", get(search))
        .route_layer(from_fn(middleware::require_user))
        .route_layer(from_fn_with_state::<_, AppState, _>(
            state.clone(),
            middleware::authn_required,
        ));

    let self_service = Router::new()
        .route("/register", post(register))
        .route_layer(from_fn_with_state::<_, AppState, _>(
            state.clone(),
            middleware::authn_optional,
        ));

    Router::new()
        .route("/login", post(login))
        .merge(admin)
        .merge(authed)
        .merge(self_service)
        .layer(from_fn_with_state(state.clone(), middleware::concurrency_limit))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .with_state(state)
}

/// Maps domain errors onto the surface's status codes. Validation 400s are
/// produced directly by the handlers; everything unexpected is an opaque 500.
fn error_response(err: &Error) -> Response {
    match err {
        Error::InvalidCredentials | Error::InvalidToken(_) | Error::UserGone(_) => {
            error_body(StatusCode::UNAUTHORIZED, &err.to_string())
        }
        Error::Forbidden(_) => error_body(StatusCode::FORBIDDEN, &err.to_string()),
        Error::RateLimited => error_body(StatusCode::TOO_MANY_REQUESTS, &err.to_string()),
        Error::CapacityExceeded => error_body(StatusCode::SERVICE_UNAVAILABLE, &err.to_string()),
        _ => error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
    }
}

fn valid_credential(s: &str) -> bool {
    (5..=20).contains(&s.chars().count())
}

async fn update(State(state): State<AppState>) -> Response {
    tracing::info!("got request to update the catalog");
    let before = match state.service.total().await {
        Ok(n) => n,
        Err(err) => {
            tracing::error!(%err, "counting items failed");
            return error_response(&err);
        }
    };

    if let Err(err) = state.service.update(&state.cancel).await {
        tracing::error!(%err, "catalog update failed");
        return error_response(&err);
    }

    let after = match state.service.total().await {
        Ok(n) => n,
        Err(err) => {
            tracing::error!(%err, "counting items failed");
            return error_response(&err);
        }
    };

    tracing::info!(new = after - before, total = after, "catalog updated");
    (
        StatusCode::OK,
        Json(serde_json::json!({ "new": after - before, "total": after })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    search: String,
}

async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    let query = params.search.trim();
    if query.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "empty search query");
    }

    match state.service.search(query).await {
        Ok(urls) => {
            tracing::info!(query, found = urls.len(), "search served");
            (StatusCode::OK, Json(urls)).into_response()
        }
        Err(err) => {
            tracing::error!(%err, query, "search failed");
            error_response(&err)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn login(State(state): State<AppState>, Json(creds): Json<Credentials>) -> Response {
    if !valid_credential(&creds.username) || !valid_credential(&creds.password) {
        return error_body(
            StatusCode::BAD_REQUEST,
            "username and password must be 5-20 characters",
        );
    }

    match state.auth.login(&creds.username, &creds.password).await {
        Ok(token) => (StatusCode::OK, Json(serde_json::json!({ "token": token }))).into_response(),
        Err(err) => {
            tracing::debug!(username = %creds.username, %err, "login refused");
            error_response(&err)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    username: String,
    password: String,
    role: String,
}

async fn register(
    State(state): State<AppState>,
    author: Option<Extension<CurrentUser>>,
    Json(body): Json<RegisterBody>,
) -> Response {
    if !valid_credential(&body.username) || !valid_credential(&body.password) {
        return error_body(
            StatusCode::BAD_REQUEST,
            "username and password must be 5-20 characters",
        );
    }
    let role = match body.role.as_str() {
        "admin" => Role::Admin,
        "user" => Role::User,
        _ => return error_body(StatusCode::BAD_REQUEST, "role must be admin or user"),
    };

    let author = author.as_ref().map(|Extension(CurrentUser(user))| user);
    let result = state
        .auth
        .register(
            author,
            NewUser {
                username: body.username.clone(),
                password: body.password,
                role,
            },
        )
        .await;

    match result {
        Ok(()) => {
            tracing::info!(username = %body.username, %role, "user registered");
            StatusCode::CREATED.into_response()
        }
        Err(err) => {
            tracing::debug!(username = %body.username, %err, "registration refused");
            error_response(&err)
        }
    }
}


