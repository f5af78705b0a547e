//! The credential service's RPC surface: three JSON-over-HTTP methods
//! consumed by the catalog service (and by `RemoteAuthClient`).
//!
//! Status codes carry the error kind: 401 invalid credentials/token,
//! 403 forbidden, 410 user gone, 500 backend.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use panelgrep_core::{AuthService, Error, NewUser, User};
use panelgrep_local::auth_client::{
    LoginRpcRequest, LoginRpcResponse, RegisterRpcRequest, RpcErrorBody, ValidateRpcRequest,
    ValidateRpcResponse, LOGIN_PATH, REGISTER_PATH, VALIDATE_PATH,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct RpcState {
    pub auth: Arc<dyn AuthService>,
}

pub fn router(state: RpcState) -> Router {
    Router::new()
        .route(LOGIN_PATH, post(login))
        .route(REGISTER_PATH, post(register))
        .route(VALIDATE_PATH, post(validate))
        .with_state(state)
}

fn rpc_error(err: &Error) -> Response {
    let status = match err {
        Error::InvalidCredentials | Error::InvalidToken(_) => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::UserGone(_) => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "credential service error".to_string()
    } else {
        err.to_string()
    };
    (status, Json(RpcErrorBody { error: message })).into_response()
}

async fn login(State(state): State<RpcState>, Json(req): Json<LoginRpcRequest>) -> Response {
    tracing::info!(username = %req.username, "rpc login");
    match state.auth.login(&req.username, &req.password).await {
        Ok(token) => (StatusCode::OK, Json(LoginRpcResponse { token })).into_response(),
        Err(err) => rpc_error(&err),
    }
}

async fn register(State(state): State<RpcState>, Json(req): Json<RegisterRpcRequest>) -> Response {
    tracing::info!(username = %req.username, "rpc register");
    let author = req.author.map(|a| User {
        username: a.username,
        password_hash: String::new(),
        role: a.role,
    });

    let result = state
        .auth
        .register(
            author.as_ref(),
            NewUser {
                username: req.username,
                password: req.password,
                role: req.role,
            },
        )
        .await;

    match result {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => {
            tracing::debug!(%err, "rpc register refused");
            rpc_error(&err)
        }
    }
}

async fn validate(State(state): State<RpcState>, Json(req): Json<ValidateRpcRequest>) -> Response {
    match state.auth.validate_token(&req.token).await {
        Ok(user) => (
            StatusCode::OK,
            Json(ValidateRpcResponse {
                username: user.username,
                role: user.role,
            }),
        )
            .into_response(),
        Err(err) => {
            tracing::debug!(%err, "rpc validate refused");
            rpc_error(&err)
        }
    }
}
