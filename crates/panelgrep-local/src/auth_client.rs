//! Typed client for the credential service RPC (JSON over HTTP).
//!
//! Three methods: login, register, validate. Status codes carry the error
//! kind across the wire: 401 invalid credentials/token, 403 forbidden,
//! 410 user gone. Anything else is a backend failure.

use panelgrep_core::{AuthService, Error, NewUser, Result, Role, User};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const LOGIN_PATH: &str = "/rpc/login";
pub const REGISTER_PATH: &str = "/rpc/register";
pub const VALIDATE_PATH: &str = "/rpc/validate";

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRpcRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRpcResponse {
    pub token: String,
}

/// The author travels as identity + role only; the credential service never
/// needs the author's hash to authorize an admin registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcAuthor {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRpcRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<RpcAuthor>,
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateRpcRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateRpcResponse {
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub error: String,
}

async fn error_text(resp: reqwest::Response) -> String {
    match resp.json::<RpcErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => "credential service error".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct RemoteAuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteAuthClient {
    pub fn new(base_url: &str) -> Result<Self> {
        url::Url::parse(base_url).map_err(|e| Error::Parse(format!("auth server url: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent("panelgrep/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Backend(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<Req: Serialize>(&self, path: &str, req: &Req) -> Result<reqwest::Response> {
        self.client
            .post(self.endpoint(path))
            .json(req)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("credential service unreachable: {e}")))
    }
}

#[async_trait::async_trait]
impl AuthService for RemoteAuthClient {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .post(
                LOGIN_PATH,
                &LoginRpcRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;

        match resp.status() {
            s if s.is_success() => {
                let body: LoginRpcResponse = resp
                    .json()
                    .await
                    .map_err(|e| Error::Parse(format!("login response: {e}")))?;
                Ok(body.token)
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(Error::InvalidCredentials),
            s => Err(Error::Backend(format!("login rpc HTTP {s}"))),
        }
    }

    async fn register(&self, author: Option<&User>, new_user: NewUser) -> Result<()> {
        let role = match new_user.role {
            Role::Undefined => Role::User,
            role => role,
        };
        let resp = self
            .post(
                REGISTER_PATH,
                &RegisterRpcRequest {
                    author: author.map(|a| RpcAuthor {
                        username: a.username.clone(),
                        role: a.role,
                    }),
                    username: new_user.username,
                    password: new_user.password,
                    role,
                },
            )
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::FORBIDDEN => Err(Error::Forbidden(error_text(resp).await)),
            s => Err(Error::Backend(format!("register rpc HTTP {s}"))),
        }
    }

    async fn validate_token(&self, token: &str) -> Result<User> {
        let resp = self
            .post(
                VALIDATE_PATH,
                &ValidateRpcRequest {
                    token: token.to_string(),
                },
            )
            .await?;

        match resp.status() {
            s if s.is_success() => {
                let body: ValidateRpcResponse = resp
                    .json()
                    .await
                    .map_err(|e| Error::Parse(format!("validate response: {e}")))?;
                Ok(User {
                    username: body.username,
                    // The hash stays inside the credential service.
                    password_hash: String::new(),
                    role: body.role,
                })
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(Error::InvalidToken(error_text(resp).await)),
            reqwest::StatusCode::GONE => Err(Error::UserGone(error_text(resp).await)),
            s => Err(Error::Backend(format!("validate rpc HTTP {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn login_round_trips_token_and_maps_401() {
        let app = Router::new().route(
            LOGIN_PATH,
            post(|Json(req): Json<LoginRpcRequest>| async move {
                if req.password == "s3cretpw" {
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({"token": "tok-123"})),
                    )
                } else {
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({"error": "invalid credentials"})),
                    )
                }
            }),
        );
        let addr = serve(app).await;
        let client = RemoteAuthClient::new(&format!("http://{addr}")).unwrap();

        let token = client.login("alice", "s3cretpw").await.unwrap();
        assert_eq!(token, "tok-123");

        let err = client.login("alice", "nope-nope").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials), "{err}");
    }

    #[tokio::test]
    async fn register_defaults_undefined_role_and_maps_403() {
        let app = Router::new().route(
            REGISTER_PATH,
            post(|Json(req): Json<RegisterRpcRequest>| async move {
                assert_eq!(req.role, Role::User);
                assert!(req.author.is_none());
                if req.username == "eve" {
                    (
                        StatusCode::FORBIDDEN,
                        Json(serde_json::json!({"error": "only an admin can create admins"})),
                    )
                } else {
                    (StatusCode::CREATED, Json(serde_json::json!({})))
                }
            }),
        );
        let addr = serve(app).await;
        let client = RemoteAuthClient::new(&format!("http://{addr}")).unwrap();

        client
            .register(
                None,
                NewUser {
                    username: "carol".to_string(),
                    password: "password1".to_string(),
                    role: Role::Undefined,
                },
            )
            .await
            .unwrap();

        let err = client
            .register(
                None,
                NewUser {
                    username: "eve".to_string(),
                    password: "password1".to_string(),
                    role: Role::Undefined,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)), "{err}");
    }

    #[tokio::test]
    async fn validate_maps_statuses_to_error_kinds() {
        let app = Router::new().route(
            VALIDATE_PATH,
            post(|Json(req): Json<ValidateRpcRequest>| async move {
                match req.token.as_str() {
                    "good" => (
                        StatusCode::OK,
                        Json(serde_json::json!({"username": "alice", "role": "admin"})),
                    ),
                    "gone" => (
                        StatusCode::GONE,
                        Json(serde_json::json!({"error": "user no longer exists"})),
                    ),
                    _ => (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({"error": "invalid token"})),
                    ),
                }
            }),
        );
        let addr = serve(app).await;
        let client = RemoteAuthClient::new(&format!("http://{addr}")).unwrap();

        let user = client.validate_token("good").await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, Role::Admin);
        assert!(user.password_hash.is_empty());

        assert!(matches!(
            client.validate_token("gone").await.unwrap_err(),
            Error::UserGone(_)
        ));
        assert!(matches!(
            client.validate_token("bad").await.unwrap_err(),
            Error::InvalidToken(_)
        ));
    }
}
