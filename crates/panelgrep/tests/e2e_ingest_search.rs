//! End-to-end contract: a fresh stack ingests a mock remote catalog through
//! `POST /update`, then answers ranked queries through `GET /pics`, with the
//! guardrails and the credential service in the loop.

use axum::body::Body;
use axum::extract::{ConnectInfo, Path};
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use panelgrep::http::{router, AppState};
use panelgrep::limiter::RateLimiter;
use panelgrep_core::{
    CatalogStore, Comic, ComicId, Comics, Result as CoreResult, Role, User, UserStore,
};
use panelgrep_fts::{IndexStore, Posting};
use panelgrep_local::auth::{hash_password, LocalAuthService};
use panelgrep_local::{CatalogService, ComicFetcher, FtsSearchEngine, SourceClient, TextProcessor};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Default)]
struct MemoryCatalog {
    comics: Mutex<Comics>,
}

#[async_trait::async_trait]
impl CatalogStore for MemoryCatalog {
    async fn save(&self, comics: &Comics) -> CoreResult<()> {
        self.comics.lock().unwrap().extend(comics.clone());
        Ok(())
    }

    async fn get_all(&self) -> CoreResult<Comics> {
        Ok(self.comics.lock().unwrap().clone())
    }

    async fn get_by_id(&self, id: ComicId) -> CoreResult<Comic> {
        self.comics
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| panelgrep_core::Error::NotFound(format!("comic {id}")))
    }

    async fn get_all_ids(&self) -> CoreResult<BTreeSet<ComicId>> {
        Ok(self.comics.lock().unwrap().keys().copied().collect())
    }

    async fn total(&self) -> CoreResult<u64> {
        Ok(self.comics.lock().unwrap().len() as u64)
    }
}

#[derive(Default)]
struct MemoryIndexStore {
    postings: Mutex<BTreeMap<String, BTreeMap<ComicId, Posting>>>,
    indexed: Mutex<BTreeSet<ComicId>>,
}

#[async_trait::async_trait]
impl IndexStore for MemoryIndexStore {
    async fn postings(&self, token: &str) -> CoreResult<Vec<Posting>> {
        Ok(self
            .postings
            .lock()
            .unwrap()
            .get(token)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default())
    }

    async fn apply(
        &self,
        patch: &BTreeMap<String, Vec<Posting>>,
        indexed: &BTreeSet<ComicId>,
    ) -> CoreResult<()> {
        let mut postings = self.postings.lock().unwrap();
        for (token, list) in patch {
            let entry = postings.entry(token.clone()).or_default();
            for p in list {
                entry
                    .entry(p.id)
                    .and_modify(|e| e.score += p.score)
                    .or_insert(*p);
            }
        }
        self.indexed.lock().unwrap().extend(indexed.iter().copied());
        Ok(())
    }

    async fn is_indexed(&self, id: ComicId) -> CoreResult<bool> {
        Ok(self.indexed.lock().unwrap().contains(&id))
    }
}

#[derive(Default)]
struct MemoryUserStore {
    users: Mutex<BTreeMap<String, User>>,
}

#[async_trait::async_trait]
impl UserStore for MemoryUserStore {
    async fn save(&self, user: &User) -> CoreResult<()> {
        self.users
            .lock()
            .unwrap()
            .insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn get_by_username(&self, username: &str) -> CoreResult<Option<User>> {
        Ok(self.users.lock().unwrap().get(username).cloned())
    }
}

/// Remote with items 1 and 2; everything else is a gap.
async fn mock_remote() -> SocketAddr {
    let app = Router::new().route(
        "/:id/info.0.json",
        get(|Path(id): Path<ComicId>| async move {
            let item = |title: &str, alt: &str| {
                Json(serde_json::json!({
                    "num": id,
                    "title": title,
                    "img": format!("https://example.com/{id}.png"),
                    "transcript": "",
                    "alt": alt,
                }))
            };
            match id {
                1 => item("Checkup", "An apple a day keeps the doctor away").into_response(),
                2 => item("Snack", "Just an apple").into_response(),
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn full_stack() -> (Router, Arc<MemoryUserStore>) {
    let remote = mock_remote().await;

    let processor = Arc::new(TextProcessor::new("en", None).unwrap());
    let client = SourceClient::new(&format!("http://{remote}"), 0, 2, 2).unwrap();
    let source = Arc::new(ComicFetcher::new(client, processor.clone()));
    let catalog = Arc::new(MemoryCatalog::default());
    let engine = Arc::new(FtsSearchEngine::new(Arc::new(MemoryIndexStore::default())));
    let service = Arc::new(CatalogService::new(source, catalog, processor, engine));

    let users = Arc::new(MemoryUserStore::default());
    let auth = Arc::new(LocalAuthService::new(
        users.clone(),
        Duration::from_secs(600),
        "e2e-test-secret",
    ));

    let state = AppState {
        service,
        auth,
        limiter: Arc::new(RateLimiter::new(1000, 1000)),
        concurrency: Arc::new(Semaphore::new(16)),
        cancel: CancellationToken::new(),
    };
    (router(state), users)
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let mut req = builder.body(body).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4711))));
    req
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let resp = app
        .clone()
        .oneshot(request(
            "POST",
            "/login",
            None,
            Some(serde_json::json!({"username": username, "password": password})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn ingest_then_ranked_search() {
    let (app, users) = full_stack().await;

    // Bootstrap an admin directly in the store; everyone else goes through
    // the HTTP surface.
    users
        .save(&User {
            username: "rootadmin".to_string(),
            password_hash: hash_password("rootpass1").unwrap(),
            role: Role::Admin,
        })
        .await
        .unwrap();
    let admin_token = login(&app, "rootadmin", "rootpass1").await;

    // Ingest: items 1 and 2 exist, id 3+ are gaps.
    let resp = app
        .clone()
        .oneshot(request("POST", "/update", Some(&admin_token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body, serde_json::json!({"new": 2, "total": 2}));

    // Both query terms hit item 1; only one hits item 2.
    let resp = app
        .clone()
        .oneshot(request(
            "GET",
            "/pics?search=apple+doctor",
            Some(&admin_token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let urls = body_json(resp).await;
    assert_eq!(
        urls,
        serde_json::json!(["https://example.com/1.png", "https://example.com/2.png"])
    );

    // Re-running the update finds nothing new and double-counts nothing.
    let resp = app
        .clone()
        .oneshot(request("POST", "/update", Some(&admin_token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body, serde_json::json!({"new": 0, "total": 2}));

    let resp = app
        .clone()
        .oneshot(request(
            "GET",
            "/pics?search=apple+doctor",
            Some(&admin_token),
            None,
        ))
        .await
        .unwrap();
    let urls = body_json(resp).await;
    assert_eq!(
        urls,
        serde_json::json!(["https://example.com/1.png", "https://example.com/2.png"])
    );
}

#[tokio::test]
async fn roles_gate_the_surface_end_to_end() {
    let (app, users) = full_stack().await;

    users
        .save(&User {
            username: "rootadmin".to_string(),
            password_hash: hash_password("rootpass1").unwrap(),
            role: Role::Admin,
        })
        .await
        .unwrap();

    // Anonymous registration of a plain user, then login.
    let resp = app
        .clone()
        .oneshot(request(
            "POST",
            "/register",
            None,
            Some(serde_json::json!({"username": "alice", "password": "s3cretpw", "role": "user"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let user_token = login(&app, "alice", "s3cretpw").await;

    // A plain user cannot trigger updates, and anonymous callers get 401.
    let resp = app
        .clone()
        .oneshot(request("POST", "/update", Some(&user_token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = app
        .clone()
        .oneshot(request("POST", "/update", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // A plain user asking to create an admin gets 403; an admin succeeds.
    let resp = app
        .clone()
        .oneshot(request(
            "POST",
            "/register",
            Some(&user_token),
            Some(serde_json::json!({"username": "newadmin", "password": "password1", "role": "admin"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let admin_token = login(&app, "rootadmin", "rootpass1").await;
    let resp = app
        .clone()
        .oneshot(request(
            "POST",
            "/register",
            Some(&admin_token),
            Some(serde_json::json!({"username": "newadmin", "password": "password1", "role": "admin"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Searching works for plain users once authenticated.
    let resp = app
        .clone()
        .oneshot(request("GET", "/pics?search=apple", Some(&user_token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
