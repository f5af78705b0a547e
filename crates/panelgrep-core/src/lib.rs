use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cancelled")]
    Cancelled,
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    Backend(String),
    #[error("remote returned HTTP {status}")]
    RemoteHttp { status: u16 },
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("parse failure: {0}")]
    Parse(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("user no longer exists: {0}")]
    UserGone(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited")]
    RateLimited,
    #[error("capacity exceeded")]
    CapacityExceeded,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Catalog item id. The remote exposes it as `num`; it is positive and the
/// numbering is sparse (gaps are legitimate).
pub type ComicId = i32;

/// One catalog item: an immutable image URL plus the processed keyword
/// tokens. Token order preserves first occurrence; duplicates carry
/// frequency into the index and must not be removed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comic {
    #[serde(rename = "url")]
    pub img: String,
    pub keywords: Vec<String>,
}

pub type Comics = BTreeMap<ComicId, Comic>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Undefined,
    User,
    Admin,
}

impl Role {
    /// Role-dominance relation: `Admin` satisfies any requirement, `User`
    /// satisfies `User`, `Undefined` satisfies nothing.
    pub fn satisfies(self, required: Role) -> bool {
        match (self, required) {
            (Role::Admin, _) => true,
            (Role::User, Role::User) => true,
            (Role::User, _) => false,
            (Role::Undefined, _) => false,
        }
    }

    pub fn parse(s: &str) -> Role {
        match s {
            "admin" => Role::Admin,
            "user" => Role::User,
            _ => Role::Undefined,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Undefined => "undefined",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored user. Only the salted adaptive hash is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

/// Registration input. The plaintext password exists only at this boundary;
/// the credential service hashes it before anything is stored.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role: Role,
}

/// Result of a crawl pass. `comics` may be non-empty even when `error` is
/// set: fetches that completed before the failure are kept so the caller
/// can persist partial progress.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub comics: Comics,
    pub error: Option<Error>,
}

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts all items in one transaction; either every row commits or none.
    async fn save(&self, comics: &Comics) -> Result<()>;
    async fn get_all(&self) -> Result<Comics>;
    /// `Error::NotFound` when the id has no row.
    async fn get_by_id(&self, id: ComicId) -> Result<Comic>;
    async fn get_all_ids(&self) -> Result<BTreeSet<ComicId>>;
    async fn total(&self) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn save(&self, user: &User) -> Result<()>;
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;
}

/// Free text to normalized keyword tokens. Pure with respect to
/// (text, language, stop-word set); duplicates are preserved.
pub trait TokenProcessor: Send + Sync {
    fn full_process(&self, text: &str) -> Result<Vec<String>>;
}

#[async_trait::async_trait]
pub trait ComicSource: Send + Sync {
    /// Crawls the remote namespace, skipping `existing` ids. Never fails
    /// outright: transport or processing failures end the pass early and are
    /// reported in the outcome alongside whatever completed.
    async fn fetch_missing(
        &self,
        cancel: &CancellationToken,
        existing: &BTreeSet<ComicId>,
    ) -> FetchOutcome;
}

#[async_trait::async_trait]
pub trait SearchEngine: Send + Sync {
    /// Ranked ids for the query tokens, best first, at most the engine's
    /// result cap.
    async fn search(&self, query_tokens: &[String]) -> Result<Vec<ComicId>>;
    /// Folds items into the index. Idempotent per id: already-indexed items
    /// are skipped, so re-running after a partial failure cannot
    /// double-count.
    async fn add(&self, comics: &Comics) -> Result<()>;
}

#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// `Error::InvalidCredentials` for a wrong password and for an unknown
    /// username alike; callers cannot distinguish the two.
    async fn login(&self, username: &str, password: &str) -> Result<String>;
    /// Creating an admin requires an admin `author`.
    async fn register(&self, author: Option<&User>, new_user: NewUser) -> Result<()>;
    /// Parses and verifies the token, then re-reads the user from the store.
    async fn validate_token(&self, token: &str) -> Result<User>;
}

#[async_trait::async_trait]
pub trait ComicService: Send + Sync {
    async fn update(&self, cancel: &CancellationToken) -> Result<()>;
    /// Ranked image URLs for a free-text query.
    async fn search(&self, query: &str) -> Result<Vec<String>>;
    async fn total(&self) -> Result<u64>;
}
