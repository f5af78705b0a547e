//! Concrete adapters behind the `panelgrep-core` ports: the remote catalog
//! fetcher, text processing, Postgres and Redis persistence, the credential
//! service (local and remote), and the update pipeline with its scheduler.

pub mod auth;
pub mod auth_client;
pub mod engine;
pub mod fetch;
pub mod index_store;
pub mod jsondb;
pub mod pg;
pub mod service;
pub mod text;

pub use auth::LocalAuthService;
pub use auth_client::RemoteAuthClient;
pub use engine::FtsSearchEngine;
pub use fetch::{ComicFetcher, SourceClient};
pub use index_store::RedisIndexStore;
pub use jsondb::{JsonCatalogStore, JsonIndexStore};
pub use pg::{PgCatalogStore, PgUserStore};
pub use service::CatalogService;
pub use text::TextProcessor;
