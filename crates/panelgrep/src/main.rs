use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use panelgrep::config::Config;
use panelgrep::http::{self, AppState};
use panelgrep::limiter::RateLimiter;
use panelgrep::rpc::{self, RpcState};
use panelgrep_core::{AuthService, ComicService, TokenProcessor};
use panelgrep_local::service::schedule_update;
use panelgrep_local::{
    CatalogService, ComicFetcher, FtsSearchEngine, JsonCatalogStore, JsonIndexStore,
    LocalAuthService, PgCatalogStore, PgUserStore, RedisIndexStore, RemoteAuthClient,
    SourceClient, TextProcessor,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "panelgrep")]
#[command(about = "Numbered-catalog ingest and ranked keyword search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the catalog/search HTTP server.
    Serve(ServeCmd),
    /// Run the credential service RPC server.
    AuthServe(AuthServeCmd),
    /// One-shot crawl into a file-backed catalog and index (no servers).
    Update(UpdateCmd),
    /// Ranked query against a file-backed catalog (json).
    Search(SearchCmd),
    /// Print version info (json).
    Version,
}

#[derive(Args, Debug)]
struct ServeCmd {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, default_value = "config.toml")]
    config: PathBuf,
    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 8080)]
    port: u16,
}

#[derive(Args, Debug)]
struct AuthServeCmd {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, default_value = "config.toml")]
    config: PathBuf,
    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 8081)]
    port: u16,
}

#[derive(Args, Debug)]
struct UpdateCmd {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, default_value = "config.toml")]
    config: PathBuf,
    /// Directory holding the JSON catalog and index files.
    #[arg(long, default_value = ".panelgrep")]
    db_dir: PathBuf,
}

#[derive(Args, Debug)]
struct SearchCmd {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, default_value = "config.toml")]
    config: PathBuf,
    /// Directory holding the JSON catalog and index files.
    #[arg(long, default_value = ".panelgrep")]
    db_dir: PathBuf,
    /// Free-text query.
    query: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs on stderr; stdout is reserved for command output (json).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(cmd) => serve(cmd).await,
        Commands::AuthServe(cmd) => auth_serve(cmd).await,
        Commands::Update(cmd) => update_once(cmd).await,
        Commands::Search(cmd) => search_once(cmd).await,
        Commands::Version => {
            println!(
                "{}",
                serde_json::json!({
                    "schema_version": 1,
                    "name": "panelgrep",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            );
            Ok(())
        }
    }
}

/// Base context for both servers: cancelled on SIGINT/SIGTERM.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::info!("shutdown signal received");
        token.cancel();
    });
    cancel
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn pg_pool(url: &str) -> Result<sqlx::PgPool> {
    PgPoolOptions::new()
        .max_connections(8)
        .connect(url)
        .await
        .context("connecting to postgres")
}

fn stop_words_path(config: &Config) -> Option<&Path> {
    if config.stop_words_file.is_empty() {
        None
    } else {
        Some(Path::new(&config.stop_words_file))
    }
}

async fn serve(cmd: ServeCmd) -> Result<()> {
    let config = Config::load(&cmd.config)?;
    let cancel = shutdown_token();

    let pool = pg_pool(&config.postgres_url).await?;
    let catalog = Arc::new(PgCatalogStore::new(pool.clone()));
    catalog.ensure_schema().await?;

    let processor: Arc<dyn TokenProcessor> =
        Arc::new(TextProcessor::new(&config.language, stop_words_path(&config))?);
    let source_client = SourceClient::new(
        &config.source_url,
        config.max_comics_load,
        config.parallel,
        config.gaps_limit,
    )?;
    let source = Arc::new(ComicFetcher::new(source_client, processor.clone()));

    let index_store = Arc::new(
        RedisIndexStore::connect(&config.redis_url)
            .await
            .context("connecting to redis")?,
    );
    let engine = Arc::new(FtsSearchEngine::new(index_store));

    let service: Arc<dyn ComicService> = Arc::new(CatalogService::new(
        source,
        catalog,
        processor,
        engine,
    ));

    let auth: Arc<dyn AuthService> = if config.auth_server_url.is_empty() {
        let users = Arc::new(PgUserStore::new(pool));
        users.ensure_schema().await?;
        let secret = config.require_token_secret()?;
        Arc::new(LocalAuthService::new(
            users,
            Duration::from_secs(config.token_max_time * 60),
            secret,
        ))
    } else {
        Arc::new(RemoteAuthClient::new(&config.auth_server_url)?)
    };

    schedule_update(service.clone(), cancel.clone(), config.update_time()?);

    let state = AppState {
        service,
        auth,
        limiter: Arc::new(RateLimiter::new(config.rate_limit, config.max_tokens)),
        concurrency: Arc::new(Semaphore::new(config.concurrency_limit)),
        cancel: cancel.clone(),
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], cmd.port)))
        .await
        .context("binding catalog server port")?;
    tracing::info!(port = cmd.port, "catalog server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.clone().cancelled_owned())
    .await
    .context("serving catalog http")?;

    tracing::info!("catalog server stopped");
    Ok(())
}

/// Assembles the file-backed catalog service shared by the one-shot
/// `update` and `search` commands.
fn file_backed_service(config: &Config, db_dir: &Path) -> Result<Arc<dyn ComicService>> {
    let processor: Arc<dyn TokenProcessor> =
        Arc::new(TextProcessor::new(&config.language, stop_words_path(config))?);
    let source_client = SourceClient::new(
        &config.source_url,
        config.max_comics_load,
        config.parallel,
        config.gaps_limit,
    )?;
    let source = Arc::new(ComicFetcher::new(source_client, processor.clone()));
    let catalog = Arc::new(JsonCatalogStore::new(db_dir.join("catalog.json")));
    let engine = Arc::new(FtsSearchEngine::new(Arc::new(JsonIndexStore::new(
        db_dir.join("index.json"),
    ))));
    let service: Arc<dyn ComicService> =
        Arc::new(CatalogService::new(source, catalog, processor, engine));
    Ok(service)
}

async fn update_once(cmd: UpdateCmd) -> Result<()> {
    let config = Config::load(&cmd.config)?;
    let cancel = shutdown_token();
    let service = file_backed_service(&config, &cmd.db_dir)?;

    let before = service.total().await?;
    service.update(&cancel).await?;
    let after = service.total().await?;

    println!(
        "{}",
        serde_json::json!({ "new": after - before, "total": after })
    );
    Ok(())
}

async fn search_once(cmd: SearchCmd) -> Result<()> {
    let config = Config::load(&cmd.config)?;
    let service = file_backed_service(&config, &cmd.db_dir)?;

    let urls = service.search(&cmd.query).await?;
    println!(
        "{}",
        serde_json::json!({ "query": cmd.query, "found": urls.len(), "urls": urls })
    );
    Ok(())
}

async fn auth_serve(cmd: AuthServeCmd) -> Result<()> {
    let config = Config::load(&cmd.config)?;
    let secret = config.require_token_secret()?.to_string();
    let cancel = shutdown_token();

    let pool = pg_pool(&config.postgres_url).await?;
    let users = Arc::new(PgUserStore::new(pool));
    users.ensure_schema().await?;

    let auth: Arc<dyn AuthService> = Arc::new(LocalAuthService::new(
        users,
        Duration::from_secs(config.token_max_time * 60),
        &secret,
    ));
    let app = rpc::router(RpcState { auth });

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], cmd.port)))
        .await
        .context("binding credential server port")?;
    tracing::info!(port = cmd.port, "credential server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("serving credential rpc")?;

    tracing::info!("credential server stopped");
    Ok(())
}
