use anyhow::Result;
use axum::Router;
use object_gateway::{
    StorageGateway,
    config::AppConfig,
    routes,
    services::{
        blob_client::ObjectStoreClient,
        cache_store::{CacheStore, MemoryCacheStore, SqliteCacheStore},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting object-gateway with config: {:?}", cfg);

    // --- Stat cache store ---
    let cache_store: Arc<dyn CacheStore> = if cfg.cache_url.starts_with("sqlite:") {
        let store = connect_sqlite(&cfg.cache_url).await?;
        store.migrate().await?;
        if migrate {
            tracing::info!("Stat cache migration complete.");
            return Ok(()); // exit after migration
        }
        let purged = store.purge_expired().await?;
        tracing::debug!("Purged {} expired stat cache entries", purged);
        Arc::new(store)
    } else {
        if migrate {
            tracing::info!("Cache store {} needs no migration.", cfg.cache_url);
            return Ok(());
        }
        Arc::new(MemoryCacheStore::new())
    };

    // --- Blob store + gateway ---
    let client = ObjectStoreClient::from_url(&cfg.store_url)?;
    tracing::info!("Using blob store {:?}", client);

    let gateway = StorageGateway::new(Arc::new(client), cache_store, cfg.gateway_config());
    for (container, prefix) in gateway.containers().containers() {
        tracing::debug!("Container {} => prefix `{}`", container, prefix);
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(gateway);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite stat cache, creating the database file and its parent
/// directory when they are missing.
async fn connect_sqlite(url: &str) -> Result<SqliteCacheStore> {
    tracing::debug!("Connecting using raw URL => {}", url);

    let db_path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(SqliteCacheStore::new(Arc::new(db)))
}
