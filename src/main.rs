//! querydock server
//!
//! Serves the connection manager over a local HTTP API. Logical connections
//! are persisted in `<data-dir>/querydock.db` and restored on demand.

use clap::Parser;
use querydock::api::{create_router, ApiState};
use querydock::db::register_builtin_plugins;
use querydock::storage::{default_data_dir, SqliteStore};
use querydock::{AppConfig, ConnectionManager, PluginRegistry, PoolSettings};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "querydock-server")]
#[command(author, version, about = "Local SQL client backend", long_about = None)]
struct Args {
    /// API port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Address to bind the API to
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Directory holding the settings store
    #[arg(long, env = "QUERYDOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, env = "QUERYDOCK_LOG", default_value = "info")]
    log_level: String,

    /// Maximum physical connections per pool
    #[arg(long, default_value = "10")]
    pool_max_size: u32,

    /// Idle connections kept open per pool (0 disables)
    #[arg(long, default_value = "1")]
    pool_min_idle: u32,

    #[arg(long, default_value = "30000")]
    pool_idle_timeout_ms: u64,

    #[arg(long, default_value = "5000")]
    pool_connect_timeout_ms: u64,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AppConfig> {
        anyhow::ensure!(self.pool_max_size > 0, "--pool-max-size must be at least 1");

        let data_dir = match self.data_dir {
            Some(dir) => dir,
            None => default_data_dir()?,
        };

        Ok(AppConfig {
            bind: SocketAddr::new(self.bind, self.port),
            data_dir,
            pool: PoolSettings {
                max_size: self.pool_max_size,
                min_idle: self.pool_min_idle,
                idle_timeout_ms: self.pool_idle_timeout_ms,
                connect_timeout_ms: self.pool_connect_timeout_ms,
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config()?;
    run(config).await
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store = SqliteStore::open_in(&config.data_dir)?;
    tracing::info!(path = %store.db_path().display(), "opened settings store");

    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry, &config.pool).await;

    let manager = Arc::new(ConnectionManager::new(registry, Arc::new(store)));
    let app = create_router(ApiState::new(Arc::clone(&manager)));

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.close_all_pools().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["querydock-server", "--data-dir", "/tmp/querydock-test"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_rejects_empty_pool() {
        let err = parse(&["--pool-max-size", "0"]).into_config().unwrap_err();
        assert!(err.to_string().contains("--pool-max-size"));
    }

    #[test]
    fn test_into_config() {
        let config = parse(&["--port", "9000", "--pool-max-size", "4", "--pool-min-idle", "0"])
            .into_config()
            .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("/tmp/querydock-test"));
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.min_idle(), None);
    }
}
