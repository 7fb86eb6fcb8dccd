use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LoggingConfig, TurnstileConfig};
use turnstile::health::ServiceHealth;
use turnstile::http::{self, AppState, HttpServer};
use turnstile::ratelimit::{
    IdentityResolver, InMemoryKeyRegistry, KeyOverrideStore, KeyRegistry, PgKeyRegistry,
    RateLimiter, RouteTable, SlidingWindowCounter, Switches, SystemClock, TtlCache,
};
use turnstile::store::{CounterStore, InMemoryCounterStore, RedisCounterStore, StoreConfig};

/// Distributed admission control for a public data API.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file; environment variables prefixed
    /// with TURNSTILE__ override it
    #[arg(short, long, env = "TURNSTILE_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = TurnstileConfig::load(args.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Starting Turnstile admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limits = &config.rate_limiting;
    let switches = Switches::from(limits);
    info!(
        http_addr = %config.server.http_addr,
        enforce = switches.enforce,
        emergency_mode = switches.emergency_mode,
        "Configuration loaded"
    );

    let routes = match &limits.routes_path {
        Some(path) => RouteTable::from_file(path)?,
        None => {
            warn!("No route table configured, every route is unlimited");
            RouteTable::new()
        }
    };
    info!(routes = routes.routes.len(), "Route table loaded");
    limits.validate_retention(&routes)?;

    let store_config = StoreConfig {
        retention: limits.retention(),
        key_prefix: limits.key_prefix.clone(),
    };
    let store: Arc<dyn CounterStore> = match &config.redis.url {
        Some(url) => Arc::new(RedisCounterStore::connect(url, store_config).await?),
        None => {
            warn!("No Redis configured, counters are local to this process");
            Arc::new(InMemoryCounterStore::with_config(store_config))
        }
    };

    let registry: Arc<dyn KeyRegistry> = match &config.postgres.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.postgres.max_connections)
                .connect(url)
                .await?;
            info!("Connected to key registry");
            Arc::new(PgKeyRegistry::new(pool))
        }
        None => {
            warn!("No key registry configured, every API key is treated as unknown");
            Arc::new(InMemoryKeyRegistry::new())
        }
    };

    let resolver = IdentityResolver::new(
        registry.clone(),
        TtlCache::new(limits.cache_capacity, limits.cache_ttl()),
    )
    .with_key_prefix(limits.api_key_prefix.clone())
    .with_account_groups(limits.account_groups.clone());
    let overrides = KeyOverrideStore::new(
        registry,
        TtlCache::new(limits.cache_capacity, limits.cache_ttl()),
    );
    let counter = SlidingWindowCounter::new(store, Arc::new(SystemClock));

    let limiter = Arc::new(RateLimiter::new(routes, resolver, overrides, counter, switches)?);
    info!("Rate limiter initialized");

    let state = AppState::new(limiter, ServiceHealth::new());
    let server = HttpServer::new(config.server.http_addr, http::router(state));

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile admission service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
