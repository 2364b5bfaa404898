mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use murmur_api::password::Argon2Hasher;
use murmur_api::{AppState, AppStateInner, AuthGate, SessionManager, TokenCodec};
use murmur_cache::{KvStore, MemoryKv, RecentCache, RedisKv, TokenStore};
use murmur_db::Database;
use murmur_ingest::{IngestionPipeline, MessageProducer, PipelineConfig, consume, topic};
use murmur_types::models::Role;

use crate::config::Config;

/// How often the in-process store drops expired keys nobody has touched.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "murmur=debug,murmur_api=debug,murmur_ingest=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    for username in &config.admin_usernames {
        if db.set_user_role(username, Role::Admin)? {
            info!("Granted ADMIN to {}", username);
        } else {
            warn!("Admin user {} does not exist yet", username);
        }
    }

    // Key-value store
    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisKv::connect(url).await?),
        None => {
            let memory = Arc::new(MemoryKv::new());
            tokio::spawn(murmur_cache::memory::run_expiry_sweep(
                memory.clone(),
                EXPIRY_SWEEP_INTERVAL,
            ));
            info!("Using in-process key-value store");
            memory
        }
    };
    let tokens = TokenStore::new(kv.clone());
    let recent = RecentCache::new(kv, config.message_cache_ttl);

    // Ingestion: topic -> consumer -> worker pool
    let pipeline = IngestionPipeline::start(
        db.clone(),
        recent.clone(),
        PipelineConfig {
            workers: config.ingest_workers,
            queue_depth: config.ingest_queue,
            recent_limit: config.recent_limit,
        },
    );
    let (producer, subscription) = topic(config.topic_capacity);
    let consumer = tokio::spawn(consume(subscription, pipeline));

    // Shared state
    let codec = Arc::new(TokenCodec::new(&config.tokens));
    let sessions = SessionManager::new(
        db.clone(),
        Arc::new(Argon2Hasher::default()),
        codec.clone(),
        tokens.clone(),
    );
    let state: AppState = Arc::new(AppStateInner {
        db,
        sessions,
        gate: AuthGate::new(codec, tokens),
        recent,
        producer: MessageProducer::new(producer),
    });

    let app = murmur_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last producer; once it is gone the consumer drains
    // the topic and the workers.
    info!("Draining ingestion pipeline...");
    if let Err(e) = consumer.await {
        warn!("Ingest consumer ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
