mod catalog;
mod config;
mod db;
mod dedup;
mod delivery;
mod errors;
mod locks;
mod lww;
mod models;
mod places;
mod prompt;
mod render;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::catalog::pg::PgStore;
use crate::catalog::store::Store;
use crate::config::Config;
use crate::db::create_pool;
use crate::delivery::coordinator::{Coordinator, DeliveryPolicy};
use crate::locks::RedisLockManager;
use crate::prompt::embed::HashingEmbedder;
use crate::prompt::similarity::LinearScanIndex;
use crate::render::transcode::PngTranscoder;
use crate::render::HttpRenderProvider;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3ObjectStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Soulmedia API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let pool = create_pool(&config.database_url).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    // Initialize Redis (generation work locks)
    let redis = redis::Client::open(config.redis_url.clone())?;
    let locks = Arc::new(RedisLockManager::new(redis));
    info!("Redis client initialized");

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let objects = Arc::new(S3ObjectStore::new(s3, config.s3_bucket.clone()));
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Initialize the generation provider
    let provider = Arc::new(HttpRenderProvider::new(
        config.render_api_url.clone(),
        config.render_api_key.clone(),
        config.render_timeout,
    ));
    info!("Render provider initialized ({})", config.render_api_url);

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        Arc::new(HashingEmbedder::default()),
        Arc::new(LinearScanIndex),
        provider,
        Arc::new(PngTranscoder),
        objects,
        locks,
        DeliveryPolicy {
            similarity_threshold: config.similarity_threshold,
            phash_reject_distance: config.phash_reject_distance,
            max_dedup_attempts: config.max_dedup_attempts,
            lock_ttl: config.lock_ttl,
            render_timeout: config.render_timeout,
        },
    ));

    // Build app state
    let state = AppState {
        store,
        coordinator,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "soulmedia-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
