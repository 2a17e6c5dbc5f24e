mod analysis;
mod config;
mod credentials;
mod db;
mod errors;
mod llm_client;
mod models;
mod persistence;
mod progress;
mod queue;
mod routes;
mod state;
mod storage;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::analysis::model_resolver::ModelResolver;
use crate::analysis::{AnalysisInvoker, CandidateAnalyzer};
use crate::config::Config;
use crate::credentials::KeyPool;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::persistence::{PgCandidateRepository, PgCredentialStore, PgModelConfigStore};
use crate::progress::{Notifier, ProgressChannel, ProjectRooms, RedisProgressChannel};
use crate::queue::{spawn_janitor, AnalysisQueue};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3CvStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting screening API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;

    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Credential pool, loaded once up front so the first enqueue sizes correctly
    let credential_store = Arc::new(PgCredentialStore::new(
        db.clone(),
        config.key_default_max_requests,
    ));
    let pool = Arc::new(KeyPool::new(credential_store, config.key_cooldown));
    match pool.refresh().await {
        Ok(count) => info!("Loaded {count} active API credentials"),
        Err(e) => warn!("Initial credential load failed: {e}"),
    }

    let resolver = ModelResolver::new(Arc::new(PgModelConfigStore::new(db.clone())));
    let gateway = Arc::new(LlmClient::new(config.llm_api_url.clone(), config.llm_timeout)?);
    info!("LLM gateway initialized ({})", config.llm_api_url);
    let analyzer: Arc<dyn CandidateAnalyzer> =
        Arc::new(AnalysisInvoker::new(pool.clone(), resolver, gateway));

    let rooms = Arc::new(ProjectRooms::new());
    let mut channels: Vec<Arc<dyn ProgressChannel>> =
        vec![rooms.clone() as Arc<dyn ProgressChannel>];
    if let Some(url) = &config.redis_url {
        let client = redis::Client::open(url.as_str())?;
        channels.push(Arc::new(RedisProgressChannel::spawn(client)));
    }

    let repository = Arc::new(PgCandidateRepository::new(db));
    let queue = AnalysisQueue::new(
        pool.clone(),
        analyzer.clone(),
        repository.clone(),
        Notifier::new(channels),
        config.queue.clone(),
    );
    spawn_janitor(queue.clone(), pool, rooms.clone());

    let state = AppState {
        queue,
        analyzer,
        projects: repository.clone(),
        analyses: repository,
        cv_store: Arc::new(S3CvStore::new(s3, config.s3_bucket.clone())),
        rooms,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

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
        "screening-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    // MinIO needs path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}
