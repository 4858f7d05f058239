use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use counter_cache::{KeyValueCache, RedisCache};
use s3_utils::{ObjectPresigner, S3Presigner};
use video_service::config::Config;
use video_service::handlers::{self, AppState};
use video_service::repository::{CounterStore, PgCounterStore};
use video_service::services::video::ThumbnailSettings;
use video_service::services::{CounterService, PresignedUrlCache, VideoService};
use video_service::workers::{AggregationConfig, AggregationScheduler};
use video_service::{db, metrics};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,video_service=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting video-service v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.env);

    // PostgreSQL
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;
    db::migrate(&pool)
        .await
        .context("Failed to run database migrations")?;
    let store: Arc<dyn CounterStore> = Arc::new(PgCounterStore::new(pool));

    // Redis
    let redis = RedisCache::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    redis.ping().await.context("Redis PING failed")?;
    info!("Redis connection established");
    let cache: Arc<dyn KeyValueCache> = Arc::new(redis);

    // Object storage
    let presigner = S3Presigner::with_config(config.s3.clone()).await;
    if let Err(e) = presigner.health_check().await {
        // Thumbnail URLs degrade to absent; counters keep working
        warn!(bucket = %config.s3.bucket, error = %e, "S3 health check failed");
    }
    let presigner: Arc<dyn ObjectPresigner> = Arc::new(presigner);

    let counters = CounterService::new(cache.clone(), store.clone());
    let urls = PresignedUrlCache::new(cache.clone(), presigner);
    let videos = VideoService::new(
        store.clone(),
        counters.clone(),
        urls,
        ThumbnailSettings::from(&config.s3),
    );

    let scheduler = Arc::new(AggregationScheduler::new(
        cache,
        store,
        AggregationConfig::from(&config.aggregation),
    ));
    let scheduler_handle = if config.aggregation.enabled {
        Some(scheduler.clone().start())
    } else {
        warn!("Aggregation scheduler disabled; cached deltas will not be flushed");
        None
    };

    let state = web::Data::new(AppState {
        counters,
        videos,
        scheduler,
    });
    let admin_enabled = config.aggregation.admin_enabled;
    let bind_address = config.bind_address();
    info!("HTTP server listening on {}", bind_address);

    let server = HttpServer::new(move || {
        let app = App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(handlers::configure_routes);

        if admin_enabled {
            app.configure(handlers::configure_internal_routes)
        } else {
            app
        }
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        server_handle.stop(true).await;
    });

    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    if let Some(handle) = scheduler_handle {
        handle.stop().await;
    }

    info!("video-service stopped");
    Ok(())
}
