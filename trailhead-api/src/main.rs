use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use trailhead_api::middleware::JwtIdentityResolver;
use trailhead_api::{app, metrics::Metrics, worker, AppState};
use trailhead_booking::{MockPaymentProvider, StripeProvider};
use trailhead_core::payment::PaymentProvider;
use trailhead_store::{DbClient, EventProducer, KafkaNotifier, PgBookingStore, RedisClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trailhead_api=debug,trailhead_booking=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = trailhead_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Trailhead API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");
    let store = Arc::new(PgBookingStore::new(db.pool.clone()));

    // Redis Connection
    let redis = RedisClient::new(&config.redis.url)
        .await
        .expect("Failed to connect to Redis");

    // Kafka Connection
    let producer = EventProducer::new(&config.kafka.brokers).expect("Failed to create Kafka producer");
    let notifier = Arc::new(KafkaNotifier::new(producer, config.kafka.topic_prefix.clone()));

    // Payment provider; without an API key checkout runs against the in-process mock
    let provider: Arc<dyn PaymentProvider> = if config.stripe.api_key.is_empty() {
        tracing::warn!("No Stripe API key configured, using the mock payment provider");
        Arc::new(MockPaymentProvider::new())
    } else {
        Arc::new(
            StripeProvider::new(
                config.stripe.api_key.clone(),
                config.stripe.base_url.clone(),
                config.stripe.success_url.clone(),
                config.stripe.cancel_url.clone(),
                Duration::from_millis(config.stripe.timeout_ms),
            )
            .expect("Failed to build Stripe client"),
        )
    };

    let identity = Arc::new(JwtIdentityResolver::new(
        &config.auth.jwt_secret,
        config.auth.audience.as_deref(),
    ));
    let metrics = Arc::new(Metrics::new().expect("Failed to register metrics"));

    let app_state = AppState::new(&config, store, provider, notifier, identity, metrics)
        .with_rate_limiter(Arc::new(redis));

    tokio::spawn(worker::start_sweep_worker(
        app_state.clone(),
        Duration::from_secs(config.sweeper.interval_seconds),
    ));

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("Failed to bind");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
