use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parking_service::api;
use parking_service::clock::SystemClock;
use parking_service::config::{Config, GatewayKind};
use parking_service::gateway::{PaymentGateway, RazorpayGateway, SandboxGateway};
use parking_service::outbox::{KafkaPublisher, OutboxProcessor};
use parking_service::postgres::PgStore;
use parking_service::service::ParkingService;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let config = Config::parse();

    // Run migrations first
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&config.database_url)?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let manager = diesel_async::pooled_connection::AsyncDieselConnectionManager::<
        AsyncPgConnection,
    >::new(&config.database_url);
    let pool = Pool::builder().build(manager).await?;
    let store = Arc::new(PgStore::new(pool));

    let gateway: Arc<dyn PaymentGateway> = match config.gateway {
        GatewayKind::Razorpay => {
            if config.razorpay_key_id.is_empty() || config.razorpay_key_secret.is_empty() {
                anyhow::bail!(
                    "RAZORPAY_KEY_ID and RAZORPAY_KEY_SECRET are required for the razorpay gateway"
                );
            }
            Arc::new(RazorpayGateway::new(
                config.razorpay_key_id.clone(),
                config.razorpay_key_secret.clone(),
            ))
        }
        GatewayKind::Sandbox => {
            warn!("Using the sandbox payment gateway; no money will move");
            Arc::new(SandboxGateway::new(config.razorpay_key_secret.clone()))
        }
    };

    let service = ParkingService::new(
        store.clone(),
        gateway,
        Arc::new(SystemClock),
        config.core_settings(),
    );

    let reaper = service.reaper(config.reaper_interval());
    tokio::spawn(async move {
        reaper.run().await;
    });

    match &config.kafka_brokers {
        Some(brokers) => {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .create()?;
            let publisher = Arc::new(KafkaPublisher::new(producer, config.events_topic.clone()));
            let outbox_processor = OutboxProcessor::new(store.clone(), publisher);

            tokio::spawn(async move {
                outbox_processor.run().await;
            });
            info!("Relaying outbox events to topic {}", config.events_topic);
        }
        None => warn!("KAFKA_BROKERS not set; outbox events will accumulate unrelayed"),
    }

    let app = api::create_router(api::AppState { service });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    info!("Parking service started on port {}", config.port);
    info!("Parking API ready at http://0.0.0.0:{}/api/v1", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
