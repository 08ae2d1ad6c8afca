use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::OutboxEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::store::ParkingStore;

const BATCH_SIZE: i64 = 100;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<()>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

/// Relays committed outbox rows to the event bus, at least once.
pub struct OutboxProcessor {
    store: Arc<dyn ParkingStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl OutboxProcessor {
    pub fn new(store: Arc<dyn ParkingStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publishes one batch; returns how many events went out.
    pub async fn process_outbox_events(&self) -> Result<usize> {
        let unprocessed_events = self.store.unprocessed_events(BATCH_SIZE).await?;

        let mut published = 0;
        for event in unprocessed_events {
            if let Err(e) = self.publisher.publish(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }

            self.store.mark_event_processed(event.id).await?;
            published += 1;
            info!(event_id = %event.id, event_type = %event.event_type, "Published outbox event");
        }

        Ok(published)
    }
}
