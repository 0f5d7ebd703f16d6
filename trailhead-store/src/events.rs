use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};
use trailhead_core::notify::Notifier;
use trailhead_core::{Booking, Transaction};
use trailhead_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, StayCompletedEvent, TOPIC_BOOKING_CANCELLED,
    TOPIC_BOOKING_CONFIRMED, TOPIC_STAY_COMPLETED,
};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Publishes lifecycle notifications as JSON events, keyed by booking id so
/// every event of one booking lands on the same partition.
pub struct KafkaNotifier {
    producer: EventProducer,
    topic_prefix: String,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer, topic_prefix: impl Into<String>) -> Self {
        Self {
            producer,
            topic_prefix: topic_prefix.into(),
        }
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}.{}", self.topic_prefix, suffix)
    }

    async fn send<T: serde::Serialize>(
        &self,
        suffix: &str,
        booking: &Booking,
        event: &T,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(event)?;
        self.producer
            .publish(&self.topic(suffix), &booking.id.to_string(), &payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn booking_confirmed(
        &self,
        booking: &Booking,
        transaction: &Transaction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event = BookingConfirmedEvent {
            booking_id: booking.id,
            listing_id: booking.listing_id,
            renter_id: booking.renter_id,
            start: booking.dates.start,
            end: booking.dates.end,
            provider_reference: transaction.provider_reference.clone(),
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.send(TOPIC_BOOKING_CONFIRMED, booking, &event).await
    }

    async fn booking_cancelled(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event = BookingCancelledEvent {
            booking_id: booking.id,
            listing_id: booking.listing_id,
            renter_id: booking.renter_id,
            reason: booking.cancel_reason.clone().unwrap_or_default(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.send(TOPIC_BOOKING_CANCELLED, booking, &event).await
    }

    async fn stay_completed(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let event = StayCompletedEvent {
            booking_id: booking.id,
            listing_id: booking.listing_id,
            renter_id: booking.renter_id,
            end: booking.dates.end,
            timestamp: chrono::Utc::now().timestamp(),
        };
        self.send(TOPIC_STAY_COMPLETED, booking, &event).await
    }
}
