//! Outbox Publisher
//!
//! Delivery seam between the outbox and whatever transport carries events
//! downstream.

use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

use super::OutboxEvent;

/// Delivers a batch of events.
///
/// Returns the ids of events that were accepted downstream. Every other
/// event in the batch counts as a failed attempt and is retried with
/// backoff. Delivery is at-least-once: a crash after publishing but before
/// the batch commits publishes those events again.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, events: &[OutboxEvent]) -> HashSet<Uuid>;
}

/// Publisher that logs each event and acknowledges all of them
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

#[async_trait]
impl Publisher for TracingPublisher {
    async fn publish(&self, events: &[OutboxEvent]) -> HashSet<Uuid> {
        events
            .iter()
            .map(|event| {
                tracing::info!(
                    event_id = %event.id,
                    tenant_id = %event.tenant_id,
                    aggregate_type = %event.aggregate_type,
                    aggregate_id = %event.aggregate_id,
                    event_type = %event.event_type,
                    retry_count = event.retry_count,
                    "Publishing outbox event"
                );
                event.id
            })
            .collect()
    }
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for std::sync::Arc<P> {
    async fn publish(&self, events: &[OutboxEvent]) -> HashSet<Uuid> {
        (**self).publish(events).await
    }
}
