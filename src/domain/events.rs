//! Domain Events
//!
//! Facts published through the transactional outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Money;

/// Order-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    /// A financial adjustment was appended to the order's ledger
    OrderAdjustmentRecorded {
        order_id: Uuid,
        adjustment_id: String,
        amount: Money,
        reason: String,
        authorized_by: String,
        recorded_at: DateTime<Utc>,
    },
}

impl OrderEvent {
    pub const AGGREGATE_TYPE: &'static str = "Order";

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderAdjustmentRecorded { .. } => "OrderAdjustmentRecorded",
        }
    }

    /// Get the order ID this event relates to
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::OrderAdjustmentRecorded { order_id, .. } => *order_id,
        }
    }
}
