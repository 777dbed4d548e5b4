//! Idempotency module
//!
//! Exactly-once processing of externally retried write requests, backed by
//! a persisted lock record per `(tenant, key)`.

mod gate;
mod repository;

pub use gate::{decide, GateDecision, GateOutcome, IdempotencyGate, DEFAULT_LEASE};
pub use repository::{
    IdempotencyError, IdempotencyRecord, IdempotencyRepository, IdempotencyStatus, LeaseToken,
    StoredResponse,
};
