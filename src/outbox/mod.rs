//! Transactional Outbox
//!
//! Domain events are written in the same transaction as the business
//! mutation they describe and drained asynchronously by a background worker
//! with retry, exponential backoff and dead-lettering.

mod publisher;
mod repository;
mod worker;

pub use publisher::{Publisher, TracingPublisher};
pub use repository::{
    emit, plan_transition, BatchReport, NewOutboxEvent, OutboxError, OutboxEvent,
    OutboxRepository, OutboxStatus, RetryPolicy, Transition,
};
pub use worker::{
    next_poll, BatchSource, NextPoll, OutboxProcessor, OutboxWorker, OutboxWorkerConfig,
    OutboxWorkerHandle, WorkerStats,
};
