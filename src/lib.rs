//! logistics_core Library
//!
//! Tenant-isolated transactional substrate: money arithmetic, tenant
//! context propagation, request idempotency, an append-only order ledger,
//! canonical resource deduplication and a transactional outbox.

pub mod api;
pub mod config;
pub mod db;
pub mod dedup;
pub mod domain;
mod error;
pub mod idempotency;
pub mod ledger;
pub mod outbox;

pub use config::Config;
pub use domain::{CurrencyCode, DomainError, Money, MoneyError, OrderEvent};
pub use domain::{TenantContext, TenantId};
pub use error::{AppError, AppResult};
