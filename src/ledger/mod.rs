//! Order Ledger
//!
//! Append-only financial adjustments per order. The net total is always
//! recomputed as `base + sum(adjustments)`; no running total is stored.

mod repository;

pub use repository::{net_total, LedgerAdjustment, LedgerError, LedgerRepository};
