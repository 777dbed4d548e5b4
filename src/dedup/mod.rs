//! Canonical Resource Deduplication
//!
//! Maps structured input to exactly one row per tenant and scope, keyed by a
//! content hash of the canonical form. Safe under concurrent callers without
//! any application-level lock: the unique constraint decides the winner.

mod address;
mod repository;

pub use address::{AddressInput, CanonicalAddress};
pub use repository::{content_hash, Canonical, DedupError, DedupRepository, Resolved};
