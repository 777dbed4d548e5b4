//! Domain module
//!
//! Core domain types shared by every storage-touching component.

pub mod error;
pub mod events;
pub mod money;
pub mod tenant;

pub use error::DomainError;
pub use events::OrderEvent;
pub use money::{CurrencyCode, Money, MoneyError};
pub use tenant::{TenantContext, TenantId};
