//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

use super::money::MoneyError;

/// Domain-specific errors
///
/// These errors represent business rule violations and domain invariant failures.
/// They are independent of the web/infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Bad input shape (non-integer money, malformed tenant id, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Arithmetic across two currencies
    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// Ledger adjustment id already recorded
    #[error("Duplicate adjustment: {adjustment_id}")]
    DuplicateAdjustment { adjustment_id: String },

    /// Referenced order does not exist for this tenant
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Storage touched outside a tenant scope; a request-setup bug
    #[error("Tenant context missing")]
    TenantContextMissing,
}

impl DomainError {
    /// Check if this is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::OrderNotFound(_))
    }

    /// Check if this is a conflict error (must not be treated as success)
    pub fn is_conflict_error(&self) -> bool {
        matches!(self, Self::DuplicateAdjustment { .. })
    }
}

impl From<MoneyError> for DomainError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::InvalidArgument(msg) => DomainError::InvalidArgument(msg),
            MoneyError::CurrencyMismatch { expected, found } => DomainError::CurrencyMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Money;

    #[test]
    fn test_duplicate_adjustment_is_conflict() {
        let err = DomainError::DuplicateAdjustment {
            adjustment_id: "ADJ1".to_string(),
        };
        assert!(err.is_conflict_error());
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("ADJ1"));
    }

    #[test]
    fn test_money_error_conversion() {
        let usd = Money::new(1, "USD").unwrap();
        let eur = Money::new(1, "EUR").unwrap();
        let err: DomainError = usd.add(&eur).unwrap_err().into();
        assert_eq!(
            err,
            DomainError::CurrencyMismatch {
                expected: "USD".to_string(),
                found: "EUR".to_string(),
            }
        );
    }

    #[test]
    fn test_tenant_context_missing_is_not_client_error() {
        assert!(!DomainError::TenantContextMissing.is_client_error());
        assert!(!DomainError::TenantContextMissing.is_conflict_error());
    }
}
