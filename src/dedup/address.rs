//! Delivery address canonicalization

use serde::{Deserialize, Serialize};

use super::Canonical;
use crate::domain::DomainError;

/// Address as submitted by a caller
#[derive(Debug, Clone, Deserialize)]
pub struct AddressInput {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

/// Normalized address; two inputs describing the same place compare equal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalAddress {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

/// Trim, collapse inner whitespace and uppercase
fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn required(field: &str, value: &str) -> Result<String, DomainError> {
    let normalized = normalize(value);
    if normalized.is_empty() {
        return Err(DomainError::InvalidArgument(format!("{} must not be empty", field)));
    }
    Ok(normalized)
}

fn optional(value: Option<&str>) -> Option<String> {
    value.map(normalize).filter(|v| !v.is_empty())
}

impl AddressInput {
    pub fn to_canonical(&self) -> Result<CanonicalAddress, DomainError> {
        let postal_code: String = self
            .postal_code
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        if postal_code.is_empty() {
            return Err(DomainError::InvalidArgument("postal_code must not be empty".into()));
        }

        let country = normalize(&self.country);
        if country.len() != 2 || !country.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(DomainError::InvalidArgument(format!(
                "country must be an ISO 3166-1 alpha-2 code (got {:?})",
                self.country
            )));
        }

        Ok(CanonicalAddress {
            line1: required("line1", &self.line1)?,
            line2: optional(self.line2.as_deref()),
            city: required("city", &self.city)?,
            region: optional(self.region.as_deref()),
            postal_code,
            country,
        })
    }
}

impl Canonical for AddressInput {
    fn kind(&self) -> &'static str {
        "address"
    }

    fn canonicalize(&self) -> Result<serde_json::Value, DomainError> {
        let canonical = self.to_canonical()?;
        serde_json::to_value(canonical).map_err(|e| DomainError::InvalidArgument(e.to_string()))
    }
}
