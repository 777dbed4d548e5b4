//! Money type
//!
//! Immutable exact-arithmetic currency amount held in integer minor units.
//! No operation ever produces a fractional minor unit and floating point is
//! never involved.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-point scale applied to multiplication factors (4 decimal places).
const FACTOR_SCALE: i128 = 10_000;

/// Errors that can occur when building or combining Money values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        expected: CurrencyCode,
        found: CurrencyCode,
    },
}

impl MoneyError {
    fn overflow(op: &str) -> Self {
        MoneyError::InvalidArgument(format!("{} overflows the supported range", op))
    }
}

/// ISO-4217 style currency code: exactly three ASCII uppercase letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    pub fn as_str(&self) -> &str {
        // Construction only admits ASCII uppercase bytes.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for CurrencyCode {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(MoneyError::InvalidArgument(format!(
                "currency code must be 3 uppercase letters (got {:?})",
                s
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A currency amount in integer minor units.
///
/// # Invariants
/// - Currency is always a valid [`CurrencyCode`]
/// - Amount is an integer count of minor units (cents, pence, ...)
///
/// # Range
/// The amount is an `i128`, so it is exact but bounded at `i128::MIN..=i128::MAX`
/// minor units. Arithmetic that would leave that range fails with
/// `MoneyError::InvalidArgument` rather than wrapping. Persistence through
/// [`Money::to_decimal`] is narrower: `rust_decimal` holds at most
/// 96-bit magnitudes, roughly 7.9e28 minor units.
/// - Values are immutable; every operation returns a new instance
///
/// Serializes as `{"amount": "<base-10 string>", "currency": "USD"}` so the
/// amount survives any encoding without precision loss.
///
/// # Example
/// ```
/// use logistics_core::domain::Money;
///
/// let base = Money::new(1000, "USD").unwrap();
/// let adjusted = base.subtract(&Money::new(200, "USD").unwrap()).unwrap();
/// assert_eq!(adjusted.amount_minor(), 800);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr", into = "MoneyRepr")]
pub struct Money {
    amount_minor: i128,
    currency: CurrencyCode,
}

/// Wire representation of Money
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MoneyRepr {
    amount: String,
    currency: String,
}

impl Money {
    /// Create a Money value from integer minor units.
    ///
    /// # Errors
    /// - `MoneyError::InvalidArgument` if the currency is not 3 uppercase letters
    pub fn new(amount_minor: i128, currency: &str) -> Result<Self, MoneyError> {
        Ok(Self {
            amount_minor,
            currency: currency.parse()?,
        })
    }

    /// Create a Money value from an already validated currency code.
    pub fn of(amount_minor: i128, currency: CurrencyCode) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    /// Create a Money value from a decimal count of minor units.
    ///
    /// # Errors
    /// - `MoneyError::InvalidArgument` if the amount has a fractional part
    ///   or the currency is malformed
    pub fn from_decimal(amount_minor: Decimal, currency: &str) -> Result<Self, MoneyError> {
        let currency: CurrencyCode = currency.parse()?;
        if !amount_minor.fract().is_zero() {
            return Err(MoneyError::InvalidArgument(format!(
                "amount must be a whole number of minor units (got {})",
                amount_minor
            )));
        }
        let amount_minor = amount_minor
            .trunc()
            .to_i128()
            .ok_or_else(|| MoneyError::overflow("amount"))?;
        Ok(Self::of(amount_minor, currency))
    }

    /// Zero in the given currency
    pub fn zero(currency: CurrencyCode) -> Self {
        Self::of(0, currency)
    }

    pub fn amount_minor(&self) -> i128 {
        self.amount_minor
    }

    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor == 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount_minor < 0
    }

    /// Minor units as a Decimal (for `NUMERIC` columns).
    pub fn to_decimal(&self) -> Result<Decimal, MoneyError> {
        Decimal::from_i128(self.amount_minor).ok_or_else(|| MoneyError::overflow("amount"))
    }

    pub fn negate(&self) -> Result<Money, MoneyError> {
        let amount = self
            .amount_minor
            .checked_neg()
            .ok_or_else(|| MoneyError::overflow("negation"))?;
        Ok(Self::of(amount, self.currency))
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount_minor
            .checked_add(other.amount_minor)
            .ok_or_else(|| MoneyError::overflow("addition"))?;
        Ok(Self::of(amount, self.currency))
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount_minor
            .checked_sub(other.amount_minor)
            .ok_or_else(|| MoneyError::overflow("subtraction"))?;
        Ok(Self::of(amount, self.currency))
    }

    /// Scale by a decimal factor using round-half-to-even on the minor unit.
    ///
    /// The factor is first fixed to 4 decimal places, so the product is
    /// computed entirely in scaled integers. Rounding is symmetric around
    /// zero: `-100 * 0.025` gives `-2`.
    pub fn multiply(&self, factor: Decimal) -> Result<Money, MoneyError> {
        let scaled_factor = factor
            .checked_mul(Decimal::from(FACTOR_SCALE as i64))
            .ok_or_else(|| MoneyError::overflow("factor"))?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
            .to_i128()
            .ok_or_else(|| MoneyError::overflow("factor"))?;

        let product = self
            .amount_minor
            .checked_mul(scaled_factor)
            .ok_or_else(|| MoneyError::overflow("multiplication"))?;

        Ok(Self::of(
            div_round_half_even(product, FACTOR_SCALE),
            self.currency,
        ))
    }

    /// Split proportionally to `ratios`.
    ///
    /// Each share gets `floor(amount * ratio / total)`. The leftover minor
    /// units are then handed out one at a time to the shares in input order
    /// (round-robin from the first share), not to the shares with the
    /// largest fractional loss. Callers rely on this exact distribution.
    /// Negative amounts split their magnitude and negate every share.
    pub fn allocate(&self, ratios: &[u64]) -> Result<Vec<Money>, MoneyError> {
        if ratios.is_empty() {
            return Err(MoneyError::InvalidArgument(
                "allocation needs at least one ratio".to_string(),
            ));
        }
        let total: u128 = ratios.iter().map(|r| *r as u128).sum();
        if total == 0 {
            return Err(MoneyError::InvalidArgument(
                "allocation ratios must have a positive sum".to_string(),
            ));
        }

        let magnitude = self.amount_minor.unsigned_abs();
        let mut shares = Vec::with_capacity(ratios.len());
        for ratio in ratios {
            let share = magnitude
                .checked_mul(*ratio as u128)
                .ok_or_else(|| MoneyError::overflow("allocation"))?
                / total;
            shares.push(share);
        }

        let allocated: u128 = shares.iter().sum();
        let remainder = magnitude - allocated;
        for share in shares.iter_mut().take(remainder as usize) {
            *share += 1;
        }

        let negative = self.amount_minor < 0;
        shares
            .into_iter()
            .map(|share| {
                let share = i128::try_from(share).map_err(|_| MoneyError::overflow("allocation"))?;
                Ok(Self::of(if negative { -share } else { share }, self.currency))
            })
            .collect()
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }
}

/// Integer division rounding half to even, symmetric around zero.
fn div_round_half_even(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = (numerator % denominator).abs();
    let twice = remainder * 2;
    let round_away = twice > denominator || (twice == denominator && quotient % 2 != 0);
    if round_away {
        quotient + numerator.signum()
    } else {
        quotient
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount_minor, self.currency)
    }
}

impl TryFrom<MoneyRepr> for Money {
    type Error = MoneyError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        let amount_minor: i128 = repr.amount.trim().parse().map_err(|_| {
            MoneyError::InvalidArgument(format!(
                "amount must be an integer string of minor units (got {:?})",
                repr.amount
            ))
        })?;
        Money::new(amount_minor, &repr.currency)
    }
}

impl From<Money> for MoneyRepr {
    fn from(money: Money) -> Self {
        MoneyRepr {
            amount: money.amount_minor.to_string(),
            currency: money.currency.to_string(),
        }
    }
}
