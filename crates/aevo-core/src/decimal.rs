//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Prices and sizes are
//! converted to the exchange's integer fixed-point representation only at
//! signing time, through [`to_fixed_point`].

use crate::error::{CoreError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// Largest supported number of fixed-point decimals.
pub const MAX_FIXED_POINT_DECIMALS: u32 = 18;

/// Convert a non-negative decimal to an integer scaled by `10^decimals`.
///
/// Rounds half away from zero: `1.5` at 0 decimals becomes `2`.
pub fn to_fixed_point(value: Decimal, decimals: u32) -> Result<u128> {
    if decimals > MAX_FIXED_POINT_DECIMALS {
        return Err(CoreError::OutOfRange(format!(
            "decimals {decimals} exceeds {MAX_FIXED_POINT_DECIMALS}"
        )));
    }
    if value.is_sign_negative() && !value.is_zero() {
        return Err(CoreError::OutOfRange(format!("negative value {value}")));
    }

    let scale = Decimal::from(10u64.pow(decimals));
    let scaled = value
        .checked_mul(scale)
        .ok_or_else(|| CoreError::OutOfRange(format!("{value} * 10^{decimals} overflows")))?;

    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u128()
        .ok_or_else(|| CoreError::OutOfRange(format!("{scaled} is not representable")))
}

/// Parse a decimal from a JSON string or number.
pub(crate) fn decimal_from_json(
    value: &serde_json::Value,
    field: &'static str,
) -> Result<Decimal> {
    let invalid = || CoreError::InvalidField {
        field,
        value: value.to_string(),
    };
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).map_err(|_| invalid()),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Decimal::from(u))
            } else {
                // Floats go through their shortest textual form to avoid
                // binary representation noise (0.1 stays 0.1).
                Decimal::from_str(&n.to_string())
                    .or_else(|_| Decimal::from_scientific(&n.to_string()))
                    .map_err(|_| invalid())
            }
        }
        serde_json::Value::Null => Err(CoreError::MissingField(field)),
        _ => Err(invalid()),
    }
}

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with sizes in calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round half away from zero to `decimals` places.
    #[inline]
    pub fn round_dp(&self, decimals: u32) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Fixed-point integer representation used in signed orders.
    pub fn to_fixed_point(&self, decimals: u32) -> Result<u128> {
        to_fixed_point(self.0, decimals)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

/// Size/quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn to_fixed_point(&self, decimals: u32) -> Result<u128> {
        to_fixed_point(self.0, decimals)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}
