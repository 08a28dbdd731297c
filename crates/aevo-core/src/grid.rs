//! Grid arithmetic.
//!
//! A grid places resting orders at evenly spaced price levels. When one of
//! them fills, a replacement is placed one interval away on the opposite side.

use crate::decimal::Price;
use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Parameters of the fill-driven replacement rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridParams {
    /// Distance between adjacent grid levels.
    pub interval: Price,
    /// Decimal places of the instrument's price.
    pub price_decimals: u32,
}

impl GridParams {
    pub fn new(interval: Price, price_decimals: u32) -> Result<Self> {
        if !interval.is_positive() {
            return Err(CoreError::InvalidConfig(format!(
                "grid interval must be positive, got {interval}"
            )));
        }
        Ok(Self {
            interval,
            price_decimals,
        })
    }

    /// Price of the replacement order for a fill at `fill_price`.
    ///
    /// A filled buy is replaced one interval below, a filled sell one interval
    /// above; the result is rounded half away from zero to `price_decimals`.
    pub fn opposite_price(&self, fill_price: Price, fill_is_buy: bool) -> Price {
        let raw = if fill_is_buy {
            fill_price - self.interval
        } else {
            fill_price + self.interval
        };
        raw.round_dp(self.price_decimals)
    }
}

/// Price bounds of the initial ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRange {
    pub lower: Price,
    pub upper: Price,
}

impl GridRange {
    pub fn new(lower: Price, upper: Price) -> Result<Self> {
        if lower >= upper {
            return Err(CoreError::InvalidConfig(format!(
                "grid lower bound {lower} must be below upper bound {upper}"
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Range of `interval * (grid_size - 1)` centred on `mark`.
    pub fn arithmetic(mark: Price, interval: Price, grid_size: u32) -> Result<Self> {
        if grid_size < 2 {
            return Err(CoreError::InvalidConfig(format!(
                "grid size must be at least 2, got {grid_size}"
            )));
        }
        let half = interval.inner() * Decimal::from(grid_size - 1) / Decimal::TWO;
        Self::new(
            Price::new(mark.inner() - half),
            Price::new(mark.inner() + half),
        )
    }

    /// Range of `mark * (1 - pct)` to `mark * (1 + pct)`.
    pub fn percent(mark: Price, pct: Decimal) -> Result<Self> {
        if pct <= Decimal::ZERO || pct >= Decimal::ONE {
            return Err(CoreError::InvalidConfig(format!(
                "range percent must be in (0, 1), got {pct}"
            )));
        }
        Self::new(mark * (Decimal::ONE - pct), mark * (Decimal::ONE + pct))
    }

    pub fn contains(&self, price: Price) -> bool {
        self.lower <= price && price <= self.upper
    }

    /// `grid_size + 1` evenly spaced levels from `lower` to `upper` inclusive.
    pub fn levels(&self, grid_size: u32, price_decimals: u32) -> Result<Vec<Price>> {
        if grid_size == 0 {
            return Err(CoreError::InvalidConfig("grid size must be positive".into()));
        }
        let step = (self.upper.inner() - self.lower.inner()) / Decimal::from(grid_size);
        Ok((0..=grid_size)
            .map(|i| Price::new(self.lower.inner() + step * Decimal::from(i)).round_dp(price_decimals))
            .collect())
    }
}
