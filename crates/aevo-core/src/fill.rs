//! Fill notifications.
//!
//! A fill arrives on the `fills` channel as
//! `{"channel": "fills", "data": {"fill": {...}}}`. Numeric fields may be
//! JSON strings or numbers; all five fields are required.

use crate::decimal::{decimal_from_json, Price, Size};
use crate::error::{CoreError, Result};
use crate::order::{InstrumentId, OrderSide};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub price: Price,
    pub filled: Size,
    pub side: OrderSide,
    pub instrument_id: InstrumentId,
}

impl Fill {
    /// Parse the `data` object of a `fills` channel frame.
    pub fn from_data(data: &Value) -> Result<Self> {
        let fill = data.get("fill").ok_or(CoreError::MissingField("fill"))?;
        Self::from_fill_object(fill)
    }

    /// Parse the inner `fill` object.
    pub fn from_fill_object(fill: &Value) -> Result<Self> {
        if !fill.is_object() {
            return Err(CoreError::InvalidField {
                field: "fill",
                value: fill.to_string(),
            });
        }

        let order_id = match required(fill, "order_id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(CoreError::InvalidField {
                    field: "order_id",
                    value: other.to_string(),
                })
            }
        };

        let price = Price::new(decimal_from_json(required(fill, "price")?, "price")?);
        if !price.is_positive() {
            return Err(CoreError::InvalidPrice(price.to_string()));
        }

        let filled = Size::new(decimal_from_json(required(fill, "filled")?, "filled")?);
        if !filled.is_positive() {
            return Err(CoreError::InvalidSize(filled.to_string()));
        }

        let side = match required(fill, "side")? {
            Value::String(s) => s.parse::<OrderSide>()?,
            other => {
                return Err(CoreError::InvalidField {
                    field: "side",
                    value: other.to_string(),
                })
            }
        };

        let instrument_id = match required(fill, "instrument_id")? {
            Value::String(s) => s.parse::<InstrumentId>()?,
            Value::Number(n) => n
                .as_u64()
                .map(InstrumentId::new)
                .ok_or_else(|| CoreError::InvalidField {
                    field: "instrument_id",
                    value: n.to_string(),
                })?,
            other => {
                return Err(CoreError::InvalidField {
                    field: "instrument_id",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            order_id,
            price,
            filled,
            side,
            instrument_id,
        })
    }

    #[inline]
    pub fn is_buy(&self) -> bool {
        self.side.is_buy()
    }
}

fn required<'a>(obj: &'a Value, field: &'static str) -> Result<&'a Value> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(CoreError::MissingField(field)),
        Some(v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_string_fields() {
        let data = json!({
            "fill": {
                "order_id": "0xabc",
                "price": "3200.00",
                "filled": "0.5",
                "side": "buy",
                "instrument_id": "1"
            }
        });
        let fill = Fill::from_data(&data).unwrap();
        assert_eq!(fill.order_id, "0xabc");
        assert_eq!(fill.price, Price::new(dec!(3200.00)));
        assert_eq!(fill.filled, Size::new(dec!(0.5)));
        assert!(fill.is_buy());
        assert_eq!(fill.instrument_id, InstrumentId::new(1));
    }

    #[test]
    fn test_parse_numeric_fields() {
        let data = json!({
            "fill": {
                "order_id": "0xdef",
                "price": 3205,
                "filled": 0.25,
                "side": "sell",
                "instrument_id": 7
            }
        });
        let fill = Fill::from_data(&data).unwrap();
        assert_eq!(fill.price, Price::new(dec!(3205)));
        assert_eq!(fill.filled, Size::new(dec!(0.25)));
        assert_eq!(fill.side, OrderSide::Sell);
        assert_eq!(fill.instrument_id, InstrumentId::new(7));
    }

    #[test]
    fn test_missing_field_rejected() {
        let data = json!({
            "fill": { "order_id": "0x1", "price": "1", "filled": "1", "side": "buy" }
        });
        assert!(matches!(
            Fill::from_data(&data),
            Err(CoreError::MissingField("instrument_id"))
        ));
        assert!(matches!(
            Fill::from_data(&json!({})),
            Err(CoreError::MissingField("fill"))
        ));
    }

    #[test]
    fn test_non_numeric_price_rejected() {
        let data = json!({
            "fill": {
                "order_id": "0x1",
                "price": "abc",
                "filled": "1",
                "side": "buy",
                "instrument_id": 1
            }
        });
        assert!(matches!(
            Fill::from_data(&data),
            Err(CoreError::InvalidField { field: "price", .. })
        ));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let data = json!({
            "fill": {
                "order_id": "0x1",
                "price": "100",
                "filled": "0",
                "side": "sell",
                "instrument_id": 1
            }
        });
        assert!(matches!(Fill::from_data(&data), Err(CoreError::InvalidSize(_))));
    }
}
