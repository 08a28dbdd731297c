//! REST response types: markets, account and positions.
//!
//! Raw structs mirror the wire format (numbers arrive as strings or JSON
//! numbers); parsed structs carry `Decimal` and domain ids.

use crate::error::{RegistryError, RegistryResult};
use aevo_core::{InstrumentId, OrderSide, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Accept `"1.5"`, `1.5` or `1` as a string.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn parse_decimal(field: &str, raw: &str) -> RegistryResult<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| RegistryError::ParseError(format!("{field}={raw}: {e}")))
}

fn parse_instrument(raw: &str) -> RegistryResult<InstrumentId> {
    InstrumentId::from_str(raw).map_err(|e| RegistryError::ParseError(e.to_string()))
}

/// Instrument name of an asset's perpetual, e.g. `ETH-PERP`.
pub fn perp_name(asset: &str) -> String {
    format!("{}-PERP", asset.to_ascii_uppercase())
}

/// Market entry as returned by `GET /markets`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMarket {
    #[serde(deserialize_with = "string_or_number")]
    pub instrument_id: String,
    pub instrument_name: String,
    #[serde(default)]
    pub instrument_type: Option<String>,
    #[serde(default)]
    pub underlying_asset: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub mark_price: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub index_price: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub price_step: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub amount_step: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Parsed market data for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub instrument_id: InstrumentId,
    pub instrument_name: String,
    pub instrument_type: Option<String>,
    pub mark_price: Price,
    pub index_price: Option<Price>,
    pub price_step: Option<Decimal>,
    pub amount_step: Option<Decimal>,
    pub is_active: bool,
}

impl TryFrom<RawMarket> for MarketInfo {
    type Error = RegistryError;

    fn try_from(raw: RawMarket) -> RegistryResult<Self> {
        let index_price = raw
            .index_price
            .as_deref()
            .map(|v| parse_decimal("index_price", v).map(Price::new))
            .transpose()?;
        let price_step = raw
            .price_step
            .as_deref()
            .map(|v| parse_decimal("price_step", v))
            .transpose()?;
        let amount_step = raw
            .amount_step
            .as_deref()
            .map(|v| parse_decimal("amount_step", v))
            .transpose()?;

        Ok(Self {
            instrument_id: parse_instrument(&raw.instrument_id)?,
            mark_price: Price::new(parse_decimal("mark_price", &raw.mark_price)?),
            instrument_name: raw.instrument_name,
            instrument_type: raw.instrument_type,
            index_price,
            price_step,
            amount_step,
            is_active: raw.is_active.unwrap_or(true),
        })
    }
}

impl MarketInfo {
    /// Decimal places implied by the price step (`0.01` -> 2).
    pub fn price_decimals(&self) -> Option<u32> {
        self.price_step.map(|s| s.normalize().scale())
    }

    /// Decimal places implied by the amount step.
    pub fn amount_decimals(&self) -> Option<u32> {
        self.amount_step.map(|s| s.normalize().scale())
    }
}

/// Pick the `<ASSET>-PERP` entry out of a markets listing.
pub fn find_perp(markets: &[MarketInfo], asset: &str) -> RegistryResult<MarketInfo> {
    let name = perp_name(asset);
    markets
        .iter()
        .find(|m| m.instrument_name == name)
        .cloned()
        .ok_or(RegistryError::MarketNotFound(name))
}

/// Position entry inside `GET /account`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawPosition {
    #[serde(deserialize_with = "string_or_number")]
    pub instrument_id: String,
    pub instrument_name: String,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub amount: String,
    pub side: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub mark_price: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub avg_entry_price: Option<String>,
}

/// Open position.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub instrument_id: InstrumentId,
    pub instrument_name: String,
    pub amount: Size,
    pub side: OrderSide,
    pub mark_price: Option<Price>,
    pub avg_entry_price: Option<Price>,
}

impl TryFrom<RawPosition> for Position {
    type Error = RegistryError;

    fn try_from(raw: RawPosition) -> RegistryResult<Self> {
        let side = OrderSide::from_str(&raw.side)
            .map_err(|e| RegistryError::ParseError(e.to_string()))?;
        let mark_price = raw
            .mark_price
            .as_deref()
            .map(|v| parse_decimal("mark_price", v).map(Price::new))
            .transpose()?;
        let avg_entry_price = raw
            .avg_entry_price
            .as_deref()
            .map(|v| parse_decimal("avg_entry_price", v).map(Price::new))
            .transpose()?;

        Ok(Self {
            instrument_id: parse_instrument(&raw.instrument_id)?,
            amount: Size::new(parse_decimal("amount", &raw.amount)?),
            instrument_name: raw.instrument_name,
            side,
            mark_price,
            avg_entry_price,
        })
    }
}

impl Position {
    /// Side of the order that closes this position.
    pub fn closing_side(&self) -> OrderSide {
        self.side.opposite()
    }
}

/// `GET /account` response (only the fields the bot reads).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawAccountResponse {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub positions: Vec<RawPosition>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub equity: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub balance: Option<String>,
}

/// Parsed account state.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountInfo {
    pub account: Option<String>,
    pub positions: Vec<Position>,
    pub equity: Option<Decimal>,
    pub balance: Option<Decimal>,
}

impl TryFrom<RawAccountResponse> for AccountInfo {
    type Error = RegistryError;

    fn try_from(raw: RawAccountResponse) -> RegistryResult<Self> {
        let positions = raw
            .positions
            .into_iter()
            .map(Position::try_from)
            .collect::<RegistryResult<Vec<_>>>()?;
        let equity = raw
            .equity
            .as_deref()
            .map(|v| parse_decimal("equity", v))
            .transpose()?;
        let balance = raw
            .balance
            .as_deref()
            .map(|v| parse_decimal("balance", v))
            .transpose()?;

        Ok(Self {
            account: raw.account,
            positions,
            equity,
            balance,
        })
    }
}

impl AccountInfo {
    /// Positions on one instrument (e.g. `ETH-PERP`).
    pub fn positions_for<'a>(&'a self, instrument_name: &'a str) -> impl Iterator<Item = &'a Position> {
        self.positions
            .iter()
            .filter(move |p| p.instrument_name == instrument_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn market(value: Value) -> MarketInfo {
        let raw: RawMarket = serde_json::from_value(value).unwrap();
        MarketInfo::try_from(raw).unwrap()
    }

    #[test]
    fn test_market_from_strings() {
        let m = market(json!({
            "instrument_id": "1",
            "instrument_name": "ETH-PERP",
            "instrument_type": "PERPETUAL",
            "underlying_asset": "ETH",
            "mark_price": "3201.45",
            "index_price": "3200.9",
            "price_step": "0.01",
            "amount_step": "0.001",
            "is_active": true
        }));
        assert_eq!(m.instrument_id, InstrumentId(1));
        assert_eq!(m.mark_price.inner(), dec!(3201.45));
        assert_eq!(m.price_decimals(), Some(2));
        assert_eq!(m.amount_decimals(), Some(3));
    }

    #[test]
    fn test_market_from_numbers_and_missing_optionals() {
        let m = market(json!({
            "instrument_id": 1,
            "instrument_name": "ETH-PERP",
            "mark_price": 3200
        }));
        assert_eq!(m.mark_price.inner(), dec!(3200));
        assert!(m.index_price.is_none());
        assert!(m.is_active);
        assert_eq!(m.price_decimals(), None);
    }

    #[test]
    fn test_bad_mark_price_rejected() {
        let raw: RawMarket = serde_json::from_value(json!({
            "instrument_id": "1",
            "instrument_name": "ETH-PERP",
            "mark_price": "n/a"
        }))
        .unwrap();
        assert!(matches!(
            MarketInfo::try_from(raw),
            Err(RegistryError::ParseError(_))
        ));
    }

    #[test]
    fn test_find_perp() {
        let markets = vec![
            market(json!({"instrument_id": "2", "instrument_name": "ETH-30JUN24-3000-C", "mark_price": "10"})),
            market(json!({"instrument_id": "1", "instrument_name": "ETH-PERP", "mark_price": "3200"})),
        ];
        assert_eq!(find_perp(&markets, "eth").unwrap().instrument_id, InstrumentId(1));
        assert!(matches!(
            find_perp(&markets, "BTC"),
            Err(RegistryError::MarketNotFound(name)) if name == "BTC-PERP"
        ));
    }

    #[test]
    fn test_account_positions() {
        let raw: RawAccountResponse = serde_json::from_value(json!({
            "account": "0xabc",
            "equity": "1000.5",
            "positions": [
                {"instrument_id": "1", "instrument_name": "ETH-PERP", "asset": "ETH",
                 "amount": "0.25", "side": "sell", "mark_price": "3200"},
                {"instrument_id": "3", "instrument_name": "BTC-PERP",
                 "amount": "0.01", "side": "buy"}
            ]
        }))
        .unwrap();
        let account = AccountInfo::try_from(raw).unwrap();

        assert_eq!(account.equity, Some(dec!(1000.5)));
        let eth: Vec<_> = account.positions_for("ETH-PERP").collect();
        assert_eq!(eth.len(), 1);
        assert_eq!(eth[0].amount.inner(), dec!(0.25));
        assert_eq!(eth[0].closing_side(), OrderSide::Buy);
    }

    #[test]
    fn test_account_without_positions() {
        let raw: RawAccountResponse = serde_json::from_value(json!({"account": "0xabc"})).unwrap();
        assert!(AccountInfo::try_from(raw).unwrap().positions.is_empty());
    }

    #[test]
    fn test_unknown_position_side_rejected() {
        let raw: RawAccountResponse = serde_json::from_value(json!({
            "positions": [{"instrument_id": "1", "instrument_name": "ETH-PERP",
                           "amount": "1", "side": "flat"}]
        }))
        .unwrap();
        assert!(AccountInfo::try_from(raw).is_err());
    }
}
