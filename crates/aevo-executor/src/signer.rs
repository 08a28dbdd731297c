//! Order signing.
//!
//! Aevo orders are EIP-712 typed data:
//!
//! ```text
//! Order(address maker,bool isBuy,uint256 limitPrice,uint256 amount,
//!       uint256 salt,uint256 instrument,uint256 timestamp)
//! ```
//!
//! signed under the domain `{name, version: "1", chainId}` of the selected
//! network. The signing hash doubles as the order id, so it is known before
//! the order reaches the exchange. Signing is pure and never touches the
//! network.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use aevo_core::{CoreError, InstrumentId, Network, Price, Size};
use alloy::primitives::{Address, PrimitiveSignature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroizing;

// =============================================================================
// KeySource and KeyManager
// =============================================================================

/// Source of the signing key.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Load from environment variable (development).
    EnvVar { var_name: String },
    /// Load from file (production, recommend 0600 permissions).
    File { path: PathBuf },
}

/// Holds the order signing key.
///
/// The key is loaded once at startup and never logged.
pub struct KeyManager {
    signer: Option<PrivateKeySigner>,
}

impl KeyManager {
    /// Load the signing key, or run without one when `source` is `None`.
    pub fn load(source: Option<KeySource>) -> Result<Self, KeyError> {
        let Some(source) = source else {
            return Ok(Self { signer: None });
        };

        let secret: Zeroizing<String> = match source {
            KeySource::EnvVar { ref var_name } => Zeroizing::new(
                std::env::var(var_name).map_err(|_| KeyError::EnvVarNotFound(var_name.clone()))?,
            ),
            KeySource::File { ref path } => Zeroizing::new(std::fs::read_to_string(path)?),
        };
        Self::from_hex(&secret)
    }

    /// Parse a hex key (0x prefix optional, surrounding whitespace ignored).
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let trimmed = hex_str.trim().trim_start_matches("0x");
        let bytes = Zeroizing::new(hex::decode(trimmed)?);
        let signer = PrivateKeySigner::from_slice(&bytes)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self {
            signer: Some(signer),
        })
    }

    pub fn signer(&self) -> Option<&PrivateKeySigner> {
        self.signer.as_ref()
    }

    /// Address derived from the signing key.
    pub fn signing_address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }
}

/// Key management errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Failed to decode hex: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Signed order
// =============================================================================

sol! {
    #[derive(Debug)]
    struct Order {
        address maker;
        bool isBuy;
        uint256 limitPrice;
        uint256 amount;
        uint256 salt;
        uint256 instrument;
        uint256 timestamp;
    }
}

/// An order ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedOrder {
    pub maker: Address,
    pub is_buy: bool,
    pub limit_price: U256,
    pub amount: U256,
    pub salt: U256,
    pub instrument: InstrumentId,
    pub timestamp: u64,
    /// `0x` + hex of `r || s || v`, `v` in 27/28 form.
    pub signature: String,
    /// `0x` + hex of the EIP-712 signing hash.
    pub order_id: String,
}

/// Fixed-point scale of an instrument's prices and amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderScale {
    pub price_decimals: u32,
    pub amount_decimals: u32,
}

impl Default for OrderScale {
    fn default() -> Self {
        Self {
            price_decimals: 6,
            amount_decimals: 6,
        }
    }
}

/// What to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRequest {
    pub instrument: InstrumentId,
    pub is_buy: bool,
    pub limit_price: Price,
    pub quantity: Size,
    pub price_decimals: u32,
    pub amount_decimals: u32,
}

impl OrderRequest {
    pub fn new(
        instrument: InstrumentId,
        is_buy: bool,
        limit_price: Price,
        quantity: Size,
        scale: OrderScale,
    ) -> Self {
        Self {
            instrument,
            is_buy,
            limit_price,
            quantity,
            price_decimals: scale.price_decimals,
            amount_decimals: scale.amount_decimals,
        }
    }
}

/// Signing errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("No signing key available")]
    NoSigningKey,

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Signing failed: {0}")]
    SigningFailed(#[from] alloy::signers::Error),
}

impl From<CoreError> for SignerError {
    fn from(e: CoreError) -> Self {
        Self::OutOfRange(e.to_string())
    }
}

/// Encode a signature as `0x` hex with `v` normalized to 27/28.
pub fn encode_signature(signature: &PrimitiveSignature) -> String {
    let mut bytes = signature.as_bytes();
    if bytes[64] < 27 {
        bytes[64] += 27;
    }
    format!("0x{}", hex::encode(bytes))
}

/// Signs Aevo orders for one maker account.
pub struct OrderSigner {
    key_manager: Arc<KeyManager>,
    maker: Address,
    domain: Eip712Domain,
}

impl OrderSigner {
    /// Create a signer for orders placed by `maker` (the account wallet,
    /// which may differ from the signing key's own address).
    ///
    /// # Errors
    /// Returns `SignerError::NoSigningKey` if the KeyManager has no key.
    pub fn new(
        key_manager: Arc<KeyManager>,
        maker: Address,
        network: Network,
    ) -> Result<Self, SignerError> {
        if key_manager.signer().is_none() {
            return Err(SignerError::NoSigningKey);
        }
        let domain = Eip712Domain::new(
            Some(Cow::Borrowed(network.domain_name())),
            Some(Cow::Borrowed("1")),
            Some(U256::from(network.chain_id())),
            None,
            None,
        );
        Ok(Self {
            key_manager,
            maker,
            domain,
        })
    }

    pub fn maker(&self) -> Address {
        self.maker
    }

    /// Sign a limit order with a fresh random salt.
    pub fn sign(&self, request: &OrderRequest, timestamp: u64) -> Result<SignedOrder, SignerError> {
        self.sign_with_salt(request, timestamp, U256::from(rand::random::<u64>()))
    }

    /// Sign a limit order with a caller-chosen salt.
    pub fn sign_with_salt(
        &self,
        request: &OrderRequest,
        timestamp: u64,
        salt: U256,
    ) -> Result<SignedOrder, SignerError> {
        let limit_price = U256::from(request.limit_price.to_fixed_point(request.price_decimals)?);
        let amount = U256::from(request.quantity.to_fixed_point(request.amount_decimals)?);
        self.sign_fields(
            request.instrument,
            request.is_buy,
            limit_price,
            amount,
            salt,
            timestamp,
        )
    }

    /// Sign a market order: the limit price is the extreme of the range
    /// (`2^256 - 1` when buying, `0` when selling).
    pub fn sign_market(
        &self,
        instrument: InstrumentId,
        is_buy: bool,
        quantity: Size,
        amount_decimals: u32,
        timestamp: u64,
    ) -> Result<SignedOrder, SignerError> {
        let limit_price = if is_buy { U256::MAX } else { U256::ZERO };
        let amount = U256::from(quantity.to_fixed_point(amount_decimals)?);
        self.sign_fields(
            instrument,
            is_buy,
            limit_price,
            amount,
            U256::from(rand::random::<u64>()),
            timestamp,
        )
    }

    /// EIP-712 signing hash of an order.
    pub fn signing_hash(
        &self,
        instrument: InstrumentId,
        is_buy: bool,
        limit_price: U256,
        amount: U256,
        salt: U256,
        timestamp: u64,
    ) -> B256 {
        let order = Order {
            maker: self.maker,
            isBuy: is_buy,
            limitPrice: limit_price,
            amount,
            salt,
            instrument: U256::from(instrument.value()),
            timestamp: U256::from(timestamp),
        };
        order.eip712_signing_hash(&self.domain)
    }

    fn sign_fields(
        &self,
        instrument: InstrumentId,
        is_buy: bool,
        limit_price: U256,
        amount: U256,
        salt: U256,
        timestamp: u64,
    ) -> Result<SignedOrder, SignerError> {
        let signer = self
            .key_manager
            .signer()
            .ok_or(SignerError::NoSigningKey)?;

        let hash = self.signing_hash(instrument, is_buy, limit_price, amount, salt, timestamp);
        // NOTE: signatures are never logged
        let signature = signer.sign_hash_sync(&hash)?;

        Ok(SignedOrder {
            maker: self.maker,
            is_buy,
            limit_price,
            amount,
            salt,
            instrument,
            timestamp,
            signature: encode_signature(&signature),
            order_id: format!("0x{}", hex::encode(hash)),
        })
    }
}
