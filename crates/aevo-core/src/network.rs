//! Exchange environments.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aevo deployment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

impl Network {
    pub fn ws_url(&self) -> &'static str {
        match self {
            Self::Testnet => "wss://ws-testnet.aevo.xyz",
            Self::Mainnet => "wss://ws.aevo.xyz",
        }
    }

    pub fn rest_url(&self) -> &'static str {
        match self {
            Self::Testnet => "https://api-testnet.aevo.xyz",
            Self::Mainnet => "https://api.aevo.xyz",
        }
    }

    /// EIP-712 domain name for order signing.
    pub fn domain_name(&self) -> &'static str {
        match self {
            Self::Testnet => "Aevo Testnet",
            Self::Mainnet => "Aevo Mainnet",
        }
    }

    /// EIP-712 domain chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Testnet => 11_155_111,
            Self::Mainnet => 1,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testnet => write!(f, "testnet"),
            Self::Mainnet => write!(f, "mainnet"),
        }
    }
}

impl FromStr for Network {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(CoreError::InvalidConfig(format!("unknown network: {other}"))),
        }
    }
}
