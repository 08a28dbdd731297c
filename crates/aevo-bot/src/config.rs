//! Application configuration.

use crate::error::{AppError, AppResult};
use aevo_core::{GridParams, GridRange, Network, Price, MAX_FIXED_POINT_DECIMALS};
use aevo_executor::OrderScale;
use aevo_ws::{AuthCredentials, ConnectionConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the ladder bounds are chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    /// `interval * (grid_size - 1)` centred on the mark price.
    #[default]
    Arithmetic,
    /// `mark * (1 ± range_percent)`.
    Percent,
    /// Configured `lower_price` / `upper_price`; the ladder is only placed
    /// while the mark price is inside them.
    Fixed,
}

/// Which orders are cancelled over the WebSocket when the bot stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownCancel {
    /// Leave every order resting.
    #[default]
    None,
    /// One `cancel_order` per order placed by this session.
    Session,
    /// A single `cancel_all_orders` for the whole account.
    All,
}

/// Names of the environment variables holding secrets.
///
/// Secrets never live in the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Hex signing key. Ignored when `signing_key_file` is set.
    #[serde(default = "default_signing_key_env")]
    pub signing_key_env: String,
    /// File holding the hex signing key (recommend 0600 permissions).
    #[serde(default)]
    pub signing_key_file: Option<PathBuf>,
    /// Account wallet address used as the order maker.
    #[serde(default = "default_wallet_address_env")]
    pub wallet_address_env: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
}

fn default_signing_key_env() -> String {
    "AEVO_SIGNING_KEY".to_string()
}

fn default_wallet_address_env() -> String {
    "AEVO_WALLET_ADDRESS".to_string()
}

fn default_api_key_env() -> String {
    "AEVO_API_KEY".to_string()
}

fn default_api_secret_env() -> String {
    "AEVO_API_SECRET".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            signing_key_env: default_signing_key_env(),
            signing_key_file: None,
            wallet_address_env: default_wallet_address_env(),
            api_key_env: default_api_key_env(),
            api_secret_env: default_api_secret_env(),
        }
    }
}

/// WebSocket timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Overrides the network's default endpoint (local testing).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_auth_settle_delay_ms")]
    pub auth_settle_delay_ms: u64,
    #[serde(default = "default_open_retry_cooldown_ms")]
    pub open_retry_cooldown_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_recv_timeout_ms")]
    pub recv_timeout_ms: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_auth_settle_delay_ms() -> u64 {
    1_000
}

fn default_open_retry_cooldown_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_recv_timeout_ms() -> u64 {
    20_000
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_settle_delay_ms: default_auth_settle_delay_ms(),
            open_retry_cooldown_ms: default_open_retry_cooldown_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            recv_timeout_ms: default_recv_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl WsConfig {
    /// Connection settings for `network`, with session credentials.
    pub fn connection_config(
        &self,
        network: Network,
        credentials: Option<AuthCredentials>,
    ) -> ConnectionConfig {
        ConnectionConfig {
            url: self
                .url
                .clone()
                .unwrap_or_else(|| network.ws_url().to_string()),
            credentials,
            auth_settle_delay_ms: self.auth_settle_delay_ms,
            open_retry_cooldown_ms: self.open_retry_cooldown_ms,
            reconnect_delay_ms: self.reconnect_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            recv_timeout_ms: self.recv_timeout_ms,
            ack_timeout_ms: self.ack_timeout_ms,
        }
    }
}

/// Grid strategy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Underlying asset; the traded instrument is `<asset>-PERP`.
    #[serde(default = "default_asset")]
    pub asset: String,
    /// Number of ladder steps (`grid_size + 1` levels).
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,
    /// Distance between a fill and its replacement order.
    #[serde(default = "default_interval")]
    pub interval: Decimal,
    /// Order quantity per level.
    #[serde(default = "default_quantity")]
    pub quantity: Decimal,
    /// Rounding of computed prices.
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,
    /// Fixed-point scale of signed prices and amounts.
    #[serde(default = "default_fixed_point_decimals")]
    pub fixed_point_decimals: u32,
    #[serde(default)]
    pub range_mode: RangeMode,
    /// Used by `percent` mode (0.01 = ±1%).
    #[serde(default = "default_range_percent")]
    pub range_percent: Decimal,
    /// Used by `fixed` mode.
    #[serde(default)]
    pub lower_price: Option<Decimal>,
    #[serde(default)]
    pub upper_price: Option<Decimal>,
    /// Market-sell one grid quantity when the mark is at or below this.
    #[serde(default)]
    pub stop_loss_price: Option<Decimal>,
    /// Flatten positions, cancel orders and place a fresh ladder at startup.
    /// When false the bot only reacts to fills on existing orders.
    #[serde(default = "default_initialize")]
    pub initialize: bool,
    /// Delay between ladder levels.
    #[serde(default = "default_order_pacing_ms")]
    pub order_pacing_ms: u64,
    /// Delay after each flatten order.
    #[serde(default = "default_flatten_settle_ms")]
    pub flatten_settle_ms: u64,
    #[serde(default)]
    pub cancel_on_shutdown: ShutdownCancel,
}

fn default_asset() -> String {
    "ETH".to_string()
}

fn default_grid_size() -> u32 {
    100
}

fn default_interval() -> Decimal {
    Decimal::from(5)
}

fn default_quantity() -> Decimal {
    Decimal::new(3, 3)
}

fn default_price_decimals() -> u32 {
    2
}

fn default_fixed_point_decimals() -> u32 {
    6
}

fn default_range_percent() -> Decimal {
    Decimal::new(1, 2)
}

fn default_initialize() -> bool {
    true
}

fn default_order_pacing_ms() -> u64 {
    300
}

fn default_flatten_settle_ms() -> u64 {
    2_000
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            asset: default_asset(),
            grid_size: default_grid_size(),
            interval: default_interval(),
            quantity: default_quantity(),
            price_decimals: default_price_decimals(),
            fixed_point_decimals: default_fixed_point_decimals(),
            range_mode: RangeMode::default(),
            range_percent: default_range_percent(),
            lower_price: None,
            upper_price: None,
            stop_loss_price: None,
            initialize: default_initialize(),
            order_pacing_ms: default_order_pacing_ms(),
            flatten_settle_ms: default_flatten_settle_ms(),
            cancel_on_shutdown: ShutdownCancel::default(),
        }
    }
}

impl GridConfig {
    pub fn params(&self) -> AppResult<GridParams> {
        Ok(GridParams::new(Price::new(self.interval), self.price_decimals)?)
    }

    pub fn scale(&self) -> OrderScale {
        OrderScale {
            price_decimals: self.fixed_point_decimals,
            amount_decimals: self.fixed_point_decimals,
        }
    }

    /// Ladder bounds around `mark`.
    pub fn range(&self, mark: Price) -> AppResult<GridRange> {
        let range = match self.range_mode {
            RangeMode::Arithmetic => {
                GridRange::arithmetic(mark, Price::new(self.interval), self.grid_size)?
            }
            RangeMode::Percent => GridRange::percent(mark, self.range_percent)?,
            RangeMode::Fixed => {
                let (Some(lower), Some(upper)) = (self.lower_price, self.upper_price) else {
                    return Err(AppError::Config(
                        "fixed range needs lower_price and upper_price".to_string(),
                    ));
                };
                GridRange::new(Price::new(lower), Price::new(upper))?
            }
        };
        Ok(range)
    }
}

/// Webhook alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// WeChat Work style webhook URL. Unset disables alerts.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Local snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Periodic status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Interval of the metrics status log line (seconds).
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_stats_interval_secs() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// `testnet` or `mainnet`.
    #[serde(default)]
    pub env: Network,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let grid = &self.grid;
        if grid.asset.trim().is_empty() {
            return Err(AppError::Config("grid.asset must not be empty".to_string()));
        }
        if grid.grid_size < 2 {
            return Err(AppError::Config(format!(
                "grid.grid_size must be at least 2, got {}",
                grid.grid_size
            )));
        }
        if grid.interval <= Decimal::ZERO {
            return Err(AppError::Config("grid.interval must be positive".to_string()));
        }
        if grid.quantity <= Decimal::ZERO {
            return Err(AppError::Config("grid.quantity must be positive".to_string()));
        }
        if grid.price_decimals > MAX_FIXED_POINT_DECIMALS
            || grid.fixed_point_decimals > MAX_FIXED_POINT_DECIMALS
        {
            return Err(AppError::Config(format!(
                "grid decimals must not exceed {MAX_FIXED_POINT_DECIMALS}"
            )));
        }
        match grid.range_mode {
            RangeMode::Percent => {
                if grid.range_percent <= Decimal::ZERO || grid.range_percent >= Decimal::ONE {
                    return Err(AppError::Config(
                        "grid.range_percent must be between 0 and 1".to_string(),
                    ));
                }
            }
            RangeMode::Fixed => match (grid.lower_price, grid.upper_price) {
                (Some(lower), Some(upper)) if lower > Decimal::ZERO && lower < upper => {}
                _ => {
                    return Err(AppError::Config(
                        "fixed range needs 0 < lower_price < upper_price".to_string(),
                    ))
                }
            },
            RangeMode::Arithmetic => {}
        }
        if self.websocket.heartbeat_interval_ms == 0 || self.websocket.recv_timeout_ms == 0 {
            return Err(AppError::Config(
                "websocket heartbeat and receive timeouts must be positive".to_string(),
            ));
        }
        if self.telemetry.stats_interval_secs == 0 {
            return Err(AppError::Config(
                "telemetry.stats_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// `<ASSET>-PERP`.
    pub fn instrument_name(&self) -> String {
        aevo_registry::perp_name(&self.grid.asset)
    }

    pub fn rest_url(&self) -> &'static str {
        self.env.rest_url()
    }
}
