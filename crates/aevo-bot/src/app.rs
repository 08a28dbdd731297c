//! Main application orchestration.
//!
//! Coordinates all components:
//! - WebSocket session (connect, subscribe, dispatch, heartbeat)
//! - Startup bootstrap over REST (flatten, ladder, stop-loss)
//! - Fill-driven grid replacement via the frame handler
//! - Optional order cancellation and snapshot flush on shutdown
//! - Periodic status line from metrics

use crate::config::{AppConfig, CredentialsConfig, RangeMode, ShutdownCancel};
use crate::error::{AppError, AppResult};
use crate::handler::GridHandler;
use aevo_core::{GridParams, GridRange, InstrumentId, Price, Size};
use aevo_executor::command::rest_order_body;
use aevo_executor::{
    GridEngine, KeyManager, KeySource, OrderRequest, OrderSigner, WsOrderSender,
};
use aevo_persistence::SnapshotStore;
use aevo_registry::{find_perp, ApiKeys, MarketInfo, Position, RestClient};
use aevo_telemetry::{Metrics, Notifier};
use aevo_ws::{
    ticker_channel, AckStatus, AuthCredentials, ConnectionManager, Connector, MessageDispatcher,
    TungsteniteConnector, FILLS_CHANNEL, ORDERS_CHANNEL,
};
use alloy::primitives::Address;
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Position checks before giving up on flattening.
const FLATTEN_ATTEMPTS: u32 = 3;

/// Flatten limit = mark * this when buying back a short.
const FLATTEN_BUY_FACTOR: Decimal = Decimal::from_parts(11, 0, 0, false, 1);

/// Flatten limit = mark * this when selling a long.
const FLATTEN_SELL_FACTOR: Decimal = Decimal::from_parts(9, 0, 0, false, 1);

/// Grace period for background tasks on shutdown.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Secrets resolved from the environment.
pub struct Credentials {
    pub key_source: KeySource,
    pub wallet: Address,
    pub api: Option<ApiKeys>,
}

impl Credentials {
    pub fn from_env(config: &CredentialsConfig) -> AppResult<Self> {
        let key_source = match &config.signing_key_file {
            Some(path) => KeySource::File { path: path.clone() },
            None => KeySource::EnvVar {
                var_name: config.signing_key_env.clone(),
            },
        };

        let wallet_raw = std::env::var(&config.wallet_address_env).map_err(|_| {
            AppError::Config(format!(
                "wallet address env var {} is not set",
                config.wallet_address_env
            ))
        })?;
        let wallet = Address::from_str(wallet_raw.trim())
            .map_err(|e| AppError::Config(format!("invalid wallet address: {e}")))?;

        let api = match (
            std::env::var(&config.api_key_env),
            std::env::var(&config.api_secret_env),
        ) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(ApiKeys { key, secret })
            }
            _ => {
                warn!(
                    key_env = %config.api_key_env,
                    "API key/secret not set, private channels and REST calls will be rejected"
                );
                None
            }
        };

        Ok(Self {
            key_source,
            wallet,
            api,
        })
    }
}

/// What the startup bootstrap did.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapReport {
    pub instrument: InstrumentId,
    pub mark_price: Price,
    /// `None` when flattening was not attempted.
    pub flattened: Option<bool>,
    pub orders_placed: usize,
    pub orders_failed: usize,
    pub stop_loss_triggered: bool,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    connection: Arc<ConnectionManager>,
    rest: RestClient,
    signer: Arc<OrderSigner>,
    engine: Arc<GridEngine>,
    params: GridParams,
    snapshots: Arc<SnapshotStore>,
    notifier: Notifier,
}

impl Application {
    /// Build from configuration, reading secrets from the environment.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let credentials = Credentials::from_env(&config.credentials)?;
        let keys = Arc::new(KeyManager::load(Some(credentials.key_source))?);
        let rest = RestClient::new(config.rest_url(), credentials.api.clone())?;
        Self::with_parts(
            config,
            Arc::new(TungsteniteConnector),
            rest,
            keys,
            credentials.wallet,
            credentials.api,
        )
    }

    /// Build from explicit parts (custom transport or REST endpoint).
    pub fn with_parts(
        config: AppConfig,
        connector: Arc<dyn Connector>,
        rest: RestClient,
        keys: Arc<KeyManager>,
        maker: Address,
        api: Option<ApiKeys>,
    ) -> AppResult<Self> {
        config.validate()?;
        let params = config.grid.params()?;

        let auth = api.map(|k| AuthCredentials {
            api_key: k.key,
            api_secret: k.secret,
        });
        let connection = Arc::new(ConnectionManager::new(
            config.websocket.connection_config(config.env, auth),
            connector,
        ));

        let signer = Arc::new(OrderSigner::new(keys, maker, config.env)?);
        let sender = Arc::new(WsOrderSender::new(connection.clone()));
        let engine = Arc::new(GridEngine::new(
            signer.clone(),
            sender,
            config.grid.scale(),
        ));
        let snapshots = Arc::new(SnapshotStore::new(&config.persistence.data_dir));
        let notifier = Notifier::new(config.notifier.webhook_url.clone())?;

        info!(
            env = %config.env,
            instrument = %config.instrument_name(),
            maker = %maker,
            "Application initialized"
        );

        Ok(Self {
            config,
            connection,
            rest,
            signer,
            engine,
            params,
            snapshots,
            notifier,
        })
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn engine(&self) -> &Arc<GridEngine> {
        &self.engine
    }

    /// Run until Ctrl-C or an external shutdown.
    pub async fn run(&self) -> AppResult<()> {
        self.connection.connect().await?;

        let tasks = self.spawn_tasks();

        // Channels are subscribed only after bootstrap so flatten fills never
        // trigger grid replacements.
        let report = match self.bootstrap().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Bootstrap failed");
                self.notifier.notify(&format!("Grid bootstrap failed: {e}")).await;
                self.stop(tasks).await;
                return Err(e);
            }
        };
        info!(?report, "Bootstrap complete");

        if let Err(e) = self.subscribe_channels().await {
            error!(error = %e, "Failed to subscribe channels");
            self.stop(tasks).await;
            return Err(e);
        }
        self.notifier
            .notify(&format!(
                "Grid running on {}: mark {}, {} orders placed",
                self.config.instrument_name(),
                report.mark_price,
                report.orders_placed
            ))
            .await;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown signal received");
            }
            () = self.connection.cancelled() => {}
        }

        self.stop(tasks).await;
        Ok(())
    }

    fn spawn_tasks(&self) -> Vec<JoinHandle<()>> {
        let handler = Arc::new(GridHandler::new(
            self.engine.clone(),
            self.params,
            self.snapshots.clone(),
            self.notifier.clone(),
            self.config.instrument_name(),
        ));
        let dispatcher = MessageDispatcher::new(self.connection.clone(), handler);

        let heartbeat = self.connection.clone();
        let stats = self.connection.clone();
        let every = Duration::from_secs(self.config.telemetry.stats_interval_secs);

        vec![
            tokio::spawn(async move { dispatcher.run().await }),
            tokio::spawn(async move { heartbeat.run_heartbeat().await }),
            tokio::spawn(report_stats(stats, every)),
        ]
    }

    async fn stop(&self, tasks: Vec<JoinHandle<()>>) {
        self.cancel_on_shutdown().await;
        self.connection.shutdown().await;
        for task in tasks {
            if tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Background task did not stop in time");
            }
        }
        if let Err(e) = self.snapshots.flush() {
            warn!(error = %e, "Failed to flush snapshots");
        }
        info!("Application stopped");
    }

    /// Cancel orders over the live connection according to
    /// `grid.cancel_on_shutdown`.
    pub async fn cancel_on_shutdown(&self) {
        match self.config.grid.cancel_on_shutdown {
            ShutdownCancel::None => {}
            ShutdownCancel::Session => {
                let (sent, dropped) = self.engine.cancel_tracked().await;
                info!(sent, dropped, "Cancelled session orders");
            }
            ShutdownCancel::All => {
                if let Err(e) = self.engine.cancel_all().await {
                    warn!(error = %e, "Failed to cancel open orders on shutdown");
                }
            }
        }
    }

    /// Subscribe `fills`, `orders` and the instrument ticker, then wait for
    /// their acknowledgements.
    pub async fn subscribe_channels(&self) -> AppResult<()> {
        let channels = [
            FILLS_CHANNEL.to_string(),
            ORDERS_CHANNEL.to_string(),
            ticker_channel(&self.config.instrument_name()),
        ];

        let mut pending = Vec::with_capacity(channels.len());
        for channel in &channels {
            pending.push(self.connection.subscribe(channel).await?);
        }

        let timeout = Duration::from_millis(self.config.websocket.ack_timeout_ms);
        for ack in pending {
            let channel = ack.channel.clone();
            match ack.wait(timeout).await {
                AckStatus::Confirmed => info!(%channel, "Subscription confirmed"),
                AckStatus::Rejected => {
                    warn!(%channel, "Subscription rejected");
                    self.notifier
                        .notify(&format!("Subscription to {channel} was rejected"))
                        .await;
                }
                status => warn!(%channel, ?status, "Subscription not acknowledged"),
            }
        }
        Metrics::ws_subscriptions(self.connection.registry().len());
        Ok(())
    }

    /// Startup sequence over REST.
    ///
    /// With `initialize` set: flatten positions, cancel orders and place the
    /// ladder. The stop-loss check runs either way and skips the ladder when
    /// it fires.
    pub async fn bootstrap(&self) -> AppResult<BootstrapReport> {
        let grid = &self.config.grid;

        let flattened = if grid.initialize {
            Some(self.flatten_positions().await?)
        } else {
            info!("Keeping existing positions and orders, monitoring only");
            None
        };

        let market = self.load_market().await?;
        let mut report = BootstrapReport {
            instrument: market.instrument_id,
            mark_price: market.mark_price,
            flattened,
            orders_placed: 0,
            orders_failed: 0,
            stop_loss_triggered: false,
        };

        if let Some(stop) = grid.stop_loss_price {
            if market.mark_price.inner() <= stop {
                self.stop_loss(&market).await?;
                report.stop_loss_triggered = true;
                return Ok(report);
            }
        }

        if !grid.initialize {
            return Ok(report);
        }

        let range = grid.range(market.mark_price)?;
        if grid.range_mode == RangeMode::Fixed && !range.contains(market.mark_price) {
            warn!(
                mark = %market.mark_price,
                lower = %range.lower,
                upper = %range.upper,
                "Mark price outside fixed grid range, ladder not placed"
            );
            return Ok(report);
        }

        info!(
            mode = ?grid.range_mode,
            mark = %market.mark_price,
            lower = %range.lower,
            upper = %range.upper,
            "Placing grid ladder"
        );
        let (placed, failed) = self.place_ladder(&market, &range).await?;
        report.orders_placed = placed;
        report.orders_failed = failed;
        Ok(report)
    }

    async fn load_market(&self) -> AppResult<MarketInfo> {
        let markets = self.rest.get_markets(&self.config.grid.asset).await?;
        Ok(find_perp(&markets, &self.config.grid.asset)?)
    }

    /// Close every position on the traded instrument, then cancel its orders.
    ///
    /// Returns whether the instrument ended up flat.
    async fn flatten_positions(&self) -> AppResult<bool> {
        let name = self.config.instrument_name();
        let settle = Duration::from_millis(self.config.grid.flatten_settle_ms);

        for attempt in 1..=FLATTEN_ATTEMPTS {
            info!(attempt, "Checking open positions");
            let account = match self.rest.get_account().await {
                Ok(account) => account,
                Err(e) => {
                    error!(error = %e, attempt, "Failed to fetch account");
                    tokio::time::sleep(settle).await;
                    continue;
                }
            };

            let positions: Vec<Position> = account.positions_for(&name).cloned().collect();
            if positions.is_empty() {
                self.cancel_instrument_orders().await;
                info!("No open positions");
                return Ok(true);
            }

            info!(count = positions.len(), "Open positions detected, flattening");
            let market = self.load_market().await?;
            for position in &positions {
                if let Err(e) = self.close_position(position, market.mark_price).await {
                    error!(error = %e, instrument = %position.instrument_name, "Failed to close position");
                }
                tokio::time::sleep(settle).await;
            }
            self.cancel_instrument_orders().await;
        }

        warn!("Positions remain after {FLATTEN_ATTEMPTS} attempts, manual intervention may be needed");
        self.notifier
            .notify(&format!(
                "{name}: positions still open after {FLATTEN_ATTEMPTS} flatten attempts"
            ))
            .await;
        Ok(false)
    }

    async fn close_position(&self, position: &Position, mark: Price) -> AppResult<String> {
        let side = position.closing_side();
        let factor = if side.is_buy() {
            FLATTEN_BUY_FACTOR
        } else {
            FLATTEN_SELL_FACTOR
        };
        let limit = (mark * factor).round_dp(self.config.grid.price_decimals);
        info!(
            instrument = %position.instrument_name,
            position_side = %position.side,
            amount = %position.amount,
            %side,
            %limit,
            "Closing position"
        );
        self.submit_limit(
            position.instrument_id,
            side.is_buy(),
            limit,
            position.amount.abs(),
            false,
            true,
        )
        .await
    }

    async fn cancel_instrument_orders(&self) {
        match self
            .rest
            .cancel_all_orders(Some("PERPETUAL"), Some(self.config.grid.asset.as_str()))
            .await
        {
            Ok(response) => info!(%response, "Cancelled open orders"),
            Err(e) => error!(error = %e, "Failed to cancel open orders"),
        }
    }

    /// Buy and sell post-only orders at every ladder level.
    ///
    /// Individual failures are logged and counted; the ladder continues.
    async fn place_ladder(
        &self,
        market: &MarketInfo,
        range: &GridRange,
    ) -> AppResult<(usize, usize)> {
        let grid = &self.config.grid;
        let levels = range.levels(grid.grid_size, grid.price_decimals)?;
        let quantity = Size::new(grid.quantity);
        let pacing = Duration::from_millis(grid.order_pacing_ms);

        let (mut placed, mut failed) = (0, 0);
        for (i, level) in levels.iter().enumerate() {
            for is_buy in [true, false] {
                match self
                    .submit_limit(market.instrument_id, is_buy, *level, quantity, true, false)
                    .await
                {
                    Ok(order_id) => {
                        self.engine.track_order(&order_id);
                        placed += 1;
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(error = %e, price = %level, is_buy, "Ladder order failed");
                    }
                }
            }
            if i + 1 < levels.len() && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }
        info!(placed, failed, levels = levels.len(), "Grid ladder placed");
        Ok((placed, failed))
    }

    /// Cancel the instrument's orders and market-sell one grid quantity.
    async fn stop_loss(&self, market: &MarketInfo) -> AppResult<()> {
        warn!(mark = %market.mark_price, "Stop-loss price reached");
        self.cancel_instrument_orders().await;

        let signed = self.signer.sign_market(
            market.instrument_id,
            false,
            Size::new(self.config.grid.quantity),
            self.config.grid.scale().amount_decimals,
            unix_now(),
        )?;
        let response = self
            .rest
            .create_order(&rest_order_body(&signed, false, false))
            .await?;
        info!(%response, order_id = %signed.order_id, "Stop-loss order submitted");

        self.notifier
            .notify(&format!(
                "Stop loss executed on {} at mark {}",
                market.instrument_name, market.mark_price
            ))
            .await;
        Ok(())
    }

    async fn submit_limit(
        &self,
        instrument: InstrumentId,
        is_buy: bool,
        price: Price,
        quantity: Size,
        post_only: bool,
        reduce_only: bool,
    ) -> AppResult<String> {
        let request = OrderRequest::new(instrument, is_buy, price, quantity, self.config.grid.scale());
        let signed = self.signer.sign(&request, unix_now())?;
        self.rest
            .create_order(&rest_order_body(&signed, post_only, reduce_only))
            .await?;
        Ok(signed.order_id)
    }
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

/// Publish connection gauges and log a status line every `every`.
async fn report_stats(connection: Arc<ConnectionManager>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = connection.cancelled() => break,
            _ = ticker.tick() => {
                let stats = connection.stats();
                Metrics::ws_state(stats.state.as_gauge());
                for (reason, total) in &stats.reconnects_by_reason {
                    Metrics::ws_reconnects(reason.as_str(), *total);
                }
                Metrics::ws_subscriptions(stats.subscriptions);

                let snapshot = Metrics::snapshot();
                info!(
                    state = %stats.state,
                    epoch = stats.epoch,
                    reconnects = stats.reconnects,
                    pending_acks = stats.pending_acks,
                    frames = snapshot.frames,
                    decode_errors = snapshot.decode_errors,
                    fills = snapshot.fills,
                    replacements = snapshot.replacements_submitted,
                    replacements_failed = snapshot.replacements_failed,
                    "Status"
                );
            }
        }
    }
}
