//! Main application orchestration.
//!
//! Coordinates all components:
//! - API client shared by both sources
//! - Wallet session driving the position loop
//! - Position and market registries with their sync loops
//! - Periodic portfolio summary

use crate::config::AppConfig;
use crate::error::AppResult;
use mdash_api::{AccountProvider, ApiClient, OfferSource, PositionSource, Session};
use mdash_core::{AccountId, StatusFilter};
use mdash_feed::{OfferNormalizer, PositionNormalizer};
use mdash_position::{
    MarketRegistry, OfferSyncTarget, PositionKey, PositionRegistry, PositionSyncTarget,
    SyncLoop, SyncStatus,
};
use mdash_telemetry::Metrics;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    session: Arc<Session>,
    positions: Arc<PositionRegistry>,
    markets: Arc<MarketRegistry>,
    position_sync: SyncLoop<PositionSyncTarget>,
    offer_sync: SyncLoop<OfferSyncTarget>,
    status: StatusFilter,
}

impl Application {
    /// Create the application backed by the HTTP API.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let client = Arc::new(ApiClient::new(config.api_client_config())?);
        info!(base_url = %client.base_url(), "API client ready");
        Self::with_sources(
            config,
            Arc::clone(&client) as Arc<dyn PositionSource>,
            client as Arc<dyn OfferSource>,
        )
    }

    /// Create the application over arbitrary sources.
    pub fn with_sources(
        config: AppConfig,
        position_source: Arc<dyn PositionSource>,
        offer_source: Arc<dyn OfferSource>,
    ) -> AppResult<Self> {
        config.validate()?;
        let chain = config.chain();
        let gas_symbol = config.network.gas_symbol.clone();

        let session = Arc::new(Session::new(chain));
        let positions = Arc::new(PositionRegistry::new());
        let markets = Arc::new(MarketRegistry::new(config.markets.default_market.clone()));
        for symbol in &config.markets.favorites {
            markets.toggle_favorite(symbol);
        }

        let position_target = PositionSyncTarget::new(
            Arc::clone(&positions),
            position_source,
            PositionNormalizer::new(chain, config.maintenance_margin_rate()?, gas_symbol.clone()),
        );
        let offer_target = OfferSyncTarget::new(
            Arc::clone(&markets),
            offer_source,
            OfferNormalizer::new(gas_symbol),
        );

        Ok(Self {
            position_sync: SyncLoop::new(Arc::new(position_target), config.position_interval()),
            offer_sync: SyncLoop::new(Arc::new(offer_target), config.offer_interval()),
            status: config.account.status,
            session,
            positions,
            markets,
            config,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn positions(&self) -> &Arc<PositionRegistry> {
        &self.positions
    }

    pub fn markets(&self) -> &Arc<MarketRegistry> {
        &self.markets
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
            trigger.cancel();
        });
        self.run_until(shutdown).await
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run_until(self, shutdown: CancellationToken) -> AppResult<()> {
        info!(
            chain = %self.config.chain(),
            network = %self.config.network.name,
            status = %self.status,
            "Starting margin-dash"
        );

        if let Some(account) = self.config.account_id()? {
            self.session.connect(account);
        }

        let _position_log = self.positions.subscribe(|snap| {
            if let Some(error) = &snap.error {
                debug!(version = snap.version, error = %error, "Position registry error");
            }
        });
        let _market_log = self.markets.subscribe(|snap| {
            if let Some(error) = &snap.error {
                debug!(version = snap.version, error = %error, "Market registry error");
            }
        });

        self.offer_sync.start(());

        let mut accounts = self.session.subscribe();
        let initial = accounts.borrow_and_update().clone();
        self.retarget(initial);

        let mut position_status = self.position_sync.subscribe_status();
        let mut summary = tokio::time::interval(self.config.summary_interval());
        // First tick fires immediately; skip it so the summary follows the first sync.
        summary.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                changed = accounts.changed() => {
                    if changed.is_err() {
                        warn!("Session closed");
                        break;
                    }
                    let account = accounts.borrow_and_update().clone();
                    self.retarget(account);
                }

                changed = position_status.changed() => {
                    if changed.is_ok() && *position_status.borrow_and_update() == SyncStatus::Failed {
                        warn!(
                            account = ?self.session.current_account().map(|a| a.short()),
                            error = ?self.positions.error(),
                            "Position sync failed; keeping last snapshot"
                        );
                    }
                }

                _ = summary.tick() => self.log_summary(),
            }
        }

        self.position_sync.stop();
        self.offer_sync.stop();
        self.log_summary();
        match Metrics::render() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }
        info!("margin-dash stopped");
        Ok(())
    }

    /// Point the position loop at `account`, or stop it and clear the
    /// registry on disconnect.
    fn retarget(&self, account: Option<AccountId>) {
        match account {
            Some(account) => {
                let key = PositionKey::new(account, self.status);
                // A finished instance is restarted even for the same account.
                if self.position_sync.is_tracking(&key) {
                    return;
                }
                info!(account = %key.account.short(), status = %self.status, "Tracking account");
                // Invalidate the old instance before clearing so its late result cannot land.
                self.position_sync.stop();
                self.positions.clear();
                self.position_sync.start(key);
            }
            None => {
                self.position_sync.stop();
                self.positions.clear();
                info!("No account connected; position sync idle");
            }
        }
    }

    fn log_summary(&self) {
        let open = self.positions.open_positions();
        let current = self.markets.current();
        info!(
            open_positions = open.len(),
            closed_positions = self.positions.closed_or_liquidated_positions().len(),
            aggregate_pnl = %self.positions.aggregate_pnl(),
            collateral = %self.positions.aggregate_collateral(),
            offers = self.markets.active_offers().len(),
            favorites = self.markets.favorite_offers().len(),
            current_market = ?current.as_ref().map(|o| &o.symbol),
            exposure_headroom = ?current.as_ref().and_then(|o| o.exposure_headroom()),
            position_sync = %self.position_sync.status(),
            offer_sync = %self.offer_sync.status(),
            "Portfolio summary"
        );
        for position in &open {
            debug!(
                id = %position.id,
                pair = %position.pair(),
                leverage = %position.leverage,
                notional = ?position.notional(),
                pnl = %position.pnl,
                pnl_pct = %position.pnl_percentage,
                liquidation_price = %position.liquidation_price,
                "Open position"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mdash_api::ApiResult;
    use mdash_feed::{RawOfferRecord, RawPositionRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PositionSource for Counting {
        async fn fetch_raw_positions(
            &self,
            _account: &AccountId,
            _status: StatusFilter,
        ) -> ApiResult<Vec<RawPositionRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl OfferSource for Counting {
        async fn fetch_raw_offers(&self) -> ApiResult<Vec<RawOfferRecord>> {
            Ok(Vec::new())
        }
    }

    fn app(source: &Arc<Counting>) -> Application {
        Application::with_sources(
            AppConfig::default(),
            Arc::clone(source) as Arc<dyn PositionSource>,
            Arc::clone(source) as Arc<dyn OfferSource>,
        )
        .unwrap()
    }

    async fn wait_for_calls(source: &Counting, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while source.calls.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_retarget_same_account_keeps_instance() {
        let source = Arc::new(Counting::default());
        let app = app(&source);
        let account = AccountId::parse("0x00000000000000000000000000000000000000aa").unwrap();
        let key = PositionKey::new(account.clone(), StatusFilter::Open);

        app.retarget(Some(account.clone()));
        wait_for_calls(&source, 1).await;
        assert!(app.position_sync.is_tracking(&key));

        // No restart, so no second immediate fetch.
        app.retarget(Some(account));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        app.retarget(None);
        assert!(!app.position_sync.is_running());
        assert!(app.positions.is_empty());
    }

    #[tokio::test]
    async fn test_retarget_restarts_stopped_loop() {
        let source = Arc::new(Counting::default());
        let app = app(&source);
        let account = AccountId::parse("0x00000000000000000000000000000000000000bb").unwrap();
        let key = PositionKey::new(account.clone(), StatusFilter::Open);

        app.retarget(Some(account.clone()));
        wait_for_calls(&source, 1).await;
        app.position_sync.stop();
        assert!(!app.position_sync.is_tracking(&key));

        app.retarget(Some(account));
        assert!(app.position_sync.is_tracking(&key));
        wait_for_calls(&source, 2).await;
    }
}
