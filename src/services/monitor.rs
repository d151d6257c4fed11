//! Monitoring cycle orchestrator.
//!
//! Drives the periodic cycle: load active subscriptions, group them by
//! market, fan the per-market checks out over a bounded worker pool, and
//! finish with retention cleanup. Distinct markets touch disjoint store
//! partitions and disjoint recipients, so they run concurrently; a
//! failure in one market never aborts the others.

use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::adapters::MonitorStore;
use crate::config::MonitorConfig;
use crate::domain::Subscription;
use crate::error::Result;
use crate::services::PriceChecker;

/// The periodic monitoring service
pub struct MonitorService {
    store: Arc<dyn MonitorStore>,
    checker: PriceChecker,
    poll_interval: Duration,
    retention: Duration,
    max_concurrent_markets: usize,
    shutdown: watch::Receiver<bool>,
}

impl MonitorService {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        checker: PriceChecker,
        cfg: &MonitorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            checker,
            poll_interval: cfg.poll_interval(),
            retention: cfg.retention(),
            max_concurrent_markets: cfg.max_concurrent_markets.max(1),
            shutdown,
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run cycles until the shutdown flag flips.
    ///
    /// The first tick fires immediately, so monitoring starts without
    /// waiting a full interval. A cycle that outlasts the interval makes
    /// the timer skip, never overlap.
    pub async fn run_forever(&mut self) {
        info!(
            "Starting market monitor (poll interval: {:?})",
            self.poll_interval
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Monitoring cycle failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {}
            }

            if self.shutting_down() {
                info!("Stopping market monitor");
                return;
            }
        }
    }

    /// Perform one monitoring cycle
    pub async fn run_once(&self) -> Result<()> {
        debug!("Starting monitoring cycle");

        let subscriptions = self.store.list_active_subscriptions().await?;
        if subscriptions.is_empty() {
            debug!("No active subscriptions to monitor");
            return Ok(());
        }

        let market_ids = self.store.distinct_active_market_ids().await?;
        debug!(
            "Monitoring {} markets with {} subscriptions",
            market_ids.len(),
            subscriptions.len()
        );

        let mut by_market: HashMap<String, Vec<Subscription>> = HashMap::new();
        for subscription in subscriptions {
            by_market
                .entry(subscription.market_id.clone())
                .or_default()
                .push(subscription);
        }

        stream::iter(market_ids)
            .for_each_concurrent(self.max_concurrent_markets, |market_id| {
                let group = by_market.get(&market_id);
                async move {
                    if self.shutting_down() {
                        return;
                    }

                    let group = match group {
                        Some(group) if !group.is_empty() => group,
                        _ => return,
                    };

                    match self.checker.check_market(&market_id, group).await {
                        Ok(()) => {}
                        Err(e) if e.is_skip_condition() => {
                            debug!("Skipping market {}: {}", market_id, e);
                        }
                        Err(e) => {
                            warn!("Error checking market {}: {}", market_id, e);
                        }
                    }
                }
            })
            .await;

        if self.shutting_down() {
            info!("Monitoring cycle aborted by shutdown signal");
            return Ok(());
        }

        if let Err(e) = self.store.purge_samples_older_than(self.retention).await {
            warn!("Failed to purge aged price samples: {}", e);
        }

        debug!("Monitoring cycle completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        MarketDetail, MockAlertMessenger, MockMarketDataGateway, MockMonitorStore, PriceQuote,
    };
    use crate::domain::{AlertHistory, Owner, PriceSample, TradeSide};
    use crate::error::SpikewatchError;
    use crate::services::Notifier;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn market(market_id: &str) -> MarketDetail {
        MarketDetail {
            market_id: market_id.to_string(),
            market_title: format!("Market {}", market_id),
            status: "activated".to_string(),
            status_enum: 2,
            market_type: 0,
            yes_token_id: format!("tok-{}", market_id),
            no_token_id: String::new(),
            volume: 0.0,
            resolved_at: 0,
            child_markets: vec![],
        }
    }

    fn subscription(id: i64, market_id: &str, threshold: Decimal) -> Subscription {
        Subscription {
            id,
            owner_id: 7,
            market_id: market_id.to_string(),
            market_title: format!("Market {}", market_id),
            token_id: None,
            threshold_pct: threshold,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn baseline(market_id: &str, price: Decimal) -> PriceSample {
        PriceSample {
            id: 1,
            token_id: format!("tok-{}", market_id),
            market_id: market_id.to_string(),
            price,
            side: TradeSide::Buy,
            size: dec!(10),
            recorded_at: Utc::now() - chrono::Duration::seconds(60),
        }
    }

    fn owner() -> Owner {
        Owner {
            id: 7,
            telegram_id: 4242,
            username: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn history_row(id: i64) -> AlertHistory {
        AlertHistory {
            id,
            subscription_id: 0,
            market_id: String::new(),
            triggered_at: Utc::now(),
            previous_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            change_pct: Decimal::ZERO,
            message_delivered: false,
        }
    }

    fn service(
        gateway: MockMarketDataGateway,
        store: MockMonitorStore,
        messenger: MockAlertMessenger,
    ) -> MonitorService {
        let store: Arc<dyn MonitorStore> = Arc::new(store);
        let cfg = MonitorConfig::default();
        let notifier = Notifier::new(Arc::clone(&store), Arc::new(messenger));
        let checker = PriceChecker::new(Arc::new(gateway), Arc::clone(&store), notifier, &cfg);
        let (_tx, rx) = watch::channel(false);
        MonitorService::new(store, checker, &cfg, rx)
    }

    #[tokio::test]
    async fn test_empty_subscriptions_is_a_noop_cycle() {
        let gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let messenger = MockAlertMessenger::new();

        store
            .expect_list_active_subscriptions()
            .returning(|| Ok(vec![]));
        store.expect_distinct_active_market_ids().never();
        store.expect_purge_samples_older_than().never();

        service(gateway, store, messenger).run_once().await.unwrap();
    }

    #[tokio::test]
    async fn test_cycle_checks_each_market_and_purges() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let mut messenger = MockAlertMessenger::new();

        store.expect_list_active_subscriptions().returning(|| {
            Ok(vec![
                subscription(1, "m-1", dec!(20)),
                subscription(2, "m-1", dec!(50)),
                subscription(3, "m-2", dec!(10)),
            ])
        });
        store
            .expect_distinct_active_market_ids()
            .returning(|| Ok(vec!["m-1".to_string(), "m-2".to_string()]));

        gateway
            .expect_market_details()
            .times(2)
            .returning(|id| Ok(market(id)));
        gateway.expect_latest_price().times(2).returning(|_| {
            Ok(PriceQuote {
                price: dec!(0.52),
                side: TradeSide::Buy,
                size: dec!(10),
            })
        });
        store
            .expect_append_sample()
            .times(2)
            .returning(|_, _, _, _, _| Ok(()));

        // m-1 has a baseline (0.40 -> 0.52 = +30%); m-2 has none yet.
        store.expect_sample_near().times(2).returning(|id, _, _| {
            if id == "m-1" {
                Ok(Some(baseline(id, dec!(0.40))))
            } else {
                Ok(None)
            }
        });

        // +30% passes the 20% threshold (sub 1) but not the 50% (sub 2).
        store.expect_get_owner().times(1).returning(|_| Ok(owner()));
        store
            .expect_insert_alert_history()
            .times(1)
            .returning(|_, _, _, _, _| Ok(history_row(9)));
        messenger.expect_deliver().times(1).returning(|_, _| Ok(()));
        store
            .expect_mark_alert_delivered()
            .times(1)
            .returning(|_| Ok(()));

        store
            .expect_purge_samples_older_than()
            .times(1)
            .returning(|_| Ok(3));

        service(gateway, store, messenger).run_once().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_failing_market_does_not_abort_the_cycle() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let messenger = MockAlertMessenger::new();

        store.expect_list_active_subscriptions().returning(|| {
            Ok(vec![
                subscription(1, "m-bad", dec!(20)),
                subscription(2, "m-2", dec!(20)),
            ])
        });
        store
            .expect_distinct_active_market_ids()
            .returning(|| Ok(vec!["m-bad".to_string(), "m-2".to_string()]));

        gateway.expect_market_details().times(2).returning(|id| {
            if id == "m-bad" {
                Err(SpikewatchError::MarketNotFound(id.to_string()))
            } else {
                Ok(market(id))
            }
        });
        gateway.expect_latest_price().times(1).returning(|_| {
            Ok(PriceQuote {
                price: dec!(0.52),
                side: TradeSide::Buy,
                size: dec!(10),
            })
        });
        // Only the healthy market reaches the store.
        store
            .expect_append_sample()
            .times(1)
            .withf(|_, market_id, _, _, _| market_id == "m-2")
            .returning(|_, _, _, _, _| Ok(()));
        store
            .expect_sample_near()
            .times(1)
            .returning(|_, _, _| Ok(None));
        store
            .expect_purge_samples_older_than()
            .times(1)
            .returning(|_| Ok(0));

        service(gateway, store, messenger).run_once().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_failure_is_nonfatal() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let messenger = MockAlertMessenger::new();

        store
            .expect_list_active_subscriptions()
            .returning(|| Ok(vec![subscription(1, "m-1", dec!(20))]));
        store
            .expect_distinct_active_market_ids()
            .returning(|| Ok(vec!["m-1".to_string()]));
        gateway
            .expect_market_details()
            .returning(|id| Ok(market(id)));
        gateway.expect_latest_price().returning(|_| {
            Ok(PriceQuote {
                price: dec!(0.52),
                side: TradeSide::Buy,
                size: dec!(10),
            })
        });
        store
            .expect_append_sample()
            .returning(|_, _, _, _, _| Ok(()));
        store.expect_sample_near().returning(|_, _, _| Ok(None));
        store
            .expect_purge_samples_older_than()
            .returning(|_| Err(SpikewatchError::Internal("lock timeout".into())));

        service(gateway, store, messenger).run_once().await.unwrap();
    }

    #[tokio::test]
    async fn test_inactive_market_is_a_skip_not_an_error() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let messenger = MockAlertMessenger::new();

        store
            .expect_list_active_subscriptions()
            .returning(|| Ok(vec![subscription(1, "m-1", dec!(20))]));
        store
            .expect_distinct_active_market_ids()
            .returning(|| Ok(vec!["m-1".to_string()]));
        gateway.expect_market_details().returning(|id| {
            let mut m = market(id);
            m.status = "resolved".to_string();
            Ok(m)
        });
        gateway.expect_latest_price().never();
        store.expect_append_sample().never();
        store
            .expect_purge_samples_older_than()
            .times(1)
            .returning(|_| Ok(0));

        service(gateway, store, messenger).run_once().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flag_skips_market_processing() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();

        store
            .expect_list_active_subscriptions()
            .returning(|| Ok(vec![subscription(1, "m-1", dec!(20))]));
        store
            .expect_distinct_active_market_ids()
            .returning(|| Ok(vec!["m-1".to_string()]));
        gateway.expect_market_details().never();
        store.expect_purge_samples_older_than().never();

        let store: Arc<dyn MonitorStore> = Arc::new(store);
        let cfg = MonitorConfig::default();
        let notifier = Notifier::new(Arc::clone(&store), Arc::new(MockAlertMessenger::new()));
        let checker = PriceChecker::new(Arc::new(gateway), Arc::clone(&store), notifier, &cfg);
        let (tx, rx) = watch::channel(false);
        let service = MonitorService::new(store, checker, &cfg, rx);

        tx.send(true).unwrap();
        service.run_once().await.unwrap();
    }
}
