//! Per-market spike check.
//!
//! One invocation covers a single market: resolve the tracking token,
//! sample the current price, compare it against the baseline from one
//! comparison interval ago, and fan triggered alerts out to that
//! market's subscriptions.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::adapters::{MarketDataGateway, MonitorStore};
use crate::config::MonitorConfig;
use crate::domain::{spike, Subscription};
use crate::error::Result;
use crate::services::Notifier;

/// Checks one market per call; owns no cross-cycle state
pub struct PriceChecker {
    gateway: Arc<dyn MarketDataGateway>,
    store: Arc<dyn MonitorStore>,
    notifier: Notifier,
    baseline_age: Duration,
    baseline_tolerance: Duration,
}

impl PriceChecker {
    pub fn new(
        gateway: Arc<dyn MarketDataGateway>,
        store: Arc<dyn MonitorStore>,
        notifier: Notifier,
        cfg: &MonitorConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            notifier,
            baseline_age: cfg.baseline_age(),
            baseline_tolerance: cfg.baseline_tolerance(),
        }
    }

    /// Run the spike check for one market and its subscription group.
    ///
    /// Skip conditions (inactive market, no trackable token, no baseline
    /// yet) end the check early; only the no-baseline case is silent,
    /// the others surface as classified errors for the caller to log.
    pub async fn check_market(
        &self,
        market_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<()> {
        let market = self.gateway.market_details(market_id).await?;

        // An explicit token on the group's subscription overrides the
        // market-derived token.
        let explicit = subscriptions.first().and_then(|s| s.token_id.as_deref());
        let tracking = market.select_tracking_token(explicit)?;

        let quote = self.gateway.latest_price(&tracking.token_id).await?;

        self.store
            .append_sample(
                &tracking.token_id,
                market_id,
                quote.price,
                quote.side,
                quote.size,
            )
            .await?;

        let baseline = match self
            .store
            .sample_near(market_id, self.baseline_age, self.baseline_tolerance)
            .await?
        {
            Some(sample) => sample,
            None => {
                debug!("No baseline sample for market {} yet", market_id);
                return Ok(());
            }
        };

        debug!(
            "Market {} (token {}): current={}, baseline={}, change={}%",
            market_id,
            tracking.token_id,
            quote.price,
            baseline.price,
            spike::percent_change(baseline.price, quote.price).round_dp(2)
        );

        for subscription in subscriptions {
            if !subscription.active {
                continue;
            }

            let result = spike::detect(baseline.price, quote.price, subscription.threshold_pct);
            if !result.triggered {
                continue;
            }

            info!(
                "Spike triggered for market {}: {}% (threshold: {}%)",
                market_id,
                result.change_pct.round_dp(2),
                subscription.threshold_pct
            );

            if let Err(e) = self
                .notifier
                .dispatch(
                    subscription,
                    &tracking.market_title,
                    baseline.price,
                    quote.price,
                    result.change_pct,
                )
                .await
            {
                if e.is_skip_condition() {
                    debug!("Skipping subscription {}: {}", subscription.id, e);
                } else {
                    error!(
                        "Failed to dispatch alert for subscription {}: {}",
                        subscription.id, e
                    );
                }
            }
        }

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
    use chrono::Utc;
    use mockall::predicate::eq;
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

    fn quote(price: Decimal) -> PriceQuote {
        PriceQuote {
            price,
            side: TradeSide::Buy,
            size: dec!(10),
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

    fn checker(
        gateway: MockMarketDataGateway,
        store: MockMonitorStore,
        messenger: MockAlertMessenger,
    ) -> PriceChecker {
        let store: Arc<dyn MonitorStore> = Arc::new(store);
        let notifier = Notifier::new(Arc::clone(&store), Arc::new(messenger));
        PriceChecker::new(Arc::new(gateway), store, notifier, &MonitorConfig::default())
    }

    #[tokio::test]
    async fn test_no_baseline_ends_quietly() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let mut messenger = MockAlertMessenger::new();

        gateway
            .expect_market_details()
            .returning(|id| Ok(market(id)));
        gateway
            .expect_latest_price()
            .returning(|_| Ok(quote(dec!(0.52))));
        store
            .expect_append_sample()
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));
        store.expect_sample_near().returning(|_, _, _| Ok(None));
        // No baseline: no history row, no delivery attempt.
        store.expect_insert_alert_history().never();
        messenger.expect_deliver().never();

        let subs = vec![subscription(1, "m-1", dec!(20))];
        checker(gateway, store, messenger)
            .check_market("m-1", &subs)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_matching_thresholds_dispatch() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let mut messenger = MockAlertMessenger::new();

        gateway
            .expect_market_details()
            .returning(|id| Ok(market(id)));
        gateway
            .expect_latest_price()
            .returning(|_| Ok(quote(dec!(0.52))));
        store
            .expect_append_sample()
            .returning(|_, _, _, _, _| Ok(()));
        store
            .expect_sample_near()
            .returning(|id, _, _| Ok(Some(baseline(id, dec!(0.40)))));

        // 0.40 -> 0.52 is +30%: triggers the 20% subscription only.
        store
            .expect_get_owner()
            .times(1)
            .returning(|_| Ok(owner()));
        store
            .expect_insert_alert_history()
            .withf(|sub_id, _, prev, cur, change| {
                *sub_id == 1 && *prev == dec!(0.40) && *cur == dec!(0.52) && *change == dec!(30)
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(history_row(9)));
        messenger.expect_deliver().times(1).returning(|_, _| Ok(()));
        store
            .expect_mark_alert_delivered()
            .with(eq(9))
            .returning(|_| Ok(()));

        let subs = vec![
            subscription(1, "m-1", dec!(20)),
            subscription(2, "m-1", dec!(50)),
        ];
        checker(gateway, store, messenger)
            .check_market("m-1", &subs)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_inactive_subscription_never_dispatches() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let mut messenger = MockAlertMessenger::new();

        gateway
            .expect_market_details()
            .returning(|id| Ok(market(id)));
        gateway
            .expect_latest_price()
            .returning(|_| Ok(quote(dec!(0.52))));
        store
            .expect_append_sample()
            .returning(|_, _, _, _, _| Ok(()));
        store
            .expect_sample_near()
            .returning(|id, _, _| Ok(Some(baseline(id, dec!(0.40)))));
        store.expect_insert_alert_history().never();
        messenger.expect_deliver().never();

        let mut sub = subscription(1, "m-1", dec!(20));
        sub.active = false;

        checker(gateway, store, messenger)
            .check_market("m-1", &[sub])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_explicit_token_overrides_market_token() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let messenger = MockAlertMessenger::new();

        gateway
            .expect_market_details()
            .returning(|id| Ok(market(id)));
        gateway
            .expect_latest_price()
            .withf(|token_id| token_id == "tok-override")
            .times(1)
            .returning(|_| Ok(quote(dec!(0.52))));
        store
            .expect_append_sample()
            .withf(|token_id, _, _, _, _| token_id == "tok-override")
            .returning(|_, _, _, _, _| Ok(()));
        store.expect_sample_near().returning(|_, _, _| Ok(None));

        let mut sub = subscription(1, "m-1", dec!(20));
        sub.token_id = Some("tok-override".to_string());

        checker(gateway, store, messenger)
            .check_market("m-1", &[sub])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sample_write_failure_propagates() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let messenger = MockAlertMessenger::new();

        gateway
            .expect_market_details()
            .returning(|id| Ok(market(id)));
        gateway
            .expect_latest_price()
            .returning(|_| Ok(quote(dec!(0.52))));
        store
            .expect_append_sample()
            .returning(|_, _, _, _, _| Err(SpikewatchError::Internal("insert failed".into())));
        store.expect_sample_near().never();

        let subs = vec![subscription(1, "m-1", dec!(20))];
        let err = checker(gateway, store, messenger)
            .check_market("m-1", &subs)
            .await
            .unwrap_err();

        assert!(!err.is_skip_condition());
    }

    #[tokio::test]
    async fn test_one_failed_dispatch_does_not_stop_the_group() {
        let mut gateway = MockMarketDataGateway::new();
        let mut store = MockMonitorStore::new();
        let mut messenger = MockAlertMessenger::new();

        gateway
            .expect_market_details()
            .returning(|id| Ok(market(id)));
        gateway
            .expect_latest_price()
            .returning(|_| Ok(quote(dec!(0.52))));
        store
            .expect_append_sample()
            .returning(|_, _, _, _, _| Ok(()));
        store
            .expect_sample_near()
            .returning(|id, _, _| Ok(Some(baseline(id, dec!(0.40)))));
        store.expect_get_owner().times(2).returning(|_| Ok(owner()));
        store
            .expect_insert_alert_history()
            .times(2)
            .returning(|_, _, _, _, _| Ok(history_row(9)));

        // First delivery fails, second succeeds; the group keeps going.
        let mut sequence = 0;
        messenger
            .expect_deliver()
            .times(2)
            .returning(move |_, _| {
                sequence += 1;
                if sequence == 1 {
                    Err(SpikewatchError::Delivery("channel down".into()))
                } else {
                    Ok(())
                }
            });
        store
            .expect_mark_alert_delivered()
            .times(1)
            .returning(|_| Ok(()));

        let subs = vec![
            subscription(1, "m-1", dec!(20)),
            subscription(2, "m-1", dec!(25)),
        ];
        checker(gateway, store, messenger)
            .check_market("m-1", &subs)
            .await
            .unwrap();
    }
}
