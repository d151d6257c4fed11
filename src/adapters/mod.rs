pub mod opinion;
pub mod postgres;
pub mod telegram;

pub use opinion::{ChildMarket, MarketDetail, OpinionClient, PriceQuote};
pub use postgres::PostgresStore;
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::domain::{AlertHistory, Owner, PriceSample, Subscription, TradeSide};
use crate::error::Result;

/// Market-data seam between the monitoring cycle and the upstream
/// provider. Mocked in cycle tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Fetch market metadata by id
    async fn market_details(&self, market_id: &str) -> Result<MarketDetail>;

    /// Fetch the latest traded price for a token
    async fn latest_price(&self, token_id: &str) -> Result<PriceQuote>;
}

/// Delivery seam for alert notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertMessenger: Send + Sync {
    /// Deliver `text` to a chat; outcome is observed synchronously
    async fn deliver(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Store operations consumed by the monitoring cycle.
///
/// The subscription-management surface (upserts, listing per owner,
/// deactivation) lives as inherent methods on [`PostgresStore`]; this
/// trait carries only what a cycle needs, so the cycle stays testable
/// without a database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>>;

    async fn distinct_active_market_ids(&self) -> Result<Vec<String>>;

    async fn get_owner(&self, owner_id: i64) -> Result<Owner>;

    async fn append_sample(
        &self,
        token_id: &str,
        market_id: &str,
        price: Decimal,
        side: TradeSide,
        size: Decimal,
    ) -> Result<()>;

    /// The single sample whose age falls inside `target_age ±
    /// tolerance`, earliest in the window first; `None` when the window
    /// is empty.
    async fn sample_near(
        &self,
        market_id: &str,
        target_age: Duration,
        tolerance: Duration,
    ) -> Result<Option<PriceSample>>;

    /// Delete samples older than `retention`; returns rows removed
    async fn purge_samples_older_than(&self, retention: Duration) -> Result<u64>;

    async fn insert_alert_history(
        &self,
        subscription_id: i64,
        market_id: &str,
        previous_price: Decimal,
        current_price: Decimal,
        change_pct: Decimal,
    ) -> Result<AlertHistory>;

    async fn mark_alert_delivered(&self, history_id: i64) -> Result<()>;
}
