use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::domain::{
    AlertHistory, Owner, PriceSample, Subscription, TradeSide, MAX_MARKETS_PER_OWNER,
};
use crate::error::{Result, SpikewatchError};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Owners ====================

    /// Register a chat user, refreshing a changed username on conflict
    pub async fn create_or_get_owner(
        &self,
        telegram_id: i64,
        username: Option<&str>,
    ) -> Result<Owner> {
        let row = sqlx::query(
            r#"
            INSERT INTO owners (telegram_id, username)
            VALUES ($1, $2)
            ON CONFLICT (telegram_id) DO UPDATE SET
                username = EXCLUDED.username,
                updated_at = NOW()
            RETURNING id, telegram_id, username, created_at, updated_at
            "#,
        )
        .bind(telegram_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(owner_from_row(&row))
    }

    /// Look up an owner by internal id; a missing row means the
    /// referencing subscription is orphaned
    pub async fn get_owner(&self, owner_id: i64) -> Result<Owner> {
        let row = sqlx::query(
            "SELECT id, telegram_id, username, created_at, updated_at FROM owners WHERE id = $1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| owner_from_row(&r))
            .ok_or(SpikewatchError::OwnerNotFound(owner_id))
    }

    pub async fn get_owner_by_telegram_id(&self, telegram_id: i64) -> Result<Option<Owner>> {
        let row = sqlx::query(
            "SELECT id, telegram_id, username, created_at, updated_at FROM owners WHERE telegram_id = $1",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| owner_from_row(&r)))
    }

    // ==================== Subscriptions ====================

    /// Create a subscription, or refresh threshold/token in place when
    /// the owner already has an active one for this market.
    ///
    /// A refresh never counts against the market limit; an 11th distinct
    /// market is rejected without touching existing rows.
    pub async fn upsert_subscription(
        &self,
        owner_id: i64,
        market_id: &str,
        market_title: &str,
        token_id: Option<&str>,
        threshold_pct: Decimal,
    ) -> Result<Subscription> {
        if threshold_pct <= Decimal::ZERO {
            return Err(SpikewatchError::Validation(format!(
                "threshold_pct must be positive, got {}",
                threshold_pct
            )));
        }

        let tracked = self.tracked_market_ids(owner_id).await?;
        let is_new_market = !tracked.iter().any(|m| m == market_id);
        if is_new_market && tracked.len() >= MAX_MARKETS_PER_OWNER {
            return Err(SpikewatchError::MaxMarketsReached {
                limit: MAX_MARKETS_PER_OWNER,
            });
        }

        let row = sqlx::query(
            r#"
            INSERT INTO subscriptions (owner_id, market_id, market_title, token_id, threshold_pct, active)
            VALUES ($1, $2, $3, $4, $5, true)
            ON CONFLICT (owner_id, market_id) WHERE active DO UPDATE SET
                market_title = EXCLUDED.market_title,
                token_id = EXCLUDED.token_id,
                threshold_pct = EXCLUDED.threshold_pct,
                updated_at = NOW()
            RETURNING id, owner_id, market_id, market_title, token_id, threshold_pct,
                      active, created_at, updated_at
            "#,
        )
        .bind(owner_id)
        .bind(market_id)
        .bind(market_title)
        .bind(token_id)
        .bind(threshold_pct)
        .fetch_one(&self.pool)
        .await?;

        let subscription = subscription_from_row(&row);
        info!(
            "Upserted subscription: id={}, owner={}, market={}, threshold={}%",
            subscription.id, owner_id, market_id, threshold_pct
        );
        Ok(subscription)
    }

    /// All active subscriptions, ordered by market for grouping
    pub async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, market_id, market_title, token_id, threshold_pct,
                   active, created_at, updated_at
            FROM subscriptions
            WHERE active
            ORDER BY market_id, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(subscription_from_row).collect())
    }

    /// Distinct market ids with at least one active subscription
    pub async fn distinct_active_market_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT market_id FROM subscriptions WHERE active ORDER BY market_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("market_id")).collect())
    }

    /// Distinct active market ids for one owner
    pub async fn tracked_market_ids(&self, owner_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT market_id
            FROM subscriptions
            WHERE owner_id = $1 AND active
            ORDER BY market_id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("market_id")).collect())
    }

    pub async fn subscriptions_for_owner(&self, owner_id: i64) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, market_id, market_title, token_id, threshold_pct,
                   active, created_at, updated_at
            FROM subscriptions
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(subscription_from_row).collect())
    }

    pub async fn get_subscription(&self, subscription_id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, market_id, market_title, token_id, threshold_pct,
                   active, created_at, updated_at
            FROM subscriptions
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| subscription_from_row(&r)))
    }

    /// Soft-delete: history rows keep referencing the subscription
    pub async fn deactivate_subscription(&self, subscription_id: i64, owner_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET active = false, updated_at = NOW()
            WHERE id = $1 AND owner_id = $2 AND active
            "#,
        )
        .bind(subscription_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SpikewatchError::SubscriptionNotFound(subscription_id));
        }

        info!(
            "Deactivated subscription: id={}, owner={}",
            subscription_id, owner_id
        );
        Ok(())
    }

    // ==================== Price samples ====================

    /// Append a price observation; no dedup, every cycle inserts
    pub async fn append_sample(
        &self,
        token_id: &str,
        market_id: &str,
        price: Decimal,
        side: TradeSide,
        size: Decimal,
    ) -> Result<()> {
        if price <= Decimal::ZERO {
            return Err(SpikewatchError::InvalidPrice(price.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO price_samples (token_id, market_id, price, side, size)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token_id)
        .bind(market_id)
        .bind(price)
        .bind(side.as_str())
        .bind(size)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The sample from roughly `target_age` ago: earliest inside the
    /// `target_age ± tolerance` window. Empty window is the normal state
    /// for a market without a full cycle of history yet.
    pub async fn sample_near(
        &self,
        market_id: &str,
        target_age: Duration,
        tolerance: Duration,
    ) -> Result<Option<PriceSample>> {
        let now = Utc::now();
        let target = chrono::Duration::seconds(target_age.as_secs() as i64);
        let tol = chrono::Duration::seconds(tolerance.as_secs() as i64);
        let oldest = now - (target + tol);
        let newest = now - (target - tol).max(chrono::Duration::zero());

        let row = sqlx::query(
            r#"
            SELECT id, token_id, market_id, price, side, size, recorded_at
            FROM price_samples
            WHERE market_id = $1
              AND recorded_at >= $2
              AND recorded_at <= $3
            ORDER BY recorded_at ASC
            LIMIT 1
            "#,
        )
        .bind(market_id)
        .bind(oldest)
        .bind(newest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| sample_from_row(&r)))
    }

    /// Most recent sample for a market
    pub async fn latest_sample(&self, market_id: &str) -> Result<Option<PriceSample>> {
        let row = sqlx::query(
            r#"
            SELECT id, token_id, market_id, price, side, size, recorded_at
            FROM price_samples
            WHERE market_id = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| sample_from_row(&r)))
    }

    /// Samples for a market since a point in time, oldest first
    pub async fn price_history(
        &self,
        market_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceSample>> {
        let rows = sqlx::query(
            r#"
            SELECT id, token_id, market_id, price, side, size, recorded_at
            FROM price_samples
            WHERE market_id = $1 AND recorded_at >= $2
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(market_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(sample_from_row).collect())
    }

    /// Delete samples older than the retention horizon
    pub async fn purge_samples_older_than(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(retention.as_secs() as i64);

        let result = sqlx::query("DELETE FROM price_samples WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!("Purged {} aged price samples", deleted);
        }
        Ok(deleted)
    }

    // ==================== Alert history ====================

    /// Record a triggered alert before delivery is attempted
    pub async fn insert_alert_history(
        &self,
        subscription_id: i64,
        market_id: &str,
        previous_price: Decimal,
        current_price: Decimal,
        change_pct: Decimal,
    ) -> Result<AlertHistory> {
        let row = sqlx::query(
            r#"
            INSERT INTO alert_history
                (subscription_id, market_id, previous_price, current_price, change_pct, message_delivered)
            VALUES ($1, $2, $3, $4, $5, false)
            RETURNING id, subscription_id, market_id, triggered_at, previous_price,
                      current_price, change_pct, message_delivered
            "#,
        )
        .bind(subscription_id)
        .bind(market_id)
        .bind(previous_price)
        .bind(current_price)
        .bind(change_pct)
        .fetch_one(&self.pool)
        .await?;

        let history = history_from_row(&row);
        debug!(
            "Recorded alert history: id={}, subscription={}, change={}%",
            history.id, subscription_id, change_pct
        );
        Ok(history)
    }

    /// Flip the delivered flag after confirmed delivery
    pub async fn mark_alert_delivered(&self, history_id: i64) -> Result<()> {
        sqlx::query("UPDATE alert_history SET message_delivered = true WHERE id = $1")
            .bind(history_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn history_for_subscription(
        &self,
        subscription_id: i64,
        limit: i64,
    ) -> Result<Vec<AlertHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subscription_id, market_id, triggered_at, previous_price,
                   current_price, change_pct, message_delivered
            FROM alert_history
            WHERE subscription_id = $1
            ORDER BY triggered_at DESC
            LIMIT $2
            "#,
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(history_from_row).collect())
    }

    pub async fn recent_history(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<AlertHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subscription_id, market_id, triggered_at, previous_price,
                   current_price, change_pct, message_delivered
            FROM alert_history
            WHERE triggered_at >= $1
            ORDER BY triggered_at DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(history_from_row).collect())
    }
}

#[async_trait::async_trait]
impl super::MonitorStore for PostgresStore {
    async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>> {
        PostgresStore::list_active_subscriptions(self).await
    }

    async fn distinct_active_market_ids(&self) -> Result<Vec<String>> {
        PostgresStore::distinct_active_market_ids(self).await
    }

    async fn get_owner(&self, owner_id: i64) -> Result<Owner> {
        PostgresStore::get_owner(self, owner_id).await
    }

    async fn append_sample(
        &self,
        token_id: &str,
        market_id: &str,
        price: Decimal,
        side: TradeSide,
        size: Decimal,
    ) -> Result<()> {
        PostgresStore::append_sample(self, token_id, market_id, price, side, size).await
    }

    async fn sample_near(
        &self,
        market_id: &str,
        target_age: Duration,
        tolerance: Duration,
    ) -> Result<Option<PriceSample>> {
        PostgresStore::sample_near(self, market_id, target_age, tolerance).await
    }

    async fn purge_samples_older_than(&self, retention: Duration) -> Result<u64> {
        PostgresStore::purge_samples_older_than(self, retention).await
    }

    async fn insert_alert_history(
        &self,
        subscription_id: i64,
        market_id: &str,
        previous_price: Decimal,
        current_price: Decimal,
        change_pct: Decimal,
    ) -> Result<AlertHistory> {
        PostgresStore::insert_alert_history(
            self,
            subscription_id,
            market_id,
            previous_price,
            current_price,
            change_pct,
        )
        .await
    }

    async fn mark_alert_delivered(&self, history_id: i64) -> Result<()> {
        PostgresStore::mark_alert_delivered(self, history_id).await
    }
}

fn owner_from_row(row: &PgRow) -> Owner {
    Owner {
        id: row.get("id"),
        telegram_id: row.get("telegram_id"),
        username: row.get("username"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn subscription_from_row(row: &PgRow) -> Subscription {
    Subscription {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        market_id: row.get("market_id"),
        market_title: row.get("market_title"),
        token_id: row.get("token_id"),
        threshold_pct: row.get("threshold_pct"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn sample_from_row(row: &PgRow) -> PriceSample {
    PriceSample {
        id: row.get("id"),
        token_id: row.get("token_id"),
        market_id: row.get("market_id"),
        price: row.get("price"),
        side: TradeSide::parse(row.get::<String, _>("side").as_str()),
        size: row.get("size"),
        recorded_at: row.get("recorded_at"),
    }
}

fn history_from_row(row: &PgRow) -> AlertHistory {
    AlertHistory {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        market_id: row.get("market_id"),
        triggered_at: row.get("triggered_at"),
        previous_price: row.get("previous_price"),
        current_price: row.get("current_price"),
        change_pct: row.get("change_pct"),
        message_delivered: row.get("message_delivered"),
    }
}
