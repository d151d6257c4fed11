use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum number of distinct markets one owner may track at once
pub const MAX_MARKETS_PER_OWNER: usize = 10;

/// A chat user who owns spike subscriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: i64,
    /// Delivery address on the messaging channel
    pub telegram_id: i64,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user-configured spike subscription for one market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub owner_id: i64,
    pub market_id: String,
    pub market_title: String,
    /// Explicit tracking token; overrides the market's derived token
    pub token_id: Option<String>,
    /// Trigger threshold as an absolute percentage magnitude
    pub threshold_pct: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A triggered-alert audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistory {
    pub id: i64,
    pub subscription_id: i64,
    pub market_id: String,
    pub triggered_at: DateTime<Utc>,
    pub previous_price: Decimal,
    pub current_price: Decimal,
    pub change_pct: Decimal,
    /// Flipped to true only after confirmed delivery
    pub message_delivered: bool,
}
