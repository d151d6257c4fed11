use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Taker side of the trade behind a price sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
            TradeSide::Unknown => "unknown",
        }
    }

    /// Lenient parse; anything unrecognized is `Unknown`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" => TradeSide::Buy,
            "sell" => TradeSide::Sell,
            _ => TradeSide::Unknown,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored price observation for a market's tracking token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub id: i64,
    pub token_id: String,
    pub market_id: String,
    pub price: Decimal,
    pub side: TradeSide,
    pub size: Decimal,
    pub recorded_at: DateTime<Utc>,
}

/// The token a market is monitored through, plus its display title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingToken {
    pub token_id: String,
    pub market_title: String,
}
