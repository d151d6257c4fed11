use thiserror::Error;

/// Main error type for the spike monitor
#[derive(Error, Debug)]
pub enum SpikewatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Upstream API errors (the envelope carries its own status code)
    #[error("API error: code={code}, msg={msg}")]
    Api { code: i64, msg: String },

    // Market data errors
    #[error("Market not found or metadata unavailable: {0}")]
    MarketNotFound(String),

    #[error("Market is not tradable: {0}")]
    MarketInactive(String),

    #[error("No trackable token for market: {0}")]
    NoTrackableToken(String),

    #[error("Price unavailable for token {0}")]
    PriceUnavailable(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    // Subscription errors
    #[error("Owner not found: {0}")]
    OwnerNotFound(i64),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(i64),

    #[error("Cannot track more than {limit} markets")]
    MaxMarketsReached { limit: usize },

    // Delivery errors
    #[error("Message delivery failed: {0}")]
    Delivery(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SpikewatchError {
    /// Expected, non-erroneous states that halt only the current
    /// market's or subscription's processing. Everything else is a
    /// transient failure that the next cycle retries naturally.
    pub fn is_skip_condition(&self) -> bool {
        matches!(
            self,
            SpikewatchError::MarketInactive(_)
                | SpikewatchError::NoTrackableToken(_)
                | SpikewatchError::OwnerNotFound(_)
        )
    }
}

/// Result type alias for SpikewatchError
pub type Result<T> = std::result::Result<T, SpikewatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_condition_classification() {
        assert!(SpikewatchError::MarketInactive("m1".into()).is_skip_condition());
        assert!(SpikewatchError::NoTrackableToken("m1".into()).is_skip_condition());
        assert!(SpikewatchError::OwnerNotFound(7).is_skip_condition());

        assert!(!SpikewatchError::MarketNotFound("m1".into()).is_skip_condition());
        assert!(!SpikewatchError::PriceUnavailable("t1".into()).is_skip_condition());
        assert!(!SpikewatchError::Delivery("timeout".into()).is_skip_condition());
    }
}
