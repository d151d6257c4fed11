//! Opinion openapi HTTP client.
//!
//! Every response arrives in a JSON envelope `{code, msg, result}`; a
//! non-zero `code` is an API error even on HTTP 200. Prices come back as
//! strings and are parsed into `Decimal` here, so the rest of the crate
//! never sees raw payloads.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OpinionApiConfig;
use crate::domain::{TradeSide, TrackingToken};
use crate::error::{Result, SpikewatchError};

/// Opinion API client
#[derive(Clone)]
pub struct OpinionClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    result: Option<T>,
}

/// Market metadata as returned by `GET /openapi/market/{id}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDetail {
    pub market_id: String,
    #[serde(default)]
    pub market_title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_enum: i64,
    /// 0 = binary, anything else = multi-outcome
    #[serde(default)]
    pub market_type: i64,
    #[serde(default)]
    pub yes_token_id: String,
    #[serde(default)]
    pub no_token_id: String,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub resolved_at: i64,
    /// Declared outcomes of a multi-outcome market
    #[serde(default)]
    pub child_markets: Vec<ChildMarket>,
}

/// One declared outcome of a multi-outcome market
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildMarket {
    #[serde(default)]
    pub market_id: String,
    #[serde(default)]
    pub market_title: String,
    #[serde(default)]
    pub yes_token_id: String,
    #[serde(default)]
    pub no_token_id: String,
}

/// Raw latest-price payload; price/side/size arrive as strings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenQuote {
    #[allow(dead_code)]
    #[serde(default)]
    token_id: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    size: String,
}

/// Parsed latest-price quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: Decimal,
    pub side: TradeSide,
    pub size: Decimal,
}

impl MarketDetail {
    /// Whether the market still trades; resolved/closed markets are not
    /// monitorable
    pub fn is_tradable(&self) -> bool {
        if self.resolved_at > 0 {
            return false;
        }
        !matches!(
            self.status.to_ascii_lowercase().as_str(),
            "resolved" | "closed" | "cancelled" | "settled"
        )
    }

    /// Markets without a direct yes-token declare their outcomes as
    /// child markets
    pub fn is_multi_outcome(&self) -> bool {
        self.market_type != 0 || self.yes_token_id.is_empty()
    }

    /// Default-outcome selection policy for multi-outcome markets:
    /// positional, the first declared outcome that carries a token.
    pub fn default_outcome_token(&self) -> Option<String> {
        self.child_markets
            .iter()
            .find(|c| !c.yes_token_id.is_empty())
            .map(|c| c.yes_token_id.clone())
    }

    /// Resolve the token this market is monitored through.
    ///
    /// An explicit per-subscription token always wins; binary markets
    /// fall back to their yes-token, multi-outcome markets to the
    /// default-outcome policy.
    pub fn select_tracking_token(&self, explicit: Option<&str>) -> Result<TrackingToken> {
        if !self.is_tradable() {
            return Err(SpikewatchError::MarketInactive(self.market_id.clone()));
        }

        if let Some(token) = explicit.filter(|t| !t.is_empty()) {
            return Ok(TrackingToken {
                token_id: token.to_string(),
                market_title: self.market_title.clone(),
            });
        }

        let token_id = if self.is_multi_outcome() {
            self.default_outcome_token()
        } else {
            Some(self.yes_token_id.clone())
        };

        match token_id.filter(|t| !t.is_empty()) {
            Some(token_id) => Ok(TrackingToken {
                token_id,
                market_title: self.market_title.clone(),
            }),
            None => Err(SpikewatchError::NoTrackableToken(self.market_id.clone())),
        }
    }
}

impl OpinionClient {
    /// Build a client from config; the request timeout applies to every
    /// call so a stalled upstream cannot wedge a cycle
    pub fn new(cfg: &OpinionApiConfig) -> Result<Self> {
        Self::with_options(&cfg.api_key, &cfg.base_url, cfg.request_timeout())
    }

    pub fn with_options(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("spikewatch/0.1")
            .build()
            .map_err(|e| {
                SpikewatchError::Internal(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_envelope<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .header("apikey", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SpikewatchError::Api {
                code: status.as_u16() as i64,
                msg: body,
            });
        }

        let envelope: Envelope<T> = resp.json().await?;
        if envelope.code != 0 {
            return Err(SpikewatchError::Api {
                code: envelope.code,
                msg: envelope.msg,
            });
        }

        envelope.result.ok_or_else(|| SpikewatchError::Api {
            code: envelope.code,
            msg: "envelope carried no result".to_string(),
        })
    }

    /// Fetch market metadata; any failure here means the metadata is
    /// unavailable this cycle
    pub async fn market_details(&self, market_id: &str) -> Result<MarketDetail> {
        let path = format!("/openapi/market/{}", market_id);

        self.get_envelope::<MarketDetail>(&path).await.map_err(|e| {
            warn!("Failed to fetch market details for {}: {}", market_id, e);
            SpikewatchError::MarketNotFound(market_id.to_string())
        })
    }

    /// Fetch and parse the latest traded price for a token
    pub async fn latest_price(&self, token_id: &str) -> Result<PriceQuote> {
        let path = format!("/openapi/token/latest-price?token_id={}", token_id);

        let quote: TokenQuote = self.get_envelope(&path).await.map_err(|e| {
            warn!("Failed to fetch latest price for {}: {}", token_id, e);
            SpikewatchError::PriceUnavailable(token_id.to_string())
        })?;

        // An unparseable price poisons the whole sample; an unparseable
        // size only loses trade-volume detail.
        let price = parse_price(&quote.price)?;
        let size = parse_size(&quote.size);

        Ok(PriceQuote {
            price,
            side: TradeSide::parse(&quote.side),
            size,
        })
    }
}

#[async_trait::async_trait]
impl super::MarketDataGateway for OpinionClient {
    async fn market_details(&self, market_id: &str) -> Result<MarketDetail> {
        OpinionClient::market_details(self, market_id).await
    }

    async fn latest_price(&self, token_id: &str) -> Result<PriceQuote> {
        OpinionClient::latest_price(self, token_id).await
    }
}

/// Parse a price string; non-positive or malformed prices are rejected
pub fn parse_price(raw: &str) -> Result<Decimal> {
    let price = Decimal::from_str(raw.trim())
        .map_err(|_| SpikewatchError::InvalidPrice(raw.to_string()))?;

    if price <= Decimal::ZERO {
        return Err(SpikewatchError::InvalidPrice(raw.to_string()));
    }

    Ok(price)
}

/// Parse a size string; missing or malformed sizes default to zero
pub fn parse_size(raw: &str) -> Decimal {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Decimal::ZERO;
    }

    match Decimal::from_str(trimmed) {
        Ok(size) if size >= Decimal::ZERO => size,
        Ok(_) | Err(_) => {
            warn!("Unparseable trade size {:?}, defaulting to 0", raw);
            Decimal::ZERO
        }
    }
}
