//! Alert dispatch: durable history first, then delivery.
//!
//! A trigger that fails to deliver is preferred over a delivered alert
//! with no record, so the history row is written before the messaging
//! channel is touched and is never rolled back.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::adapters::{AlertMessenger, MonitorStore};
use crate::domain::Subscription;
use crate::error::Result;

/// Dispatches triggered alerts to subscription owners
pub struct Notifier {
    store: Arc<dyn MonitorStore>,
    messenger: Arc<dyn AlertMessenger>,
}

impl Notifier {
    pub fn new(store: Arc<dyn MonitorStore>, messenger: Arc<dyn AlertMessenger>) -> Self {
        Self { store, messenger }
    }

    /// Record and deliver one triggered alert.
    ///
    /// The history row keeps `message_delivered = false` when delivery
    /// fails; the flag flips only after the channel confirms.
    pub async fn dispatch(
        &self,
        subscription: &Subscription,
        market_title: &str,
        previous_price: Decimal,
        current_price: Decimal,
        change_pct: Decimal,
    ) -> Result<()> {
        let owner = self.store.get_owner(subscription.owner_id).await?;

        let history = self
            .store
            .insert_alert_history(
                subscription.id,
                &subscription.market_id,
                previous_price,
                current_price,
                change_pct,
            )
            .await?;

        let text = format_spike_alert(
            market_title,
            &subscription.market_id,
            previous_price,
            current_price,
            change_pct,
            subscription.threshold_pct,
        );

        if let Err(e) = self.messenger.deliver(owner.telegram_id, &text).await {
            error!(
                "Failed to deliver alert for subscription {}: {}",
                subscription.id, e
            );
            return Err(e);
        }

        // Secondary write; the alert already went out.
        if let Err(e) = self.store.mark_alert_delivered(history.id).await {
            warn!(
                "Failed to mark alert history {} as delivered: {}",
                history.id, e
            );
        }

        info!(
            "Sent spike alert to owner {} for market {} ({}%)",
            owner.telegram_id,
            subscription.market_id,
            change_pct.round_dp(2)
        );
        Ok(())
    }
}

/// Render the alert message for the messaging channel
pub fn format_spike_alert(
    market_title: &str,
    market_id: &str,
    previous_price: Decimal,
    current_price: Decimal,
    change_pct: Decimal,
    threshold_pct: Decimal,
) -> String {
    let sign = if change_pct >= Decimal::ZERO { "+" } else { "" };

    format!(
        "\u{1f4c8} *Price Spike Alert!*\n\n\
         *Market:* {} (#{})\n\
         *Current Price:* ${:.4}\n\
         *1 min ago:* ${:.4}\n\
         *Change:* {}{:.2}% (threshold: \u{b1}{:.1}%)\n\n\
         *Triggered:* {} UTC",
        escape_markdown(market_title),
        market_id,
        current_price,
        previous_price,
        sign,
        change_pct,
        threshold_pct,
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Escape characters that would break legacy-Markdown rendering
fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
