//! Spike detection over two price samples.
//!
//! Pure computation: no clock, no storage. The caller supplies a baseline
//! sample from roughly one comparison interval ago and the freshly fetched
//! current price.

use rust_decimal::Decimal;

/// Outcome of comparing two prices against a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeResult {
    /// Signed percentage change from the baseline price
    pub change_pct: Decimal,
    /// True when the change magnitude meets or exceeds the threshold
    pub triggered: bool,
}

/// Signed percentage change between two prices.
///
/// `previous` must be positive; the price store rejects non-positive
/// prices, so a zero baseline cannot reach this point.
pub fn percent_change(previous: Decimal, current: Decimal) -> Decimal {
    debug_assert!(previous > Decimal::ZERO);
    (current - previous) / previous * Decimal::ONE_HUNDRED
}

/// Compare two prices against a threshold magnitude.
///
/// Symmetric: upward and downward moves trigger against the same
/// threshold.
pub fn detect(previous: Decimal, current: Decimal, threshold_pct: Decimal) -> SpikeResult {
    let change_pct = percent_change(previous, current);
    SpikeResult {
        change_pct,
        triggered: change_pct.abs() >= threshold_pct,
    }
}
