pub mod monitor;
pub mod notifier;
pub mod price_checker;
pub mod session;

pub use monitor::MonitorService;
pub use notifier::{format_spike_alert, Notifier};
pub use price_checker::PriceChecker;
pub use session::{ChatSession, SessionMap, SessionStep};
