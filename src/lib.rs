pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod retry;
pub mod services;

pub use adapters::{
    AlertMessenger, MarketDataGateway, MonitorStore, OpinionClient, PostgresStore,
    TelegramNotifier,
};
pub use config::AppConfig;
pub use error::{Result, SpikewatchError};
pub use retry::{retry, RetryPolicy};
pub use services::{MonitorService, Notifier, PriceChecker, SessionMap};
