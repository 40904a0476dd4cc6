//! External API clients

pub mod market;

pub use market::MarketDataClient;
