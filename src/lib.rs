//! Multi-source Solana token intelligence: resilient API clients, a
//! two-tier read cache, holder aggregation, and trade signal evaluation.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod signal;

pub use config::Config;
pub use error::AggregatorError;
pub use provider::{ProviderContext, TokenProvider};
pub use signal::should_trade;
