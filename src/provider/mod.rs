pub mod token;

pub use token::{normalize_address, ProviderContext, TokenProvider};
