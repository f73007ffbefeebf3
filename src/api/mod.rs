pub mod birdeye;
pub mod codex;
pub mod dexscreener;
pub mod fetch;
pub mod helius;

pub use birdeye::BirdeyeClient;
pub use codex::CodexClient;
pub use dexscreener::DexScreenerClient;
pub use fetch::RetryClient;
pub use helius::HeliusClient;
