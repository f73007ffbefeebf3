pub mod token;

// Re-export commonly used types
pub use token::{
    DexScreenerData, DexScreenerPair, HighValueHolder, HolderData, HolderTrend,
    ProcessedTokenData, TokenCodex, TokenSecurityData, TokenTradeData, TradeWindow,
};
