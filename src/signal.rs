//! Trade signal evaluation over a processed token snapshot.

use tracing::{debug, warn};

use crate::models::token::ProcessedTokenData;

const MIN_VOLUME_CONCENTRATION: f64 = 0.05;
const MIN_VOLUME_24H_USD: f64 = 1000.0;
const MIN_PRICE_CHANGE_24H_PERCENT: f64 = 10.0;
const MIN_PRICE_CHANGE_12H_PERCENT: f64 = 5.0;
const MIN_UNIQUE_WALLETS_24H: u64 = 100;
const LIQUIDITY_CEILING_USD: f64 = 1000.0;
const MARKET_CAP_CEILING_USD: f64 = 100_000.0;

/// Returns true when any one threshold fires. The liquidity and market cap
/// checks fire on LOW values, so thin or tiny tokens trip the signal on
/// their own. Without a tradable pair the evaluation fails closed.
pub fn should_trade(data: &ProcessedTokenData) -> bool {
    let Some(pair) = data.dex_screener_data.highest_liquidity_pair() else {
        warn!(
            "No pair data available for {}, declining to signal",
            data.trade_data.address
        );
        return false;
    };

    let insider_supply = data.security.owner_balance + data.security.creator_balance;
    // Plain division on purpose: a zero insider supply with nonzero volume
    // yields infinity (fires), and 0/0 yields NaN (never fires).
    let volume_concentration = data.trade_data.h24.volume_usd / insider_supply;

    let checks = [
        (
            "volume concentration",
            volume_concentration >= MIN_VOLUME_CONCENTRATION,
        ),
        (
            "24h volume",
            data.trade_data.h24.volume_usd >= MIN_VOLUME_24H_USD,
        ),
        (
            "24h price change",
            data.trade_data.h24.price_change_percent.unwrap_or(0.0)
                >= MIN_PRICE_CHANGE_24H_PERCENT,
        ),
        (
            "12h price change",
            data.trade_data.h12.price_change_percent >= MIN_PRICE_CHANGE_12H_PERCENT,
        ),
        (
            "24h unique wallets",
            data.trade_data.h24.unique_wallets >= MIN_UNIQUE_WALLETS_24H,
        ),
        (
            "low liquidity",
            pair.liquidity
                .as_ref()
                .is_some_and(|l| l.usd < LIQUIDITY_CEILING_USD),
        ),
        (
            "low market cap",
            pair.market_cap
                .is_some_and(|m| m < MARKET_CAP_CEILING_USD),
        ),
    ];

    for (name, fired) in checks {
        if fired {
            debug!(
                "Trade signal for {} fired on {}",
                data.trade_data.address, name
            );
            return true;
        }
    }
    false
}
