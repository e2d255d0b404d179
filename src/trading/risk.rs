//! Stop-loss / take-profit placement and order quantity sizing.

use clap::ValueEnum;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{Bracket, Candle, Direction};

use super::ExecutionConfig;

/// How the buffer stop and the recent-candle stop are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// The level closer to entry
    #[default]
    Tight,
    /// The level further from entry
    #[value(alias = "loose")]
    Wide,
}

impl StopPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopPolicy::Tight => "tight",
            StopPolicy::Wide => "wide",
        }
    }
}

/// Compute `(stop_loss, take_profit)` for an entry.
///
/// The stop is built from two candidates: `entry ∓ sl_buffer_points` and the
/// recent candle's low (buys) or high (sells). A structure level missing, or on
/// the wrong side of entry, leaves only the buffer level. Levels are rounded to
/// two decimals.
pub fn calculate_stop_loss_take_profit(
    entry_price: Decimal,
    direction: Direction,
    recent_low: Option<Decimal>,
    recent_high: Option<Decimal>,
    sl_buffer_points: Decimal,
    tp_percent: Decimal,
    policy: StopPolicy,
) -> (Decimal, Decimal) {
    let tp_fraction = tp_percent / dec!(100);

    let (sl, tp) = match direction {
        Direction::Buy => {
            let buffer = entry_price - sl_buffer_points;
            let sl = match recent_low.filter(|low| *low < entry_price) {
                Some(low) => match policy {
                    StopPolicy::Tight => low.max(buffer),
                    StopPolicy::Wide => low.min(buffer),
                },
                None => buffer,
            };
            (sl, entry_price * (Decimal::ONE + tp_fraction))
        }
        Direction::Sell => {
            let buffer = entry_price + sl_buffer_points;
            let sl = match recent_high.filter(|high| *high > entry_price) {
                Some(high) => match policy {
                    StopPolicy::Tight => high.min(buffer),
                    StopPolicy::Wide => high.max(buffer),
                },
                None => buffer,
            };
            (sl, entry_price * (Decimal::ONE - tp_fraction))
        }
    };

    (sl.round_dp(2), tp.round_dp(2))
}

/// Bracket builder bound to the configured buffers.
#[derive(Debug, Clone)]
pub struct RiskSizer {
    sl_buffer_points: Decimal,
    tp_percent: Decimal,
    policy: StopPolicy,
}

impl RiskSizer {
    pub fn new(sl_buffer_points: Decimal, tp_percent: Decimal, policy: StopPolicy) -> Self {
        Self { sl_buffer_points, tp_percent, policy }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.sl_buffer_points, config.tp_percent, config.stop_policy)
    }

    pub fn bracket(&self, entry_price: Decimal, direction: Direction, recent: Option<&Candle>) -> Bracket {
        let (sl, tp) = calculate_stop_loss_take_profit(
            entry_price,
            direction,
            recent.map(|c| c.low),
            recent.map(|c| c.high),
            self.sl_buffer_points,
            self.tp_percent,
            self.policy,
        );
        Bracket::new(sl, tp)
    }
}

/// Order quantity from margin and leverage.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    capital_usd: Decimal,
    min_quantity: Decimal,
    precision: u32,
}

impl PositionSizer {
    pub fn new(capital_usd: Decimal, min_quantity: Decimal, precision: u32) -> Self {
        Self { capital_usd, min_quantity, precision }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.capital_usd, config.min_quantity, config.quantity_precision)
    }

    /// `capital * leverage / price`, floored to the lot precision and never
    /// below the minimum lot.
    pub fn quantity(&self, price: Decimal, leverage: Decimal) -> Decimal {
        if price <= Decimal::ZERO || leverage <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let raw = self.capital_usd * leverage / price;
        let floored = raw.round_dp_with_strategy(self.precision, RoundingStrategy::ToZero);
        floored.max(self.min_quantity)
    }
}
