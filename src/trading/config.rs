//! Trading configuration.

use anyhow::{ensure, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::TradeSignal;

use super::StopPolicy;

/// Core risk configuration: leverage ladder, fake-loss threshold, cooldown, fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Leverage at ladder level 0
    pub base_leverage: Decimal,

    /// Multiplier applied to base leverage at each ladder level
    pub multiplier_table: Vec<u32>,

    /// Number of ladder levels (must match the multiplier table)
    pub max_levels: usize,

    /// Accumulated forced-close loss in USD that counts as one fake loss
    pub fake_loss_threshold_usd: Decimal,

    /// Losses of different kinds closer than this collapse into one SL
    pub double_trigger_window_secs: u64,

    /// Pause after a position round-trips within one candle
    pub cooldown_secs: u64,

    /// Candles a range-filter pulse stays valid while waiting for confirmation
    pub rf_lookback: usize,

    /// Signed tier codes the bot acts on (e.g. 2 = tier-2 buy, -2 = tier-2 sell)
    pub allowed_signals: Vec<i8>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            base_leverage: dec!(10),
            multiplier_table: vec![1, 2, 4, 8, 16],
            max_levels: 5,
            fake_loss_threshold_usd: dec!(1),
            double_trigger_window_secs: 15,
            cooldown_secs: 900,              // 15 minutes
            rf_lookback: 1,
            allowed_signals: vec![2, -2],
        }
    }
}

impl TradingConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.base_leverage > Decimal::ZERO, "base leverage must be positive");
        ensure!(self.max_levels >= 3, "max levels must be at least 3, got {}", self.max_levels);
        ensure!(
            self.multiplier_table.len() == self.max_levels,
            "multiplier table has {} entries but max levels is {}",
            self.multiplier_table.len(),
            self.max_levels
        );
        ensure!(
            self.multiplier_table.iter().all(|m| *m >= 1),
            "multipliers must be at least 1"
        );
        ensure!(
            self.fake_loss_threshold_usd > Decimal::ZERO,
            "fake loss threshold must be positive"
        );
        ensure!(
            (1..=5).contains(&self.rf_lookback),
            "range filter lookback must be within 1..=5, got {}",
            self.rf_lookback
        );
        for code in &self.allowed_signals {
            ensure!(
                TradeSignal::from_code(*code).is_some(),
                "allowed signal code {} is not one of ±1..±4",
                code
            );
        }
        Ok(())
    }

    /// Whether the bot should act on this signal.
    pub fn is_allowed(&self, signal: &TradeSignal) -> bool {
        self.allowed_signals.contains(&signal.code())
    }

    pub fn double_trigger_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.double_trigger_window_secs as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Execution-side configuration: sizing, brackets, timing, and session window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Margin committed per position in USD
    pub capital_usd: Decimal,

    /// Stop-loss distance from entry in price points
    pub sl_buffer_points: Decimal,

    /// Take-profit distance from entry in percent
    pub tp_percent: Decimal,

    /// How structure and buffer stops are combined
    pub stop_policy: StopPolicy,

    /// Smallest order quantity the venue accepts
    pub min_quantity: Decimal,

    /// Decimal places of order quantity
    pub quantity_precision: u32,

    /// Extra SL distance when the venue rejects the first bracket
    pub fallback_sl_points: Decimal,

    /// Extra TP distance when the venue rejects the first bracket
    pub fallback_tp_points: Decimal,

    /// Candle length in seconds
    pub candle_interval_secs: u64,

    /// Candles kept in the trailing fusion window
    pub window_len: usize,

    /// Position monitor poll interval
    pub monitor_interval_secs: u64,

    /// Pause after a close that spanned more than one candle
    pub settle_pause_secs: u64,

    /// Daily window in which entries are allowed
    pub session: SessionConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            capital_usd: dec!(10000),
            sl_buffer_points: dec!(3),
            tp_percent: dec!(0.25),
            stop_policy: StopPolicy::Tight,
            min_quantity: dec!(0.001),
            quantity_precision: 3,
            fallback_sl_points: dec!(15),
            fallback_tp_points: dec!(5),
            candle_interval_secs: 900,       // 15m candles
            window_len: 200,
            monitor_interval_secs: 2,
            settle_pause_secs: 2,
            session: SessionConfig::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.capital_usd > Decimal::ZERO, "capital must be positive");
        ensure!(self.sl_buffer_points > Decimal::ZERO, "SL buffer must be positive");
        ensure!(self.tp_percent > Decimal::ZERO, "TP percent must be positive");
        ensure!(self.min_quantity > Decimal::ZERO, "minimum quantity must be positive");
        ensure!(self.candle_interval_secs > 0, "candle interval must be positive");
        ensure!(self.window_len >= 2, "window must hold at least two candles");
        ensure!(self.monitor_interval_secs > 0, "monitor interval must be positive");
        Ok(())
    }

    pub fn candle_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.candle_interval_secs as i64)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn settle_pause(&self) -> Duration {
        Duration::from_secs(self.settle_pause_secs)
    }
}

/// Trading hours, as local wall-clock times at a fixed UTC offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session start, "HH:MM"
    pub start: String,

    /// Session end, "HH:MM" (inclusive)
    pub end: String,

    /// Offset of the local clock from UTC in minutes
    pub utc_offset_minutes: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start: "00:00".to_string(),
            end: "23:59".to_string(),
            utc_offset_minutes: 330,         // IST
        }
    }
}
