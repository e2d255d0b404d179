//! Candles and the indicator events attached to each closed candle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One closed OHLC bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Candle {
    pub fn new(time: DateTime<Utc>, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self { time, open, high, low, close }
    }

    /// Basic sanity check on the price fields.
    pub fn is_well_formed(&self) -> bool {
        self.low > Decimal::ZERO
            && self.low <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
    }
}

/// Categorical state of the legacy color strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Black,
    LightGreen,
    Green,
    Red,
    Pink,
    Blue,
    #[default]
    None,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Black => "black",
            Zone::LightGreen => "light_green",
            Zone::Green => "green",
            Zone::Red => "red",
            Zone::Pink => "pink",
            Zone::Blue => "blue",
            Zone::None => "none",
        }
    }
}

/// Indicator flags for a single candle. Missing fields default to false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventVector {
    /// Range-filter buy pulse
    pub rf_buy: bool,
    /// Range-filter sell pulse
    pub rf_sell: bool,
    /// Inside-bar upside breakout
    pub green_arrow: bool,
    /// Inside-bar downside breakout
    pub red_arrow: bool,
    /// RSI crossed up through its buy threshold
    pub rsi_buy: bool,
    /// RSI crossed down through its sell threshold
    pub rsi_sell: bool,
    pub zone: Zone,
}

/// A candle together with its event vector, as delivered by an indicator provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleEvents {
    pub candle: Candle,
    #[serde(default)]
    pub events: EventVector,
}
