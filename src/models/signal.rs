//! Trade direction and fused trade signals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// +1 for buy, -1 for sell.
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Buy => 1,
            Direction::Sell => -1,
        }
    }
}

/// Fusion rule that produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Zone + inside-bar arrow
    One,
    /// Range filter + inside-bar arrow
    Two,
    /// RSI + range filter
    Three,
    /// RSI + inside-bar arrow
    Four,
}

impl Tier {
    pub fn number(&self) -> i8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
            Tier::Three => 3,
            Tier::Four => 4,
        }
    }

    pub fn from_number(n: i8) -> Option<Self> {
        match n {
            1 => Some(Tier::One),
            2 => Some(Tier::Two),
            3 => Some(Tier::Three),
            4 => Some(Tier::Four),
            _ => None,
        }
    }

    /// Evaluation priority, 0 is tried first. Tier 2 > 4 > 1 > 3.
    pub fn priority(&self) -> u8 {
        match self {
            Tier::Two => 0,
            Tier::Four => 1,
            Tier::One => 2,
            Tier::Three => 3,
        }
    }
}

/// Decision emitted by the fusion engine for one candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeSignal {
    pub direction: Direction,
    pub tier: Tier,
}

impl TradeSignal {
    pub fn new(direction: Direction, tier: Tier) -> Self {
        Self { direction, tier }
    }

    /// Signed code: +tier for buys, -tier for sells.
    pub fn code(&self) -> i8 {
        self.direction.sign() * self.tier.number()
    }

    pub fn from_code(code: i8) -> Option<Self> {
        let direction = if code > 0 { Direction::Buy } else { Direction::Sell };
        Tier::from_number(code.checked_abs()?).map(|tier| Self { direction, tier })
    }
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (tier {}, code {:+})", self.direction.as_str(), self.tier.number(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_codes() {
        assert_eq!(TradeSignal::new(Direction::Buy, Tier::Two).code(), 2);
        assert_eq!(TradeSignal::new(Direction::Sell, Tier::Four).code(), -4);
        assert_eq!(
            TradeSignal::from_code(-3),
            Some(TradeSignal::new(Direction::Sell, Tier::Three))
        );
        assert_eq!(TradeSignal::from_code(0), None);
        assert_eq!(TradeSignal::from_code(5), None);
    }

    #[test]
    fn test_tier_priority_order() {
        let mut tiers = vec![Tier::One, Tier::Two, Tier::Three, Tier::Four];
        tiers.sort_by_key(|t| t.priority());
        assert_eq!(tiers, vec![Tier::Two, Tier::Four, Tier::One, Tier::Three]);
    }
}
