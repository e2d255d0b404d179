//! Outcome events produced when a position closes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of loss fed to the leverage ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Stop-loss fill
    #[serde(rename = "sl")]
    StopLoss,
    /// Accumulated losses from forced early closes
    Fake,
}

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::StopLoss => "sl",
            LossKind::Fake => "fake",
        }
    }
}

/// Event that moves the leverage ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Win,
    Loss(LossKind),
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    /// The entry signal vanished once the next candle closed
    FakeSignal,
    /// A fresh signal in the other direction appeared
    OppositeSignal,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "Take Profit",
            CloseReason::StopLoss => "Stop Loss",
            CloseReason::FakeSignal => "Fake Signal",
            CloseReason::OppositeSignal => "Opposite Signal",
        }
    }
}

/// Final result of one position. Exactly one is produced per position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_id: Uuid,
    pub reason: CloseReason,
    pub exit_price: Decimal,
    /// Net of fees. Positive is profit.
    pub realized_usd: Decimal,
    pub open_candle_time: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    /// Ladder event for bracket fills. Forced closes return `None`: they go
    /// through the fake-loss accumulator instead.
    pub fn ladder_event(&self) -> Option<OutcomeKind> {
        match self.reason {
            CloseReason::TakeProfit => Some(OutcomeKind::Win),
            CloseReason::StopLoss => Some(OutcomeKind::Loss(LossKind::StopLoss)),
            CloseReason::FakeSignal | CloseReason::OppositeSignal => None,
        }
    }

    /// Dollar loss as a positive number (a gain is negative).
    pub fn loss_usd(&self) -> Decimal {
        -self.realized_usd
    }
}
