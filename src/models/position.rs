//! Position model: the single open leveraged position and its exchange handles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CloseReason, Direction, TradeSignal};

/// Stop-loss and take-profit levels attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

impl Bracket {
    pub fn new(stop_loss: Decimal, take_profit: Decimal) -> Self {
        Self { stop_loss, take_profit }
    }

    /// Push both levels further away from entry.
    pub fn widen(&self, direction: Direction, sl_points: Decimal, tp_points: Decimal) -> Self {
        match direction {
            Direction::Buy => Self {
                stop_loss: self.stop_loss - sl_points,
                take_profit: self.take_profit + tp_points,
            },
            Direction::Sell => Self {
                stop_loss: self.stop_loss + sl_points,
                take_profit: self.take_profit - tp_points,
            },
        }
    }

    /// SL must sit on the losing side of entry and TP on the winning side.
    pub fn is_valid_for(&self, direction: Direction, entry: Decimal) -> bool {
        match direction {
            Direction::Buy => self.stop_loss < entry && self.take_profit > entry,
            Direction::Sell => self.stop_loss > entry && self.take_profit < entry,
        }
    }
}

/// Everything an exchange needs to open a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub direction: Direction,
    pub quantity: Decimal,
    pub leverage: Decimal,
    pub bracket: Bracket,
}

/// Exchange acknowledgement of an opened position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionHandle {
    pub id: Uuid,
    pub order_id: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    /// Fee charged on the entry fill
    pub entry_fee: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Result of flattening a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub at: DateTime<Utc>,
}

/// A position as reported by the venue itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePosition {
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

/// The bot's view of its one open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub quantity: Decimal,
    pub leverage: Decimal,
    pub entry_fee: Decimal,
    /// Open time of the candle bucket the entry happened in
    pub open_candle_time: DateTime<Utc>,
    /// Open time of the last closed candle when the signal fired
    pub signal_candle_time: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub signal: TradeSignal,
}

impl Position {
    pub fn from_handle(
        handle: &PositionHandle,
        request: &OpenRequest,
        signal: TradeSignal,
        signal_candle_time: DateTime<Utc>,
        open_candle_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: handle.id,
            direction: request.direction,
            entry_price: handle.entry_price,
            stop_loss: request.bracket.stop_loss,
            take_profit: request.bracket.take_profit,
            quantity: handle.quantity,
            leverage: request.leverage,
            entry_fee: handle.entry_fee,
            open_candle_time,
            signal_candle_time,
            opened_at: handle.opened_at,
            signal,
        }
    }

    /// Gross P&L in quote currency if closed at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        let diff = match self.direction {
            Direction::Buy => price - self.entry_price,
            Direction::Sell => self.entry_price - price,
        };
        diff * self.quantity
    }

    /// P&L at `price` after the entry fee and `exit_fee`.
    pub fn net_pnl_at(&self, price: Decimal, exit_fee: Decimal) -> Decimal {
        self.pnl_at(price) - self.entry_fee - exit_fee
    }

    /// Which bracket level, if any, `price` has crossed. Stop loss wins a tie.
    pub fn bracket_hit(&self, price: Decimal) -> Option<CloseReason> {
        let (sl_hit, tp_hit) = match self.direction {
            Direction::Buy => (price <= self.stop_loss, price >= self.take_profit),
            Direction::Sell => (price >= self.stop_loss, price <= self.take_profit),
        };
        if sl_hit {
            Some(CloseReason::StopLoss)
        } else if tp_hit {
            Some(CloseReason::TakeProfit)
        } else {
            None
        }
    }
}
