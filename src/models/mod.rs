//! Data models for candles, signals, positions, and outcomes.

mod candle;
mod outcome;
mod position;
mod signal;

pub use candle::{Candle, CandleEvents, EventVector, Zone};
pub use outcome::{CloseReason, LossKind, OutcomeKind, TradeOutcome};
pub use position::{Bracket, Fill, LivePosition, OpenRequest, Position, PositionHandle};
pub use signal::{Direction, Tier, TradeSignal};
