//! Execution venues. The bot only talks to the [`ExecutionClient`] trait.

mod paper;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Candle, Fill, LivePosition, OpenRequest, Position, PositionHandle};

pub use paper::{PaperConfig, PaperExchange};

/// Capabilities the bot needs from a venue.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    fn name(&self) -> &str;

    async fn set_leverage(&self, leverage: Decimal) -> Result<()>;

    /// Market entry with an attached SL/TP bracket.
    async fn open_position(&self, request: &OpenRequest) -> Result<PositionHandle>;

    /// Market exit of the whole position.
    async fn close_position(&self, position: &Position) -> Result<Fill>;

    /// Venue-side view of the open position, if any.
    async fn query_position(&self) -> Result<Option<LivePosition>>;

    /// Cancel resting SL/TP orders of a position.
    async fn cancel_orders(&self, position: &Position) -> Result<()>;

    async fn mark_price(&self) -> Result<Decimal>;

    /// Called once per closed candle. Venues with their own market data ignore it.
    async fn observe_candle(&self, _candle: &Candle) -> Result<()> {
        Ok(())
    }
}
