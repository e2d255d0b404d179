//! Indicator feeds: where per-candle event vectors come from.

mod indicator_client;
mod replay;
mod types;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::CandleEvents;

pub use indicator_client::IndicatorClient;
pub use replay::ReplayFeed;

/// Source of closed candles and their indicator events.
#[async_trait]
pub trait IndicatorProvider: Send {
    /// Trailing window ending at the newest closed candle. Waits until a
    /// candle newer than the last one returned has closed. `None` means the
    /// feed is exhausted.
    async fn next_window(&mut self) -> Result<Option<Vec<CandleEvents>>>;
}

/// Reject empty windows, malformed candles, and out-of-order timestamps.
pub fn validate_window(window: &[CandleEvents]) -> Result<()> {
    if window.is_empty() {
        bail!("Empty candle window");
    }
    for (i, c) in window.iter().enumerate() {
        if !c.candle.is_well_formed() {
            bail!("Malformed candle at {}: {:?}", c.candle.time, c.candle);
        }
        if i > 0 && c.candle.time <= window[i - 1].candle.time {
            bail!(
                "Candles out of order: {} follows {}",
                c.candle.time,
                window[i - 1].candle.time
            );
        }
    }
    Ok(())
}
