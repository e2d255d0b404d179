//! File-backed indicator feed for dry runs and signal inspection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::models::CandleEvents;

use super::{validate_window, IndicatorProvider};

/// Replays recorded candles one at a time as growing trailing windows.
pub struct ReplayFeed {
    candles: Vec<CandleEvents>,
    cursor: usize,
    window_len: usize,
    pace: Option<Duration>,
}

impl ReplayFeed {
    pub fn new(candles: Vec<CandleEvents>, window_len: usize) -> Self {
        Self {
            candles,
            cursor: 0,
            window_len: window_len.max(1),
            pace: None,
        }
    }

    /// Load a JSON array or JSON-lines file of `CandleEvents`.
    pub fn from_path(path: &Path, window_len: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let candles = parse_candles(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        validate_window(&candles)?;
        Ok(Self::new(candles, window_len))
    }

    /// Sleep this long before yielding each window.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    pub fn candles(&self) -> &[CandleEvents] {
        &self.candles
    }
}

pub fn parse_candles(text: &str) -> Result<Vec<CandleEvents>> {
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(text).context("Invalid candle array");
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid candle on line {}", n + 1))
        })
        .collect()
}

#[async_trait]
impl IndicatorProvider for ReplayFeed {
    async fn next_window(&mut self) -> Result<Option<Vec<CandleEvents>>> {
        if self.cursor >= self.candles.len() {
            return Ok(None);
        }
        if let Some(pace) = self.pace {
            tokio::time::sleep(pace).await;
        }
        self.cursor += 1;
        let start = self.cursor.saturating_sub(self.window_len);
        Ok(Some(self.candles[start..self.cursor].to_vec()))
    }
}
