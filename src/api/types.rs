//! Wire types of the indicator sidecar API.

use serde::{Deserialize, Serialize};

use crate::models::CandleEvents;

/// Response of `GET /v1/window`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResponse {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub interval: String,
    /// Closed candles, oldest first
    pub candles: Vec<CandleEvents>,
}
