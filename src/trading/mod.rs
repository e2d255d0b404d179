//! Trading logic: signal fusion, leverage ladder, fake-loss tracking, cooldown, sizing.

mod config;
mod cooldown;
mod fake_loss;
mod fusion;
mod leverage;
mod risk;
mod risk_state;
mod session;

pub use config::{ExecutionConfig, SessionConfig, TradingConfig};
pub use cooldown::{candle_start, CooldownScheduler, Pause};
pub use fake_loss::FakeLossAccumulator;
pub use fusion::evaluate_window;
pub use leverage::{LeverageEscalationEngine, Transition};
pub use risk::{PositionSizer, RiskSizer, StopPolicy};
pub use risk_state::{OutcomeEffect, RiskState};
pub use session::TradingSession;
