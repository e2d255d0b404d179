//! All mutable risk state in one owned struct.
//!
//! The decision loop owns one `RiskState` and is its only writer. Outcomes
//! reach it by message from the position monitor; nothing else mutates the
//! ladder, the fake-loss balance, or the cooldown.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{LossKind, TradeOutcome};

use super::{
    CooldownScheduler, ExecutionConfig, FakeLossAccumulator, LeverageEscalationEngine, Pause,
    TradingConfig, Transition,
};

/// What one outcome did to the risk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEffect {
    pub ladder: Option<Transition>,
    pub fake_loss_fired: bool,
    pub pause: Pause,
}

pub struct RiskState {
    leverage: LeverageEscalationEngine,
    fake_losses: FakeLossAccumulator,
    cooldown: CooldownScheduler,
    /// Position whose outcome has not been applied yet
    awaiting: Option<Uuid>,
}

impl RiskState {
    pub fn new(trading: &TradingConfig, execution: &ExecutionConfig) -> Self {
        Self {
            leverage: LeverageEscalationEngine::from_config(trading),
            fake_losses: FakeLossAccumulator::new(trading.fake_loss_threshold_usd),
            cooldown: CooldownScheduler::new(
                trading.cooldown(),
                execution.settle_pause(),
                execution.candle_interval(),
            ),
            awaiting: None,
        }
    }

    pub fn leverage(&self) -> &LeverageEscalationEngine {
        &self.leverage
    }

    pub fn fake_losses(&self) -> &FakeLossAccumulator {
        &self.fake_losses
    }

    pub fn current_leverage(&self) -> Decimal {
        self.leverage.current_leverage()
    }

    #[cfg(test)]
    pub fn awaiting(&self) -> Option<Uuid> {
        self.awaiting
    }

    /// No position outstanding and no cooldown running.
    pub fn can_enter(&self, now: DateTime<Utc>) -> bool {
        self.awaiting.is_none() && self.cooldown.is_ready(now)
    }

    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.cooldown.remaining(now)
    }

    /// Register a newly opened position. Only one may be outstanding.
    pub fn begin_position(&mut self, id: Uuid) -> Result<()> {
        if let Some(open) = self.awaiting {
            bail!("Position {} is still open, cannot register {}", open, id);
        }
        self.awaiting = Some(id);
        Ok(())
    }

    /// Apply the one outcome of the outstanding position.
    pub fn apply_outcome(&mut self, outcome: &TradeOutcome) -> Result<OutcomeEffect> {
        match self.awaiting {
            Some(id) if id == outcome.position_id => {}
            Some(id) => bail!(
                "Outcome for {} does not match open position {}",
                outcome.position_id,
                id
            ),
            None => bail!(
                "Outcome for {} arrived with no open position (duplicate?)",
                outcome.position_id
            ),
        }
        self.awaiting = None;

        let mut fake_loss_fired = false;
        let ladder = match outcome.ladder_event() {
            Some(event) => Some(self.leverage.apply(event, outcome.closed_at)),
            None => {
                fake_loss_fired = self.fake_losses.record(outcome.loss_usd());
                if fake_loss_fired {
                    Some(self.leverage.on_loss(LossKind::Fake, outcome.closed_at))
                } else {
                    None
                }
            }
        };

        let pause = self.cooldown.on_close(outcome.open_candle_time, outcome.closed_at);

        Ok(OutcomeEffect {
            ladder,
            fake_loss_fired,
            pause,
        })
    }
}
