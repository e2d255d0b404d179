//! Leverage escalation ladder.
//!
//! A martingale-style state machine over wins, stop-loss losses, and fake
//! losses. Level `n` trades at `base_leverage * multiplier_table[n]`.
//!
//! Two rules make it more than a counter:
//! - A fake loss inside an SL cycle does not step the ladder. It raises a flag
//!   that turns the next cycle-ending win into an elevated restart (level 0
//!   traded at the level-1 multiplier).
//! - Two losses of different kinds within the double-trigger window are the
//!   same trade seen twice. They collapse into a single SL step.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::models::{LossKind, OutcomeKind};

use super::TradingConfig;

/// Observable ladder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LeverageState {
    pub level: usize,
    pub elevated_restart: bool,
    pub fake_loss_flag: bool,
    pub sl_cycle_started: bool,
    pub last_loss_at: Option<DateTime<Utc>>,
    pub last_loss_kind: Option<LossKind>,
}

/// Ladder fields a double trigger rolls back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    level: usize,
    elevated_restart: bool,
    fake_loss_flag: bool,
    sl_cycle_started: bool,
}

/// Level change produced by one event, for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event: OutcomeKind,
    pub from_level: usize,
    pub to_level: usize,
    pub double_trigger: bool,
}

pub struct LeverageEscalationEngine {
    base_leverage: Decimal,
    multipliers: Vec<u32>,
    double_trigger_window: Duration,
    state: LeverageState,
    /// State just before the last recorded loss was applied
    before_last_loss: Option<Snapshot>,
}

impl LeverageEscalationEngine {
    pub fn new(base_leverage: Decimal, multipliers: Vec<u32>, double_trigger_window: Duration) -> Self {
        let multipliers = if multipliers.is_empty() { vec![1] } else { multipliers };
        Self {
            base_leverage,
            multipliers,
            double_trigger_window,
            state: LeverageState::default(),
            before_last_loss: None,
        }
    }

    pub fn from_config(config: &TradingConfig) -> Self {
        let table: Vec<u32> = config
            .multiplier_table
            .iter()
            .copied()
            .take(config.max_levels)
            .collect();
        Self::new(config.base_leverage, table, config.double_trigger_window())
    }

    pub fn state(&self) -> LeverageState {
        self.state
    }

    pub fn max_levels(&self) -> usize {
        self.multipliers.len()
    }

    /// Level whose multiplier is used for the next position.
    pub fn effective_level(&self) -> usize {
        if self.state.level == 0 && self.state.elevated_restart {
            self.clamp(1)
        } else {
            self.state.level
        }
    }

    /// Leverage for the next position.
    pub fn current_leverage(&self) -> Decimal {
        let multiplier = self.multipliers[self.clamp(self.effective_level())];
        self.base_leverage * Decimal::from(multiplier)
    }

    pub fn apply(&mut self, event: OutcomeKind, at: DateTime<Utc>) -> Transition {
        match event {
            OutcomeKind::Win => self.on_win(),
            OutcomeKind::Loss(kind) => self.on_loss(kind, at),
        }
    }

    pub fn on_win(&mut self) -> Transition {
        let from_level = self.state.level;
        let s = &mut self.state;

        if s.level > 0 {
            s.level = 0;
            if s.fake_loss_flag {
                s.elevated_restart = true;
                s.fake_loss_flag = false;
            } else {
                s.elevated_restart = false;
            }
        } else if s.elevated_restart {
            s.elevated_restart = false;
        }
        s.sl_cycle_started = false;
        self.forget_last_loss();

        self.log_transition(Transition {
            event: OutcomeKind::Win,
            from_level,
            to_level: self.state.level,
            double_trigger: false,
        })
    }

    pub fn on_loss(&mut self, kind: LossKind, at: DateTime<Utc>) -> Transition {
        let from_level = self.state.level;
        let event = OutcomeKind::Loss(kind);

        if let Some(before) = self.double_trigger_rollback(kind, at) {
            // Rewind the first half of the pair, then count the pair as one SL.
            self.restore(before);
            self.state.sl_cycle_started = true;
            self.step_up();
            self.forget_last_loss();
            return self.log_transition(Transition {
                event,
                from_level,
                to_level: self.state.level,
                double_trigger: true,
            });
        }

        let before = self.snapshot();
        match kind {
            LossKind::StopLoss => {
                self.state.sl_cycle_started = true;
                self.step_up();
            }
            LossKind::Fake if !self.state.sl_cycle_started => self.step_up(),
            LossKind::Fake => self.state.fake_loss_flag = true,
        }

        self.state.last_loss_at = Some(at);
        self.state.last_loss_kind = Some(kind);
        self.before_last_loss = Some(before);

        self.log_transition(Transition {
            event,
            from_level,
            to_level: self.state.level,
            double_trigger: false,
        })
    }

    /// One SL step: wrap at the top, jump to 2 from an elevated restart, else +1.
    fn step_up(&mut self) {
        let top = self.max_levels() - 1;
        let s = &mut self.state;
        if s.level >= top {
            s.level = if s.fake_loss_flag { 1.min(top) } else { 0 };
        } else if s.level == 0 && s.elevated_restart {
            s.level = 2.min(top);
            s.elevated_restart = false;
        } else {
            s.level += 1;
        }
    }

    fn double_trigger_rollback(&self, kind: LossKind, at: DateTime<Utc>) -> Option<Snapshot> {
        let last_at = self.state.last_loss_at?;
        let last_kind = self.state.last_loss_kind?;
        let gap = if at >= last_at { at - last_at } else { last_at - at };
        if last_kind != kind && gap <= self.double_trigger_window {
            self.before_last_loss
        } else {
            None
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            level: self.state.level,
            elevated_restart: self.state.elevated_restart,
            fake_loss_flag: self.state.fake_loss_flag,
            sl_cycle_started: self.state.sl_cycle_started,
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.state.level = snapshot.level;
        self.state.elevated_restart = snapshot.elevated_restart;
        self.state.fake_loss_flag = snapshot.fake_loss_flag;
        self.state.sl_cycle_started = snapshot.sl_cycle_started;
    }

    fn forget_last_loss(&mut self) {
        self.state.last_loss_at = None;
        self.state.last_loss_kind = None;
        self.before_last_loss = None;
    }

    fn clamp(&self, level: usize) -> usize {
        level.min(self.max_levels() - 1)
    }

    fn log_transition(&self, transition: Transition) -> Transition {
        info!(
            event = ?transition.event,
            from = transition.from_level,
            to = transition.to_level,
            double_trigger = transition.double_trigger,
            elevated = self.state.elevated_restart,
            fake_flag = self.state.fake_loss_flag,
            sl_cycle = self.state.sl_cycle_started,
            leverage = %self.current_leverage(),
            "Leverage ladder updated"
        );
        transition
    }
}
