//! Position monitor: one task per open position.
//!
//! Polls the venue on a fixed interval and flattens the position when a
//! bracket level is crossed or the decision loop asks for a forced close.
//! Every position yields exactly one [`TradeOutcome`] on the outcome channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::exchange::ExecutionClient;
use crate::models::{CloseReason, Position, TradeOutcome};

/// Requests from the decision loop to a running monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    ForceClose(CloseReason),
}

/// Decision-loop side of a running monitor.
pub struct MonitorHandle {
    position_id: Uuid,
    commands: mpsc::Sender<MonitorCommand>,
    task: JoinHandle<Result<()>>,
}

impl MonitorHandle {
    /// Ask the monitor to cancel the bracket and flatten.
    pub async fn force_close(&self, reason: CloseReason) -> Result<()> {
        self.commands
            .send(MonitorCommand::ForceClose(reason))
            .await
            .map_err(|_| anyhow!("Monitor for {} has already stopped", self.position_id))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task and surface its error, if any.
    pub async fn join(self) -> Result<()> {
        self.task.await.context("Position monitor task panicked")?
    }
}

pub struct PositionMonitor {
    exchange: Arc<dyn ExecutionClient>,
    position: Position,
    poll_interval: Duration,
    commands: mpsc::Receiver<MonitorCommand>,
    commands_open: bool,
    outcomes: mpsc::Sender<TradeOutcome>,
    forced: Option<CloseReason>,
}

impl PositionMonitor {
    pub fn new(
        exchange: Arc<dyn ExecutionClient>,
        position: Position,
        poll_interval: Duration,
        commands: mpsc::Receiver<MonitorCommand>,
        outcomes: mpsc::Sender<TradeOutcome>,
    ) -> Self {
        Self {
            exchange,
            position,
            poll_interval,
            commands,
            commands_open: true,
            outcomes,
            forced: None,
        }
    }

    /// Start monitoring `position` on its own task.
    pub fn spawn(
        exchange: Arc<dyn ExecutionClient>,
        position: Position,
        poll_interval: Duration,
        outcomes: mpsc::Sender<TradeOutcome>,
    ) -> MonitorHandle {
        let (tx, rx) = mpsc::channel(4);
        let position_id = position.id;
        let monitor = Self::new(exchange, position, poll_interval, rx, outcomes);
        let task = tokio::spawn(monitor.run());
        MonitorHandle {
            position_id,
            commands: tx,
            task,
        }
    }

    /// Poll until the position is closed and its outcome delivered.
    pub async fn run(mut self) -> Result<()> {
        info!(
            position = %self.position.id,
            side = self.position.direction.as_str(),
            entry = %self.position.entry_price,
            sl = %self.position.stop_loss,
            tp = %self.position.take_profit,
            "Position monitor started"
        );

        loop {
            tokio::select! {
                cmd = self.commands.recv(), if self.commands_open && self.forced.is_none() => {
                    match cmd {
                        Some(MonitorCommand::ForceClose(reason)) => {
                            info!(position = %self.position.id, reason = reason.as_str(), "Forced close requested");
                            self.forced = Some(reason);
                        }
                        None => self.commands_open = false,
                    }
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.poll_once().await {
                Ok(Some(outcome)) => return self.deliver(outcome).await,
                Ok(None) => {}
                Err(e) => warn!(position = %self.position.id, error = %e, "Monitor poll failed, retrying"),
            }
        }
    }

    /// One check of the venue. Returns the outcome once the position is flat.
    async fn poll_once(&mut self) -> Result<Option<TradeOutcome>> {
        let live = self
            .exchange
            .query_position()
            .await
            .context("Failed to query position")?;
        let mark = self.exchange.mark_price().await.context("Failed to read mark price")?;

        if live.is_none() {
            // a resting bracket order filled on the venue
            let reason = self
                .position
                .bracket_hit(mark)
                .unwrap_or_else(|| self.nearest_level(mark));
            let exit = match reason {
                CloseReason::TakeProfit => self.position.take_profit,
                _ => self.position.stop_loss,
            };
            // the venue's exit fee is not reported back, only the entry fee is known
            let realized = self.position.net_pnl_at(exit, Decimal::ZERO);
            info!(position = %self.position.id, reason = reason.as_str(), realized = %realized, "Position closed on venue");
            return Ok(Some(self.outcome(reason, exit, realized, Utc::now())));
        }

        let reason = match self.forced.or_else(|| self.position.bracket_hit(mark)) {
            Some(reason) => reason,
            None => {
                debug!(position = %self.position.id, mark = %mark, "Position open");
                return Ok(None);
            }
        };

        // resting SL/TP must be gone before the market exit
        self.exchange
            .cancel_orders(&self.position)
            .await
            .context("Failed to cancel bracket orders")?;
        let fill = self
            .exchange
            .close_position(&self.position)
            .await
            .context("Failed to close position")?;

        let realized = self.position.net_pnl_at(fill.price, fill.fee);
        info!(
            position = %self.position.id,
            reason = reason.as_str(),
            price = %fill.price,
            quantity = %fill.quantity,
            realized = %realized,
            "Position closed"
        );
        Ok(Some(self.outcome(reason, fill.price, realized, fill.at)))
    }

    fn nearest_level(&self, mark: Decimal) -> CloseReason {
        let to_sl = (mark - self.position.stop_loss).abs();
        let to_tp = (mark - self.position.take_profit).abs();
        if to_sl <= to_tp {
            CloseReason::StopLoss
        } else {
            CloseReason::TakeProfit
        }
    }

    fn outcome(
        &self,
        reason: CloseReason,
        exit_price: Decimal,
        realized_usd: Decimal,
        closed_at: DateTime<Utc>,
    ) -> TradeOutcome {
        TradeOutcome {
            position_id: self.position.id,
            reason,
            exit_price,
            realized_usd,
            open_candle_time: self.position.open_candle_time,
            closed_at,
        }
    }

    async fn deliver(self, outcome: TradeOutcome) -> Result<()> {
        let id = outcome.position_id;
        if self.outcomes.send(outcome).await.is_err() {
            error!(position = %id, "Outcome channel closed, outcome lost");
            return Err(anyhow!("Outcome for position {} could not be delivered", id));
        }
        Ok(())
    }
}
