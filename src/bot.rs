//! Bot runner: the per-candle decision loop.
//!
//! Handles:
//! - Pulling closed-candle windows from the indicator feed
//! - Fusing events into a signal for the newest candle
//! - Fake-signal and opposite-signal checks on the open position
//! - Gating, sizing, and opening new positions
//! - Applying position outcomes to the risk state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{validate_window, IndicatorProvider};
use crate::exchange::ExecutionClient;
use crate::models::{CandleEvents, CloseReason, OpenRequest, Position, TradeOutcome, TradeSignal};
use crate::monitor::{MonitorHandle, PositionMonitor};
use crate::trading::{
    candle_start, evaluate_window, ExecutionConfig, OutcomeEffect, PositionSizer, RiskSizer,
    RiskState, TradingConfig, TradingSession,
};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Ladder, fake-loss, cooldown, and fusion settings
    pub trading: TradingConfig,

    /// Sizing, brackets, timing, and session
    pub execution: ExecutionConfig,

    /// Position monitor poll interval
    pub monitor_interval: Duration,
}

impl BotConfig {
    pub fn new(trading: TradingConfig, execution: ExecutionConfig) -> Self {
        let monitor_interval = execution.monitor_interval();
        Self {
            trading,
            execution,
            monitor_interval,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::new(TradingConfig::default(), ExecutionConfig::default())
    }
}

/// The position currently held, with its monitor.
struct OpenTrade {
    position: Position,
    monitor: MonitorHandle,
    /// The candle after the signal candle has been inspected
    fake_checked: bool,
    close_requested: bool,
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    feed: Box<dyn IndicatorProvider>,
    exchange: Arc<dyn ExecutionClient>,
    risk: RiskState,
    brackets: RiskSizer,
    sizer: PositionSizer,
    session: TradingSession,
    open: Option<OpenTrade>,
    outcome_tx: mpsc::Sender<TradeOutcome>,
    outcome_rx: mpsc::Receiver<TradeOutcome>,
    stats: BotStats,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        feed: Box<dyn IndicatorProvider>,
        exchange: Arc<dyn ExecutionClient>,
    ) -> Result<Self> {
        config.trading.validate().context("Invalid trading configuration")?;
        config.execution.validate().context("Invalid execution configuration")?;
        let session = TradingSession::from_config(&config.execution.session)?;

        let risk = RiskState::new(&config.trading, &config.execution);
        let (outcome_tx, outcome_rx) = mpsc::channel(8);
        let stats = BotStats {
            venue: exchange.name().to_string(),
            leverage: risk.current_leverage(),
            ..BotStats::default()
        };

        Ok(Self {
            brackets: RiskSizer::from_config(&config.execution),
            sizer: PositionSizer::from_config(&config.execution),
            session,
            risk,
            feed,
            exchange,
            open: None,
            outcome_tx,
            outcome_rx,
            stats,
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    #[cfg(test)]
    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    #[cfg(test)]
    pub fn open_position(&self) -> Option<&Position> {
        self.open.as_ref().map(|t| &t.position)
    }

    /// Main run loop. Returns when the feed is exhausted, on Ctrl+C, or when
    /// an outcome could not be delivered.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            venue = self.exchange.name(),
            leverage = %self.risk.current_leverage(),
            allowed = ?self.config.trading.allowed_signals,
            "Starting decision loop"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            // next_window only commits its cursor when it returns, so losing
            // the race to an outcome or Ctrl+C drops nothing
            tokio::select! {
                Some(outcome) = self.outcome_rx.recv() => {
                    self.process_outcome(outcome).await;
                }
                window = self.feed.next_window() => match window {
                    Ok(Some(window)) => {
                        if let Err(e) = self.process_window(&window).await {
                            warn!(error = %e, "Cycle skipped");
                        }
                    }
                    Ok(None) => {
                        info!("Indicator feed exhausted");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Indicator feed failed, cycle skipped"),
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    self.shutdown.store(true, Ordering::SeqCst);
                }
            }

            self.check_monitor().await?;
        }

        self.finish();
        Ok(())
    }

    /// One decision cycle over a freshly closed candle.
    pub async fn process_window(&mut self, window: &[CandleEvents]) -> Result<()> {
        validate_window(window)?;
        let Some(newest) = window.last() else {
            return Ok(());
        };
        self.exchange
            .observe_candle(&newest.candle)
            .await
            .context("Venue rejected candle")?;

        let signals = evaluate_window(self.config.trading.rf_lookback, window.iter().map(|c| &c.events));
        let latest = signals.last().copied().flatten();
        self.stats.candles += 1;

        if let Some(signal) = latest {
            info!(candle = %newest.candle.time, signal = %signal, "Signal");
        } else {
            debug!(candle = %newest.candle.time, "No signal");
        }

        if self.open.is_some() {
            return self.review_open_trade(window, &signals, latest).await;
        }

        match latest {
            Some(signal) => self.try_enter(signal, newest).await,
            None => Ok(()),
        }
    }

    /// Fake-signal check on the candle after entry, then opposite-signal check.
    async fn review_open_trade(
        &mut self,
        window: &[CandleEvents],
        signals: &[Option<TradeSignal>],
        latest: Option<TradeSignal>,
    ) -> Result<()> {
        let allowed_opposite = latest.filter(|s| self.config.trading.is_allowed(s));
        let Some(trade) = self.open.as_mut() else {
            return Ok(());
        };
        if trade.close_requested {
            return Ok(());
        }

        let newest_time = window.last().map(|c| c.candle.time);
        let mut reason = None;

        if !trade.fake_checked && newest_time > Some(trade.position.signal_candle_time) {
            trade.fake_checked = true;
            // the signal candle is the one right before the freshly closed one
            let confirmed = window
                .iter()
                .position(|c| c.candle.time == trade.position.signal_candle_time)
                .and_then(|idx| signals.get(idx).copied().flatten());
            match confirmed {
                Some(s) if s.direction == trade.position.direction => {
                    debug!(position = %trade.position.id, "Entry signal confirmed");
                }
                _ => {
                    warn!(
                        position = %trade.position.id,
                        signal = %trade.position.signal,
                        "Entry signal vanished, closing fake entry"
                    );
                    reason = Some(CloseReason::FakeSignal);
                }
            }
        }

        if reason.is_none() {
            if let Some(s) = allowed_opposite {
                if s.direction == trade.position.direction.opposite() {
                    info!(position = %trade.position.id, signal = %s, "Opposite signal, closing position");
                    reason = Some(CloseReason::OppositeSignal);
                }
            }
        }

        if let Some(reason) = reason {
            trade.monitor.force_close(reason).await?;
            trade.close_requested = true;
        }
        Ok(())
    }

    async fn try_enter(&mut self, signal: TradeSignal, newest: &CandleEvents) -> Result<()> {
        let now = Utc::now();

        if !self.config.trading.is_allowed(&signal) {
            debug!(signal = %signal, "Signal not in allow-list");
            return Ok(());
        }
        if !self.session.is_open(now) {
            info!(signal = %signal, "Outside trading session, signal ignored");
            return Ok(());
        }
        if !self.risk.can_enter(now) {
            info!(
                signal = %signal,
                remaining = ?self.risk.cooldown_remaining(now),
                "Re-entry paused, signal ignored"
            );
            return Ok(());
        }
        if let Some(live) = self.exchange.query_position().await? {
            warn!(
                side = live.direction.as_str(),
                quantity = %live.quantity,
                entry = %live.entry_price,
                "Venue already holds a position"
            );
            return Ok(());
        }

        let leverage = self.risk.current_leverage();
        let price = self.exchange.mark_price().await?;
        let quantity = self.sizer.quantity(price, leverage);
        if quantity <= Decimal::ZERO {
            warn!(price = %price, leverage = %leverage, "Computed zero quantity");
            return Ok(());
        }
        self.exchange.set_leverage(leverage).await?;

        let mut request = OpenRequest {
            direction: signal.direction,
            quantity,
            leverage,
            bracket: self.brackets.bracket(price, signal.direction, Some(&newest.candle)),
        };

        info!(
            signal = %signal,
            leverage = %leverage,
            quantity = %quantity,
            price = %price,
            sl = %request.bracket.stop_loss,
            tp = %request.bracket.take_profit,
            "Opening position"
        );

        let handle = match self.exchange.open_position(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Open rejected, retrying with a wider bracket");
                request.bracket = request.bracket.widen(
                    signal.direction,
                    self.config.execution.fallback_sl_points,
                    self.config.execution.fallback_tp_points,
                );
                match self.exchange.open_position(&request).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        self.stats.failed_opens += 1;
                        error!(error = %e, "Open failed, attempt aborted");
                        return Ok(());
                    }
                }
            }
        };

        info!(order = %handle.order_id, entry = %handle.entry_price, fee = %handle.entry_fee, "Position opened");
        let position = Position::from_handle(
            &handle,
            &request,
            signal,
            newest.candle.time,
            candle_start(handle.opened_at, self.config.execution.candle_interval()),
        );
        self.risk.begin_position(position.id)?;
        self.stats.trades_opened += 1;

        let monitor = PositionMonitor::spawn(
            self.exchange.clone(),
            position.clone(),
            self.config.monitor_interval,
            self.outcome_tx.clone(),
        );
        self.open = Some(OpenTrade {
            position,
            monitor,
            fake_checked: false,
            close_requested: false,
        });
        Ok(())
    }

    /// Wait for the open position's outcome.
    #[cfg(test)]
    pub async fn next_outcome(&mut self) -> Option<TradeOutcome> {
        if self.open.is_none() {
            return None;
        }
        self.outcome_rx.recv().await
    }

    /// Apply one outcome, then hold off for the resulting pause.
    pub async fn process_outcome(&mut self, outcome: TradeOutcome) {
        let effect = match self.risk.apply_outcome(&outcome) {
            Ok(effect) => effect,
            Err(e) => {
                error!(error = %e, "Outcome rejected");
                return;
            }
        };

        if self.open.as_ref().map(|t| t.position.id) == Some(outcome.position_id) {
            self.open = None;
        }
        self.record(&outcome, &effect);

        info!(
            reason = outcome.reason.as_str(),
            realized = %outcome.realized_usd,
            fake_balance = %self.risk.fake_losses().accumulated(),
            next_leverage = %self.risk.current_leverage(),
            "Outcome applied"
        );

        let pause = effect.pause.duration();
        if pause > Duration::ZERO {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received during pause");
                    self.shutdown.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    fn record(&mut self, outcome: &TradeOutcome, effect: &OutcomeEffect) {
        let stats = &mut self.stats;
        match outcome.reason {
            CloseReason::TakeProfit => stats.wins += 1,
            CloseReason::StopLoss => stats.stop_losses += 1,
            CloseReason::FakeSignal | CloseReason::OppositeSignal => stats.forced_closes += 1,
        }
        if effect.fake_loss_fired {
            stats.fake_losses += 1;
        }
        stats.realized_pnl += outcome.realized_usd;
        stats.leverage = self.risk.current_leverage();
        stats.level = self.risk.leverage().state().level;
    }

    /// A monitor that stopped without producing an outcome cannot be recovered.
    async fn check_monitor(&mut self) -> Result<()> {
        let finished = self.open.as_ref().is_some_and(|t| t.monitor.is_finished());
        if !finished {
            return Ok(());
        }
        // its outcome may still be queued
        if let Ok(outcome) = self.outcome_rx.try_recv() {
            self.process_outcome(outcome).await;
            return Ok(());
        }
        if let Some(trade) = self.open.take() {
            trade
                .monitor
                .join()
                .await
                .with_context(|| format!("Monitor for {} failed", trade.position.id))?;
        }
        Ok(())
    }

    fn finish(&self) {
        if let Some(trade) = &self.open {
            warn!(
                position = %trade.position.id,
                side = trade.position.direction.as_str(),
                "Stopping with a position still open; its bracket stays on the venue"
            );
        }
        info!("Decision loop stopped");
    }

    pub fn stats(&self) -> BotStats {
        BotStats {
            is_running: !self.shutdown.load(Ordering::SeqCst),
            position_open: self.open.is_some(),
            ..self.stats.clone()
        }
    }
}

/// Bot statistics.
#[derive(Debug, Clone, Default)]
pub struct BotStats {
    pub venue: String,
    pub candles: u64,
    pub trades_opened: u64,
    pub failed_opens: u64,
    pub wins: u64,
    pub stop_losses: u64,
    pub forced_closes: u64,
    pub fake_losses: u64,
    pub realized_pnl: Decimal,
    pub leverage: Decimal,
    pub level: usize,
    pub position_open: bool,
    pub is_running: bool,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Venue:           {}", self.venue)?;
        writeln!(f, "Candles:         {}", self.candles)?;
        writeln!(f, "Trades Opened:   {} (Failed opens: {})", self.trades_opened, self.failed_opens)?;
        writeln!(f, "Wins:            {}", self.wins)?;
        writeln!(f, "Stop Losses:     {}", self.stop_losses)?;
        writeln!(f, "Forced Closes:   {} (Fake losses: {})", self.forced_closes, self.fake_losses)?;
        writeln!(f, "Realized P&L:    ${:.2}", self.realized_pnl)?;
        writeln!(f, "Next Leverage:   {}x (level {})", self.leverage, self.level)?;
        writeln!(f, "Status:          {} {}",
            if self.is_running { "Running" } else { "Stopped" },
            if self.position_open { "(position open)" } else { "" })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ReplayFeed;
    use crate::exchange::{PaperConfig, PaperExchange};
    use crate::models::{Candle, Direction, EventVector, Tier};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn make_candle(n: i64, close: Decimal, events: EventVector) -> CandleEvents {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap() + chrono::Duration::minutes(15 * n);
        let high = close.max(dec!(100.5));
        let low = close.min(dec!(98));
        CandleEvents {
            candle: Candle::new(t, dec!(99), high, low, close),
            events,
        }
    }

    fn buy_pulse() -> EventVector {
        EventVector {
            rf_buy: true,
            green_arrow: true,
            ..EventVector::default()
        }
    }

    fn sell_pulse() -> EventVector {
        EventVector {
            rf_sell: true,
            red_arrow: true,
            ..EventVector::default()
        }
    }

    fn make_config() -> BotConfig {
        let trading = TradingConfig {
            cooldown_secs: 0,
            ..TradingConfig::default()
        };
        let execution = ExecutionConfig {
            capital_usd: dec!(100),
            settle_pause_secs: 0,
            ..ExecutionConfig::default()
        };
        BotConfig {
            monitor_interval: Duration::from_millis(5),
            ..BotConfig::new(trading, execution)
        }
    }

    fn make_exchange(min_stop_distance: Decimal) -> Arc<PaperExchange> {
        Arc::new(PaperExchange::new(PaperConfig {
            slippage: Decimal::ZERO,
            fee_rate: Decimal::ZERO,
            min_stop_distance,
            ..PaperConfig::default()
        }))
    }

    fn make_bot(exchange: Arc<PaperExchange>) -> Bot {
        let feed = Box::new(ReplayFeed::new(Vec::new(), 10));
        Bot::new(make_config(), feed, exchange).unwrap()
    }

    fn entry_window() -> Vec<CandleEvents> {
        vec![
            make_candle(0, dec!(99), EventVector::default()),
            make_candle(1, dec!(100), buy_pulse()),
        ]
    }

    #[tokio::test]
    async fn test_signal_opens_then_take_profit_wins() {
        let exchange = make_exchange(Decimal::ZERO);
        let mut bot = make_bot(exchange.clone());

        let mut window = entry_window();
        bot.process_window(&window).await.unwrap();
        let position = bot.open_position().cloned().unwrap();
        assert_eq!(position.direction, Direction::Buy);
        assert_eq!(position.signal, TradeSignal::new(Direction::Buy, Tier::Two));
        assert_eq!(position.leverage, dec!(10));
        assert_eq!(position.quantity, dec!(10));
        assert_eq!(position.stop_loss, dec!(98));
        assert_eq!(position.take_profit, dec!(100.25));
        assert_eq!(bot.risk().awaiting(), Some(position.id));

        window.push(make_candle(2, dec!(101), EventVector::default()));
        bot.process_window(&window).await.unwrap();
        let outcome = bot.next_outcome().await.unwrap();
        assert_eq!(outcome.reason, CloseReason::TakeProfit);
        bot.process_outcome(outcome).await;

        let stats = bot.stats();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.realized_pnl, dec!(10));
        assert!(bot.open_position().is_none());
        assert_eq!(bot.risk().current_leverage(), dec!(10));
    }

    #[tokio::test]
    async fn test_vanished_signal_closes_as_fake() {
        let exchange = make_exchange(Decimal::ZERO);
        let mut bot = make_bot(exchange.clone());

        bot.process_window(&entry_window()).await.unwrap();
        assert!(bot.open_position().is_some());

        // the signal candle repainted without its range-filter pulse
        let repainted = vec![
            make_candle(0, dec!(99), EventVector::default()),
            make_candle(1, dec!(100), EventVector { green_arrow: true, ..EventVector::default() }),
            make_candle(2, dec!(99.5), EventVector::default()),
        ];
        bot.process_window(&repainted).await.unwrap();
        let outcome = bot.next_outcome().await.unwrap();
        assert_eq!(outcome.reason, CloseReason::FakeSignal);
        assert_eq!(outcome.realized_usd, dec!(-5));
        bot.process_outcome(outcome).await;

        // 5 USD is over the 1 USD threshold: one fake loss, first step of the ladder
        let stats = bot.stats();
        assert_eq!(stats.forced_closes, 1);
        assert_eq!(stats.fake_losses, 1);
        assert_eq!(stats.level, 1);
        assert_eq!(bot.risk().current_leverage(), dec!(20));

        let journal = exchange.journal().await;
        assert_eq!(&journal[journal.len() - 2..], &["cancel".to_string(), "close".to_string()]);
    }

    #[tokio::test]
    async fn test_opposite_signal_forces_close() {
        let exchange = make_exchange(Decimal::ZERO);
        let mut bot = make_bot(exchange.clone());

        let mut window = entry_window();
        bot.process_window(&window).await.unwrap();

        window.push(make_candle(2, dec!(99.9), sell_pulse()));
        bot.process_window(&window).await.unwrap();
        let outcome = bot.next_outcome().await.unwrap();
        assert_eq!(outcome.reason, CloseReason::OppositeSignal);
        bot.process_outcome(outcome).await;

        // 1 USD loss reaches the threshold exactly
        assert_eq!(bot.stats().forced_closes, 1);
        assert_eq!(bot.stats().fake_losses, 1);
        assert!(bot.open_position().is_none());
    }

    #[tokio::test]
    async fn test_failed_open_changes_nothing() {
        // stop distance of 2 (and 17 after widening) is below the venue minimum
        let exchange = make_exchange(dec!(50));
        let mut bot = make_bot(exchange.clone());

        bot.process_window(&entry_window()).await.unwrap();
        assert!(bot.open_position().is_none());
        assert_eq!(bot.risk().awaiting(), None);
        assert_eq!(bot.risk().leverage().state().level, 0);
        assert_eq!(bot.stats().failed_opens, 1);
        assert_eq!(bot.stats().trades_opened, 0);
        assert!(exchange.query_position().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signals_outside_allow_list_are_ignored() {
        let exchange = make_exchange(Decimal::ZERO);
        let mut bot = make_bot(exchange.clone());

        // RSI + arrow is tier 4, not allowed by default
        let window = vec![
            make_candle(0, dec!(99), EventVector::default()),
            make_candle(1, dec!(100), EventVector { rsi_buy: true, green_arrow: true, ..EventVector::default() }),
        ];
        bot.process_window(&window).await.unwrap();
        assert!(bot.open_position().is_none());
        assert!(exchange.journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_window_is_skipped() {
        let exchange = make_exchange(Decimal::ZERO);
        let mut bot = make_bot(exchange.clone());

        let mut window = entry_window();
        window.swap(0, 1);
        assert!(bot.process_window(&window).await.is_err());
        assert!(bot.open_position().is_none());
        assert_eq!(bot.stats().candles, 0);
    }

    #[tokio::test]
    async fn test_one_outcome_per_position() {
        let exchange = make_exchange(Decimal::ZERO);
        let mut bot = make_bot(exchange.clone());

        let mut window = entry_window();
        bot.process_window(&window).await.unwrap();
        window.push(make_candle(2, dec!(97), EventVector::default()));
        bot.process_window(&window).await.unwrap();

        let outcome = bot.next_outcome().await.unwrap();
        assert_eq!(outcome.reason, CloseReason::StopLoss);
        bot.process_outcome(outcome.clone()).await;
        assert_eq!(bot.stats().stop_losses, 1);
        assert_eq!(bot.risk().leverage().state().level, 1);

        // a replayed outcome is refused
        bot.process_outcome(outcome).await;
        assert_eq!(bot.stats().stop_losses, 1);
        assert_eq!(bot.risk().leverage().state().level, 1);
    }

    #[tokio::test]
    async fn test_run_stops_when_replay_ends() {
        let exchange = make_exchange(Decimal::ZERO);
        let feed = Box::new(ReplayFeed::new(entry_window(), 10));
        let mut bot = Bot::new(make_config(), feed, exchange).unwrap();

        bot.run().await.unwrap();
        let stats = bot.stats();
        assert_eq!(stats.candles, 2);
        assert_eq!(stats.trades_opened, 1);
        assert!(stats.position_open);
    }
}
