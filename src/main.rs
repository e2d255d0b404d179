//! Signal Ladder
//!
//! Fuses per-candle indicator events into one directional signal, trades it
//! with a martingale leverage ladder, and gates re-entry after every close.

mod api;
mod bot;
mod exchange;
mod models;
mod monitor;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{IndicatorClient, IndicatorProvider, ReplayFeed};
use crate::bot::{Bot, BotConfig};
use crate::exchange::{PaperConfig, PaperExchange};
use crate::models::LossKind;
use crate::trading::{
    evaluate_window, ExecutionConfig, LeverageEscalationEngine, SessionConfig, StopPolicy,
    TradingConfig,
};

/// Signal-fusion trading bot with a leverage ladder.
#[derive(Parser)]
#[command(name = "ladder")]
#[command(about = "Fuse indicator events into trades and escalate leverage on losses", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "LADDER_LOG_LEVEL")]
    log_level: String,

    #[command(flatten)]
    trading: TradingArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Risk surface shared by every command.
#[derive(Args, Debug, Clone)]
struct TradingArgs {
    /// Leverage at ladder level 0
    #[arg(long, default_value = "10", env = "LADDER_BASE_LEVERAGE")]
    base_leverage: Decimal,

    /// Multiplier per ladder level
    #[arg(long, default_value = "1,2,4,8,16", value_delimiter = ',', env = "LADDER_MULTIPLIERS")]
    multipliers: Vec<u32>,

    /// Number of ladder levels
    #[arg(long, default_value = "5", env = "LADDER_MAX_LEVELS")]
    max_levels: usize,

    /// Forced-close loss in USD that counts as one fake loss
    #[arg(long, default_value = "1", env = "LADDER_FAKE_LOSS_USD")]
    fake_loss_usd: Decimal,

    /// Window in seconds in which an SL and a fake loss count once
    #[arg(long, default_value = "15", env = "LADDER_DOUBLE_TRIGGER_SECS")]
    double_trigger_secs: u64,

    /// Pause after a position opens and closes within one candle
    #[arg(long, default_value = "900", env = "LADDER_COOLDOWN_SECS")]
    cooldown_secs: u64,

    /// Candles a range-filter pulse waits for confirmation (1-5)
    #[arg(long, default_value = "1", env = "LADDER_RF_LOOKBACK")]
    rf_lookback: usize,

    /// Signed tier codes to trade, e.g. 2,-2
    #[arg(
        long,
        default_value = "2,-2",
        value_delimiter = ',',
        allow_negative_numbers = true,
        allow_hyphen_values = true,
        env = "LADDER_ALLOWED_SIGNALS"
    )]
    allowed_signals: Vec<i8>,
}

impl TradingArgs {
    fn to_config(&self) -> Result<TradingConfig> {
        let config = TradingConfig {
            base_leverage: self.base_leverage,
            multiplier_table: self.multipliers.clone(),
            max_levels: self.max_levels,
            fake_loss_threshold_usd: self.fake_loss_usd,
            double_trigger_window_secs: self.double_trigger_secs,
            cooldown_secs: self.cooldown_secs,
            rf_lookback: self.rf_lookback,
            allowed_signals: self.allowed_signals.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Sizing, bracket, and timing settings of a live run.
#[derive(Args, Debug, Clone)]
struct ExecutionArgs {
    /// Margin per position in USD
    #[arg(long, default_value = "10000", env = "LADDER_CAPITAL_USD")]
    capital: Decimal,

    /// Stop-loss distance in price points
    #[arg(long, default_value = "3", env = "LADDER_SL_BUFFER")]
    sl_buffer: Decimal,

    /// Take-profit distance in percent
    #[arg(long, default_value = "0.25", env = "LADDER_TP_PERCENT")]
    tp_percent: Decimal,

    /// Stop placement: tight (closer to entry) or wide
    #[arg(long, value_enum, default_value_t = StopPolicy::Tight, env = "LADDER_STOP_POLICY")]
    stop_policy: StopPolicy,

    /// Candle length in seconds
    #[arg(long, default_value = "900", env = "LADDER_CANDLE_SECS")]
    candle_secs: u64,

    /// Candles in the trailing window
    #[arg(long, default_value = "200", env = "LADDER_WINDOW")]
    window: usize,

    /// Position monitor poll interval in seconds
    #[arg(long, default_value = "2", env = "LADDER_MONITOR_SECS")]
    monitor_secs: u64,

    /// Session start, local HH:MM
    #[arg(long, default_value = "00:00", env = "LADDER_SESSION_START")]
    session_start: String,

    /// Session end, local HH:MM (inclusive)
    #[arg(long, default_value = "23:59", env = "LADDER_SESSION_END")]
    session_end: String,

    /// Session clock offset from UTC in minutes
    #[arg(long, default_value = "330", env = "LADDER_UTC_OFFSET_MINUTES")]
    utc_offset_minutes: i32,
}

impl ExecutionArgs {
    fn to_config(&self) -> Result<ExecutionConfig> {
        let config = ExecutionConfig {
            capital_usd: self.capital,
            sl_buffer_points: self.sl_buffer,
            tp_percent: self.tp_percent,
            stop_policy: self.stop_policy,
            candle_interval_secs: self.candle_secs,
            window_len: self.window,
            monitor_interval_secs: self.monitor_secs,
            session: SessionConfig {
                start: self.session_start.clone(),
                end: self.session_end.clone(),
                utc_offset_minutes: self.utc_offset_minutes,
            },
            ..ExecutionConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decision loop against the paper venue
    Run {
        #[command(flatten)]
        execution: ExecutionArgs,

        /// Replay a JSON / JSON-lines candle file instead of polling the feed
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Delay between replayed candles in milliseconds
        #[arg(long, default_value = "0")]
        pace_ms: u64,

        /// Indicator service base URL
        #[arg(long, default_value = "http://127.0.0.1:8600", env = "LADDER_INDICATOR_URL")]
        indicator_url: String,

        /// Instrument symbol
        #[arg(long, default_value = "BTCUSD", env = "LADDER_SYMBOL")]
        symbol: String,

        /// Candle interval label understood by the indicator service
        #[arg(long, default_value = "15m", env = "LADDER_INTERVAL")]
        interval: String,

        /// Seconds between feed polls while waiting for a candle to close
        #[arg(long, default_value = "5", env = "LADDER_POLL_SECS")]
        poll_secs: u64,

        /// Paper fee rate per fill
        #[arg(long, default_value = "0.0005")]
        fee: Decimal,

        /// Paper slippage per fill
        #[arg(long, default_value = "0.0005")]
        slippage: Decimal,
    },

    /// Print the fused signal of every candle in a file
    Signals {
        /// JSON / JSON-lines candle file
        file: PathBuf,
    },

    /// Walk a list of outcomes through the leverage ladder
    Ladder {
        /// Comma list of win, sl, fake, and fake+sl (a double trigger)
        outcomes: String,
    },

    /// Show current configuration
    Config {
        #[command(flatten)]
        execution: ExecutionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let trading = cli.trading.to_config()?;

    match cli.command {
        Commands::Run {
            execution,
            replay,
            pace_ms,
            indicator_url,
            symbol,
            interval,
            poll_secs,
            fee,
            slippage,
        } => {
            let execution = execution.to_config()?;

            let feed: Box<dyn IndicatorProvider> = match &replay {
                Some(path) => {
                    let feed = ReplayFeed::from_path(path, execution.window_len)?;
                    info!(file = %path.display(), candles = feed.candles().len(), "Replaying candles");
                    Box::new(feed.with_pace(Duration::from_millis(pace_ms)))
                }
                None => Box::new(IndicatorClient::with_base_url(
                    indicator_url.clone(),
                    symbol.clone(),
                    interval.clone(),
                    execution.window_len,
                    Duration::from_secs(poll_secs),
                )?),
            };

            let exchange = Arc::new(PaperExchange::new(PaperConfig {
                initial_balance: execution.capital_usd,
                slippage,
                fee_rate: fee,
                ..PaperConfig::default()
            }));

            let mut bot = Bot::new(BotConfig::new(trading.clone(), execution), feed, exchange.clone())?;

            println!("\n=== Signal Ladder ===");
            match &replay {
                Some(path) => println!("Feed:           replay {}", path.display()),
                None => println!("Feed:           {} ({} {})", indicator_url, symbol, interval),
            }
            println!("Venue:          paper");
            println!("Base leverage:  {}x", trading.base_leverage);
            println!("Allowed codes:  {:?}", trading.allowed_signals);
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Bot error");
            }

            let stats = bot.stats();
            println!("\n{}", stats);
            println!("Paper balance:   ${:.2}", exchange.balance().await);
            println!("Paper fees:      ${:.2}", exchange.total_fees().await);
        }

        Commands::Signals { file } => {
            let feed = ReplayFeed::from_path(&file, usize::MAX)?;
            let candles = feed.candles();
            let signals = evaluate_window(trading.rf_lookback, candles.iter().map(|c| &c.events));

            println!("\n{:<22} {:>12} {:<24} {:>6}", "CANDLE", "CLOSE", "EVENTS", "CODE");
            println!("{}", "-".repeat(68));

            for (c, signal) in candles.iter().zip(&signals) {
                let code = signal
                    .map(|s| format!("{:+}", s.code()))
                    .unwrap_or_else(|| "0".to_string());
                let marker = match signal {
                    Some(s) if trading.is_allowed(s) => " *",
                    _ => "",
                };
                println!(
                    "{:<22} {:>12} {:<24} {:>6}{}",
                    c.candle.time.format("%Y-%m-%d %H:%M"),
                    c.candle.close,
                    describe_events(&c.events),
                    code,
                    marker
                );
            }

            let fired = signals.iter().flatten().count();
            println!("\n{} candles, {} signals (* = allowed)", candles.len(), fired);
        }

        Commands::Ladder { outcomes } => {
            let steps = parse_ladder_steps(&outcomes)?;
            let mut engine = LeverageEscalationEngine::from_config(&trading);
            let start = Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .context("Invalid ladder start time")?;

            println!("\n{:<4} {:<8} {:>6} {:>10} {:>9} {:>6} {:>9}", "#", "EVENT", "LEVEL", "LEVERAGE", "ELEVATED", "FAKE", "SL CYCLE");
            println!("{}", "-".repeat(60));
            println!(
                "{:<4} {:<8} {:>6} {:>9}x {:>9} {:>6} {:>9}",
                0, "start", 0, engine.current_leverage(), false, false, false
            );

            // steps one minute apart; the halves of a double trigger 5s apart
            for (n, step) in steps.iter().enumerate() {
                let at = start + chrono::Duration::minutes(n as i64 + 1);
                match step {
                    LadderStep::Win => {
                        engine.on_win();
                    }
                    LadderStep::Loss(kind) => {
                        engine.on_loss(*kind, at);
                    }
                    LadderStep::DoubleTrigger => {
                        engine.on_loss(LossKind::Fake, at);
                        engine.on_loss(LossKind::StopLoss, at + chrono::Duration::seconds(5));
                    }
                }
                let s = engine.state();
                println!(
                    "{:<4} {:<8} {:>6} {:>9}x {:>9} {:>6} {:>9}",
                    n + 1,
                    step.label(),
                    s.level,
                    engine.current_leverage(),
                    s.elevated_restart,
                    s.fake_loss_flag,
                    s.sl_cycle_started
                );
            }
        }

        Commands::Config { execution } => {
            let execution = execution.to_config()?;

            println!("\n=== Trading Configuration ===\n");
            println!("Leverage Ladder:");
            println!("  Base Leverage:        {}x", trading.base_leverage);
            println!("  Multipliers:          {:?}", trading.multiplier_table);
            println!("  Max Levels:           {}", trading.max_levels);
            println!("  Double Trigger:       {}s", trading.double_trigger_window_secs);

            println!("\nLosses & Re-entry:");
            println!("  Fake Loss Threshold:  ${}", trading.fake_loss_threshold_usd);
            println!("  Cooldown:             {}s", trading.cooldown_secs);
            println!("  Settle Pause:         {}s", execution.settle_pause_secs);

            println!("\nSignals:");
            println!("  RF Lookback:          {} candles", trading.rf_lookback);
            println!("  Allowed Codes:        {:?}", trading.allowed_signals);

            println!("\n=== Execution Configuration ===\n");
            println!("Sizing:");
            println!("  Capital:              ${}", execution.capital_usd);
            println!("  Min Quantity:         {}", execution.min_quantity);
            println!("  Quantity Precision:   {}", execution.quantity_precision);

            println!("\nBrackets:");
            println!("  SL Buffer:            {} pts", execution.sl_buffer_points);
            println!("  TP:                   {}%", execution.tp_percent);
            println!("  Stop Policy:          {}", execution.stop_policy.as_str());
            println!("  Fallback Widening:    SL +{} / TP +{} pts", execution.fallback_sl_points, execution.fallback_tp_points);

            println!("\nTiming:");
            println!("  Candle Interval:      {}s", execution.candle_interval_secs);
            println!("  Window:               {} candles", execution.window_len);
            println!("  Monitor Interval:     {}s", execution.monitor_interval_secs);
            println!(
                "  Session:              {} - {} (UTC{:+}m)",
                execution.session.start, execution.session.end, execution.session.utc_offset_minutes
            );
        }
    }

    Ok(())
}

/// One entry of the `ladder` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LadderStep {
    Win,
    Loss(LossKind),
    DoubleTrigger,
}

impl LadderStep {
    fn label(&self) -> &'static str {
        match self {
            LadderStep::Win => "win",
            LadderStep::Loss(kind) => kind.as_str(),
            LadderStep::DoubleTrigger => "fake+sl",
        }
    }
}

fn parse_ladder_steps(list: &str) -> Result<Vec<LadderStep>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.to_lowercase().as_str() {
            "win" | "w" | "tp" => Ok(LadderStep::Win),
            "sl" | "loss" => Ok(LadderStep::Loss(LossKind::StopLoss)),
            "fake" | "f" => Ok(LadderStep::Loss(LossKind::Fake)),
            "fake+sl" | "sl+fake" | "double" => Ok(LadderStep::DoubleTrigger),
            other => bail!("Unknown ladder event '{}'", other),
        })
        .collect()
}

fn describe_events(ev: &crate::models::EventVector) -> String {
    let mut parts = Vec::new();
    for (on, label) in [
        (ev.rf_buy, "rf+"),
        (ev.rf_sell, "rf-"),
        (ev.green_arrow, "arrow+"),
        (ev.red_arrow, "arrow-"),
        (ev.rsi_buy, "rsi+"),
        (ev.rsi_sell, "rsi-"),
    ] {
        if on {
            parts.push(label);
        }
    }
    if ev.zone != crate::models::Zone::None {
        parts.push(ev.zone.as_str());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ladder_steps() {
        let steps = parse_ladder_steps("sl, fake,WIN,fake+sl").unwrap();
        assert_eq!(
            steps,
            vec![
                LadderStep::Loss(LossKind::StopLoss),
                LadderStep::Loss(LossKind::Fake),
                LadderStep::Win,
                LadderStep::DoubleTrigger,
            ]
        );
        assert!(parse_ladder_steps("sl,maybe").is_err());
    }

    #[test]
    fn test_cli_defaults_match_config_defaults() {
        let cli = Cli::parse_from(["ladder", "config"]);
        assert_eq!(cli.trading.to_config().unwrap(), TradingConfig::default());
        let Commands::Config { execution } = cli.command else {
            panic!("expected config command");
        };
        assert_eq!(execution.to_config().unwrap(), ExecutionConfig::default());
    }

    #[test]
    fn test_stop_policy_values() {
        let cli = Cli::parse_from(["ladder", "config", "--stop-policy", "loose"]);
        let Commands::Config { execution } = cli.command else {
            panic!("expected config command");
        };
        assert_eq!(execution.to_config().unwrap().stop_policy, StopPolicy::Wide);

        assert!(Cli::try_parse_from(["ladder", "config", "--stop-policy", "wdie"]).is_err());
    }

    #[test]
    fn test_negative_signal_codes_parse() {
        let cli = Cli::parse_from(["ladder", "--allowed-signals", "-4,2,-2", "config"]);
        assert_eq!(cli.trading.allowed_signals, vec![-4, 2, -2]);
    }
}
