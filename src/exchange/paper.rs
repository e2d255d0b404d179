//! Paper venue: simulated fills at the last candle close with slippage and fees.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    Candle, Direction, Fill, LivePosition, OpenRequest, Position, PositionHandle,
};

use super::ExecutionClient;

/// Paper venue configuration.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Starting cash balance
    pub initial_balance: Decimal,

    /// Simulated slippage (fraction of price)
    pub slippage: Decimal,

    /// Simulated taker fee rate
    pub fee_rate: Decimal,

    /// Brackets with a stop closer than this to the fill are rejected
    pub min_stop_distance: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            slippage: dec!(0.0005),
            fee_rate: dec!(0.0005),
            min_stop_distance: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    id: Uuid,
    direction: Direction,
    quantity: Decimal,
    entry_price: Decimal,
}

#[derive(Debug, Default)]
struct Book {
    mark: Option<Decimal>,
    leverage: Decimal,
    position: Option<PaperPosition>,
    balance: Decimal,
    total_fees: Decimal,
    orders: u64,
    journal: Vec<String>,
}

pub struct PaperExchange {
    config: PaperConfig,
    book: Mutex<Book>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        let book = Book {
            balance: config.initial_balance,
            leverage: Decimal::ONE,
            ..Book::default()
        };
        Self {
            config,
            book: Mutex::new(book),
        }
    }

    pub async fn set_mark(&self, price: Decimal) {
        self.book.lock().await.mark = Some(price);
    }

    pub async fn balance(&self) -> Decimal {
        self.book.lock().await.balance
    }

    pub async fn total_fees(&self) -> Decimal {
        self.book.lock().await.total_fees
    }

    /// Ordered list of venue calls, for inspection.
    #[cfg(test)]
    pub async fn journal(&self) -> Vec<String> {
        self.book.lock().await.journal.clone()
    }

    fn fill_price(&self, mark: Decimal, direction: Direction, entering: bool) -> Decimal {
        // buying pays up, selling gives up
        let buying = (direction == Direction::Buy) == entering;
        if buying {
            mark * (Decimal::ONE + self.config.slippage)
        } else {
            mark * (Decimal::ONE - self.config.slippage)
        }
    }
}

#[async_trait]
impl ExecutionClient for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn set_leverage(&self, leverage: Decimal) -> Result<()> {
        if leverage <= Decimal::ZERO {
            bail!("Leverage must be positive, got {}", leverage);
        }
        let mut book = self.book.lock().await;
        book.leverage = leverage;
        book.journal.push(format!("leverage {}", leverage));
        Ok(())
    }

    async fn open_position(&self, request: &OpenRequest) -> Result<PositionHandle> {
        let mut book = self.book.lock().await;
        if book.position.is_some() {
            bail!("Paper venue already holds a position");
        }
        if request.quantity <= Decimal::ZERO {
            bail!("Order quantity must be positive, got {}", request.quantity);
        }
        let mark = book.mark.context("No mark price yet")?;
        let entry = self.fill_price(mark, request.direction, true);

        let stop_distance = (entry - request.bracket.stop_loss).abs();
        if !request.bracket.is_valid_for(request.direction, entry)
            || stop_distance < self.config.min_stop_distance
        {
            bail!(
                "Bracket rejected: sl {} tp {} around fill {}",
                request.bracket.stop_loss,
                request.bracket.take_profit,
                entry
            );
        }

        let fee = entry * request.quantity * self.config.fee_rate;
        book.balance -= fee;
        book.total_fees += fee;
        book.orders += 1;

        let id = Uuid::new_v4();
        book.position = Some(PaperPosition {
            id,
            direction: request.direction,
            quantity: request.quantity,
            entry_price: entry,
        });
        book.journal.push(format!("open {} {}", request.direction.as_str(), request.quantity));

        info!(
            side = request.direction.as_str(),
            quantity = %request.quantity,
            leverage = %book.leverage,
            price = %entry,
            sl = %request.bracket.stop_loss,
            tp = %request.bracket.take_profit,
            "[PAPER] Position opened"
        );

        Ok(PositionHandle {
            id,
            order_id: format!("paper-{}", book.orders),
            entry_price: entry,
            quantity: request.quantity,
            entry_fee: fee,
            opened_at: Utc::now(),
        })
    }

    async fn close_position(&self, position: &Position) -> Result<Fill> {
        let mut book = self.book.lock().await;
        let held = match &book.position {
            Some(p) if p.id == position.id => p.clone(),
            Some(p) => bail!("Paper venue holds {}, not {}", p.id, position.id),
            None => bail!("No paper position to close"),
        };
        let mark = book.mark.context("No mark price yet")?;
        let exit = self.fill_price(mark, held.direction, false);

        let pnl = match held.direction {
            Direction::Buy => exit - held.entry_price,
            Direction::Sell => held.entry_price - exit,
        } * held.quantity;
        let fee = exit * held.quantity * self.config.fee_rate;

        book.balance += pnl - fee;
        book.total_fees += fee;
        book.position = None;
        book.journal.push("close".to_string());

        info!(price = %exit, pnl = %pnl, "[PAPER] Position closed");

        Ok(Fill {
            price: exit,
            quantity: held.quantity,
            fee,
            at: Utc::now(),
        })
    }

    async fn query_position(&self) -> Result<Option<LivePosition>> {
        let book = self.book.lock().await;
        Ok(book.position.as_ref().map(|p| LivePosition {
            direction: p.direction,
            quantity: p.quantity,
            entry_price: p.entry_price,
        }))
    }

    async fn cancel_orders(&self, position: &Position) -> Result<()> {
        let mut book = self.book.lock().await;
        debug!(position = %position.id, "[PAPER] Bracket orders cancelled");
        book.journal.push("cancel".to_string());
        Ok(())
    }

    async fn mark_price(&self) -> Result<Decimal> {
        self.book.lock().await.mark.context("No mark price yet")
    }

    async fn observe_candle(&self, candle: &Candle) -> Result<()> {
        self.set_mark(candle.close).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bracket, Tier, TradeSignal};

    fn make_exchange() -> PaperExchange {
        PaperExchange::new(PaperConfig {
            initial_balance: dec!(1000),
            slippage: Decimal::ZERO,
            fee_rate: dec!(0.001),
            min_stop_distance: dec!(2),
        })
    }

    fn make_request(direction: Direction, bracket: Bracket) -> OpenRequest {
        OpenRequest {
            direction,
            quantity: dec!(2),
            leverage: dec!(10),
            bracket,
        }
    }

    #[tokio::test]
    async fn test_open_and_close_round_trip() {
        let ex = make_exchange();
        ex.set_mark(dec!(100)).await;

        let request = make_request(Direction::Buy, Bracket::new(dec!(97), dec!(101)));
        let handle = ex.open_position(&request).await.unwrap();
        assert_eq!(handle.entry_price, dec!(100));
        assert_eq!(handle.entry_fee, dec!(0.2));
        assert!(handle.order_id.starts_with("paper-"));
        let live = ex.query_position().await.unwrap().unwrap();
        assert_eq!(live.entry_price, dec!(100));
        assert!(ex.open_position(&request).await.is_err());

        let position = Position::from_handle(
            &handle,
            &request,
            TradeSignal::new(Direction::Buy, Tier::Two),
            handle.opened_at,
            handle.opened_at,
        );
        ex.set_mark(dec!(101)).await;
        let fill = ex.close_position(&position).await.unwrap();
        assert_eq!(fill.price, dec!(101));
        assert_eq!(fill.quantity, dec!(2));
        assert_eq!(position.net_pnl_at(fill.price, fill.fee), dec!(1.598));
        assert!(ex.query_position().await.unwrap().is_none());

        // +2 pnl, fees 0.2 on entry and 0.202 on exit
        assert_eq!(ex.balance().await, dec!(1001.598));
        assert_eq!(ex.total_fees().await, dec!(0.402));
    }

    #[tokio::test]
    async fn test_rejects_tight_or_inverted_bracket() {
        let ex = make_exchange();
        ex.set_mark(dec!(100)).await;

        let tight = make_request(Direction::Buy, Bracket::new(dec!(99), dec!(101)));
        assert!(ex.open_position(&tight).await.is_err());

        let inverted = make_request(Direction::Sell, Bracket::new(dec!(97), dec!(103)));
        assert!(ex.open_position(&inverted).await.is_err());

        let widened = tight.bracket.widen(Direction::Buy, dec!(15), dec!(5));
        let ok = make_request(Direction::Buy, widened);
        assert!(ex.open_position(&ok).await.is_ok());
    }

    #[test]
    fn test_requires_mark_price() {
        let ex = make_exchange();
        let request = make_request(Direction::Buy, Bracket::new(dec!(97), dec!(101)));
        assert!(tokio_test::block_on(ex.open_position(&request)).is_err());
        assert!(tokio_test::block_on(ex.mark_price()).is_err());
    }
}
