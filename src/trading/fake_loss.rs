//! Turns realized losses from forced closes into discrete fake-loss events.

use rust_decimal::Decimal;
use tracing::info;

/// Running balance of forced-close losses.
///
/// Losses are positive, gains negative. The balance is reset to zero exactly
/// when it reaches the threshold, which is also the only time a fake loss is
/// reported.
#[derive(Debug, Clone)]
pub struct FakeLossAccumulator {
    accumulated_usd: Decimal,
    threshold_usd: Decimal,
}

impl FakeLossAccumulator {
    pub fn new(threshold_usd: Decimal) -> Self {
        Self {
            accumulated_usd: Decimal::ZERO,
            threshold_usd,
        }
    }

    pub fn accumulated(&self) -> Decimal {
        self.accumulated_usd
    }

    /// Add the loss of one forced close. Returns true when the threshold is
    /// crossed, in which case the balance has been reset.
    pub fn record(&mut self, loss_usd: Decimal) -> bool {
        self.accumulated_usd += loss_usd;

        if self.accumulated_usd >= self.threshold_usd {
            info!(
                accumulated = %self.accumulated_usd,
                threshold = %self.threshold_usd,
                "Fake loss threshold reached"
            );
            self.accumulated_usd = Decimal::ZERO;
            return true;
        }

        info!(
            loss = %loss_usd,
            accumulated = %self.accumulated_usd,
            threshold = %self.threshold_usd,
            "Fake loss accumulated"
        );
        false
    }
}
