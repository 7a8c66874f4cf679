//! Open positions and signed fill arithmetic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Strategy tag given to positions discovered at the broker by reconciliation.
pub const EXTERNAL_STRATEGY_TAG: &str = "external";

/// One open exposure in one instrument.
///
/// Positive quantity is long, negative is short. A stored position never has
/// a zero quantity; the portfolio removes it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol (unique key within the portfolio).
    pub symbol: String,
    /// Signed quantity.
    pub quantity: i64,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Last known market price.
    pub current_price: Decimal,
    /// Protective stop, if any.
    pub stop_loss: Option<Decimal>,
    /// Profit target, if any.
    pub take_profit: Option<Decimal>,
    /// When the position was opened (or flipped).
    pub entry_time: DateTime<Utc>,
    /// Provenance of the position.
    pub strategy_tag: String,
}

/// Result of applying a fill to a (possibly absent) position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillOutcome {
    /// The position after the fill, `None` when it was closed out.
    pub position: Option<Position>,
    /// PnL realized by the part of the fill that reduced exposure.
    pub realized_pnl: Decimal,
}

impl Position {
    /// Open a new position at `price`.
    #[must_use]
    pub fn open(
        symbol: impl Into<String>,
        quantity: i64,
        price: Decimal,
        strategy_tag: impl Into<String>,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            entry_price: price,
            current_price: price,
            stop_loss: None,
            take_profit: None,
            entry_time,
            strategy_tag: strategy_tag.into(),
        }
    }

    /// True for positive quantities.
    #[must_use]
    pub const fn is_long(&self) -> bool {
        self.quantity > 0
    }

    /// Signed market value at the current price.
    #[must_use]
    pub fn market_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.current_price
    }

    /// Unrealized PnL at the current price.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        Decimal::from(self.quantity) * (self.current_price - self.entry_price)
    }

    /// Apply a signed fill of `signed_quantity` at `price` to `current`.
    ///
    /// Same-side fills average into the entry price. Opposite-side fills
    /// realize PnL on the closed part; the remainder either stays on the
    /// original side or flips the position at the fill price.
    ///
    /// Returns `None` if the cost or PnL arithmetic overflows.
    pub fn apply_fill(
        current: Option<&Self>,
        symbol: &str,
        signed_quantity: i64,
        price: Decimal,
        strategy_tag: &str,
        at: DateTime<Utc>,
    ) -> Option<FillOutcome> {
        let Some(existing) = current else {
            let position = (signed_quantity != 0)
                .then(|| Self::open(symbol, signed_quantity, price, strategy_tag, at));
            return Some(FillOutcome {
                position,
                realized_pnl: Decimal::ZERO,
            });
        };

        let old_quantity = existing.quantity;
        let new_quantity = old_quantity.checked_add(signed_quantity)?;

        if signed_quantity == 0 {
            return Some(FillOutcome {
                position: Some(existing.clone()),
                realized_pnl: Decimal::ZERO,
            });
        }

        if old_quantity.signum() == signed_quantity.signum() {
            let old_cost = existing
                .entry_price
                .checked_mul(Decimal::from(old_quantity.abs()))?;
            let added_cost = price.checked_mul(Decimal::from(signed_quantity.abs()))?;
            let entry_price = old_cost
                .checked_add(added_cost)?
                .checked_div(Decimal::from(new_quantity.abs()))?;
            return Some(FillOutcome {
                position: Some(Self {
                    quantity: new_quantity,
                    entry_price: entry_price.normalize(),
                    current_price: price,
                    ..existing.clone()
                }),
                realized_pnl: Decimal::ZERO,
            });
        }

        let closed = old_quantity.abs().min(signed_quantity.abs());
        let realized_pnl = price
            .checked_sub(existing.entry_price)?
            .checked_mul(Decimal::from(closed))?
            .checked_mul(Decimal::from(old_quantity.signum()))?;

        let position = if new_quantity == 0 {
            None
        } else if new_quantity.signum() == old_quantity.signum() {
            Some(Self {
                quantity: new_quantity,
                current_price: price,
                ..existing.clone()
            })
        } else {
            Some(Self::open(symbol, new_quantity, price, strategy_tag, at))
        };

        Some(FillOutcome {
            position,
            realized_pnl,
        })
    }
}
