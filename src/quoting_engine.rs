//! Pure mapping from inventory + grid + boundary to the desired order set.
//!
//! Deliberately has no dependency on `order_state`, `rate_limit`, or
//! `batch_emitter` — it is a pure function of its five inputs and nothing
//! else, so its output is trivially deterministic and reusable from a
//! dry-run or a test without touching exchange state.

use crate::error::ConfigError;
use crate::pricing_grid::PricingGrid;
use crate::side::Side;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DesiredOrder {
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
}

/// Produces the desired order set: asks first (ascending from `boundary_level`),
/// then bids (descending from `boundary_level - 1`). Deterministic — repeated
/// calls on identical inputs produce identical output.
pub fn compute_desired_orders(
    grid: &PricingGrid,
    boundary_level: usize,
    effective_token: f64,
    effective_usdc: f64,
    order_sz: f64,
    min_notional: f64,
) -> Result<Vec<DesiredOrder>, ConfigError> {
    let mut orders = Vec::new();
    let max_level = grid.max_level();

    // Asks: n_full whole tranches starting at boundary_level, clipped at
    // max_level, plus one partial if it still fits inside the grid.
    if boundary_level <= max_level {
        let n_full = (effective_token / order_sz).floor().max(0.0) as usize;
        let last_full_level = boundary_level + n_full.saturating_sub(1);
        let ask_count = if n_full == 0 {
            0
        } else if last_full_level > max_level {
            max_level - boundary_level + 1
        } else {
            n_full
        };

        for i in 0..ask_count {
            let level = boundary_level + i;
            let price = grid.price_at_level(level)?;
            push_if_above_min_notional(&mut orders, Side::Sell, level, price, order_sz, min_notional);
        }

        let remainder = (effective_token - n_full as f64 * order_sz).max(0.0);
        let partial_level = boundary_level + n_full;
        if remainder > 0.0 && partial_level <= max_level && ask_count == n_full {
            let price = grid.price_at_level(partial_level)?;
            push_if_above_min_notional(&mut orders, Side::Sell, partial_level, price, remainder, min_notional);
        }
    }

    // Bids: walk down from boundary_level - 1, consuming USDC per tranche.
    if boundary_level > 0 {
        let mut available = effective_usdc;
        let mut lvl = boundary_level - 1;
        loop {
            let price = grid.price_at_level(lvl)?;
            let cost = price * order_sz;
            if available >= cost {
                push_if_above_min_notional(&mut orders, Side::Buy, lvl, price, order_sz, min_notional);
                available -= cost;
            } else if available > 0.0 && price > 0.0 {
                push_if_above_min_notional(&mut orders, Side::Buy, lvl, price, available / price, min_notional);
                break;
            } else {
                break;
            }

            if lvl == 0 {
                break;
            }
            lvl -= 1;
        }
    }

    Ok(orders)
}

fn push_if_above_min_notional(
    orders: &mut Vec<DesiredOrder>,
    side: Side,
    level_index: usize,
    price: f64,
    size: f64,
    min_notional: f64,
) {
    if min_notional > 0.0 && price * size < min_notional {
        return;
    }
    orders.push(DesiredOrder {
        side,
        level_index,
        price,
        size,
    });
}
