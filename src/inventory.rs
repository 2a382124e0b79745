use crate::error::ConfigError;
use crate::pricing_grid::PricingGrid;

const EPSILON: f64 = 1e-12;

/// Decomposition of a balance into whole `order_sz` tranches plus a
/// remainder. `levels` is always empty here — level assignment belongs to
/// the quoting engine, not to inventory accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct TrancheDecomposition {
    pub n_full: usize,
    pub partial_sz: f64,
    pub levels: Vec<usize>,
}

/// One grid-level tranche sized against the remaining USDC balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BidTranche {
    pub level_index: usize,
    pub size: f64,
}

/// Tracks the traded token and USDC balances the quoting engine consumes.
/// `effective = min(allocated, account)` for each leg, recomputed on every
/// mutation.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub order_sz: f64,
    pub allocated_token: f64,
    pub allocated_usdc: f64,
    pub account_token: f64,
    pub account_usdc: f64,
    pub effective_token: f64,
    pub effective_usdc: f64,
}

impl Inventory {
    pub fn new(
        order_sz: f64,
        allocated_token: f64,
        allocated_usdc: f64,
        account_token: f64,
        account_usdc: f64,
    ) -> Self {
        let mut inv = Self {
            order_sz,
            allocated_token,
            allocated_usdc,
            account_token,
            account_usdc,
            effective_token: 0.0,
            effective_usdc: 0.0,
        };
        inv.recompute_effective();
        inv
    }

    fn recompute_effective(&mut self) {
        self.effective_token = self.allocated_token.min(self.account_token);
        self.effective_usdc = self.allocated_usdc.min(self.account_usdc);
    }

    pub fn compute_ask_tranches(&self) -> TrancheDecomposition {
        let n_full = (self.effective_token / self.order_sz).floor().max(0.0) as usize;
        let partial_sz = (self.effective_token - n_full as f64 * self.order_sz).max(0.0);
        TrancheDecomposition {
            n_full,
            partial_sz,
            levels: Vec::new(),
        }
    }

    pub fn compute_bid_tranches(
        &self,
        grid: &PricingGrid,
        boundary_level: usize,
    ) -> Result<Vec<BidTranche>, ConfigError> {
        let mut tranches = Vec::new();
        let mut available = self.effective_usdc;

        if boundary_level == 0 {
            return Ok(tranches);
        }

        let mut lvl = boundary_level - 1;
        loop {
            let price = grid.price_at_level(lvl)?;
            let cost = price * self.order_sz;
            if available >= cost {
                tranches.push(BidTranche {
                    level_index: lvl,
                    size: self.order_sz,
                });
                available -= cost;
            } else if available > 0.0 && price > 0.0 {
                tranches.push(BidTranche {
                    level_index: lvl,
                    size: available / price,
                });
                break;
            } else {
                break;
            }

            if lvl == 0 {
                break;
            }
            lvl -= 1;
        }

        Ok(tranches)
    }

    pub fn on_ask_fill(&mut self, px: f64, sz: f64) {
        self.account_token -= sz;
        self.account_usdc += px * sz;
        self.recompute_effective();
    }

    pub fn on_bid_fill(&mut self, px: f64, sz: f64) {
        self.account_token += sz;
        self.account_usdc -= px * sz;
        self.recompute_effective();
    }

    pub fn on_balance_update(&mut self, token: f64, usdc: f64) {
        self.account_token = token;
        self.account_usdc = usdc;
        self.recompute_effective();
    }

    pub fn update_allocation(&mut self, token: f64, usdc: f64) {
        self.allocated_token = token;
        self.allocated_usdc = usdc;
        self.recompute_effective();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_inv() -> Inventory {
        Inventory::new(10.0, 100.0, 100.0, 100.0, 100.0)
    }

    #[test]
    fn effective_is_min_of_allocated_and_account() {
        let inv = Inventory::new(10.0, 50.0, 200.0, 100.0, 100.0);
        assert_eq!(inv.effective_token, 50.0);
        assert_eq!(inv.effective_usdc, 100.0);
    }

    #[test]
    fn ask_tranches_decompose_cleanly() {
        let inv = make_inv();
        let t = inv.compute_ask_tranches();
        assert_eq!(t.n_full, 10);
        assert!((t.partial_sz - 0.0).abs() < EPSILON);
    }

    #[test]
    fn ask_tranches_with_remainder() {
        let inv = Inventory::new(10.0, 35.0, 100.0, 35.0, 100.0);
        let t = inv.compute_ask_tranches();
        assert_eq!(t.n_full, 3);
        assert!((t.partial_sz - 5.0).abs() < 1e-9);
    }

    #[test]
    fn bid_tranches_walk_down_and_stop_on_partial() {
        let grid = PricingGrid::new(1.0, 20).unwrap();
        // order_sz large enough that usdc runs out mid-walk
        let inv = Inventory::new(1.0, 1000.0, 2.5, 1000.0, 2.5);
        let tranches = inv.compute_bid_tranches(&grid, 5).unwrap();
        // should consume full tranches then exactly one partial and stop
        assert!(tranches.len() <= 5);
        let last = tranches.last().unwrap();
        assert!(last.size <= 1.0);
    }

    #[test]
    fn bid_tranches_empty_at_boundary_zero() {
        let grid = PricingGrid::new(1.0, 20).unwrap();
        let inv = make_inv();
        assert_eq!(inv.compute_bid_tranches(&grid, 0).unwrap(), Vec::new());
    }

    #[test]
    fn fills_update_account_then_effective() {
        let mut inv = make_inv();
        inv.on_ask_fill(1.0, 5.0);
        assert_eq!(inv.account_token, 95.0);
        assert_eq!(inv.account_usdc, 105.0);
        assert_eq!(inv.effective_token, 95.0);

        inv.on_bid_fill(1.0, 5.0);
        assert_eq!(inv.account_token, 100.0);
        assert_eq!(inv.account_usdc, 100.0);
    }

    #[test]
    fn balance_update_is_authoritative() {
        let mut inv = make_inv();
        inv.on_balance_update(42.0, 7.0);
        assert_eq!(inv.account_token, 42.0);
        assert_eq!(inv.account_usdc, 7.0);
        assert_eq!(inv.effective_token, 42.0);
        assert_eq!(inv.effective_usdc, 7.0);
    }
}
