use crate::error::ConfigError;

/// Rounds to 8 significant figures, matching the exchange's own price
/// rounding convention.
fn round_to_8_sig_figs(px: f64) -> f64 {
    if px == 0.0 {
        return 0.0;
    }
    let magnitude = px.abs().log10().floor() as i32 + 1;
    let decimals = 8 - magnitude;
    let factor = 10_f64.powi(decimals);
    (px * factor).round() / factor
}

/// Immutable geometric price ladder: `p_{i+1} = round(p_i * (1 + tick_size))`.
///
/// Built once at startup and never mutated; `level_for_price` is a binary
/// search so lookups stay logarithmic in `n_orders`.
#[derive(Debug, Clone)]
pub struct PricingGrid {
    levels: Vec<f64>,
    tick_size: f64,
}

impl PricingGrid {
    pub fn new(start_px: f64, n_orders: usize) -> Result<Self, ConfigError> {
        Self::with_tick_size(start_px, n_orders, 0.003)
    }

    pub fn with_tick_size(
        start_px: f64,
        n_orders: usize,
        tick_size: f64,
    ) -> Result<Self, ConfigError> {
        let mut levels = Vec::with_capacity(n_orders);
        levels.push(round_to_8_sig_figs(start_px));
        for i in 1..n_orders {
            let prev = levels[i - 1];
            let next = round_to_8_sig_figs(prev * (1.0 + tick_size));
            if next == prev {
                return Err(ConfigError::DegenerateGrid {
                    index: i,
                    price: prev,
                });
            }
            levels.push(next);
        }
        Ok(Self { levels, tick_size })
    }

    pub fn n_orders(&self) -> usize {
        self.levels.len()
    }

    pub fn max_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    /// Returns `levels[i]`, or `IndexOutOfRange` if `i >= n_orders`.
    pub fn price_at_level(&self, i: usize) -> Result<f64, ConfigError> {
        self.levels
            .get(i)
            .copied()
            .ok_or(ConfigError::IndexOutOfRange { index: i, n_orders: self.levels.len() })
    }

    /// Nearest level index for `px`, or `None` if it lies outside the grid
    /// by more than half a tick on either side. Ties (equidistant between
    /// two levels) resolve to the lower index.
    pub fn level_for_price(&self, px: f64) -> Option<usize> {
        let half_tick_low = self.levels[0] * self.tick_size / 2.0;
        let half_tick_high = self.levels[self.max_level()] * self.tick_size / 2.0;

        if px < self.levels[0] - half_tick_low || px > self.levels[self.max_level()] + half_tick_high {
            return None;
        }

        match self.levels.binary_search_by(|p| p.partial_cmp(&px).unwrap()) {
            Ok(idx) => Some(idx),
            Err(idx) => {
                if idx == 0 {
                    Some(0)
                } else if idx == self.levels.len() {
                    Some(self.max_level())
                } else {
                    let left = self.levels[idx - 1];
                    let right = self.levels[idx];
                    if px - left <= right - px {
                        Some(idx - 1)
                    } else {
                        Some(idx)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonically_increasing() {
        let grid = PricingGrid::new(1.0, 20).unwrap();
        for w in grid.levels().windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn round_trip_level_for_price() {
        let grid = PricingGrid::new(1.0, 20).unwrap();
        for i in 0..grid.n_orders() {
            let px = grid.price_at_level(i).unwrap();
            assert_eq!(grid.level_for_price(px), Some(i));
        }
    }

    #[test]
    fn price_at_level_out_of_range_fails() {
        let grid = PricingGrid::new(1.0, 20).unwrap();
        let result = grid.price_at_level(grid.n_orders());
        assert!(matches!(result, Err(ConfigError::IndexOutOfRange { .. })));
    }

    #[test]
    fn degenerate_grid_fails_at_build_time() {
        // a tick size too small to move an 8-sig-fig rounded price at all
        let result = PricingGrid::with_tick_size(1.0, 5, 1e-12);
        assert!(matches!(result, Err(ConfigError::DegenerateGrid { .. })));
    }

    #[test]
    fn out_of_bounds_returns_none() {
        let grid = PricingGrid::new(1.0, 20).unwrap();
        let low = grid.price_at_level(0).unwrap() * (1.0 - grid.tick_size);
        let high = grid.price_at_level(grid.max_level()).unwrap() * (1.0 + grid.tick_size);
        assert_eq!(grid.level_for_price(low), None);
        assert_eq!(grid.level_for_price(high), None);
    }

    #[test]
    fn tie_breaks_to_lower_index() {
        let grid = PricingGrid::new(1.0, 3).unwrap();
        let midpoint = (grid.price_at_level(0).unwrap() + grid.price_at_level(1).unwrap()) / 2.0;
        assert_eq!(grid.level_for_price(midpoint), Some(0));
    }
}
