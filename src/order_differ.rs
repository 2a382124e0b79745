//! Dead-zone-gated, level-indexed diff between the desired order set and
//! the current tracked orders. Pure function — no exchange I/O, no
//! dependency on `order_state`'s internals beyond the small `CurrentOrder`
//! view passed in.

use std::collections::HashMap;

use crate::quoting_engine::DesiredOrder;
use crate::side::Side;

#[derive(Debug, Clone, Copy)]
pub struct CurrentOrder {
    pub oid: u64,
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDiff {
    pub modifies: Vec<(u64, DesiredOrder)>,
    pub places: Vec<DesiredOrder>,
    pub cancels: Vec<u64>,
}

impl OrderDiff {
    pub fn is_empty(&self) -> bool {
        self.modifies.is_empty() && self.places.is_empty() && self.cancels.is_empty()
    }

    pub fn total_mutations(&self) -> usize {
        self.modifies.len() + self.places.len() + self.cancels.len()
    }
}

fn weighted_mid_price(prices: &[f64], sizes: &[f64]) -> f64 {
    let total_size: f64 = sizes.iter().sum();
    if total_size == 0.0 {
        return 0.0;
    }
    prices.iter().zip(sizes.iter()).map(|(p, s)| p * s).sum::<f64>() / total_size
}

pub fn compute_diff(
    desired: &[DesiredOrder],
    current: &[CurrentOrder],
    dead_zone_bps: f64,
    price_tolerance_bps: f64,
    size_tolerance_pct: f64,
) -> OrderDiff {
    if desired.is_empty() && current.is_empty() {
        return OrderDiff::default();
    }
    if current.is_empty() {
        return OrderDiff {
            places: desired.to_vec(),
            ..Default::default()
        };
    }
    if desired.is_empty() {
        return OrderDiff {
            cancels: current.iter().map(|c| c.oid).collect(),
            ..Default::default()
        };
    }

    let (desired_prices, desired_sizes): (Vec<f64>, Vec<f64>) =
        desired.iter().map(|d| (d.price, d.size)).unzip();
    let (current_prices, current_sizes): (Vec<f64>, Vec<f64>) =
        current.iter().map(|c| (c.price, c.size)).unzip();

    let desired_mid = weighted_mid_price(&desired_prices, &desired_sizes);
    let current_mid = weighted_mid_price(&current_prices, &current_sizes);

    if current_mid > 0.0 {
        let drift_bps = (desired_mid - current_mid).abs() / current_mid * 10_000.0;
        if drift_bps < dead_zone_bps {
            return OrderDiff::default();
        }
    }

    let desired_by_key: HashMap<(Side, usize), DesiredOrder> =
        desired.iter().map(|d| ((d.side, d.level_index), *d)).collect();
    let current_by_key: HashMap<(Side, usize), CurrentOrder> =
        current.iter().map(|c| ((c.side, c.level_index), *c)).collect();

    let mut matched_current_keys: std::collections::HashSet<(Side, usize)> = std::collections::HashSet::new();
    let mut modifies = Vec::new();
    let mut places = Vec::new();
    let mut cancels = Vec::new();

    for (&key, &d) in desired_by_key.iter() {
        if let Some(&c) = current_by_key.get(&key) {
            matched_current_keys.insert(key);

            let px_diff_bps = if c.price <= 0.0 {
                f64::INFINITY
            } else {
                (d.price - c.price).abs() / c.price * 10_000.0
            };
            let sz_diff_pct = if c.size <= 0.0 {
                f64::INFINITY
            } else {
                (d.size - c.size).abs() / c.size * 100.0
            };

            if px_diff_bps <= price_tolerance_bps && sz_diff_pct <= size_tolerance_pct {
                continue;
            }
            modifies.push((c.oid, d));
        } else {
            let opposite_key = (key.0.opposite(), key.1);
            if let Some(&opposite) = current_by_key.get(&opposite_key) {
                if !matched_current_keys.contains(&opposite_key) {
                    matched_current_keys.insert(opposite_key);
                    cancels.push(opposite.oid);
                    places.push(d);
                    continue;
                }
            }
            places.push(d);
        }
    }

    for (&key, c) in current_by_key.iter() {
        if !matched_current_keys.contains(&key) {
            cancels.push(c.oid);
        }
    }

    OrderDiff {
        modifies,
        places,
        cancels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(side: Side, level: usize, price: f64, size: f64) -> DesiredOrder {
        DesiredOrder { side, level_index: level, price, size }
    }

    fn current(oid: u64, side: Side, level: usize, price: f64, size: f64) -> CurrentOrder {
        CurrentOrder { oid, side, level_index: level, price, size }
    }

    #[test]
    fn both_empty_yields_empty_diff() {
        let diff = compute_diff(&[], &[], 5.0, 1.0, 1.0);
        assert!(diff.is_empty());
    }

    #[test]
    fn current_empty_all_desired_become_places() {
        let d = vec![desired(Side::Buy, 0, 1.0, 1.0)];
        let diff = compute_diff(&d, &[], 5.0, 1.0, 1.0);
        assert_eq!(diff.places.len(), 1);
        assert!(diff.modifies.is_empty());
        assert!(diff.cancels.is_empty());
    }

    #[test]
    fn desired_empty_all_current_become_cancels() {
        let c = vec![current(1, Side::Buy, 0, 1.0, 1.0)];
        let diff = compute_diff(&[], &c, 5.0, 1.0, 1.0);
        assert_eq!(diff.cancels, vec![1]);
    }

    #[test]
    fn dead_zone_suppresses_small_drift() {
        let c = vec![current(1, Side::Buy, 0, 1.0, 10.0)];
        let d = vec![desired(Side::Buy, 0, 1.0001, 10.0)];
        let diff = compute_diff(&d, &c, 50.0, 1.0, 1.0);
        assert!(diff.is_empty());
    }

    #[test]
    fn same_side_match_within_tolerance_skips() {
        let c = vec![current(1, Side::Buy, 0, 1.0, 10.0)];
        let d = vec![desired(Side::Buy, 0, 1.00001, 10.0)];
        let diff = compute_diff(&d, &c, 0.0, 5.0, 5.0);
        assert!(diff.modifies.is_empty());
    }

    #[test]
    fn same_side_match_outside_tolerance_modifies() {
        let c = vec![current(1, Side::Buy, 0, 1.0, 10.0)];
        let d = vec![desired(Side::Buy, 0, 1.5, 10.0)];
        let diff = compute_diff(&d, &c, 0.0, 1.0, 1.0);
        assert_eq!(diff.modifies, vec![(1, d[0])]);
    }

    #[test]
    fn cross_side_occupation_cancels_and_places_never_modifies() {
        let c = vec![current(1, Side::Sell, 5, 2.0, 10.0)];
        let d = vec![desired(Side::Buy, 5, 1.0, 10.0)];
        let diff = compute_diff(&d, &c, 0.0, 1.0, 1.0);
        assert_eq!(diff.cancels, vec![1]);
        assert_eq!(diff.places, vec![d[0]]);
        assert!(diff.modifies.is_empty());
    }

    #[test]
    fn residual_current_orders_become_cancels() {
        let c = vec![
            current(1, Side::Buy, 0, 1.0, 10.0),
            current(2, Side::Buy, 1, 1.1, 10.0),
        ];
        let d = vec![desired(Side::Buy, 0, 1.0, 10.0)];
        let diff = compute_diff(&d, &c, 0.0, 1.0, 1.0);
        assert_eq!(diff.cancels, vec![2]);
    }

    #[test]
    fn determinism_identical_inputs_identical_output() {
        let c = vec![current(1, Side::Buy, 0, 1.0, 10.0)];
        let d = vec![desired(Side::Buy, 0, 1.5, 10.0)];
        let first = compute_diff(&d, &c, 0.0, 1.0, 1.0);
        let second = compute_diff(&d, &c, 0.0, 1.0, 1.0);
        assert_eq!(first, second);
    }
}
