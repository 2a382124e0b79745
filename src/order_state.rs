use std::collections::{BTreeSet, HashMap};

use crate::side::Side;

const FILL_EPSILON: f64 = 1e-12;
const DEFAULT_SEEN_TIDS_CAP: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Resting,
    PendingPlace,
    PendingModify,
    PendingCancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub oid: u64,
    pub side: Side,
    pub level_index: usize,
    pub price: f64,
    pub size: f64,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillResult {
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub fully_filled: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileResult {
    pub orphaned_oids: Vec<u64>,
    pub ghost_oids: Vec<u64>,
}

/// Single source of truth for resting orders. Every operation here runs
/// synchronously on the orchestrator's single executor — see the
/// concurrency model in SPEC_FULL.md §5.
///
/// Maintains two indices over the same owned records: `oid -> TrackedOrder`
/// and `(side, level_index) -> oid`. Both always resolve to the same
/// record; at most one record per `(side, level_index)`.
pub struct OrderState {
    orders_by_oid: HashMap<u64, TrackedOrder>,
    orders_by_key: HashMap<(Side, usize), u64>,
    seen_tids: BTreeSet<u64>,
    seen_tids_cap: usize,
}

impl Default for OrderState {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderState {
    pub fn new() -> Self {
        Self {
            orders_by_oid: HashMap::new(),
            orders_by_key: HashMap::new(),
            seen_tids: BTreeSet::new(),
            seen_tids_cap: DEFAULT_SEEN_TIDS_CAP,
        }
    }

    pub fn with_seen_tids_cap(cap: usize) -> Self {
        Self {
            seen_tids_cap: cap,
            ..Self::new()
        }
    }

    pub fn orders_by_oid(&self) -> &HashMap<u64, TrackedOrder> {
        &self.orders_by_oid
    }

    fn remove_record(&mut self, oid: u64) {
        if let Some(order) = self.orders_by_oid.remove(&oid) {
            self.orders_by_key.remove(&(order.side, order.level_index));
        }
    }

    /// Evicts any record already resting at `(side, level_index)`, then
    /// installs the new one under both indices.
    pub fn on_place_confirmed(&mut self, oid: u64, side: Side, level_index: usize, price: f64, size: f64) {
        if let Some(&old_oid) = self.orders_by_key.get(&(side, level_index)) {
            self.orders_by_oid.remove(&old_oid);
        }
        let order = TrackedOrder {
            oid,
            side,
            level_index,
            price,
            size,
            status: OrderStatus::Resting,
        };
        self.orders_by_key.insert((side, level_index), oid);
        self.orders_by_oid.insert(oid, order);
    }

    /// `status` is matched by substring, mirroring the exchange's own
    /// free-text rejection messages.
    pub fn on_modify_response(&mut self, original_oid: u64, new_oid: Option<u64>, status: &str) {
        if status.contains("Cannot modify") {
            self.remove_record(original_oid);
            return;
        }

        let Some(order) = self.orders_by_oid.get_mut(&original_oid) else {
            return;
        };
        order.status = OrderStatus::Resting;

        if let Some(new_oid) = new_oid {
            if new_oid != original_oid {
                // Insert-then-remove: the record is reachable by at least
                // one oid key at every point during the swap. The
                // (side, level_index) index is untouched — same record.
                let mut swapped = self.orders_by_oid.remove(&original_oid).unwrap();
                swapped.oid = new_oid;
                self.orders_by_oid.insert(new_oid, swapped);
                if let Some(key_oid) = self
                    .orders_by_key
                    .values_mut()
                    .find(|v| **v == original_oid)
                {
                    *key_oid = new_oid;
                }
            }
        }
    }

    /// Applies the desired price/size to a record after a successful
    /// modify, as the batch emitter does once the OID swap is settled.
    pub fn apply_desired(&mut self, oid: u64, price: f64, size: f64) {
        if let Some(order) = self.orders_by_oid.get_mut(&oid) {
            order.price = price;
            order.size = size;
        }
    }

    fn prune_seen_tids(&mut self) {
        if self.seen_tids.len() <= self.seen_tids_cap {
            return;
        }
        let drop_count = self.seen_tids.len() - self.seen_tids_cap / 2 - self.seen_tids_cap % 2;
        let to_drop: Vec<u64> = self.seen_tids.iter().take(drop_count).copied().collect();
        for tid in to_drop {
            self.seen_tids.remove(&tid);
        }
    }

    pub fn on_fill(&mut self, tid: u64, oid: u64, fill_sz: f64) -> Option<FillResult> {
        if self.seen_tids.contains(&tid) {
            return None;
        }
        self.seen_tids.insert(tid);
        self.prune_seen_tids();

        let order = self.orders_by_oid.get_mut(&oid)?;
        let side = order.side;
        let remaining = order.size - fill_sz;
        let price = order.price;

        if remaining <= FILL_EPSILON {
            self.remove_record(oid);
            Some(FillResult {
                side,
                price,
                size: fill_sz,
                fully_filled: true,
            })
        } else {
            order.size = remaining;
            Some(FillResult {
                side,
                price,
                size: fill_sz,
                fully_filled: false,
            })
        }
    }

    /// `orphaned = exchange_oids - tracked`; `ghosts = (tracked - pending) -
    /// exchange_oids`, where pending excludes `PendingModify`/`PendingCancel`
    /// so in-flight OID swaps are never flagged as ghosts.
    pub fn reconcile(&self, exchange_oids: &[u64]) -> ReconcileResult {
        let exchange: std::collections::HashSet<u64> = exchange_oids.iter().copied().collect();
        let tracked: std::collections::HashSet<u64> = self.orders_by_oid.keys().copied().collect();

        let orphaned_oids: Vec<u64> = exchange.difference(&tracked).copied().collect();

        let pending: std::collections::HashSet<u64> = self
            .orders_by_oid
            .values()
            .filter(|o| matches!(o.status, OrderStatus::PendingModify | OrderStatus::PendingCancel))
            .map(|o| o.oid)
            .collect();

        let ghost_oids: Vec<u64> = tracked
            .difference(&pending)
            .copied()
            .filter(|oid| !exchange.contains(oid))
            .collect();

        ReconcileResult {
            orphaned_oids,
            ghost_oids,
        }
    }

    pub fn remove_ghost(&mut self, oid: u64) {
        self.remove_record(oid);
    }

    /// Removes a confirmed-cancelled order. Alias of `remove_ghost` kept
    /// distinct so callers read intent at the call site.
    pub fn remove_cancelled(&mut self, oid: u64) {
        self.remove_record(oid);
    }

    pub fn set_status(&mut self, oid: u64, status: OrderStatus) {
        if let Some(order) = self.orders_by_oid.get_mut(&oid) {
            order.status = status;
        }
    }

    pub fn get_current_orders(&self) -> Vec<TrackedOrder> {
        self.orders_by_oid.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(state: &mut OrderState, oid: u64, side: Side, level_index: usize, price: f64, size: f64) {
        state.on_place_confirmed(oid, side, level_index, price, size);
    }

    #[test]
    fn dual_index_consistency_on_place() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        assert!(state.orders_by_oid.contains_key(&100));
        assert_eq!(state.orders_by_key.get(&(Side::Buy, 5)), Some(&100));
    }

    #[test]
    fn place_evicts_old_record_at_same_level() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        place(&mut state, 200, Side::Buy, 5, 1.55, 10.0);
        assert!(!state.orders_by_oid.contains_key(&100));
        assert_eq!(state.orders_by_key.get(&(Side::Buy, 5)), Some(&200));
    }

    #[test]
    fn oid_swap_on_modify() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        state.on_modify_response(100, Some(200), "resting");
        state.apply_desired(200, 1.55, 10.0);

        assert!(!state.orders_by_oid.contains_key(&100));
        let order = state.orders_by_oid.get(&200).unwrap();
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.level_index, 5);
        assert_eq!(order.price, 1.55);
        assert_eq!(state.orders_by_key.get(&(Side::Buy, 5)), Some(&200));
    }

    #[test]
    fn cannot_modify_removes_record() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Sell, 3, 2.0, 5.0);
        state.on_modify_response(100, None, "Cannot modify order");
        assert!(!state.orders_by_oid.contains_key(&100));
        assert!(!state.orders_by_key.contains_key(&(Side::Sell, 3)));
    }

    #[test]
    fn modify_unknown_oid_is_noop() {
        let mut state = OrderState::new();
        state.on_modify_response(999, Some(1000), "resting");
        assert!(state.orders_by_oid.is_empty());
    }

    #[test]
    fn fill_dedup_on_repeated_tid() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        let first = state.on_fill(1, 100, 4.0);
        assert!(first.is_some());
        let second = state.on_fill(1, 100, 4.0);
        assert!(second.is_none());
    }

    #[test]
    fn partial_fill_reduces_size() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        let result = state.on_fill(1, 100, 4.0).unwrap();
        assert!(!result.fully_filled);
        assert_eq!(result.size, 4.0);
        assert_eq!(state.orders_by_oid.get(&100).unwrap().size, 6.0);
    }

    #[test]
    fn full_fill_removes_record() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        let result = state.on_fill(1, 100, 10.0).unwrap();
        assert!(result.fully_filled);
        assert!(!state.orders_by_oid.contains_key(&100));
        assert!(!state.orders_by_key.contains_key(&(Side::Buy, 5)));
    }

    #[test]
    fn fill_unknown_oid_returns_none() {
        let mut state = OrderState::new();
        assert!(state.on_fill(1, 999, 1.0).is_none());
    }

    #[test]
    fn reconcile_finds_orphans_and_ghosts() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        place(&mut state, 200, Side::Sell, 6, 1.55, 10.0);

        // 100 still resting on exchange, 200 is a ghost (already filled
        // exchange-side), 300 is an orphan we never tracked.
        let result = state.reconcile(&[100, 300]);
        assert_eq!(result.orphaned_oids, vec![300]);
        assert_eq!(result.ghost_oids, vec![200]);
    }

    #[test]
    fn reconcile_excludes_pending_modify_from_ghosts() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        state.orders_by_oid.get_mut(&100).unwrap().status = OrderStatus::PendingModify;

        let result = state.reconcile(&[]);
        assert!(result.ghost_oids.is_empty());
    }

    #[test]
    fn remove_ghost_is_idempotent() {
        let mut state = OrderState::new();
        place(&mut state, 100, Side::Buy, 5, 1.50, 10.0);
        state.remove_ghost(100);
        state.remove_ghost(100);
        assert!(state.orders_by_oid.is_empty());
    }

    #[test]
    fn seen_tids_pruning_retains_larger_half() {
        let mut state = OrderState::with_seen_tids_cap(10);
        place(&mut state, 1, Side::Buy, 0, 1.0, 1000.0);
        for tid in 1..=20u64 {
            state.on_fill(tid, 1, 0.0001);
        }
        // after pruning, low tids should have been dropped
        assert!(!state.seen_tids.contains(&1));
        assert!(state.seen_tids.contains(&20));
    }
}
