//! Turns an `OrderDiff` into at most three signed batch actions — cancels,
//! modifies, places, in that order — subject to budget gating, a hard cap
//! on batch size, and a per-side cooldown after rejected places.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::ExchangeError;
use crate::exchange::{ExchangeClient, ModifyOutcome, ModifySpec, OrderSpec, PlaceOutcome};
use crate::order_differ::OrderDiff;
use crate::order_state::{OrderState, OrderStatus};
use crate::quoting_engine::DesiredOrder;
use crate::rate_limit::RateLimitBudget;
use crate::side::Side;

/// Batches above this size are split by the exchange anyway; trimming to
/// it client-side keeps the three actions within one rate-limit charge
/// each.
const MAX_BATCH: usize = 20;
/// Once the remaining request budget would cover fewer than
/// `total_mutations + SAFETY_MARGIN` more batches, stop placing and
/// modifying — only cancel, to shed inventory risk without spending
/// budget on a request that a margin call would also need.
const BATCH_SAFETY_MARGIN: i64 = 100;
const BALANCE_COOLDOWN: Duration = Duration::from_secs(60);
const REJECT_COOLDOWN: Duration = Duration::from_secs(10);
const CONSECUTIVE_REJECT_THRESHOLD: u32 = 3;

/// Per-side cooldowns and consecutive-reject counters. Granularity is the
/// side, not the individual grid level — a rejection on one level's place
/// backs off new places for the whole side.
#[derive(Default)]
pub struct CooldownTracker {
    cooldown_until: HashMap<Side, Instant>,
    reject_streaks: HashMap<Side, u32>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_success(&mut self, side: Side) {
        self.reject_streaks.remove(&side);
        self.cooldown_until.remove(&side);
    }

    fn on_insufficient_balance(&mut self, side: Side) {
        self.cooldown_until.insert(side, Instant::now() + BALANCE_COOLDOWN);
    }

    /// A generic (non-balance, non-ALO) place rejection. Three in a row on
    /// the same side triggers a cooldown and resets the streak.
    fn on_generic_reject(&mut self, side: Side) {
        let streak = self.reject_streaks.entry(side).or_insert(0);
        *streak += 1;
        if *streak >= CONSECUTIVE_REJECT_THRESHOLD {
            self.cooldown_until.insert(side, Instant::now() + REJECT_COOLDOWN);
            self.reject_streaks.insert(side, 0);
        }
    }

    fn in_cooldown(&self, side: Side) -> bool {
        self.cooldown_until.get(&side).is_some_and(|t| Instant::now() < *t)
    }
}

/// Increments the budget's request counter exactly once per batch issued,
/// regardless of whether the call below it succeeds — armed on
/// construction, fires on drop.
struct BudgetGuard<'a> {
    budget: &'a mut RateLimitBudget,
}

impl Drop for BudgetGuard<'_> {
    fn drop(&mut self) {
        self.budget.on_request(1);
    }
}

#[derive(Debug, Default)]
pub struct EmitSummary {
    pub cancels_sent: usize,
    pub modifies_sent: usize,
    pub places_sent: usize,
    pub cancel_only: bool,
}

fn to_order_spec(d: &DesiredOrder) -> OrderSpec {
    OrderSpec { side: d.side, price: d.price, size: d.size }
}

/// Applies `diff` against `exchange`, mutating `state`, `budget`, and
/// `cooldowns` to reflect what was actually sent and the responses
/// received.
pub async fn emit(
    diff: OrderDiff,
    asset_id: u32,
    state: &mut OrderState,
    budget: &mut RateLimitBudget,
    cooldowns: &mut CooldownTracker,
    exchange: &mut dyn ExchangeClient,
) -> Result<EmitSummary, ExchangeError> {
    if diff.is_empty() {
        return Ok(EmitSummary::default());
    }

    let mut summary = EmitSummary::default();

    let total = diff.total_mutations() as i64;
    let cancel_only = budget.remaining() < total + BATCH_SAFETY_MARGIN;
    summary.cancel_only = cancel_only;

    let OrderDiff { mut modifies, mut places, cancels } = diff;
    if cancel_only {
        modifies.clear();
        places.clear();
    }

    // Priority trim: cancels are never trimmed. Places are dropped before
    // modifies when the batch would exceed MAX_BATCH.
    let room = MAX_BATCH.saturating_sub(cancels.len());
    if modifies.len() + places.len() > room {
        let keep_places = room.saturating_sub(modifies.len());
        places.truncate(keep_places);
    }
    if modifies.len() + places.len() > room {
        let keep_modifies = room.saturating_sub(places.len());
        modifies.truncate(keep_modifies);
    }

    // Cooldown filter applies to places only — a side cooling down after a
    // rejection still gets its resting orders re-priced via modify.
    places.retain(|d| !cooldowns.in_cooldown(d.side));

    // 1. Cancels
    if !cancels.is_empty() {
        for &oid in &cancels {
            state.set_status(oid, OrderStatus::PendingCancel);
        }
        let guard = BudgetGuard { budget };
        let result = exchange.bulk_cancel(asset_id, &cancels).await;
        drop(guard);
        result?;
        // A cancel error implies the order already terminated exchange-side,
        // so the tracked record is dropped regardless of status.
        for &oid in &cancels {
            state.remove_ghost(oid);
        }
        summary.cancels_sent = cancels.len();
    }

    // 2. Modifies
    if !modifies.is_empty() {
        for (oid, d) in &modifies {
            if let Some(order) = state.orders_by_oid().get(oid) {
                assert_eq!(order.side, d.side, "cross-side modify attempted for oid {}", oid);
            }
        }

        let specs: Vec<ModifySpec> = modifies
            .iter()
            .map(|(oid, d)| ModifySpec { oid: *oid, side: d.side, price: d.price, size: d.size })
            .collect();
        for (oid, _) in &modifies {
            state.set_status(*oid, OrderStatus::PendingModify);
        }
        let guard = BudgetGuard { budget };
        let outcomes = exchange.bulk_modify_orders_new(asset_id, &specs).await;
        drop(guard);
        let outcomes = outcomes?;

        for (i, (oid, d)) in modifies.iter().enumerate() {
            match outcomes.get(i) {
                Some(ModifyOutcome::Resting { oid: new_oid }) | Some(ModifyOutcome::RestingNewOid { oid: new_oid }) => {
                    state.on_modify_response(*oid, Some(*new_oid), "resting");
                    state.apply_desired(*new_oid, d.price, d.size);
                }
                Some(ModifyOutcome::Error(msg)) if msg.contains("Cannot modify") => {
                    state.on_modify_response(*oid, None, msg);
                }
                // Any other status, or a truncated response: treat as
                // error, remove the tracked order as a safety measure.
                Some(ModifyOutcome::Error(_)) | None => {
                    state.remove_cancelled(*oid);
                }
            }
        }
        summary.modifies_sent = modifies.len();
    }

    // 3. Places
    if !places.is_empty() {
        let specs: Vec<OrderSpec> = places.iter().map(to_order_spec).collect();
        let guard = BudgetGuard { budget };
        let outcomes = exchange.bulk_orders(asset_id, &specs).await;
        drop(guard);
        let outcomes = outcomes?;

        for (i, d) in places.iter().enumerate() {
            match outcomes.get(i) {
                Some(PlaceOutcome::Resting { oid }) => {
                    state.on_place_confirmed(*oid, d.side, d.level_index, d.price, d.size);
                    cooldowns.on_success(d.side);
                }
                Some(PlaceOutcome::Error(msg)) if msg.contains("Insufficient spot balance") => {
                    cooldowns.on_insufficient_balance(d.side);
                }
                // ALO crossing: expected under a moving market, not a fault.
                Some(PlaceOutcome::Error(msg)) if msg.contains("Post-only would take") => {}
                // Generic error or truncated response.
                _ => {
                    cooldowns.on_generic_reject(d.side);
                }
            }
        }
        summary.places_sent = places.len();
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{SimExchange, SpotAssetInfo, SpotBalances};
    use std::collections::HashMap as StdHashMap;

    fn sim() -> SimExchange {
        let mut universe = StdHashMap::new();
        universe.insert(
            "PURR/USDC".to_string(),
            SpotAssetInfo { asset_id: 10000, universe_index: 0, sz_decimals: 2 },
        );
        SimExchange::new(universe, SpotBalances { base: 1000.0, quote: 1000.0 })
    }

    fn desired(side: Side, level: usize, price: f64, size: f64) -> DesiredOrder {
        DesiredOrder { side, level_index: level, price, size }
    }

    #[tokio::test]
    async fn empty_diff_short_circuits_regardless_of_budget() {
        let mut exchange = sim();
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        budget.on_request(9_999); // remaining = 1, would otherwise force cancel_only
        let mut cooldowns = CooldownTracker::new();

        let summary = emit(OrderDiff::default(), 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
            .await
            .unwrap();
        assert_eq!(summary.cancels_sent, 0);
        assert_eq!(summary.modifies_sent, 0);
        assert_eq!(summary.places_sent, 0);
        assert!(!summary.cancel_only);
        assert_eq!(budget.remaining(), 1); // no request was issued
    }

    #[tokio::test]
    async fn places_then_tracked_in_order_state() {
        let mut exchange = sim();
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        let mut cooldowns = CooldownTracker::new();

        let diff = OrderDiff {
            modifies: vec![],
            places: vec![desired(Side::Buy, 0, 1.0, 10.0)],
            cancels: vec![],
        };
        let summary = emit(diff, 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
            .await
            .unwrap();
        assert_eq!(summary.places_sent, 1);
        assert_eq!(state.get_current_orders().len(), 1);
    }

    #[tokio::test]
    async fn cancel_only_mode_drops_modifies_and_places() {
        let mut exchange = sim();
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        budget.on_request(9_950); // remaining = 50, below total + margin
        let mut cooldowns = CooldownTracker::new();

        let diff = OrderDiff {
            modifies: vec![],
            places: vec![desired(Side::Buy, 0, 1.0, 10.0)],
            cancels: vec![1],
        };
        let summary = emit(diff, 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
            .await
            .unwrap();
        assert!(summary.cancel_only);
        assert_eq!(summary.places_sent, 0);
        assert_eq!(summary.cancels_sent, 1);
    }

    #[tokio::test]
    async fn places_trimmed_before_modifies_over_max_batch() {
        let mut exchange = sim();
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        let mut cooldowns = CooldownTracker::new();

        let mut modifies = Vec::new();
        for i in 0..15u64 {
            modifies.push((i, desired(Side::Buy, i as usize, 1.0, 1.0)));
        }
        let mut places = Vec::new();
        for i in 0..15usize {
            places.push(desired(Side::Sell, i, 2.0, 1.0));
        }

        let diff = OrderDiff { modifies, places, cancels: vec![] };
        let summary = emit(diff, 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
            .await
            .unwrap();
        assert_eq!(summary.modifies_sent, 15);
        assert_eq!(summary.places_sent, 5); // room = 20 - 0 cancels, 20 - 15 modifies = 5
    }

    #[tokio::test]
    async fn repeated_rejects_trigger_reject_cooldown() {
        let mut exchange = sim();
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        let mut cooldowns = CooldownTracker::new();

        for _ in 0..CONSECUTIVE_REJECT_THRESHOLD {
            cooldowns.on_generic_reject(Side::Buy);
        }
        assert!(cooldowns.in_cooldown(Side::Buy));

        let diff = OrderDiff {
            modifies: vec![],
            places: vec![desired(Side::Buy, 0, 1.0, 10.0)],
            cancels: vec![],
        };
        let summary = emit(diff, 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
            .await
            .unwrap();
        assert_eq!(summary.places_sent, 0);
    }

    #[tokio::test]
    async fn insufficient_balance_cools_down_only_that_side() {
        let mut exchange = sim();
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        let mut cooldowns = CooldownTracker::new();
        cooldowns.on_insufficient_balance(Side::Buy);

        let diff = OrderDiff {
            modifies: vec![],
            places: vec![desired(Side::Buy, 0, 1.0, 10.0), desired(Side::Sell, 5, 2.0, 10.0)],
            cancels: vec![],
        };
        let summary = emit(diff, 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
            .await
            .unwrap();
        // the buy place is filtered out by the cooldown; the sell place goes through
        assert_eq!(summary.places_sent, 1);
    }

    #[tokio::test]
    async fn alo_rejection_does_not_increment_reject_streak() {
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        let mut cooldowns = CooldownTracker::new();
        let mut exchange = sim();

        for _ in 0..CONSECUTIVE_REJECT_THRESHOLD {
            // SimExchange never rejects, so drive the ALO classification
            // directly through the cooldown tracker's success path absent —
            // this asserts the *counter*, not the exchange behavior.
            let diff = OrderDiff {
                modifies: vec![],
                places: vec![desired(Side::Buy, 0, 1.0, 10.0)],
                cancels: vec![],
            };
            emit(diff, 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
                .await
                .unwrap();
        }
        assert!(!cooldowns.in_cooldown(Side::Buy));
    }

    #[tokio::test]
    async fn budget_charged_exactly_once_per_batch() {
        let mut exchange = sim();
        let mut state = OrderState::new();
        let mut budget = RateLimitBudget::new();
        let mut cooldowns = CooldownTracker::new();

        let diff = OrderDiff {
            modifies: vec![],
            places: vec![desired(Side::Buy, 0, 1.0, 10.0), desired(Side::Buy, 1, 0.9, 10.0)],
            cancels: vec![],
        };
        let before = budget.remaining();
        emit(diff, 10000, &mut state, &mut budget, &mut cooldowns, &mut exchange)
            .await
            .unwrap();
        // one place batch -> exactly one request charged, not one per order
        assert_eq!(budget.remaining(), before - 1);
    }
}
