//! Wires every pure component to the exchange and to the event channel fed
//! by `transport`. Runs on a single task: all mutation of grid, inventory,
//! order state, and rate-limit budget happens here, in event arrival
//! order, so none of it needs its own locking.

use tokio::sync::mpsc;

use crate::batch_emitter::{self, CooldownTracker};
use crate::config::{Credentials, EngineConfig};
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::exchange::ExchangeClient;
use crate::inventory::Inventory;
use crate::order_differ::{self, CurrentOrder, OrderDiff};
use crate::order_state::OrderState;
use crate::pricing_grid::PricingGrid;
use crate::quoting_engine;
use crate::rate_limit::RateLimitBudget;
use crate::side::Side;
use crate::transport::EngineEvent;

pub struct Engine {
    config: EngineConfig,
    asset_id: u32,
    grid: PricingGrid,
    boundary_level: usize,
    inventory: Inventory,
    rate_limit: RateLimitBudget,
    order_state: OrderState,
    cooldowns: CooldownTracker,
    exchange: Box<dyn ExchangeClient>,
    ws_healthy: bool,
    tick_count: u64,
}

impl Engine {
    /// Fetches spot metadata and balances, seeds the grid off the current
    /// mid, and syncs the rate-limit budget from the exchange's own
    /// counters. Fatal on any failure — nothing here is retryable at
    /// startup.
    pub async fn bootstrap(
        config: EngineConfig,
        _credentials: Credentials,
        mut exchange: Box<dyn ExchangeClient>,
    ) -> EngineResult<Self> {
        let universe = exchange.spot_meta().await?;
        let asset_info = universe
            .get(&config.coin)
            .ok_or_else(|| ConfigError::CoinNotFound(config.coin.clone()))?
            .clone();

        let grid = PricingGrid::with_tick_size(config.start_px, config.n_orders, config.tick_size)
            .map_err(EngineError::Config)?;

        let mut order_state = OrderState::with_seen_tids_cap(config.seen_tids_cap);
        for order in exchange.open_orders(asset_info.asset_id).await? {
            let Some(level_index) = grid.level_for_price(order.price) else {
                log::warn!("open order {} at {} lies outside the grid, ignoring", order.oid, order.price);
                continue;
            };
            order_state.on_place_confirmed(order.oid, order.side, level_index, order.price, order.size);
        }
        let boundary_level = Self::recompute_boundary_level(&order_state, &grid, config.n_seeded_levels);

        let balances = exchange.spot_user_state(&config.base, &config.quote).await?;
        let inventory = Inventory::new(
            config.order_sz,
            config.allocated_token,
            config.allocated_usdc,
            balances.base,
            balances.quote,
        );

        let mut rate_limit = RateLimitBudget::with_safety_margin(config.safety_margin);
        let snapshot = exchange.user_rate_limit().await?;
        rate_limit.sync_from_exchange(snapshot.cum_vlm, snapshot.n_requests);

        Ok(Self {
            asset_id: asset_info.asset_id,
            config,
            grid,
            boundary_level,
            inventory,
            rate_limit,
            order_state,
            cooldowns: CooldownTracker::new(),
            exchange,
            ws_healthy: true,
            tick_count: 0,
        })
    }

    /// Boundary = the lowest ask level index currently resting, or
    /// `n_seeded_levels` when no asks are tracked. Recomputed fresh every
    /// tick rather than incrementally shifted on fill.
    fn recompute_boundary_level(order_state: &OrderState, grid: &PricingGrid, n_seeded_levels: usize) -> usize {
        order_state
            .orders_by_oid()
            .values()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.level_index)
            .min()
            .unwrap_or(n_seeded_levels)
            .min(grid.max_level())
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>) -> EngineResult<()> {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Tick => self.on_tick().await?,
                EngineEvent::OrderUpdate { oid, new_oid, status, side, price, size } => {
                    self.on_order_update(oid, new_oid, &status, side, price, size);
                }
                EngineEvent::Fill { tid, oid, side, price, size } => {
                    self.on_fill(tid, oid, side, price, size);
                }
                EngineEvent::BalanceUpdate { coin, total } => {
                    self.on_balance_update(&coin, total);
                }
                EngineEvent::WsHealth(healthy) => {
                    self.ws_healthy = healthy;
                    if healthy {
                        self.reconcile().await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self) -> EngineResult<()> {
        if !self.ws_healthy {
            log::debug!("skipping tick: websocket unhealthy");
            return Ok(());
        }

        self.boundary_level = Self::recompute_boundary_level(&self.order_state, &self.grid, self.config.n_seeded_levels);

        let desired = quoting_engine::compute_desired_orders(
            &self.grid,
            self.boundary_level,
            self.inventory.effective_token,
            self.inventory.effective_usdc,
            self.inventory.order_sz,
            self.config.min_notional,
        )
        .map_err(EngineError::Config)?;
        let current: Vec<CurrentOrder> = self
            .order_state
            .get_current_orders()
            .into_iter()
            .map(|o| CurrentOrder { oid: o.oid, side: o.side, level_index: o.level_index, price: o.price, size: o.size })
            .collect();

        let diff = order_differ::compute_diff(
            &desired,
            &current,
            self.config.dead_zone_bps,
            self.config.price_tolerance_bps,
            self.config.size_tolerance_pct,
        );
        if diff.is_empty() {
            return Ok(());
        }

        let summary = batch_emitter::emit(
            diff,
            self.asset_id,
            &mut self.order_state,
            &mut self.rate_limit,
            &mut self.cooldowns,
            self.exchange.as_mut(),
        )
        .await?;

        log::debug!(
            "tick: cancels={} modifies={} places={} cancel_only={} {}",
            summary.cancels_sent,
            summary.modifies_sent,
            summary.places_sent,
            summary.cancel_only,
            self.rate_limit.log_status()
        );

        self.tick_count += 1;
        if self.tick_count % self.config.reconcile_every == 0 {
            self.reconcile().await?;
        }
        Ok(())
    }

    /// Dispatches a WS order-status update: `resting` confirms a new
    /// tracked order after a grid lookup, `"Cannot modify"` clears the
    /// record with no new oid, `canceled` drops the ghost outright.
    fn on_order_update(&mut self, oid: u64, new_oid: Option<u64>, status: &str, side: Side, price: f64, size: f64) {
        if status == "resting" {
            let Some(level_index) = self.grid.level_for_price(price) else {
                log::warn!("order update for oid {} at {} lies outside the grid, ignoring", oid, price);
                return;
            };
            self.order_state.on_place_confirmed(new_oid.unwrap_or(oid), side, level_index, price, size);
        } else if status.contains("Cannot modify") {
            self.order_state.on_modify_response(oid, None, status);
        } else if status == "canceled" {
            self.order_state.remove_ghost(oid);
        } else {
            log::debug!("unhandled order update status {:?} for oid {}", status, oid);
        }
    }

    fn on_fill(&mut self, tid: u64, oid: u64, side: Side, price: f64, size: f64) {
        let Some(result) = self.order_state.on_fill(tid, oid, size) else {
            return;
        };

        let notional = price * size;
        self.rate_limit.on_fill(notional);

        match side {
            Side::Sell => self.inventory.on_ask_fill(price, size),
            Side::Buy => self.inventory.on_bid_fill(price, size),
        }
    }

    fn on_balance_update(&mut self, coin: &str, total: f64) {
        if coin == self.config.base {
            self.inventory.on_balance_update(total, self.inventory.account_usdc);
        } else if coin == self.config.quote {
            self.inventory.on_balance_update(self.inventory.account_token, total);
        }
    }

    /// Cross-checks tracked orders against the exchange's own open-order
    /// list after a reconnect. Findings are recovered in place and never
    /// surfaced beyond a log line — see SPEC_FULL.md §7.
    async fn reconcile(&mut self) -> EngineResult<()> {
        let open = self.exchange.open_orders(self.asset_id).await?;
        let exchange_oids: Vec<u64> = open.iter().map(|o| o.oid).collect();
        let result = self.order_state.reconcile(&exchange_oids);

        for oid in &result.ghost_oids {
            self.order_state.remove_ghost(*oid);
        }
        if !result.orphaned_oids.is_empty() {
            log::warn!("reconcile: cancelling {} orphaned order(s)", result.orphaned_oids.len());
            let diff = OrderDiff { cancels: result.orphaned_oids.clone(), ..Default::default() };
            batch_emitter::emit(
                diff,
                self.asset_id,
                &mut self.order_state,
                &mut self.rate_limit,
                &mut self.cooldowns,
                self.exchange.as_mut(),
            )
            .await?;
        }
        if !result.ghost_oids.is_empty() || !result.orphaned_oids.is_empty() {
            log::info!(
                "reconcile: {} ghost(s) dropped, {} orphan(s) cancelled",
                result.ghost_oids.len(),
                result.orphaned_oids.len()
            );
        }

        let balances = self.exchange.spot_user_state(&self.config.base, &self.config.quote).await?;
        self.inventory.on_balance_update(balances.base, balances.quote);
        Ok(())
    }
}
