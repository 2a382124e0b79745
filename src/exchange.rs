//! Exchange transport: spot metadata, balances, open orders, and the three
//! batched write actions (`bulk_orders`, `bulk_modify_orders_new`,
//! `bulk_cancel`). Each write is a single signed L1 action carrying the
//! full list — never one request per order. See SPEC_FULL.md §4.8.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ExchangeError;
use crate::side::Side;
use crate::signing::{
    self, ActionWire, CancelEntry, LimitOrderWire, ModifyRequest, OrderRequest, OrderTypeWire,
};

/// `asset_id = spot_universe_index + 10000`, the Hyperliquid spot asset
/// addressing convention.
pub const SPOT_ASSET_OFFSET: u32 = 10000;

#[derive(Debug, Clone)]
pub struct SpotAssetInfo {
    pub asset_id: u32,
    pub universe_index: u32,
    pub sz_decimals: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpotBalances {
    pub base: f64,
    pub quote: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenOrder {
    pub oid: u64,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitSnapshot {
    pub cum_vlm: f64,
    pub n_requests: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderSpec {
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ModifySpec {
    pub oid: u64,
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    Resting { oid: u64 },
    Error(String),
}

#[derive(Debug, Clone)]
pub enum ModifyOutcome {
    Resting { oid: u64 },
    /// The exchange assigned a new oid to the modified order.
    RestingNewOid { oid: u64 },
    Error(String),
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn spot_meta(&mut self) -> Result<HashMap<String, SpotAssetInfo>, ExchangeError>;
    async fn spot_user_state(&mut self, base: &str, quote: &str) -> Result<SpotBalances, ExchangeError>;
    async fn open_orders(&mut self, asset_id: u32) -> Result<Vec<OpenOrder>, ExchangeError>;
    async fn user_rate_limit(&mut self) -> Result<RateLimitSnapshot, ExchangeError>;

    /// One signed `order` action carrying every entry in `orders`.
    async fn bulk_orders(
        &mut self,
        asset_id: u32,
        orders: &[OrderSpec],
    ) -> Result<Vec<PlaceOutcome>, ExchangeError>;

    /// One signed `batchModify` action carrying every entry in `modifies`.
    async fn bulk_modify_orders_new(
        &mut self,
        asset_id: u32,
        modifies: &[ModifySpec],
    ) -> Result<Vec<ModifyOutcome>, ExchangeError>;

    /// One signed `cancel` action carrying every oid in `oids`.
    async fn bulk_cancel(&mut self, asset_id: u32, oids: &[u64]) -> Result<(), ExchangeError>;
}

// ─── Sim Exchange (in-memory, for dry-run and tests) ────────────────

struct SimOrder {
    side: Side,
    price: f64,
    size: f64,
}

pub struct SimExchange {
    universe: HashMap<String, SpotAssetInfo>,
    balances: SpotBalances,
    book: HashMap<u64, SimOrder>,
    next_oid: AtomicU64,
    rate_limit: RateLimitSnapshot,
}

impl SimExchange {
    pub fn new(universe: HashMap<String, SpotAssetInfo>, balances: SpotBalances) -> Self {
        Self {
            universe,
            balances,
            book: HashMap::new(),
            next_oid: AtomicU64::new(1),
            rate_limit: RateLimitSnapshot { cum_vlm: 0.0, n_requests: 0 },
        }
    }

    pub fn set_balances(&mut self, balances: SpotBalances) {
        self.balances = balances;
    }

    fn fresh_oid(&self) -> u64 {
        self.next_oid.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeClient for SimExchange {
    async fn spot_meta(&mut self) -> Result<HashMap<String, SpotAssetInfo>, ExchangeError> {
        Ok(self.universe.clone())
    }

    async fn spot_user_state(&mut self, _base: &str, _quote: &str) -> Result<SpotBalances, ExchangeError> {
        Ok(self.balances)
    }

    async fn open_orders(&mut self, _asset_id: u32) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(self
            .book
            .iter()
            .map(|(&oid, o)| OpenOrder { oid, side: o.side, price: o.price, size: o.size })
            .collect())
    }

    async fn user_rate_limit(&mut self) -> Result<RateLimitSnapshot, ExchangeError> {
        Ok(self.rate_limit)
    }

    async fn bulk_orders(
        &mut self,
        _asset_id: u32,
        orders: &[OrderSpec],
    ) -> Result<Vec<PlaceOutcome>, ExchangeError> {
        self.rate_limit.n_requests += 1;
        let mut out = Vec::with_capacity(orders.len());
        for o in orders {
            let oid = self.fresh_oid();
            self.book.insert(oid, SimOrder { side: o.side, price: o.price, size: o.size });
            out.push(PlaceOutcome::Resting { oid });
        }
        Ok(out)
    }

    async fn bulk_modify_orders_new(
        &mut self,
        _asset_id: u32,
        modifies: &[ModifySpec],
    ) -> Result<Vec<ModifyOutcome>, ExchangeError> {
        self.rate_limit.n_requests += 1;
        let mut out = Vec::with_capacity(modifies.len());
        for m in modifies {
            if let Some(order) = self.book.get_mut(&m.oid) {
                order.side = m.side;
                order.price = m.price;
                order.size = m.size;
                out.push(ModifyOutcome::Resting { oid: m.oid });
            } else {
                out.push(ModifyOutcome::Error(format!("unknown oid {}", m.oid)));
            }
        }
        Ok(out)
    }

    async fn bulk_cancel(&mut self, _asset_id: u32, oids: &[u64]) -> Result<(), ExchangeError> {
        self.rate_limit.n_requests += 1;
        for oid in oids {
            self.book.remove(oid);
        }
        Ok(())
    }
}

// ─── Live Exchange (Hyperliquid REST) ───────────────────────────────

pub struct LiveExchange {
    base_url: String,
    account_address: String,
    private_key: String,
    client: reqwest::Client,
    sz_decimals: HashMap<u32, u32>,
}

impl LiveExchange {
    pub fn new(base_url: String, account_address: String, private_key: String) -> Self {
        Self {
            base_url,
            account_address,
            private_key,
            client: reqwest::Client::new(),
            sz_decimals: HashMap::new(),
        }
    }

    async fn post_info(&self, payload: serde_json::Value) -> Result<serde_json::Value, ExchangeError> {
        let resp = self
            .client
            .post(format!("{}/info", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(ExchangeError::RateLimited);
        }

        let data: serde_json::Value = resp.json().await.map_err(|e| ExchangeError::Network(e.to_string()))?;
        if data["error"].as_str().is_some_and(|e| e.contains("rate limited")) {
            return Err(ExchangeError::RateLimited);
        }
        Ok(data)
    }

    async fn post_exchange(
        &self,
        action: serde_json::Value,
        nonce: u64,
        signature: signing::Signature,
    ) -> Result<serde_json::Value, ExchangeError> {
        let mut payload = serde_json::Map::new();
        payload.insert("action".to_string(), action);
        payload.insert("nonce".to_string(), serde_json::Value::from(nonce));
        payload.insert("signature".to_string(), serde_json::to_value(&signature)?);
        payload.insert("vaultAddress".to_string(), serde_json::Value::Null);

        let resp = self
            .client
            .post(format!("{}/exchange", self.base_url))
            .json(&serde_json::Value::Object(payload))
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(ExchangeError::RateLimited);
        }

        let text = resp.text().await.map_err(|e| ExchangeError::Network(e.to_string()))?;
        let data: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ExchangeError::Network(e.to_string()))?;

        if data["status"].as_str() == Some("err") {
            let msg = data["response"].as_str().unwrap_or("unknown error").to_string();
            if msg.contains("rate limited") || msg.contains("cumulative requests") {
                return Err(ExchangeError::RateLimited);
            }
            return Err(ExchangeError::Rejected(msg));
        }
        Ok(data)
    }

    fn sz_decimals(&self, asset_id: u32) -> u32 {
        self.sz_decimals.get(&asset_id).copied().unwrap_or(4)
    }

    fn order_request(&self, asset_id: u32, spec: &OrderSpec) -> OrderRequest {
        let sz_dec = self.sz_decimals(asset_id);
        OrderRequest {
            asset: asset_id,
            is_buy: spec.side.is_buy(),
            limit_px: float_to_wire(spec.price),
            sz: float_to_wire(round_f64(spec.size, sz_dec as usize)),
            reduce_only: false,
            order_type: OrderTypeWire::Limit(LimitOrderWire { tif: "Alo".to_string() }),
        }
    }
}

fn extract_statuses(result: &serde_json::Value) -> Vec<serde_json::Value> {
    result["response"]["data"]["statuses"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl ExchangeClient for LiveExchange {
    async fn spot_meta(&mut self) -> Result<HashMap<String, SpotAssetInfo>, ExchangeError> {
        let data = self.post_info(serde_json::json!({ "type": "spotMeta" })).await?;
        let mut universe = HashMap::new();

        let tokens = data["tokens"].as_array().cloned().unwrap_or_default();
        let token_sz_decimals: HashMap<u64, u32> = tokens
            .iter()
            .filter_map(|t| {
                let idx = t["index"].as_u64()?;
                let sz = t["szDecimals"].as_u64().unwrap_or(8) as u32;
                Some((idx, sz))
            })
            .collect();

        if let Some(pairs) = data["universe"].as_array() {
            for (i, pair) in pairs.iter().enumerate() {
                let Some(name) = pair["name"].as_str() else { continue };
                let universe_index = i as u32;
                let asset_id = universe_index + SPOT_ASSET_OFFSET;

                let base_token_idx = pair["tokens"][0].as_u64().unwrap_or(0);
                let sz_decimals = token_sz_decimals.get(&base_token_idx).copied().unwrap_or(8);

                self.sz_decimals.insert(asset_id, sz_decimals);
                universe.insert(
                    name.to_string(),
                    SpotAssetInfo { asset_id, universe_index, sz_decimals },
                );
            }
        }
        Ok(universe)
    }

    async fn spot_user_state(&mut self, base: &str, quote: &str) -> Result<SpotBalances, ExchangeError> {
        let data = self
            .post_info(serde_json::json!({ "type": "spotClearinghouseState", "user": self.account_address }))
            .await?;

        let mut balances = SpotBalances::default();
        if let Some(rows) = data["balances"].as_array() {
            for row in rows {
                let Some(coin) = row["coin"].as_str() else { continue };
                let total = row["total"]
                    .as_str()
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0);
                if coin == base {
                    balances.base = total;
                } else if coin == quote {
                    balances.quote = total;
                }
            }
        }
        Ok(balances)
    }

    async fn open_orders(&mut self, asset_id: u32) -> Result<Vec<OpenOrder>, ExchangeError> {
        let data = self
            .post_info(serde_json::json!({ "type": "openOrders", "user": self.account_address }))
            .await?;

        let mut orders = Vec::new();
        if let Some(arr) = data.as_array() {
            for row in arr {
                let row_asset = row["asset"].as_u64().map(|a| a as u32);
                // Open-orders responses key by coin name rather than asset id on
                // some endpoints; fall back to accepting every row when the
                // asset id field is absent so callers can filter upstream.
                if let Some(a) = row_asset {
                    if a != asset_id {
                        continue;
                    }
                }
                let (Some(oid), Some(side_letter), Some(px), Some(sz)) = (
                    row["oid"].as_u64(),
                    row["side"].as_str(),
                    row["limitPx"].as_str().and_then(|s| s.parse::<f64>().ok()),
                    row["sz"].as_str().and_then(|s| s.parse::<f64>().ok()),
                ) else {
                    continue;
                };
                let Some(side) = Side::from_exchange_letter(side_letter) else { continue };
                orders.push(OpenOrder { oid, side, price: px, size: sz });
            }
        }
        Ok(orders)
    }

    async fn user_rate_limit(&mut self) -> Result<RateLimitSnapshot, ExchangeError> {
        let data = self
            .post_info(serde_json::json!({ "type": "userRateLimit", "user": self.account_address }))
            .await?;
        Ok(RateLimitSnapshot {
            cum_vlm: data["cumVlm"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            n_requests: data["nRequestsUsed"].as_u64().unwrap_or(0),
        })
    }

    async fn bulk_orders(
        &mut self,
        asset_id: u32,
        orders: &[OrderSpec],
    ) -> Result<Vec<PlaceOutcome>, ExchangeError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let requests: Vec<OrderRequest> = orders.iter().map(|o| self.order_request(asset_id, o)).collect();
        let action = ActionWire { r#type: "order".to_string(), orders: requests, grouping: "na".to_string() };
        let nonce = chrono::Utc::now().timestamp_millis() as u64;
        let (sig, action_json) = signing::sign_l1_action(&self.private_key, action, nonce).await?;
        let result = self.post_exchange(action_json, nonce, sig).await?;

        let statuses = extract_statuses(&result);
        Ok(orders
            .iter()
            .enumerate()
            .map(|(i, _)| match statuses.get(i) {
                Some(s) if s["resting"]["oid"].as_u64().is_some() => {
                    PlaceOutcome::Resting { oid: s["resting"]["oid"].as_u64().unwrap() }
                }
                Some(s) if s["filled"]["oid"].as_u64().is_some() => {
                    PlaceOutcome::Resting { oid: s["filled"]["oid"].as_u64().unwrap() }
                }
                Some(s) if s["error"].as_str().is_some() => {
                    PlaceOutcome::Error(s["error"].as_str().unwrap().to_string())
                }
                _ => PlaceOutcome::Error("missing status in response".to_string()),
            })
            .collect())
    }

    async fn bulk_modify_orders_new(
        &mut self,
        asset_id: u32,
        modifies: &[ModifySpec],
    ) -> Result<Vec<ModifyOutcome>, ExchangeError> {
        if modifies.is_empty() {
            return Ok(Vec::new());
        }
        let requests: Vec<ModifyRequest> = modifies
            .iter()
            .map(|m| ModifyRequest {
                oid: m.oid,
                order: self.order_request(asset_id, &OrderSpec { side: m.side, price: m.price, size: m.size }),
            })
            .collect();
        let nonce = chrono::Utc::now().timestamp_millis() as u64;
        let (sig, action_json) = signing::sign_bulk_modify_action(&self.private_key, &requests, nonce).await?;
        let result = self.post_exchange(action_json, nonce, sig).await?;

        let statuses = extract_statuses(&result);
        Ok(modifies
            .iter()
            .enumerate()
            .map(|(i, m)| match statuses.get(i) {
                Some(s) if s["resting"]["oid"].as_u64().is_some() => {
                    let new_oid = s["resting"]["oid"].as_u64().unwrap();
                    if new_oid == m.oid {
                        ModifyOutcome::Resting { oid: new_oid }
                    } else {
                        ModifyOutcome::RestingNewOid { oid: new_oid }
                    }
                }
                Some(s) if s["error"].as_str().is_some() => {
                    ModifyOutcome::Error(s["error"].as_str().unwrap().to_string())
                }
                _ => ModifyOutcome::Error("missing status in response".to_string()),
            })
            .collect())
    }

    async fn bulk_cancel(&mut self, asset_id: u32, oids: &[u64]) -> Result<(), ExchangeError> {
        if oids.is_empty() {
            return Ok(());
        }
        let entries: Vec<CancelEntry> = oids.iter().map(|&o| CancelEntry { a: asset_id, o }).collect();
        let _ = entries; // signing builds its own entries from `oids`; kept for symmetry with bulk_orders/bulk_modify
        let nonce = chrono::Utc::now().timestamp_millis() as u64;
        let (sig, action_json) =
            signing::sign_bulk_cancel_action(&self.private_key, asset_id, oids, nonce).await?;
        self.post_exchange(action_json, nonce, sig).await?;
        Ok(())
    }
}

pub fn round_f64(val: f64, decimals: usize) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (val * factor).round() / factor
}

/// Matches the exchange SDK's `float_to_wire`: round to 8 decimals, then
/// strip trailing zeros.
pub fn float_to_wire(x: f64) -> String {
    let rounded = format!("{:.8}", x);
    if rounded.contains('.') {
        rounded.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        rounded
    }
}
