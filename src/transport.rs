//! WebSocket event transport: subscribes to `orderUpdates`, `userFills`,
//! and `webData2` for one user, forwards everything onto the orchestrator's
//! event channel, and reconnects with exponential backoff. Grounded on the
//! same `connect_async`/message-loop shape as the market-data ingestor,
//! narrowed to the private-account channels this engine actually consumes.

use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::side::Side;

const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
const STALL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick,
    OrderUpdate {
        oid: u64,
        new_oid: Option<u64>,
        status: String,
        side: Side,
        price: f64,
        size: f64,
    },
    Fill { tid: u64, oid: u64, side: Side, price: f64, size: f64 },
    BalanceUpdate { coin: String, total: f64 },
    WsHealth(bool),
}

pub async fn connect_and_listen(user_address: String, events: mpsc::Sender<EngineEvent>) {
    let mut retry_delay_secs: u64 = 1;
    let max_delay_secs: u64 = 32;

    loop {
        info!("connecting to {}", WS_URL);
        match connect_async(match Url::parse(WS_URL) {
            Ok(u) => u,
            Err(e) => {
                error!("invalid ws url: {}", e);
                return;
            }
        })
        .await
        {
            Ok((ws_stream, _)) => {
                info!("ws connected");
                retry_delay_secs = 1;
                let _ = events.send(EngineEvent::WsHealth(true)).await;

                let (mut write, mut read) = ws_stream.split();

                for (channel, payload) in [
                    ("orderUpdates", serde_json::json!({"type": "orderUpdates", "user": user_address})),
                    ("userFills", serde_json::json!({"type": "userFills", "user": user_address})),
                    ("webData2", serde_json::json!({"type": "webData2", "user": user_address})),
                ] {
                    let msg = serde_json::json!({ "method": "subscribe", "subscription": payload });
                    if let Err(e) = write.send(Message::Text(msg.to_string())).await {
                        error!("failed to subscribe to {}: {}", channel, e);
                    }
                }

                let mut last_message = tokio::time::Instant::now();
                loop {
                    let next = tokio::time::timeout(
                        tokio::time::Duration::from_secs(STALL_TIMEOUT_SECS),
                        read.next(),
                    )
                    .await;

                    let msg = match next {
                        Ok(Some(msg)) => msg,
                        Ok(None) => {
                            warn!("ws stream ended, reconnecting");
                            break;
                        }
                        Err(_) => {
                            error!("no ws message for {}s, declaring stall", STALL_TIMEOUT_SECS);
                            let _ = events.send(EngineEvent::WsHealth(false)).await;
                            break;
                        }
                    };
                    last_message = tokio::time::Instant::now();
                    let _ = last_message;

                    match msg {
                        Ok(Message::Text(text)) => handle_text(&text, &events).await,
                        Ok(Message::Ping(data)) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(_)) => {
                            warn!("ws closed by server, reconnecting");
                            break;
                        }
                        Err(e) => {
                            error!("ws error: {}, reconnecting", e);
                            break;
                        }
                        _ => {}
                    }
                }
                let _ = events.send(EngineEvent::WsHealth(false)).await;
            }
            Err(e) => {
                error!("failed to connect: {}, retrying in {}s", e, retry_delay_secs);
            }
        }

        tokio::time::sleep(tokio::time::Duration::from_secs(retry_delay_secs)).await;
        retry_delay_secs = std::cmp::min(retry_delay_secs * 2, max_delay_secs);
    }
}

async fn handle_text(text: &str, events: &mpsc::Sender<EngineEvent>) {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text) else { return };
    let channel = parsed["channel"].as_str().unwrap_or("");

    match channel {
        "orderUpdates" => {
            if let Some(updates) = parsed["data"].as_array() {
                for u in updates {
                    let (Some(oid), Some(side_letter), Some(price), Some(size)) = (
                        u["order"]["oid"].as_u64(),
                        u["order"]["side"].as_str(),
                        u["order"]["limitPx"].as_str().and_then(|s| s.parse::<f64>().ok()),
                        u["order"]["sz"].as_str().and_then(|s| s.parse::<f64>().ok()),
                    ) else {
                        continue;
                    };
                    let Some(side) = Side::from_exchange_letter(side_letter) else { continue };
                    let status = u["status"].as_str().unwrap_or("").to_string();
                    let new_oid = u["order"]["origOid"].as_u64().filter(|o| *o != oid);
                    let _ = events
                        .send(EngineEvent::OrderUpdate { oid, new_oid, status, side, price, size })
                        .await;
                }
            }
        }
        "userFills" => {
            if let Some(data) = parsed.get("data") {
                if data["isSnapshot"].as_bool().unwrap_or(false) {
                    return;
                }
                if let Some(fills) = data["fills"].as_array() {
                    for f in fills {
                        let (Some(tid), Some(oid), Some(side_letter), Some(px), Some(sz)) = (
                            f["tid"].as_u64(),
                            f["oid"].as_u64(),
                            f["side"].as_str(),
                            f["px"].as_str().and_then(|s| s.parse::<f64>().ok()),
                            f["sz"].as_str().and_then(|s| s.parse::<f64>().ok()),
                        ) else {
                            continue;
                        };
                        let Some(side) = Side::from_exchange_letter(side_letter) else { continue };
                        let _ = events.send(EngineEvent::Fill { tid, oid, side, price: px, size: sz }).await;
                    }
                }
            }
        }
        "webData2" => {
            let data = &parsed["data"];
            let balances_field = if data["spotBalances"].is_array() { &data["spotBalances"] } else { &data["balances"] };
            if let Some(balances) = balances_field.as_array() {
                for b in balances {
                    let (Some(coin), Some(total)) = (
                        b["coin"].as_str(),
                        b["total"].as_str().and_then(|s| s.parse::<f64>().ok()),
                    ) else {
                        continue;
                    };
                    let _ = events.send(EngineEvent::BalanceUpdate { coin: coin.to_string(), total }).await;
                }
            }
        }
        _ => {}
    }
}
