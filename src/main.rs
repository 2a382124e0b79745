mod batch_emitter;
mod config;
mod error;
mod exchange;
mod inventory;
mod order_differ;
mod order_state;
mod pricing_grid;
mod quoting_engine;
mod rate_limit;
mod side;
mod signing;
mod transport;
mod orchestrator;

use std::path::PathBuf;

use clap::Parser;

use config::{Credentials, EngineConfig};
use exchange::{ExchangeClient, LiveExchange, SimExchange};
use orchestrator::Engine;
use transport::EngineEvent;

/// Spot market-making engine for a Hyperliquid-style exchange.
#[derive(Parser, Debug)]
#[command(name = "mm-engine-rs", version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Run against an in-memory simulated exchange instead of the live API.
    #[arg(long)]
    sim: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> error::EngineResult<()> {
    let config = EngineConfig::load(&cli.config).map_err(error::EngineError::Config)?;
    log::info!("loaded config for {} (n_orders={})", config.coin, config.n_orders);

    let credentials = if cli.sim {
        Credentials { private_key: String::new(), wallet_address: String::new() }
    } else {
        Credentials::from_env()?
    };

    let exchange: Box<dyn ExchangeClient> = if cli.sim {
        log::info!("running against SimExchange (no real orders)");
        let mut universe = std::collections::HashMap::new();
        universe.insert(
            config.coin.clone(),
            exchange::SpotAssetInfo { asset_id: exchange::SPOT_ASSET_OFFSET, universe_index: 0, sz_decimals: 6 },
        );
        let sim = SimExchange::new(
            universe,
            exchange::SpotBalances { base: 1_000.0, quote: 100_000.0 },
        );
        Box::new(sim)
    } else {
        log::info!("running against live exchange at {}", config.base_url);
        Box::new(LiveExchange::new(
            config.base_url.clone(),
            credentials.wallet_address.clone(),
            credentials.private_key.clone(),
        ))
    };

    let wallet_address = credentials.wallet_address.clone();
    let engine = Engine::bootstrap(config.clone(), credentials, exchange).await?;

    let (tx, rx) = tokio::sync::mpsc::channel(1024);

    if !cli.sim {
        let ws_tx = tx.clone();
        tokio::spawn(transport::connect_and_listen(wallet_address, ws_tx));
    }

    let tick_tx = tx.clone();
    let tick_interval_ms = config.tick_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(tick_interval_ms));
        loop {
            interval.tick().await;
            if tick_tx.send(EngineEvent::Tick).await.is_err() {
                break;
            }
        }
    });
    drop(tx);

    log::info!("engine bootstrapped, entering event loop");
    engine.run(rx).await
}
