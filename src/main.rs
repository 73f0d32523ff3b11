//! Crestline - bounded-risk autonomous futures trading core
//!
//! Paper-venue runner: loads config.toml (or falls back to built-in
//! paper defaults), seeds the simulated venue, recovers any open
//! positions, and drives the scan loop until Ctrl-C.

use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crestline::config::{Settings, SymbolConfig, SystemConfig};
use crestline::core::types::AccountState;
use crestline::engine::BotEngine;
use crestline::exchange::paper::{synthetic_candles, PaperExchange};

const SEP: &str = "===========================================================";

/// Built-in paper configuration for runs without a config.toml
fn paper_defaults() -> Settings {
    Settings {
        system: SystemConfig {
            name: "crestline".to_string(),
            log_level: "info".to_string(),
        },
        trading: Default::default(),
        capital: Default::default(),
        engine: Default::default(),
        symbols: vec![
            SymbolConfig {
                name: "BTC/USDT".to_string(),
                min_quantity: dec!(0.0001),
            },
            SymbolConfig {
                name: "ETH/USDT".to_string(),
                min_quantity: dec!(0.001),
            },
        ],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = match Settings::load("config.toml") {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("config.toml not usable ({e}), using built-in paper defaults");
            paper_defaults()
        }
    };

    let level = settings
        .system
        .log_level
        .parse::<Level>()
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", SEP);
    info!("  {} - bounded-risk autonomous trading core", settings.system.name);
    info!("  Symbols: {}", settings.symbols.len());
    info!(
        "  Capital bands: warn {}% / reduce {}% / emergency {}%",
        settings.capital.warning_pct,
        settings.capital.reduction_pct,
        settings.capital.emergency_pct
    );
    info!("{}", SEP);

    // Paper venue seeded with synthetic history and a demo account
    let venue = Arc::new(PaperExchange::new());
    venue.set_account(AccountState {
        equity: dec!(10000),
        free_margin: dec!(10000),
    });
    for symbol in &settings.symbols {
        let base = match symbol.name.as_str() {
            "BTC/USDT" => 50000.0,
            "ETH/USDT" => 2500.0,
            _ => 100.0,
        };
        venue.set_candles(&symbol.name, synthetic_candles(base, settings.engine.candle_lookback));
    }
    info!("Venue: paper (synthetic candles, simulated fills)");

    let engine = BotEngine::new(settings, venue);

    match engine.recover_positions().await {
        Ok(0) => info!("No existing positions to recover"),
        Ok(n) => info!("Recovered {} position(s)", n),
        Err(e) => warn!("Position recovery failed: {}", e),
    }

    // Ctrl-C flips the running flag; the cycle in flight completes
    let handle = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    engine.run().await;
    info!("Goodbye");
    Ok(())
}
