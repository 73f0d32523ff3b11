//! Bot Engine - the scan-cycle scheduler
//!
//! One cycle per polling interval: monitor open positions, then scan
//! all symbols concurrently (bounded worker pool), then enter the best
//! opportunities one at a time.
//!
//! Symbol evaluation touches disjoint per-symbol data and runs in
//! parallel. Everything that mutates account state - the capital check
//! and order execution - is serialized behind a single mutex, because a
//! race there double-spends margin across two concurrently approved
//! signals.
//!
//! The running flag is checked between cycles and before every new
//! entry; in-flight submissions are allowed to complete on shutdown.
//! The emergency flag is re-checked before each entry, not once per
//! cycle, since exposure can change from a fill that lands mid-cycle.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Settings, SymbolConfig};
use crate::core::governor::{CapitalGovernor, CapitalStatus, CapitalVerdict};
use crate::core::indicators::{IndicatorConfig, IndicatorEngine};
use crate::core::monitor::PositionMonitor;
use crate::core::scorer::{ScorerConfig, SignalScorer, TimeframeScore};
use crate::core::sizer::{PositionSizer, SizerConfig};
use crate::core::types::{CandleWindow, Position, Signal};
use crate::error::CoreError;
use crate::exchange::Exchange;
use crate::execution::engine::{ExecutionConfig, ExecutionEngine};

/// Read-only state surface polled by UI/CLI collaborators. The core
/// never blocks on rendering; display layers read a clone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub signals: Vec<Signal>,
    pub positions: Vec<Position>,
    pub capital: Option<CapitalStatus>,
    pub last_error: Option<String>,
    pub cycle: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BotSnapshot {
    /// Dump for the out-of-process dashboard
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Result of scanning one symbol on its primary timeframe
struct ScanOutcome {
    signal: Signal,
    atr: f64,
    atr_baseline: f64,
    min_quantity: Decimal,
    is_confluence: bool,
}

/// Shared mutable account state: the one serialization point
struct AccountGate {
    governor: CapitalGovernor,
    positions: Vec<Position>,
    /// Symbol -> earliest re-entry time
    cooldowns: HashMap<String, DateTime<Utc>>,
}

pub struct BotEngine {
    settings: Settings,
    exchange: Arc<dyn Exchange>,
    indicators: IndicatorEngine,
    scorer: SignalScorer,
    sizer: PositionSizer,
    monitor: PositionMonitor,
    execution: ExecutionEngine,
    gate: Mutex<AccountGate>,
    snapshot: RwLock<BotSnapshot>,
    running: AtomicBool,
    scan_permits: Arc<Semaphore>,
}

impl BotEngine {
    pub fn new(settings: Settings, exchange: Arc<dyn Exchange>) -> Arc<Self> {
        let trading = &settings.trading;
        let scorer = SignalScorer::new(ScorerConfig {
            min_volume_ratio: trading.min_volume_ratio,
            min_confidence: trading.min_confidence,
            ..ScorerConfig::default()
        });
        let sizer = PositionSizer::new(SizerConfig::from_trading(trading));
        let monitor = PositionMonitor::new(trading.max_hold_hours);
        let governor = CapitalGovernor::new(settings.capital.clone(), trading.max_positions);
        let execution = ExecutionEngine::new(exchange.clone(), ExecutionConfig::from_settings(&settings));
        let scan_permits = Arc::new(Semaphore::new(settings.engine.max_concurrent_scans.max(1)));

        Arc::new(Self {
            exchange,
            indicators: IndicatorEngine::new(IndicatorConfig::default()),
            scorer,
            sizer,
            monitor,
            execution,
            gate: Mutex::new(AccountGate {
                governor,
                positions: Vec::new(),
                cooldowns: HashMap::new(),
            }),
            snapshot: RwLock::new(BotSnapshot::default()),
            running: AtomicBool::new(true),
            scan_permits,
            settings,
        })
    }

    /// Flip the running flag. In-flight submissions complete; no new
    /// entries are attempted.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("shutdown requested, finishing in-flight work");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // Read-only snapshot surface

    pub fn current_signals(&self) -> Vec<Signal> {
        self.snapshot.read().map(|s| s.signals.clone()).unwrap_or_default()
    }

    pub fn current_positions(&self) -> Vec<Position> {
        self.snapshot.read().map(|s| s.positions.clone()).unwrap_or_default()
    }

    pub fn capital_status(&self) -> Option<CapitalStatus> {
        self.snapshot.read().ok().and_then(|s| s.capital.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot.read().ok().and_then(|s| s.last_error.clone())
    }

    /// Adopt positions already open at the venue, e.g. after a restart.
    pub async fn recover_positions(&self) -> Result<usize, CoreError> {
        let positions = self
            .exchange
            .fetch_positions()
            .await
            .map_err(|e| CoreError::ExchangeUnavailable(e.to_string()))?;
        let count = positions.len();
        if count > 0 {
            info!("recovering {} existing position(s)", count);
            for p in &positions {
                info!("  {} {} size={} entry={}", p.symbol, p.side, p.size, p.entry_price);
            }
        }
        self.gate.lock().await.positions = positions;
        Ok(count)
    }

    /// Main loop: one scan cycle per polling interval until shutdown.
    pub async fn run(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(self.settings.engine.poll_interval_secs);
        info!(
            "engine started: {} symbols, {} workers, {}s interval",
            self.settings.symbols.len(),
            self.settings.engine.max_concurrent_scans,
            self.settings.engine.poll_interval_secs
        );

        let mut cycle = 0u64;
        while self.is_running() {
            cycle += 1;
            self.run_cycle(cycle).await;
            if !self.is_running() {
                break;
            }
            sleep(interval).await;
        }
        info!("engine stopped after {} cycle(s)", cycle);
    }

    /// One full cycle: monitor, scan, enter, publish.
    pub async fn run_cycle(self: &Arc<Self>, cycle: u64) {
        let mut last_error = None;

        // Phase 1: monitor existing positions. Runs even when the
        // account state is unavailable.
        {
            let mut gate = self.gate.lock().await;
            let emergency = gate.governor.emergency_active();
            let closed = self
                .monitor
                .sweep(&mut gate.positions, self.exchange.as_ref(), &self.execution, emergency)
                .await;
            let cooldown = chrono::Duration::seconds(self.settings.trading.reentry_cooldown_secs);
            for (position, reason) in closed {
                info!("{} closed: {}", position.symbol, reason);
                if cooldown > chrono::Duration::zero() {
                    gate.cooldowns.insert(position.symbol, Utc::now() + cooldown);
                }
            }
        }

        // Phase 2: concurrent per-symbol scans, bounded by the worker
        // pool. A failure in one symbol never aborts the others.
        let mut handles = Vec::new();
        for symbol in self.settings.symbols.clone() {
            if !self.is_running() {
                break;
            }
            let this = self.clone();
            let permits = self.scan_permits.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                match this.evaluate_symbol(&symbol).await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_symbol_local() => {
                        debug!("{}: skipped this cycle: {}", symbol.name, e);
                        None
                    }
                    Err(e) => {
                        warn!("{}: {}", symbol.name, e);
                        None
                    }
                }
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!("scan task panicked: {}", e),
            }
        }

        // Strongest conviction first
        outcomes.sort_by(|a, b| {
            b.signal
                .confidence
                .partial_cmp(&a.signal.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let signals: Vec<Signal> = outcomes.iter().map(|o| o.signal.clone()).collect();

        // Phase 3: serialized entries. The gate is re-checked before
        // every entry because a fill inside this loop changes exposure.
        for outcome in outcomes {
            if !self.is_running() {
                break;
            }
            match self.try_enter(outcome).await {
                Ok(()) => {}
                Err(e) => {
                    match &e {
                        CoreError::CapitalDenied(reason) if reason == "emergency" => {
                            error!("emergency halt: no further entries this cycle");
                            last_error = Some(e.to_string());
                            break;
                        }
                        CoreError::AccountStateUnavailable(_) => {
                            warn!("{}", e);
                            last_error = Some(e.to_string());
                            break;
                        }
                        _ => {
                            info!("{}", e);
                        }
                    }
                }
            }
        }

        // Phase 4: publish the snapshot for the display layer
        self.publish_snapshot(cycle, signals, last_error).await;
    }

    /// Scan one symbol: primary-timeframe scoring plus higher-timeframe
    /// direction votes. Read-only; safe to run concurrently.
    async fn evaluate_symbol(&self, symbol: &SymbolConfig) -> Result<Option<ScanOutcome>, CoreError> {
        let lookback = self.settings.engine.candle_lookback;
        let timeframes = &self.settings.engine.timeframes;
        let primary = &timeframes[0];

        let candles = self
            .exchange
            .fetch_candles(&symbol.name, primary, lookback)
            .await
            .map_err(|e| CoreError::ExchangeUnavailable(e.to_string()))?;
        let mut window = CandleWindow::new(lookback);
        window.replace_all(candles);

        let set = self.indicators.compute(&window)?;
        let latest = window.latest().ok_or(CoreError::InsufficientData { got: 0, need: 1 })?;

        // Higher timeframes vote direction only; a stalled fetch there
        // degrades the bonus, never the signal
        let mut votes: Vec<TimeframeScore> = Vec::new();
        for timeframe in &timeframes[1..] {
            match self.exchange.fetch_candles(&symbol.name, timeframe, lookback).await {
                Ok(candles) => {
                    let mut tf_window = CandleWindow::new(lookback);
                    tf_window.replace_all(candles);
                    if let Ok(tf_set) = self.indicators.compute(&tf_window) {
                        if let Some(side) = self.scorer.direction(&tf_set) {
                            votes.push(TimeframeScore {
                                timeframe: timeframe.clone(),
                                side,
                            });
                        }
                    }
                }
                Err(e) => debug!("{} {}: vote skipped: {}", symbol.name, timeframe, e),
            }
        }

        let signal = self
            .scorer
            .score(&symbol.name, latest.close, &set, &votes, latest.timestamp);

        Ok(signal.map(|signal| {
            let quorum_bonus = signal.components.timeframe_alignment >= 10.0;
            let indicator_confluence =
                signal.components.oscillator > 0.0 && signal.components.volatility_band > 0.0;
            info!(
                "{}: {} signal @ {} confidence {:.1}",
                symbol.name, signal.side, signal.price, signal.confidence
            );
            ScanOutcome {
                signal,
                atr: set.atr,
                atr_baseline: set.atr_baseline,
                min_quantity: symbol.min_quantity,
                is_confluence: quorum_bonus || indicator_confluence,
            }
        }))
    }

    /// Gate, size and execute one entry while holding the account lock.
    async fn try_enter(&self, outcome: ScanOutcome) -> Result<(), CoreError> {
        let signal = &outcome.signal;
        let mut gate = self.gate.lock().await;

        if let Some(until) = gate.cooldowns.get(&signal.symbol) {
            if Utc::now() < *until {
                return Err(CoreError::SizingRejected(format!(
                    "{} in re-entry cooldown",
                    signal.symbol
                )));
            }
        }
        if gate.positions.iter().any(|p| p.symbol == signal.symbol) {
            return Err(CoreError::SizingRejected(format!(
                "{} already has an open position",
                signal.symbol
            )));
        }

        // Fresh account state per entry: fills inside this cycle have
        // already changed margin
        let account = self
            .exchange
            .fetch_account()
            .await
            .map_err(|e| CoreError::AccountStateUnavailable(e.to_string()))?;

        let gate = &mut *gate;
        match gate.governor.check(account.equity, &gate.positions) {
            CapitalVerdict::Allow => {}
            CapitalVerdict::AllowWithWarning { capital_in_play_pct } => {
                warn!(
                    "capital warning: {:.2}% in play, entries still allowed",
                    capital_in_play_pct
                );
            }
            CapitalVerdict::Deny { reason, .. } => {
                return Err(CoreError::CapitalDenied(reason));
            }
        }

        // A volatility-derived stop drives sizing when the ATR is live
        let atr_dec = Decimal::from_f64(outcome.atr).filter(|a| *a > Decimal::ZERO);
        let stop_hint = atr_dec.map(|_| {
            self.execution
                .bracket_prices(signal.side, signal.price, atr_dec)
                .0
        });

        let decision = self.sizer.size(
            signal,
            &account,
            stop_hint,
            outcome.min_quantity,
            outcome.is_confluence,
            outcome.atr,
            outcome.atr_baseline,
        );
        if decision.rejected {
            return Err(CoreError::SizingRejected(
                decision.reason.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        let position = self.execution.open_position(signal, &decision, atr_dec).await?;
        info!(
            "{} position opened: {} {} @ {} (margin {})",
            position.symbol,
            position.side,
            position.size,
            position.entry_price,
            position.margin().round_dp(4)
        );
        gate.positions.push(position);
        Ok(())
    }

    async fn publish_snapshot(&self, cycle: u64, signals: Vec<Signal>, last_error: Option<String>) {
        let (positions, capital) = {
            let gate = self.gate.lock().await;
            let capital = match self.exchange.fetch_account().await {
                Ok(account) => Some(gate.governor.status(account.equity, &gate.positions)),
                Err(_) => None,
            };
            (gate.positions.clone(), capital)
        };

        if let Ok(mut snap) = self.snapshot.write() {
            snap.signals = signals;
            snap.positions = positions;
            snap.capital = capital;
            if last_error.is_some() {
                snap.last_error = last_error;
            }
            snap.cycle = cycle;
            snap.updated_at = Some(Utc::now());

            if let Some(ref path) = self.settings.engine.snapshot_path {
                if let Err(e) = snap.save(path) {
                    warn!("snapshot write failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CapitalConfig, EngineConfig, SystemConfig, TradingConfig};
    use crate::core::types::{AccountState, PositionStatus};
    use crate::exchange::paper::{synthetic_candles, PaperExchange};
    use rust_decimal_macros::dec;

    fn settings(symbols: &[&str]) -> Settings {
        Settings {
            system: SystemConfig {
                name: "crestline-test".to_string(),
                log_level: "info".to_string(),
            },
            trading: TradingConfig {
                min_confidence: 1.0,
                min_volume_ratio: 0.0,
                ..TradingConfig::default()
            },
            capital: CapitalConfig::default(),
            engine: EngineConfig {
                poll_interval_secs: 1,
                ..EngineConfig::default()
            },
            symbols: symbols
                .iter()
                .map(|s| SymbolConfig {
                    name: s.to_string(),
                    min_quantity: dec!(0),
                })
                .collect(),
        }
    }

    /// Strongly trending candle series that reliably produces a buy
    fn trending_candles(count: usize) -> Vec<crate::core::types::Candle> {
        use crate::core::types::Candle;
        use rust_decimal::prelude::FromPrimitive;
        let start = Utc::now() - chrono::Duration::minutes(count as i64);
        (0..count)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                let volume = if i == count - 1 { 5000.0 } else { 1000.0 };
                Candle::new(
                    start + chrono::Duration::minutes(i as i64),
                    Decimal::from_f64(base).unwrap(),
                    Decimal::from_f64(base + 1.0).unwrap(),
                    Decimal::from_f64(base - 1.0).unwrap(),
                    Decimal::from_f64(base + 0.5).unwrap(),
                    Decimal::from_f64(volume).unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_opens_position_on_strong_signal() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", trending_candles(200));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });

        let engine = BotEngine::new(settings(&["BTC/USDT"]), venue.clone());
        engine.run_cycle(1).await;

        let positions = engine.current_positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].status, PositionStatus::Open);
        assert!(!engine.current_signals().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_symbol_failure_does_not_abort_others() {
        let venue = Arc::new(PaperExchange::new());
        // ETH has no candles seeded; BTC scans fine
        venue.set_candles("BTC/USDT", trending_candles(200));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });

        let engine = BotEngine::new(settings(&["ETH/USDT", "BTC/USDT"]), venue.clone());
        engine.run_cycle(1).await;

        assert_eq!(engine.current_positions().len(), 1);
        assert_eq!(engine.current_positions()[0].symbol, "BTC/USDT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_duplicate_position_per_symbol() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", trending_candles(200));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });

        let engine = BotEngine::new(settings(&["BTC/USDT"]), venue.clone());
        engine.run_cycle(1).await;
        engine.run_cycle(2).await;

        assert_eq!(engine.current_positions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_unavailable_blocks_entries_only() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", trending_candles(200));
        // No account seeded: fetch_account fails

        let engine = BotEngine::new(settings(&["BTC/USDT"]), venue.clone());
        engine.run_cycle(1).await;

        assert!(engine.current_positions().is_empty());
        assert!(engine.last_error().unwrap().contains("account state unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_new_entries() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", trending_candles(200));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });

        let engine = BotEngine::new(settings(&["BTC/USDT"]), venue.clone());
        engine.shutdown();
        engine.run_cycle(1).await;

        assert!(engine.current_positions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_positions_adopts_existing() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", synthetic_candles(50000.0, 200));
        // Pin the mark inside the bracket so the sweep leaves it open
        venue.set_mark_price("BTC/USDT", dec!(50000));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });
        venue.seed_position(Position {
            symbol: "BTC/USDT".to_string(),
            side: crate::core::types::Side::Buy,
            size: dec!(0.01),
            entry_price: dec!(50000),
            current_price: dec!(50000),
            leverage: dec!(25),
            entry_order_id: "recovered".to_string(),
            stop_order_id: Some("s".to_string()),
            profit_order_id: Some("t".to_string()),
            stop_price: Some(dec!(49000)),
            target_price: Some(dec!(52000)),
            close_order_id: None,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        });

        let engine = BotEngine::new(settings(&["BTC/USDT"]), venue.clone());
        let recovered = engine.recover_positions().await.unwrap();
        assert_eq!(recovered, 1);
        engine.run_cycle(1).await;
        assert!(!engine.current_positions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_exposure_halts_entries() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", trending_candles(200));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });
        // 860 margin on 1000 equity: 86% in play, above the 85% line
        venue.seed_position(Position {
            symbol: "ETH/USDT".to_string(),
            side: crate::core::types::Side::Buy,
            size: dec!(1),
            entry_price: dec!(860),
            current_price: dec!(860),
            leverage: dec!(1),
            entry_order_id: "big".to_string(),
            stop_order_id: Some("s".to_string()),
            profit_order_id: Some("t".to_string()),
            stop_price: None,
            target_price: None,
            close_order_id: None,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        });
        venue.set_mark_price("ETH/USDT", dec!(860));

        let engine = BotEngine::new(settings(&["BTC/USDT"]), venue.clone());
        engine.recover_positions().await.unwrap();
        engine.run_cycle(1).await;

        // The execution engine was never invoked for the new signal
        assert_eq!(engine.current_positions().len(), 1);
        assert_eq!(venue.market_order_count(), 0);
        assert_eq!(engine.last_error().unwrap(), "capital denied: emergency");
    }

    /// A position the sweep is about to take profit on, well below the
    /// trending-series mark
    fn ripe_position() -> Position {
        Position {
            symbol: "BTC/USDT".to_string(),
            side: crate::core::types::Side::Buy,
            size: dec!(0.01),
            entry_price: dec!(400),
            current_price: dec!(400),
            leverage: dec!(25),
            entry_order_id: "ripe".to_string(),
            stop_order_id: Some("s".to_string()),
            profit_order_id: Some("t".to_string()),
            stop_price: None,
            target_price: Some(dec!(450)),
            close_order_id: None,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentry_cooldown_blocks_fresh_entry() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", trending_candles(200));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });
        venue.seed_position(ripe_position());

        let mut settings = settings(&["BTC/USDT"]);
        settings.trading.reentry_cooldown_secs = 3600;
        let engine = BotEngine::new(settings, venue.clone());
        engine.recover_positions().await.unwrap();

        // Cycle 1: the sweep takes profit, the same cycle's strong
        // signal must then be refused
        engine.run_cycle(1).await;
        assert!(engine.current_positions().is_empty());

        // Still inside the window a cycle later
        engine.run_cycle(2).await;
        assert!(engine.current_positions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cooldown_reenters_immediately() {
        let venue = Arc::new(PaperExchange::new());
        venue.set_candles("BTC/USDT", trending_candles(200));
        venue.set_account(AccountState {
            equity: dec!(1000),
            free_margin: dec!(1000),
        });
        venue.seed_position(ripe_position());

        let engine = BotEngine::new(settings(&["BTC/USDT"]), venue.clone());
        engine.recover_positions().await.unwrap();
        engine.run_cycle(1).await;

        // Closed and re-entered at the current mark in one cycle
        let positions = engine.current_positions();
        assert_eq!(positions.len(), 1);
        assert_ne!(positions[0].entry_price, dec!(400));
    }
}
