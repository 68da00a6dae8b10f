use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::models::{BASE_CURRENCY, SignalType, StrategyConfig, TradeSignal};
use market_data::PriceOracle;
use rust_decimal::Decimal;
use storage::{LedgerError, LedgerStore};
use strategy::{ScannedSignal, SignalScanner, StrategyRegistry};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};

use crate::services::trading_engine::{TradeOutcome, TradingEngine};

/// Running/stopped flag shared by the monitor and the chat commands.
#[derive(Debug, Clone, Default)]
pub struct MonitorSwitch(Arc<AtomicBool>);

impl MonitorSwitch {
    pub fn new(running: bool) -> Self {
        Self(Arc::new(AtomicBool::new(running)))
    }

    /// `false` when it was already running.
    pub fn start(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// `false` when it was already stopped.
    pub fn stop(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Signals(usize),
    Failed(String),
}

/// Result of the most recent scan of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub scanned_at: DateTime<Utc>,
    pub outcome: ScanOutcome,
    pub trades_executed: usize,
}

pub struct SignalMonitor {
    registry: Arc<RwLock<StrategyRegistry>>,
    scanner: Arc<dyn SignalScanner>,
    oracle: Arc<dyn PriceOracle>,
    engine: Arc<TradingEngine>,
    ledger: Arc<dyn LedgerStore>,
    switch: MonitorSwitch,
    reports: RwLock<HashMap<String, ScanReport>>,
    last_scan: Mutex<HashMap<String, Instant>>,
    notification_tx: Option<broadcast::Sender<String>>,
}

impl SignalMonitor {
    pub fn new(
        registry: Arc<RwLock<StrategyRegistry>>,
        scanner: Arc<dyn SignalScanner>,
        oracle: Arc<dyn PriceOracle>,
        engine: Arc<TradingEngine>,
        ledger: Arc<dyn LedgerStore>,
        switch: MonitorSwitch,
    ) -> Self {
        Self {
            registry,
            scanner,
            oracle,
            engine,
            ledger,
            switch,
            reports: RwLock::new(HashMap::new()),
            last_scan: Mutex::new(HashMap::new()),
            notification_tx: None,
        }
    }

    pub fn with_notifier(mut self, tx: broadcast::Sender<String>) -> Self {
        self.notification_tx = Some(tx);
        self
    }

    pub fn switch(&self) -> &MonitorSwitch {
        &self.switch
    }

    pub async fn report(&self, strategy_key: &str) -> Option<ScanReport> {
        self.reports.read().await.get(strategy_key).cloned()
    }

    /// One monitor pass over every strategy that is due. Returns the number of trades executed.
    pub async fn process_tick(&self) -> usize {
        if !self.switch.is_running() {
            debug!("Signal monitor stopped, skipping tick");
            return 0;
        }

        let strategies: Vec<StrategyConfig> = self.registry.read().await.strategies().to_vec();
        let mut executed = 0;

        for strategy in strategies {
            if !self.is_due(&strategy).await {
                continue;
            }

            let report = match self.scanner.scan(&strategy).await {
                Ok(signals) => {
                    let found = signals.len();
                    let mut trades = 0;
                    let outcome = match self.process_batch(&strategy.key, signals, &mut trades).await {
                        Ok(()) => ScanOutcome::Signals(found),
                        Err(e) => {
                            error!(
                                "Processing {} signals failed after {} trades: {}",
                                strategy.name, trades, e
                            );
                            ScanOutcome::Failed(e.to_string())
                        }
                    };
                    ScanReport {
                        scanned_at: Utc::now(),
                        outcome,
                        trades_executed: trades,
                    }
                }
                Err(e) => {
                    error!("Scanner for {} failed: {:#}", strategy.name, e);
                    ScanReport {
                        scanned_at: Utc::now(),
                        outcome: ScanOutcome::Failed(format!("{:#}", e)),
                        trades_executed: 0,
                    }
                }
            };

            executed += report.trades_executed;
            self.reports.write().await.insert(strategy.key.clone(), report);
        }
        executed
    }

    async fn is_due(&self, strategy: &StrategyConfig) -> bool {
        let mut last_scan = self.last_scan.lock().await;
        let due = last_scan
            .get(&strategy.key)
            .is_none_or(|at| at.elapsed() >= strategy.poll_interval);
        if due {
            last_scan.insert(strategy.key.clone(), Instant::now());
        }
        due
    }

    /// Persists one strategy's signals and trades the actionable ones:
    /// buys strongest first while USD lasts, then sells in the order received.
    /// `executed` is bumped as each trade commits, so it is accurate even when this fails.
    pub async fn process_batch(
        &self,
        strategy_key: &str,
        signals: Vec<ScannedSignal>,
        executed: &mut usize,
    ) -> Result<(), LedgerError> {
        let mut buys = Vec::new();
        let mut sells = Vec::new();

        for scanned in signals {
            let mut signal = TradeSignal::new(
                strategy_key,
                &scanned.symbol,
                scanned.signal_type,
                scanned.strength,
                scanned.price,
            );

            if !signal.signal_type.is_actionable() {
                info!(
                    "[{}] {} signal for {} recorded only",
                    strategy_key, signal.signal_type, signal.symbol
                );
                self.ledger
                    .save_signal(&signal.with_notes("non-actionable"))
                    .await?;
                continue;
            }

            match self.oracle.spot_price(&signal.symbol).await {
                Ok(price) => signal.price = price,
                Err(e) => {
                    warn!("No price for {}, skipping signal: {:#}", signal.symbol, e);
                    self.ledger
                        .save_signal(&signal.with_notes("price unavailable"))
                        .await?;
                    continue;
                }
            }

            self.ledger.save_signal(&signal).await?;
            match signal.signal_type {
                SignalType::Buy => buys.push(signal),
                _ => sells.push(signal),
            }
        }

        buys.sort_by_key(|s| Reverse(s.strength.rank()));

        for (i, signal) in buys.iter().enumerate() {
            if self.ledger.get_balance(BASE_CURRENCY).await? <= Decimal::ZERO {
                info!(
                    "[{}] {} exhausted, skipping {} remaining BUY signals",
                    strategy_key,
                    BASE_CURRENCY,
                    buys.len() - i
                );
                break;
            }
            self.execute(signal, executed).await?;
        }

        for signal in &sells {
            self.execute(signal, executed).await?;
        }

        Ok(())
    }

    async fn execute(&self, signal: &TradeSignal, executed: &mut usize) -> Result<(), LedgerError> {
        let TradeOutcome::Executed(receipt) = self.engine.execute_signal(signal).await? else {
            return Ok(());
        };
        *executed += 1;

        self.ledger
            .mark_signal_executed(&signal.signal_id, receipt.timestamp, None)
            .await?;

        if let Some(tx) = &self.notification_tx {
            if tx.send(receipt.to_string()).is_err() {
                debug!("No notification subscribers");
            }
        }
        Ok(())
    }
}
