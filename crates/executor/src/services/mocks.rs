use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::models::{
    AssetBalance, BASE_CURRENCY, NewTransaction, SignalStrength, SignalType, StrategyConfig, TradeSignal,
    Transaction,
};
use market_data::PriceOracle;
use mockall::mock;
use rust_decimal::Decimal;
use storage::{LedgerError, LedgerStore, TradeLegs};
use storage::db::get_sqlite_memory_pool;
use storage::repositories::SqliteLedger;
use strategy::{ScannedSignal, SignalScanner, StrategyRegistry};

mock! {
    pub Oracle {}

    #[async_trait]
    impl PriceOracle for Oracle {
        async fn spot_price(&self, symbol: &str) -> anyhow::Result<Decimal>;
    }
}

mock! {
    pub Scanner {}

    #[async_trait]
    impl SignalScanner for Scanner {
        async fn scan(&self, strategy: &StrategyConfig) -> anyhow::Result<Vec<ScannedSignal>>;
    }
}

pub async fn ledger_with_usd(usd: Decimal) -> Arc<dyn LedgerStore> {
    let ledger: Arc<dyn LedgerStore> = Arc::new(SqliteLedger::new(
        get_sqlite_memory_pool().await.expect("in-memory pool"),
    ));
    ledger
        .seed_base_currency(BASE_CURRENCY, usd)
        .await
        .expect("seed");
    ledger
}

/// Default strategies, scanned on every tick.
pub fn eager_registry(keys: &[&str]) -> StrategyRegistry {
    let defaults = StrategyRegistry::with_defaults(&HashMap::new());
    let strategies = keys
        .iter()
        .filter_map(|k| defaults.get(k).cloned())
        .map(|mut s| {
            s.poll_interval = Duration::ZERO;
            s
        })
        .collect();
    StrategyRegistry::new(strategies)
}

pub fn scanned(symbol: &str, kind: &str, strength: SignalStrength, price: Decimal) -> ScannedSignal {
    ScannedSignal {
        symbol: symbol.to_string(),
        signal_type: SignalType::parse(kind),
        strength,
        price,
    }
}

/// Oracle that quotes a fixed price per symbol and fails for anything else.
pub fn quoting(prices: &[(&str, Decimal)]) -> MockOracle {
    let prices: HashMap<String, Decimal> = prices
        .iter()
        .map(|(s, p)| (s.to_string(), *p))
        .collect();
    let mut oracle = MockOracle::new();
    oracle.expect_spot_price().returning(move |symbol| {
        prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no quote for {}", symbol))
    });
    oracle
}

/// Delegates to a real ledger but can no longer mark signals executed.
pub struct UnmarkableLedger(pub Arc<dyn LedgerStore>);

#[async_trait]
impl LedgerStore for UnmarkableLedger {
    fn backend(&self) -> &'static str {
        self.0.backend()
    }

    async fn get_balance(&self, symbol: &str) -> Result<Decimal, LedgerError> {
        self.0.get_balance(symbol).await
    }

    async fn set_balance(&self, symbol: &str, amount: Decimal) -> Result<(), LedgerError> {
        self.0.set_balance(symbol, amount).await
    }

    async fn append_transaction(&self, entry: &NewTransaction) -> Result<i64, LedgerError> {
        self.0.append_transaction(entry).await
    }

    async fn portfolio_summary(&self) -> Result<Vec<AssetBalance>, LedgerError> {
        self.0.portfolio_summary().await
    }

    async fn transaction_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.0.transaction_history(symbol, limit).await
    }

    async fn save_signal(&self, signal: &TradeSignal) -> Result<(), LedgerError> {
        self.0.save_signal(signal).await
    }

    async fn mark_signal_executed(
        &self,
        _signal_id: &str,
        _at: DateTime<Utc>,
        _notes: Option<&str>,
    ) -> Result<bool, LedgerError> {
        Err(LedgerError::Io(std::io::Error::other("signals table unavailable")))
    }

    async fn signal_history(
        &self,
        strategy: Option<&str>,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TradeSignal>, LedgerError> {
        self.0.signal_history(strategy, symbol, limit).await
    }

    async fn seed_base_currency(&self, symbol: &str, amount: Decimal) -> Result<bool, LedgerError> {
        self.0.seed_base_currency(symbol, amount).await
    }

    async fn commit_trade(&self, legs: &TradeLegs) -> Result<(), LedgerError> {
        self.0.commit_trade(legs).await
    }
}
