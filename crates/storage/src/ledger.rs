use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::models::{AssetBalance, NewTransaction, TradeSignal, Transaction};
use rust_decimal::Decimal;

use crate::error::LedgerError;

/// Compare-and-set write of one balance row.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub symbol: String,
    /// Value read before the trade. The write only lands if the row still holds it.
    pub expected: Decimal,
    pub new_amount: Decimal,
}

/// Everything one buy or sell writes: two balance rows and the paired ledger entries.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeLegs {
    pub asset: BalanceChange,
    pub base: BalanceChange,
    pub asset_entry: NewTransaction,
    pub base_entry: NewTransaction,
}

impl TradeLegs {
    pub fn check(&self) -> Result<(), LedgerError> {
        for change in [&self.asset, &self.base] {
            if change.new_amount < Decimal::ZERO {
                return Err(LedgerError::NegativeBalance {
                    symbol: change.symbol.clone(),
                    amount: change.new_amount,
                });
            }
        }
        let asset = entry_total(&self.asset_entry)?;
        let base = entry_total(&self.base_entry)?;
        if asset != base {
            return Err(LedgerError::UnbalancedLegs { asset, base });
        }
        Ok(())
    }
}

/// Durable balances plus the append-only transaction and signal logs.
///
/// Every read goes to storage. Implementations: [`crate::repositories::SqliteLedger`]
/// and [`crate::repositories::PostgresLedger`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Zero for unknown symbols.
    async fn get_balance(&self, symbol: &str) -> Result<Decimal, LedgerError>;

    /// Upsert. Negative amounts are refused before touching storage.
    async fn set_balance(&self, symbol: &str, amount: Decimal) -> Result<(), LedgerError>;

    /// Returns the new row id.
    async fn append_transaction(&self, entry: &NewTransaction) -> Result<i64, LedgerError>;

    /// Holdings with a positive amount, ordered by symbol.
    async fn portfolio_summary(&self) -> Result<Vec<AssetBalance>, LedgerError>;

    /// Newest first.
    async fn transaction_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Transaction>, LedgerError>;

    async fn save_signal(&self, signal: &TradeSignal) -> Result<(), LedgerError>;

    /// `false` when no signal has that id.
    async fn mark_signal_executed(
        &self,
        signal_id: &str,
        at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<bool, LedgerError>;

    /// Newest first; filters are combined with AND.
    async fn signal_history(
        &self,
        strategy: Option<&str>,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TradeSignal>, LedgerError>;

    /// Creates the base currency row and its INITIAL entry once.
    /// Returns `true` only for the call that created them.
    async fn seed_base_currency(&self, symbol: &str, amount: Decimal) -> Result<bool, LedgerError>;

    /// Applies both balance changes and both entries in one database transaction.
    async fn commit_trade(&self, legs: &TradeLegs) -> Result<(), LedgerError>;
}

pub(crate) const SEED_STRATEGY_TAG: &str = "SYSTEM";
pub(crate) const SEED_SIGNAL_ID: &str = "initial_setup";

pub(crate) fn entry_total(entry: &NewTransaction) -> Result<Decimal, LedgerError> {
    entry.total_value().ok_or_else(|| LedgerError::Overflow {
        symbol: entry.symbol.clone(),
    })
}
