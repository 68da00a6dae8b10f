use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Buy,
    Sell,
    Spend,
    Receive,
    Initial,
}

#[derive(Error, Debug)]
#[error("Unknown transaction type: {0}")]
pub struct UnknownTransactionType(pub String);

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Spend => "SPEND",
            Self::Receive => "RECEIVE",
            Self::Initial => "INITIAL",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "SPEND" => Ok(Self::Spend),
            "RECEIVE" => Ok(Self::Receive),
            "INITIAL" => Ok(Self::Initial),
            other => Err(UnknownTransactionType(other.to_string())),
        }
    }
}

/// A stored, write-once ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub symbol: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub price: Decimal,
    pub total_value: Decimal,
    pub strategy_tag: String,
    pub signal_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub symbol: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub price: Decimal,
    pub strategy_tag: String,
    pub signal_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewTransaction {
    /// `None` when `amount * price` does not fit a `Decimal`.
    pub fn total_value(&self) -> Option<Decimal> {
        self.amount.checked_mul(self.price)
    }
}
