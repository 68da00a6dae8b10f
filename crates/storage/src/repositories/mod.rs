pub mod postgres_repo;
pub mod sqlite_repo;

pub use postgres_repo::PostgresLedger;
pub use sqlite_repo::SqliteLedger;

use common::models::{SignalStrength, SignalType, TransactionType};

use crate::error::LedgerError;

pub(crate) fn parse_transaction_type(raw: String) -> Result<TransactionType, LedgerError> {
    raw.parse().map_err(|_| LedgerError::Corrupt {
        column: "transaction_type",
        value: raw,
    })
}

pub(crate) fn parse_signal_labels(signal_type: &str, strength: &str) -> (SignalType, SignalStrength) {
    (SignalType::parse(signal_type), SignalStrength::parse(strength))
}

pub(crate) fn clamp_limit(limit: u32) -> i64 {
    i64::from(limit.clamp(1, 500))
}
