use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("Refusing to write negative balance {amount} for {symbol}")]
    NegativeBalance { symbol: String, amount: Decimal },
    #[error("Balance of {symbol} changed concurrently (expected {expected})")]
    StaleBalance { symbol: String, expected: Decimal },
    #[error("Trade legs do not balance: asset leg {asset} vs base leg {base}")]
    UnbalancedLegs { asset: Decimal, base: Decimal },
    #[error("Total value of the {symbol} entry does not fit a decimal")]
    Overflow { symbol: String },
    #[error("Corrupt value in column {column}: {value:?}")]
    Corrupt { column: &'static str, value: String },
}
