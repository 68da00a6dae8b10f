pub mod db;
pub mod error;
pub mod ledger;
pub mod repositories;

pub use error::LedgerError;
pub use ledger::{BalanceChange, LedgerStore, TradeLegs};
