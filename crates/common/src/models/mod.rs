pub mod balance;
pub mod signal;
pub mod strategy;
pub mod transaction;

pub use balance::AssetBalance;
pub use signal::{SignalStrength, SignalType, TradeSignal};
pub use strategy::{Granularity, IndicatorParams, MovingAverageKind, StrategyConfig};
pub use transaction::{NewTransaction, Transaction, TransactionType};

/// Settlement asset. Every trade's counter-leg is denominated in it.
pub const BASE_CURRENCY: &str = "USD";
