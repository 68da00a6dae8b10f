pub mod signal_monitor;
pub mod symbol_locks;
pub mod telegram_service;
pub mod trader_desk;
pub mod trading_engine;

pub use signal_monitor::{MonitorSwitch, ScanOutcome, ScanReport, SignalMonitor};
pub use symbol_locks::SymbolLocks;
pub use telegram_service::{Command, TelegramNotifier};
pub use trader_desk::{CommandError, TraderDesk};
pub use trading_engine::{SizingPolicy, TradeOutcome, TradeReceipt, TradeRejection, TradeSide, TradingEngine};

#[cfg(test)]
pub(crate) mod mocks;
