pub mod registry;
pub mod scanner;

pub use registry::{RegistryError, StrategyRegistry};
pub use scanner::{IndicatorScanner, ScannedSignal, SignalScanner};
