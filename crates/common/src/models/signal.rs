use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalType {
    Buy,
    Sell,
    /// Anything the scanner emits besides BUY/SELL (HOLD, NEUTRAL, ...). Never traded.
    Other(String),
}

impl SignalType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Self::Buy,
            "SELL" => Self::Sell,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Qualitative signal confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalStrength {
    Low,
    Medium,
    Strong,
    Unrecognized,
}

impl SignalStrength {
    /// Lenient parse: case-insensitive, anything unknown maps to `Unrecognized`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "strong" => Self::Strong,
            _ => Self::Unrecognized,
        }
    }

    /// Execution priority, higher runs first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Strong => 3,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Unrecognized => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::Strong => "Strong",
            Self::Unrecognized => "Unrecognized",
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignal {
    pub signal_id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub signal_type: SignalType,
    pub strength: SignalStrength,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub executed: bool,
    pub execution_timestamp: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl TradeSignal {
    pub fn new(
        strategy_name: &str,
        symbol: &str,
        signal_type: SignalType,
        strength: SignalStrength,
        price: Decimal,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            signal_id: Self::make_id(strategy_name, symbol, timestamp),
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
            signal_type,
            strength,
            price,
            timestamp,
            executed: false,
            execution_timestamp: None,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    /// `<strategy>_<symbol>_<yyyymmdd_hhmmss>_<8 hex>`
    fn make_id(strategy_name: &str, symbol: &str, at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}_{}",
            strategy_name,
            symbol,
            at.format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        )
    }
}
