use std::time::Duration;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    FiveMinute,
    OneHour,
    FourHour,
    OneDay,
    OneWeek,
}

impl Granularity {
    pub fn seconds(&self) -> u64 {
        match self {
            Self::FiveMinute => 300,
            Self::OneHour => 3_600,
            Self::FourHour => 14_400,
            Self::OneDay => 86_400,
            Self::OneWeek => 604_800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovingAverageKind {
    Ema,
    Sma,
}

/// Indicator settings handed to the scanner. The trading core never reads these.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub granularity_signal: Granularity,
    pub granularity_trend: Granularity,
    pub trend_indicator: MovingAverageKind,
    pub trend_period: usize,
    pub signal_indicator: MovingAverageKind,
    pub short_period: usize,
    pub long_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volume_filter_enabled: bool,
    pub volume_ma_period: usize,
    pub volume_spike_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    /// Registry key, e.g. `day`.
    pub key: String,
    /// Display name, e.g. `Day Trader`.
    pub name: String,
    /// Name reported to the scanner.
    pub scanner_name: String,
    /// Ordered, duplicate-free.
    pub assets: Vec<String>,
    pub params: IndicatorParams,
    pub poll_interval: Duration,
}
