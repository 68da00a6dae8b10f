use std::collections::HashMap;
use std::time::Duration;

use common::models::{Granularity, IndicatorParams, MovingAverageKind, StrategyConfig};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
}

const DEFAULT_ASSETS: [&str; 5] = ["BTC-USD", "ETH-USD", "AVAX-USD", "SOL-USD", "ADA-USD"];

/// Named strategies in a fixed order. The monitor walks them in this order every tick.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<StrategyConfig>,
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<StrategyConfig>) -> Self {
        Self { strategies }
    }

    /// `day`, `swing` and `long`, with asset lists replaced where `assets` has an entry.
    pub fn with_defaults(assets: &HashMap<String, Vec<String>>) -> Self {
        let mut strategies = vec![day_trader(), swing_trader(), long_term()];
        for strategy in &mut strategies {
            if let Some(coins) = assets.get(&strategy.key) {
                info!("{} tracks configured coins: {}", strategy.name, coins.join(", "));
                strategy.assets = coins.clone();
            }
        }
        Self { strategies }
    }

    pub fn get(&self, key: &str) -> Option<&StrategyConfig> {
        self.strategies.iter().find(|s| s.key == key)
    }

    fn get_mut(&mut self, key: &str) -> Result<&mut StrategyConfig, RegistryError> {
        self.strategies
            .iter_mut()
            .find(|s| s.key == key)
            .ok_or_else(|| RegistryError::UnknownStrategy(key.to_string()))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn strategies(&self) -> &[StrategyConfig] {
        &self.strategies
    }

    /// `false` when the asset is already tracked.
    pub fn add_asset(&mut self, key: &str, symbol: &str) -> Result<bool, RegistryError> {
        let strategy = self.get_mut(key)?;
        let symbol = symbol.trim().to_uppercase();
        if strategy.assets.contains(&symbol) {
            return Ok(false);
        }
        strategy.assets.push(symbol);
        Ok(true)
    }

    /// `false` when the asset was not tracked.
    pub fn remove_asset(&mut self, key: &str, symbol: &str) -> Result<bool, RegistryError> {
        let strategy = self.get_mut(key)?;
        let symbol = symbol.trim().to_uppercase();
        let before = strategy.assets.len();
        strategy.assets.retain(|a| *a != symbol);
        Ok(strategy.assets.len() != before)
    }

    pub fn assets(&self, key: &str) -> Result<&[String], RegistryError> {
        self.get(key)
            .map(|s| s.assets.as_slice())
            .ok_or_else(|| RegistryError::UnknownStrategy(key.to_string()))
    }
}

fn default_assets() -> Vec<String> {
    DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect()
}

fn day_trader() -> StrategyConfig {
    StrategyConfig {
        key: "day".to_string(),
        name: "Day Trader".to_string(),
        scanner_name: "Day Trader".to_string(),
        assets: default_assets(),
        params: IndicatorParams {
            granularity_signal: Granularity::FiveMinute,
            granularity_trend: Granularity::OneHour,
            trend_indicator: MovingAverageKind::Ema,
            trend_period: 50,
            signal_indicator: MovingAverageKind::Ema,
            short_period: 9,
            long_period: 21,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volume_filter_enabled: true,
            volume_ma_period: 20,
            volume_spike_multiplier: 2.0,
        },
        poll_interval: Duration::from_secs(5 * 60),
    }
}

fn swing_trader() -> StrategyConfig {
    StrategyConfig {
        key: "swing".to_string(),
        name: "Swing Trader".to_string(),
        scanner_name: "Aggressive Swing Trader".to_string(),
        assets: default_assets(),
        params: IndicatorParams {
            granularity_signal: Granularity::FourHour,
            granularity_trend: Granularity::OneDay,
            trend_indicator: MovingAverageKind::Ema,
            trend_period: 50,
            signal_indicator: MovingAverageKind::Ema,
            short_period: 20,
            long_period: 50,
            rsi_period: 14,
            rsi_overbought: 75.0,
            rsi_oversold: 25.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volume_filter_enabled: true,
            volume_ma_period: 20,
            volume_spike_multiplier: 1.5,
        },
        poll_interval: Duration::from_secs(4 * 3600),
    }
}

fn long_term() -> StrategyConfig {
    StrategyConfig {
        key: "long".to_string(),
        name: "Long Term".to_string(),
        scanner_name: "Long-Term Investor".to_string(),
        assets: default_assets(),
        params: IndicatorParams {
            granularity_signal: Granularity::OneDay,
            granularity_trend: Granularity::OneWeek,
            trend_indicator: MovingAverageKind::Sma,
            trend_period: 30,
            signal_indicator: MovingAverageKind::Sma,
            short_period: 50,
            long_period: 200,
            rsi_period: 14,
            rsi_overbought: 80.0,
            rsi_oversold: 20.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volume_filter_enabled: true,
            volume_ma_period: 20,
            volume_spike_multiplier: 1.5,
        },
        poll_interval: Duration::from_secs(24 * 3600),
    }
}
