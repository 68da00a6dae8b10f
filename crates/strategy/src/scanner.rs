use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use common::models::{IndicatorParams, MovingAverageKind, SignalStrength, SignalType, StrategyConfig};
use market_data::{Candle, CandleSource};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use ta::Next;
use ta::indicators::{
    ExponentialMovingAverage, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use tracing::{debug, info, warn};

/// What a scan found for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedSignal {
    pub symbol: String,
    pub signal_type: SignalType,
    pub strength: SignalStrength,
    /// Last close seen by the scanner. Trades use a fresh spot price instead.
    pub price: Decimal,
}

#[async_trait]
pub trait SignalScanner: Send + Sync {
    async fn scan(&self, strategy: &StrategyConfig) -> anyhow::Result<Vec<ScannedSignal>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub crossover: Crossover,
    pub strength: SignalStrength,
    pub confirmations: u8,
    pub rsi: f64,
}

/// Short moving average crossing the long one: upwards is a buy, downwards a sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossover {
    Up,
    Down,
}

impl Crossover {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Self::Up => SignalType::Buy,
            Self::Down => SignalType::Sell,
        }
    }
}

enum MovingAverage {
    Ema(ExponentialMovingAverage),
    Sma(SimpleMovingAverage),
}

impl MovingAverage {
    fn new(kind: MovingAverageKind, period: usize) -> anyhow::Result<Self> {
        let ma = match kind {
            MovingAverageKind::Ema => ExponentialMovingAverage::new(period).map(Self::Ema),
            MovingAverageKind::Sma => SimpleMovingAverage::new(period).map(Self::Sma),
        };
        ma.map_err(|e| anyhow!("{:?}({}) rejected: {:?}", kind, period, e))
    }

    fn next(&mut self, value: f64) -> f64 {
        match self {
            Self::Ema(ma) => ma.next(value),
            Self::Sma(ma) => ma.next(value),
        }
    }
}

fn ma_series(kind: MovingAverageKind, period: usize, values: &[f64]) -> anyhow::Result<Vec<f64>> {
    let mut ma = MovingAverage::new(kind, period)?;
    Ok(values.iter().map(|v| ma.next(*v)).collect())
}

/// Moving-average crossover on the last two signal bars, RSI-guarded and graded by confirmations.
///
/// `None` when there is no crossover, the RSI guard vetoes it, or there are not enough bars.
pub fn evaluate(
    params: &IndicatorParams,
    signal: &[Candle],
    trend: &[Candle],
) -> anyhow::Result<Option<Evaluation>> {
    if signal.len() < params.long_period.max(params.short_period) + 1 {
        return Ok(None);
    }
    let closes: Vec<f64> = signal.iter().map(|c| c.close).collect();

    let short = ma_series(params.signal_indicator, params.short_period, &closes)?;
    let long = ma_series(params.signal_indicator, params.long_period, &closes)?;
    let n = closes.len();
    let (prev_diff, diff) = (short[n - 2] - long[n - 2], short[n - 1] - long[n - 1]);

    let crossover = if prev_diff <= 0.0 && diff > 0.0 {
        Crossover::Up
    } else if prev_diff >= 0.0 && diff < 0.0 {
        Crossover::Down
    } else {
        return Ok(None);
    };

    let mut rsi = RelativeStrengthIndex::new(params.rsi_period)
        .map_err(|e| anyhow!("RSI({}) rejected: {:?}", params.rsi_period, e))?;
    let rsi = closes.iter().fold(50.0, |_, c| rsi.next(*c));
    let vetoed = match crossover {
        Crossover::Up => rsi > params.rsi_overbought,
        Crossover::Down => rsi < params.rsi_oversold,
    };
    if vetoed {
        debug!("{:?} crossover vetoed by RSI {:.1}", crossover, rsi);
        return Ok(None);
    }

    let agrees = |v: f64| match crossover {
        Crossover::Up => v > 0.0,
        Crossover::Down => v < 0.0,
    };
    let mut confirmations = 0;

    if trend.len() >= params.trend_period {
        let trend_closes: Vec<f64> = trend.iter().map(|c| c.close).collect();
        let trend_ma = ma_series(params.trend_indicator, params.trend_period, &trend_closes)?;
        if let (Some(close), Some(ma)) = (trend_closes.last(), trend_ma.last()) {
            if agrees(close - ma) {
                confirmations += 1;
            }
        }
    }

    let mut macd =
        MovingAverageConvergenceDivergence::new(params.macd_fast, params.macd_slow, params.macd_signal)
            .map_err(|e| anyhow!("MACD rejected: {:?}", e))?;
    let histogram = closes.iter().fold(0.0, |_, c| macd.next(*c).histogram);
    if agrees(histogram) {
        confirmations += 1;
    }

    if params.volume_filter_enabled && signal.len() >= params.volume_ma_period {
        let volumes: Vec<f64> = signal.iter().map(|c| c.volume).collect();
        let volume_ma = ma_series(MovingAverageKind::Sma, params.volume_ma_period, &volumes)?;
        if volumes[n - 1] > volume_ma[n - 1] * params.volume_spike_multiplier {
            confirmations += 1;
        }
    }

    let strength = match confirmations {
        3 => SignalStrength::Strong,
        2 => SignalStrength::Medium,
        _ => SignalStrength::Low,
    };
    Ok(Some(Evaluation {
        crossover,
        strength,
        confirmations,
        rsi,
    }))
}

/// Scans each asset of a strategy with technical indicators over exchange candles.
pub struct IndicatorScanner {
    source: Arc<dyn CandleSource>,
    history: usize,
}

impl IndicatorScanner {
    pub fn new(source: Arc<dyn CandleSource>) -> Self {
        Self {
            source,
            history: 300,
        }
    }

    async fn scan_asset(
        &self,
        params: &IndicatorParams,
        symbol: &str,
    ) -> anyhow::Result<Option<ScannedSignal>> {
        let signal = self
            .source
            .candles(symbol, params.granularity_signal, self.history)
            .await?;
        let trend = self
            .source
            .candles(symbol, params.granularity_trend, self.history)
            .await?;

        let Some(eval) = evaluate(params, &signal, &trend)? else {
            return Ok(None);
        };
        let Some(last) = signal.last() else {
            return Ok(None);
        };
        let price = Decimal::from_f64(last.close)
            .map(|p| p.round_dp(8))
            .with_context(|| format!("Unrepresentable close {} for {}", last.close, symbol))?;

        Ok(Some(ScannedSignal {
            symbol: symbol.to_string(),
            signal_type: eval.crossover.signal_type(),
            strength: eval.strength,
            price,
        }))
    }
}

#[async_trait]
impl SignalScanner for IndicatorScanner {
    async fn scan(&self, strategy: &StrategyConfig) -> anyhow::Result<Vec<ScannedSignal>> {
        let mut found = Vec::new();
        let mut failures = 0;

        for symbol in &strategy.assets {
            match self.scan_asset(&strategy.params, symbol).await {
                Ok(Some(signal)) => {
                    info!(
                        "[{}] {} {} ({})",
                        strategy.scanner_name, signal.signal_type, symbol, signal.strength
                    );
                    found.push(signal);
                }
                Ok(None) => debug!("[{}] no signal for {}", strategy.scanner_name, symbol),
                Err(e) => {
                    failures += 1;
                    warn!("[{}] scan of {} failed: {:#}", strategy.scanner_name, symbol, e);
                }
            }
        }

        if failures > 0 && failures == strategy.assets.len() {
            bail!("every asset of {} failed to scan", strategy.scanner_name);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use common::models::Granularity;
    use crate::registry::StrategyRegistry;

    fn bars(closes: &[f64], volumes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (c, v))| Candle {
                time: 300 * i as i64,
                low: c - 0.5,
                high: c + 0.5,
                open: *c,
                close: *c,
                volume: *v,
            })
            .collect()
    }

    /// Slide from 100 down to 41, then a jump to `last`.
    fn decline_then(last: f64) -> Vec<f64> {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 - i as f64).collect();
        closes.push(last);
        closes
    }

    /// Climb from 100 up to 159, then a drop to `last`.
    fn rally_then(last: f64) -> Vec<f64> {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        closes.push(last);
        closes
    }

    fn params() -> IndicatorParams {
        let registry = StrategyRegistry::with_defaults(&HashMap::new());
        let mut params = registry.get("day").unwrap().params.clone();
        params.rsi_overbought = 101.0;
        params.rsi_oversold = -1.0;
        params.volume_filter_enabled = false;
        params
    }

    #[test]
    fn test_upward_cross_is_a_buy() {
        let closes = decline_then(150.0);
        let candles = bars(&closes, &vec![10.0; closes.len()]);

        let eval = evaluate(&params(), &candles, &candles).unwrap().unwrap();
        assert_eq!(eval.crossover, Crossover::Up);
        assert_eq!(eval.crossover.signal_type(), SignalType::Buy);
        assert_eq!(eval.confirmations, 2);
        assert_eq!(eval.strength, SignalStrength::Medium);
    }

    #[test]
    fn test_downward_cross_is_a_sell() {
        let closes = rally_then(50.0);
        let candles = bars(&closes, &vec![10.0; closes.len()]);

        let eval = evaluate(&params(), &candles, &candles).unwrap().unwrap();
        assert_eq!(eval.crossover, Crossover::Down);
        assert_eq!(eval.strength, SignalStrength::Medium);
    }

    #[test]
    fn test_volume_spike_makes_it_strong() {
        let closes = decline_then(150.0);
        let mut volumes = vec![10.0; closes.len()];
        if let Some(v) = volumes.last_mut() {
            *v = 40.0;
        }
        let candles = bars(&closes, &volumes);
        let mut params = params();
        params.volume_filter_enabled = true;

        let eval = evaluate(&params, &candles, &candles).unwrap().unwrap();
        assert_eq!(eval.confirmations, 3);
        assert_eq!(eval.strength, SignalStrength::Strong);
    }

    #[test]
    fn test_overbought_rsi_vetoes_the_buy() {
        let closes = decline_then(150.0);
        let candles = bars(&closes, &vec![10.0; closes.len()]);
        let mut params = params();
        params.rsi_overbought = 70.0;

        assert!(evaluate(&params, &candles, &candles).unwrap().is_none());
    }

    #[test]
    fn test_steady_trend_has_no_crossover() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let candles = bars(&closes, &vec![10.0; closes.len()]);
        assert!(evaluate(&params(), &candles, &candles).unwrap().is_none());
    }

    #[test]
    fn test_short_history_yields_nothing() {
        let closes = [100.0, 90.0, 120.0];
        let candles = bars(&closes, &[1.0, 1.0, 1.0]);
        assert!(evaluate(&params(), &candles, &candles).unwrap().is_none());
    }

    struct FixedCandles {
        closes: Vec<f64>,
    }

    #[async_trait]
    impl CandleSource for FixedCandles {
        async fn candles(
            &self,
            product: &str,
            _granularity: Granularity,
            _limit: usize,
        ) -> anyhow::Result<Vec<Candle>> {
            if product == "BAD-USD" {
                bail!("HTTP 404 from exchange");
            }
            Ok(bars(&self.closes, &vec![10.0; self.closes.len()]))
        }
    }

    #[tokio::test]
    async fn test_scan_skips_failing_assets_and_reports_last_close() {
        let scanner = IndicatorScanner::new(Arc::new(FixedCandles {
            closes: decline_then(150.0),
        }));
        let mut strategy = StrategyRegistry::with_defaults(&HashMap::new())
            .get("day")
            .unwrap()
            .clone();
        strategy.params = params();
        strategy.assets = vec!["BAD-USD".to_string(), "BTC-USD".to_string()];

        let found = scanner.scan(&strategy).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "BTC-USD");
        assert_eq!(found[0].signal_type, SignalType::Buy);
        assert_eq!(found[0].price, Decimal::from(150));

        strategy.assets = vec!["BAD-USD".to_string()];
        assert!(scanner.scan(&strategy).await.is_err());
    }
}
