use async_trait::async_trait;
use common::models::Granularity;
use rust_decimal::Decimal;

/// One OHLCV bar. `time` is the bucket start in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub time: i64,
    pub low: f64,
    pub high: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
}

/// Current market price for a pair such as `BTC-USD`.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn spot_price(&self, symbol: &str) -> anyhow::Result<Decimal>;
}

#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Oldest first, at most `limit` bars.
    async fn candles(
        &self,
        product: &str,
        granularity: Granularity,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;
}
