use serde::Deserialize;

use crate::traits::Candle;

/// Body of the exchange candles endpoint: `[time, low, high, open, close, volume]` rows, newest first.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct CandleRows(pub Vec<(i64, f64, f64, f64, f64, f64)>);

impl CandleRows {
    /// Oldest first.
    pub fn into_candles(self) -> Vec<Candle> {
        let mut candles: Vec<Candle> = self
            .0
            .into_iter()
            .map(|(time, low, high, open, close, volume)| Candle {
                time,
                low,
                high,
                open,
                close,
                volume,
            })
            .collect();
        candles.sort_by_key(|c| c.time);
        candles.dedup_by_key(|c| c.time);
        candles
    }
}

/// Rolls oldest-first bars up into `bucket_secs` buckets aligned on the unix epoch.
/// A leading bucket with fewer than `per_bucket` bars is cut off by the fetch window and dropped.
pub fn aggregate(candles: &[Candle], bucket_secs: i64, per_bucket: usize) -> Vec<Candle> {
    let mut groups: Vec<(Candle, usize)> = Vec::new();

    for c in candles {
        let start = c.time.div_euclid(bucket_secs) * bucket_secs;
        match groups.last_mut() {
            Some((agg, count)) if agg.time == start => {
                agg.high = agg.high.max(c.high);
                agg.low = agg.low.min(c.low);
                agg.close = c.close;
                agg.volume += c.volume;
                *count += 1;
            }
            _ => groups.push((Candle { time: start, ..*c }, 1)),
        }
    }

    if matches!(groups.first(), Some((_, count)) if *count < per_bucket) {
        groups.remove(0);
    }
    groups.into_iter().map(|(c, _)| c).collect()
}
