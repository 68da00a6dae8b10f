use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct AssetBalance {
    pub symbol: String,
    pub amount: Decimal,
    pub last_updated: DateTime<Utc>,
}
