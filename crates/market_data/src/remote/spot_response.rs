use std::str::FromStr;

use anyhow::{Context, bail};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Body of `GET /v2/prices/{pair}/spot`.
#[derive(Debug, Deserialize)]
pub struct SpotPriceResponse {
    pub data: SpotPrice,
}

#[derive(Debug, Deserialize)]
pub struct SpotPrice {
    pub amount: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl SpotPriceResponse {
    pub fn price(&self) -> anyhow::Result<Decimal> {
        let price = Decimal::from_str(self.data.amount.trim())
            .with_context(|| format!("Invalid spot amount {:?}", self.data.amount))?;
        if price <= Decimal::ZERO {
            bail!("Non-positive spot price {}", price);
        }
        Ok(price)
    }
}
