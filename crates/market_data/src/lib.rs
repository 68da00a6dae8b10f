pub mod remote;
pub mod traits;

pub use remote::CoinbaseClient;
pub use traits::{Candle, CandleSource, PriceOracle};
