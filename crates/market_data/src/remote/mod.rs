pub mod candle_response;
pub mod coinbase_client;
pub mod spot_response;

pub use candle_response::{CandleRows, aggregate};
pub use coinbase_client::CoinbaseClient;
pub use spot_response::SpotPriceResponse;
