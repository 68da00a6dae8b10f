use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}={value} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseConfig {
    /// File-embedded ledger at `path`.
    Sqlite { path: PathBuf },
    /// Client/server ledger.
    Postgres {
        host: String,
        port: u16,
        name: String,
        user: String,
        password: String,
    },
}

impl DatabaseConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } => "sqlite",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Fractions of the available balance committed per strength tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingConfig {
    pub low: Decimal,
    pub medium: Decimal,
    pub strong: Decimal,
    pub fallback: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            low: Decimal::new(25, 2),
            medium: Decimal::new(50, 2),
            strong: Decimal::new(75, 2),
            fallback: Decimal::new(25, 2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    /// Where trade notifications go. Notifications are off when unset.
    pub telegram_chat_id: Option<i64>,
    pub database: DatabaseConfig,
    /// Asset universe overrides keyed by strategy key (`day`, `swing`, `long`).
    pub strategy_assets: HashMap<String, Vec<String>>,
    pub initial_balance: Decimal,
    pub monitor_tick: Duration,
    pub sizing: SizingConfig,
    pub coinbase_api_url: String,
    pub coinbase_exchange_url: String,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram_token = get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let telegram_chat_id = match get("TELEGRAM_CHAT_ID") {
            Some(raw) => Some(parse_value("TELEGRAM_CHAT_ID", &raw)?),
            None => None,
        };

        let database = match get("VIRTUAL_TRADER_DATABASE_TYPE")
            .unwrap_or_else(|| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => {
                let workdir = get("WORKDIR").unwrap_or_else(|| ".".to_string());
                DatabaseConfig::Sqlite {
                    path: PathBuf::from(workdir)
                        .join("sqlitedata")
                        .join("virtual_trader.db"),
                }
            }
            "postgres" | "postgresql" => DatabaseConfig::Postgres {
                host: get("VIRTUAL_TRADER_DATABASE_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: match get("VIRTUAL_TRADER_DATABASE_PORT") {
                    Some(raw) => parse_value("VIRTUAL_TRADER_DATABASE_PORT", &raw)?,
                    None => 5432,
                },
                name: get("VIRTUAL_TRADER_DATABASE_NAME").unwrap_or_else(|| "virtualtrader".to_string()),
                user: get("VIRTUAL_TRADER_DATABASE_USER").unwrap_or_else(|| "trader".to_string()),
                password: get("VIRTUAL_TRADER_DATABASE_PASSWORD").unwrap_or_default(),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "VIRTUAL_TRADER_DATABASE_TYPE",
                    value: other.to_string(),
                    reason: "expected sqlite or postgres".to_string(),
                });
            }
        };

        let mut strategy_assets = HashMap::new();
        for (key, var) in [
            ("day", "VIRTUAL_TRADER_DAY_STRATEGY_COINS"),
            ("swing", "VIRTUAL_TRADER_SWING_STRATEGY_COINS"),
            ("long", "VIRTUAL_TRADER_LONG_STRATEGY_COINS"),
        ] {
            if let Some(raw) = get(var) {
                strategy_assets.insert(key.to_string(), parse_coin_list(&raw));
            }
        }

        let initial_balance = match get("VIRTUAL_TRADER_INITIAL_BALANCE") {
            Some(raw) => {
                let v: Decimal = parse_value("VIRTUAL_TRADER_INITIAL_BALANCE", &raw)?;
                if v <= Decimal::ZERO {
                    return Err(ConfigError::Invalid {
                        key: "VIRTUAL_TRADER_INITIAL_BALANCE",
                        value: raw,
                        reason: "must be positive".to_string(),
                    });
                }
                v
            }
            None => Decimal::from(10_000),
        };

        let monitor_tick = match get("MONITOR_TICK_SECS") {
            Some(raw) => {
                let secs: u64 = parse_value("MONITOR_TICK_SECS", &raw)?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        key: "MONITOR_TICK_SECS",
                        value: raw,
                        reason: "must be at least 1".to_string(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(60),
        };

        let defaults = SizingConfig::default();
        let sizing = SizingConfig {
            low: fraction(&get, "VIRTUAL_TRADER_SIZING_LOW", defaults.low)?,
            medium: fraction(&get, "VIRTUAL_TRADER_SIZING_MEDIUM", defaults.medium)?,
            strong: fraction(&get, "VIRTUAL_TRADER_SIZING_STRONG", defaults.strong)?,
            fallback: fraction(&get, "VIRTUAL_TRADER_SIZING_DEFAULT", defaults.fallback)?,
        };

        Ok(Self {
            telegram_token,
            telegram_chat_id,
            database,
            strategy_assets,
            initial_balance,
            monitor_tick,
            sizing,
            coinbase_api_url: get("COINBASE_API_URL").unwrap_or_else(|| "https://api.coinbase.com".to_string()),
            coinbase_exchange_url: get("COINBASE_EXCHANGE_URL")
                .unwrap_or_else(|| "https://api.exchange.coinbase.com".to_string()),
        })
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn fraction<G>(get: &G, key: &'static str, default: Decimal) -> Result<Decimal, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    let v: Decimal = parse_value(key, &raw)?;
    if v <= Decimal::ZERO || v > Decimal::ONE {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be in (0, 1]".to_string(),
        });
    }
    Ok(v)
}

/// `"avax-usd, SOL-USD,,sol-usd"` -> `["AVAX-USD", "SOL-USD"]`
pub fn parse_coin_list(raw: &str) -> Vec<String> {
    let mut coins: Vec<String> = Vec::new();
    for coin in raw.split(',').map(|c| c.trim().to_uppercase()) {
        if !coin.is_empty() && !coins.contains(&coin) {
            coins.push(coin);
        }
    }
    coins
}
