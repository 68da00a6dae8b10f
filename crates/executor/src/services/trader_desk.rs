use std::fmt::Write as _;
use std::sync::Arc;

use common::models::{BASE_CURRENCY, SignalStrength, SignalType, TradeSignal};
use market_data::PriceOracle;
use rust_decimal::Decimal;
use storage::{LedgerError, LedgerStore};
use strategy::{RegistryError, StrategyRegistry};
use teloxide::utils::command::BotCommands;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::services::signal_monitor::{ScanOutcome, SignalMonitor};
use crate::services::telegram_service::Command;
use crate::services::trading_engine::{TradeOutcome, TradingEngine, units};

const MANUAL_TAG: &str = "MANUAL";
const DEFAULT_HISTORY_LIMIT: u32 = 10;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid {what}: '{value}'")]
    Invalid { what: &'static str, value: String },
    #[error("Coin must be a USD pair like BTC-USD, got '{0}'")]
    NotUsdPair(String),
    #[error("{0}")]
    Registry(#[from] RegistryError),
    #[error("Could not get a price for {0}")]
    PriceUnavailable(String),
    #[error("Storage error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Executes chat commands against the trading core and renders the replies.
pub struct TraderDesk {
    ledger: Arc<dyn LedgerStore>,
    engine: Arc<TradingEngine>,
    oracle: Arc<dyn PriceOracle>,
    registry: Arc<RwLock<StrategyRegistry>>,
    monitor: Arc<SignalMonitor>,
}

impl TraderDesk {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        engine: Arc<TradingEngine>,
        oracle: Arc<dyn PriceOracle>,
        registry: Arc<RwLock<StrategyRegistry>>,
        monitor: Arc<SignalMonitor>,
    ) -> Self {
        Self {
            ledger,
            engine,
            oracle,
            registry,
            monitor,
        }
    }

    /// Reply text for one command. Failures become a `❌` line.
    pub async fn handle(&self, cmd: Command, requester: &str) -> String {
        let result = match cmd {
            Command::Help => Ok(Command::descriptions().to_string()),
            Command::Portfolio => self.portfolio().await,
            Command::Balance(args) => self.balance(&args).await,
            Command::History(args) => self.history(&args).await,
            Command::Buy(args) => self.buy(&args, requester).await,
            Command::Sell(args) => self.sell(&args, requester).await,
            Command::AddCoin(args) => self.add_coin(&args).await,
            Command::RemoveCoin(args) => self.remove_coin(&args).await,
            Command::Signals(args) => self.signals(&args).await,
            Command::Signal(args) => self.signal(&args).await,
            Command::Status => Ok(self.status().await),
            Command::StartMonitor => Ok(self.start_monitor()),
            Command::StopMonitor => Ok(self.stop_monitor()),
        };

        result.unwrap_or_else(|e| {
            warn!("Command from {} failed: {}", requester, e);
            format!("❌ {}", e)
        })
    }

    pub async fn portfolio(&self) -> Result<String, CommandError> {
        let holdings = self.ledger.portfolio_summary().await?;
        if holdings.is_empty() {
            return Ok("💼 Portfolio is empty".to_string());
        }

        let mut total = Decimal::ZERO;
        let mut reply = String::from("💼 Portfolio\n");
        for holding in holdings {
            if holding.symbol == BASE_CURRENCY {
                total = total.saturating_add(holding.amount);
                let _ = writeln!(reply, "💵 {}: ${:.2}", BASE_CURRENCY, holding.amount);
                continue;
            }
            let value = self
                .oracle
                .spot_price(&holding.symbol)
                .await
                .and_then(|price| {
                    holding
                        .amount
                        .checked_mul(price)
                        .map(|value| (price, value))
                        .ok_or_else(|| anyhow::anyhow!("value overflows"))
                });
            match value {
                Ok((price, value)) => {
                    total = total.saturating_add(value);
                    let _ = writeln!(
                        reply,
                        "🪙 {}: {} @ ${} = ${:.2}",
                        holding.symbol,
                        holding.amount.normalize(),
                        price.normalize(),
                        value
                    );
                }
                Err(e) => {
                    warn!("No price for {}: {:#}", holding.symbol, e);
                    let _ = writeln!(
                        reply,
                        "🪙 {}: {} (price unavailable)",
                        holding.symbol,
                        holding.amount.normalize()
                    );
                }
            }
        }
        let _ = write!(reply, "📊 Total: ${:.2}", total);
        Ok(reply)
    }

    pub async fn balance(&self, args: &str) -> Result<String, CommandError> {
        let [symbol] = split_args::<1>(args).ok_or(CommandError::Usage("/balance <coin>"))?;
        let symbol = symbol.to_uppercase();
        let amount = self.ledger.get_balance(&symbol).await?;

        if symbol == BASE_CURRENCY {
            return Ok(format!("💵 {} balance: ${:.2}", BASE_CURRENCY, amount));
        }
        let mut reply = format!("🪙 {} balance: {}", symbol, amount.normalize());
        if amount > Decimal::ZERO {
            if let Ok(price) = self.oracle.spot_price(&symbol).await {
                if let Some(value) = amount.checked_mul(price) {
                    let _ = write!(reply, " @ ${} = ${:.2}", price.normalize(), value);
                }
            }
        }
        Ok(reply)
    }

    pub async fn history(&self, args: &str) -> Result<String, CommandError> {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        let (symbol, limit) = match tokens.as_slice() {
            [] => (None, DEFAULT_HISTORY_LIMIT),
            [one] => match one.parse::<u32>() {
                Ok(limit) => (None, limit),
                Err(_) => (Some(one.to_uppercase()), DEFAULT_HISTORY_LIMIT),
            },
            [symbol, limit] => (Some(symbol.to_uppercase()), parse_limit(limit)?),
            _ => return Err(CommandError::Usage("/history [coin] [limit]")),
        };

        let transactions = self
            .ledger
            .transaction_history(symbol.as_deref(), limit)
            .await?;
        if transactions.is_empty() {
            return Ok("📜 No transactions found".to_string());
        }

        let mut reply = String::from("📜 Transaction history\n");
        for tx in transactions {
            let _ = writeln!(
                reply,
                "{} {} {} {} @ ${} = ${:.2} [{}]",
                tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
                tx.transaction_type,
                tx.amount.normalize(),
                tx.symbol,
                tx.price.normalize(),
                tx.total_value,
                tx.strategy_tag
            );
        }
        Ok(reply.trim_end().to_string())
    }

    pub async fn buy(&self, args: &str, requester: &str) -> Result<String, CommandError> {
        let [symbol, usd] = split_args::<2>(args).ok_or(CommandError::Usage("/buy <coin> <usd_amount>"))?;
        let symbol = symbol.to_uppercase();
        let usd = parse_positive("USD amount", usd)?;
        let price = self.price(&symbol).await?;
        let amount = usd
            .checked_div(price)
            .map(units)
            .ok_or_else(|| CommandError::Invalid {
                what: "USD amount",
                value: usd.to_string(),
            })?;

        info!("Manual buy by {}: ${} of {}", requester, usd, symbol);
        let outcome = self
            .engine
            .execute_buy(&symbol, amount, price, MANUAL_TAG, Some(&manual_id(requester)))
            .await?;
        Ok(render_outcome("Buy", outcome))
    }

    pub async fn sell(&self, args: &str, requester: &str) -> Result<String, CommandError> {
        let [symbol, amount] = split_args::<2>(args).ok_or(CommandError::Usage("/sell <coin> <amount>"))?;
        let symbol = symbol.to_uppercase();
        let amount = parse_positive("amount", amount)?;
        let price = self.price(&symbol).await?;

        info!("Manual sell by {}: {} {}", requester, amount, symbol);
        let outcome = self
            .engine
            .execute_sell(&symbol, amount, price, MANUAL_TAG, Some(&manual_id(requester)))
            .await?;
        Ok(render_outcome("Sell", outcome))
    }

    pub async fn add_coin(&self, args: &str) -> Result<String, CommandError> {
        let [key, coin] = split_args::<2>(args).ok_or(CommandError::Usage("/addcoin <strategy> <coin>"))?;
        let key = key.to_lowercase();
        let coin = usd_pair(coin)?;

        let mut registry = self.registry.write().await;
        if registry.add_asset(&key, &coin)? {
            info!("{} added to {}", coin, key);
            Ok(format!(
                "✅ Added {} to {} ({})",
                coin,
                key,
                registry.assets(&key)?.join(", ")
            ))
        } else {
            Ok(format!("ℹ️ {} is already tracked by {}", coin, key))
        }
    }

    pub async fn remove_coin(&self, args: &str) -> Result<String, CommandError> {
        let [key, coin] = split_args::<2>(args).ok_or(CommandError::Usage("/removecoin <strategy> <coin>"))?;
        let key = key.to_lowercase();
        let coin = usd_pair(coin)?;

        let mut registry = self.registry.write().await;
        if registry.remove_asset(&key, &coin)? {
            info!("{} removed from {}", coin, key);
            Ok(format!("✅ Removed {} from {}", coin, key))
        } else {
            Ok(format!("ℹ️ {} is not tracked by {}", coin, key))
        }
    }

    pub async fn signals(&self, args: &str) -> Result<String, CommandError> {
        let mut tokens: Vec<&str> = args.split_whitespace().collect();
        let limit = match tokens.last() {
            Some(last) if last.parse::<u32>().is_ok() => {
                let limit = parse_limit(last)?;
                tokens.pop();
                limit
            }
            _ => DEFAULT_HISTORY_LIMIT,
        };
        let (strategy, symbol) = match tokens.as_slice() {
            [] => (None, None),
            [one] if one.to_uppercase().ends_with("-USD") => (None, Some(one.to_uppercase())),
            [one] => (Some(one.to_string()), None),
            [strategy, symbol] => (Some(strategy.to_string()), Some(symbol.to_uppercase())),
            _ => return Err(CommandError::Usage("/signals [strategy] [coin] [limit]")),
        };

        let signals = self
            .ledger
            .signal_history(strategy.as_deref(), symbol.as_deref(), limit)
            .await?;
        if signals.is_empty() {
            return Ok("📡 No signals found".to_string());
        }

        let mut reply = String::from("📡 Signal history\n");
        for signal in signals {
            let _ = write!(
                reply,
                "{} {} {} {} @ ${} [{}]",
                signal.timestamp.format("%Y-%m-%d %H:%M:%S"),
                signal.signal_type,
                signal.symbol,
                signal.strength,
                signal.price.normalize(),
                signal.strategy_name
            );
            if signal.executed {
                reply.push_str(" ✅");
            }
            if let Some(notes) = &signal.notes {
                let _ = write!(reply, " ({})", notes);
            }
            reply.push('\n');
        }
        Ok(reply.trim_end().to_string())
    }

    /// Records a MANUAL signal at the spot price and runs it through the engine.
    pub async fn signal(&self, args: &str) -> Result<String, CommandError> {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        let (coin, strength, kind) = match tokens.as_slice() {
            [coin, strength] => (*coin, *strength, "BUY"),
            [coin, strength, kind] => (*coin, *strength, *kind),
            _ => return Err(CommandError::Usage("/signal <coin> <Low|Medium|Strong> [BUY|SELL]")),
        };
        let coin = usd_pair(coin)?;
        let strength = match SignalStrength::parse(strength) {
            SignalStrength::Unrecognized => {
                return Err(CommandError::Invalid {
                    what: "strength",
                    value: strength.to_string(),
                });
            }
            known => known,
        };
        let kind = SignalType::parse(kind);
        if !kind.is_actionable() {
            return Err(CommandError::Invalid {
                what: "signal type",
                value: kind.to_string(),
            });
        }

        let price = self.price(&coin).await?;
        let signal = TradeSignal::new(MANUAL_TAG, &coin, kind, strength, price);
        self.ledger.save_signal(&signal).await?;

        match self.engine.execute_signal(&signal).await? {
            TradeOutcome::Executed(receipt) => {
                self.ledger
                    .mark_signal_executed(&signal.signal_id, receipt.timestamp, Some("manual test"))
                    .await?;
                Ok(format!("🧪 Test signal executed\n{}", receipt))
            }
            TradeOutcome::Rejected(reason) => Ok(format!(
                "🧪 Test signal {} recorded, not executed: {}",
                signal.signal_id, reason
            )),
        }
    }

    pub async fn status(&self) -> String {
        let state = if self.monitor.switch().is_running() {
            "🟢 Running"
        } else {
            "🔴 Stopped"
        };
        let mut reply = format!("🛰️ Signal monitor: {}\n", state);

        let strategies = self.registry.read().await.strategies().to_vec();
        for strategy in strategies {
            let _ = write!(
                reply,
                "\n{} ({}) every {}m\nCoins: {}\n",
                strategy.name,
                strategy.key,
                strategy.poll_interval.as_secs() / 60,
                strategy.assets.join(", ")
            );
            let last = match self.monitor.report(&strategy.key).await {
                None => "Last scan: never".to_string(),
                Some(report) => match report.outcome {
                    ScanOutcome::Signals(found) => format!(
                        "Last scan: {} UTC, {} signals, {} trades",
                        report.scanned_at.format("%Y-%m-%d %H:%M:%S"),
                        found,
                        report.trades_executed
                    ),
                    ScanOutcome::Failed(reason) => format!(
                        "Last scan: {} UTC, failed: {}",
                        report.scanned_at.format("%Y-%m-%d %H:%M:%S"),
                        reason
                    ),
                },
            };
            reply.push_str(&last);
            reply.push('\n');
        }
        reply.trim_end().to_string()
    }

    pub fn start_monitor(&self) -> String {
        if self.monitor.switch().start() {
            info!("Signal monitor started from chat");
            "🟢 Signal monitor started".to_string()
        } else {
            "ℹ️ Signal monitor is already running".to_string()
        }
    }

    pub fn stop_monitor(&self) -> String {
        if self.monitor.switch().stop() {
            info!("Signal monitor stopped from chat");
            "🔴 Signal monitor stopped".to_string()
        } else {
            "ℹ️ Signal monitor is already stopped".to_string()
        }
    }

    async fn price(&self, symbol: &str) -> Result<Decimal, CommandError> {
        self.oracle.spot_price(symbol).await.map_err(|e| {
            warn!("Spot price for {} failed: {:#}", symbol, e);
            CommandError::PriceUnavailable(symbol.to_string())
        })
    }
}

fn split_args<const N: usize>(args: &str) -> Option<[&str; N]> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    tokens.try_into().ok()
}

fn parse_positive(what: &'static str, raw: &str) -> Result<Decimal, CommandError> {
    raw.parse::<Decimal>()
        .ok()
        .filter(|v| *v > Decimal::ZERO)
        .ok_or_else(|| CommandError::Invalid {
            what,
            value: raw.to_string(),
        })
}

fn parse_limit(raw: &str) -> Result<u32, CommandError> {
    raw.parse::<u32>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| CommandError::Invalid {
            what: "limit",
            value: raw.to_string(),
        })
}

fn usd_pair(raw: &str) -> Result<String, CommandError> {
    let coin = raw.to_uppercase();
    if coin.len() > 4 && coin.ends_with("-USD") {
        Ok(coin)
    } else {
        Err(CommandError::NotUsdPair(raw.to_string()))
    }
}

fn manual_id(requester: &str) -> String {
    format!("manual_{}", requester)
}

fn render_outcome(action: &str, outcome: TradeOutcome) -> String {
    match outcome {
        TradeOutcome::Executed(receipt) => format!("✅ {} executed\n{}", action, receipt),
        TradeOutcome::Rejected(reason) => format!("❌ {} rejected: {}", action, reason),
    }
}
