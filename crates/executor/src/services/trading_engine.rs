use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::config::SizingConfig;
use common::models::{
    BASE_CURRENCY, NewTransaction, SignalStrength, SignalType, TradeSignal, TransactionType,
};
use rust_decimal::{Decimal, RoundingStrategy};
use storage::{BalanceChange, LedgerError, LedgerStore, TradeLegs};
use tracing::{info, warn};

use crate::services::symbol_locks::SymbolLocks;

/// Units are truncated to this many decimals so the cost never exceeds the sized budget.
const UNIT_DECIMALS: u32 = 8;

/// Fraction of the available balance committed per signal strength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingPolicy {
    pub low: Decimal,
    pub medium: Decimal,
    pub strong: Decimal,
    pub fallback: Decimal,
}

impl SizingPolicy {
    pub fn fraction(&self, strength: SignalStrength) -> Decimal {
        match strength {
            SignalStrength::Low => self.low,
            SignalStrength::Medium => self.medium,
            SignalStrength::Strong => self.strong,
            SignalStrength::Unrecognized => self.fallback,
        }
    }
}

impl Default for SizingPolicy {
    fn default() -> Self {
        SizingConfig::default().into()
    }
}

impl From<SizingConfig> for SizingPolicy {
    fn from(cfg: SizingConfig) -> Self {
        Self {
            low: cfg.low,
            medium: cfg.medium,
            strong: cfg.strong,
            fallback: cfg.fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeReceipt {
    pub side: TradeSide,
    pub symbol: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub total_value: Decimal,
    pub strategy_tag: String,
    pub signal_id: Option<String>,
    pub base_balance: Decimal,
    pub asset_balance: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TradeReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.side {
            TradeSide::Buy => "🟢",
            TradeSide::Sell => "🔴",
        };
        write!(
            f,
            "{} {} {} {} @ ${} (${:.2}) [{}]\nBalance: {} {} | ${:.2} {}",
            icon,
            self.side,
            self.amount.normalize(),
            self.symbol,
            self.price.normalize(),
            self.total_value,
            self.strategy_tag,
            self.asset_balance.normalize(),
            self.symbol,
            self.base_balance,
            BASE_CURRENCY
        )
    }
}

/// Why a trade was refused. Refusals leave the ledger untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeRejection {
    BaseCurrency(String),
    NonPositive { amount: Decimal, price: Decimal },
    InsufficientFunds {
        symbol: String,
        available: Decimal,
        required: Decimal,
    },
    NothingToSell(String),
    NotActionable(String),
    /// The trade value or a resulting balance does not fit a `Decimal`.
    Unrepresentable(String),
}

impl fmt::Display for TradeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaseCurrency(symbol) => {
                write!(f, "{} is the wallet currency and cannot be traded", symbol)
            }
            Self::NonPositive { amount, price } => {
                write!(f, "amount ({}) and price ({}) must be positive", amount, price)
            }
            Self::InsufficientFunds {
                symbol,
                available,
                required,
            } => write!(
                f,
                "insufficient {}: need {}, have {}",
                symbol,
                required.normalize(),
                available.normalize()
            ),
            Self::NothingToSell(symbol) => write!(f, "no {} to sell", symbol),
            Self::NotActionable(kind) => write!(f, "{} signals are not traded", kind),
            Self::Unrepresentable(symbol) => {
                write!(f, "{} trade value is too large to represent", symbol)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    Executed(TradeReceipt),
    Rejected(TradeRejection),
}

impl TradeOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }
}

/// Paper-trades against the ledger. Every trade moves one asset against the base currency.
pub struct TradingEngine {
    ledger: Arc<dyn LedgerStore>,
    locks: SymbolLocks,
    sizing: SizingPolicy,
    max_attempts: u32,
}

impl TradingEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>, sizing: SizingPolicy) -> Self {
        Self {
            ledger,
            locks: SymbolLocks::new(),
            sizing,
            max_attempts: 3,
        }
    }

    /// Budget for a signal: `available` times the strength fraction.
    pub fn size_trade(&self, strength: SignalStrength, available: Decimal) -> Decimal {
        available * self.sizing.fraction(strength)
    }

    pub async fn execute_buy(
        &self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        strategy_tag: &str,
        signal_id: Option<&str>,
    ) -> Result<TradeOutcome, LedgerError> {
        self.execute(TradeSide::Buy, symbol, amount, price, strategy_tag, signal_id)
            .await
    }

    pub async fn execute_sell(
        &self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        strategy_tag: &str,
        signal_id: Option<&str>,
    ) -> Result<TradeOutcome, LedgerError> {
        self.execute(TradeSide::Sell, symbol, amount, price, strategy_tag, signal_id)
            .await
    }

    /// Sizes the signal against the current balance and trades it at `signal.price`.
    /// The signal's strategy name is used as the strategy tag.
    pub async fn execute_signal(&self, signal: &TradeSignal) -> Result<TradeOutcome, LedgerError> {
        let tag = signal.strategy_name.as_str();
        let id = Some(signal.signal_id.as_str());

        match &signal.signal_type {
            SignalType::Buy => {
                if signal.price <= Decimal::ZERO {
                    return Ok(self.reject(
                        &signal.symbol,
                        TradeRejection::NonPositive {
                            amount: Decimal::ZERO,
                            price: signal.price,
                        },
                    ));
                }
                let available = self.ledger.get_balance(BASE_CURRENCY).await?;
                let budget = self.size_trade(signal.strength, available);
                let Some(amount) = budget.checked_div(signal.price).map(units) else {
                    return Ok(self.reject(
                        &signal.symbol,
                        TradeRejection::Unrepresentable(signal.symbol.clone()),
                    ));
                };
                self.execute_buy(&signal.symbol, amount, signal.price, tag, id)
                    .await
            }
            SignalType::Sell => {
                let held = self.ledger.get_balance(&signal.symbol).await?;
                if held <= Decimal::ZERO {
                    return Ok(self.reject(
                        &signal.symbol,
                        TradeRejection::NothingToSell(signal.symbol.clone()),
                    ));
                }
                let amount = units(self.size_trade(signal.strength, held));
                self.execute_sell(&signal.symbol, amount, signal.price, tag, id)
                    .await
            }
            SignalType::Other(kind) => Ok(self.reject(
                &signal.symbol,
                TradeRejection::NotActionable(kind.clone()),
            )),
        }
    }

    fn reject(&self, symbol: &str, rejection: TradeRejection) -> TradeOutcome {
        warn!("Trade on {} rejected: {}", symbol, rejection);
        TradeOutcome::Rejected(rejection)
    }

    async fn execute(
        &self,
        side: TradeSide,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        strategy_tag: &str,
        signal_id: Option<&str>,
    ) -> Result<TradeOutcome, LedgerError> {
        if symbol == BASE_CURRENCY {
            return Ok(self.reject(symbol, TradeRejection::BaseCurrency(symbol.to_string())));
        }
        if amount <= Decimal::ZERO || price <= Decimal::ZERO {
            return Ok(self.reject(symbol, TradeRejection::NonPositive { amount, price }));
        }

        let _guards = self.locks.acquire(&[BASE_CURRENCY, symbol]).await;
        let mut attempt = 1;

        loop {
            let base = self.ledger.get_balance(BASE_CURRENCY).await?;
            let held = self.ledger.get_balance(symbol).await?;

            let unrepresentable =
                || self.reject(symbol, TradeRejection::Unrepresentable(symbol.to_string()));
            let (total_value, base_after, held_after) = match side {
                TradeSide::Buy => {
                    let Some(total_value) = amount.checked_mul(price) else {
                        return Ok(unrepresentable());
                    };
                    if total_value > base {
                        return Ok(self.reject(
                            symbol,
                            TradeRejection::InsufficientFunds {
                                symbol: BASE_CURRENCY.to_string(),
                                available: base,
                                required: total_value,
                            },
                        ));
                    }
                    let Some(held_after) = held.checked_add(amount) else {
                        return Ok(unrepresentable());
                    };
                    (total_value, base - total_value, held_after)
                }
                TradeSide::Sell => {
                    if amount > held {
                        return Ok(self.reject(
                            symbol,
                            TradeRejection::InsufficientFunds {
                                symbol: symbol.to_string(),
                                available: held,
                                required: amount,
                            },
                        ));
                    }
                    let Some((total_value, base_after)) = amount
                        .checked_mul(price)
                        .and_then(|total| base.checked_add(total).map(|after| (total, after)))
                    else {
                        return Ok(unrepresentable());
                    };
                    (total_value, base_after, held - amount)
                }
            };

            let timestamp = Utc::now();
            let (asset_type, base_type) = match side {
                TradeSide::Buy => (TransactionType::Buy, TransactionType::Spend),
                TradeSide::Sell => (TransactionType::Sell, TransactionType::Receive),
            };
            let entry = |symbol: &str, kind, amount, price| NewTransaction {
                symbol: symbol.to_string(),
                transaction_type: kind,
                amount,
                price,
                strategy_tag: strategy_tag.to_string(),
                signal_id: signal_id.map(str::to_string),
                timestamp,
            };
            let legs = TradeLegs {
                asset: BalanceChange {
                    symbol: symbol.to_string(),
                    expected: held,
                    new_amount: held_after,
                },
                base: BalanceChange {
                    symbol: BASE_CURRENCY.to_string(),
                    expected: base,
                    new_amount: base_after,
                },
                asset_entry: entry(symbol, asset_type, amount, price),
                base_entry: entry(BASE_CURRENCY, base_type, total_value, Decimal::ONE),
            };

            match self.ledger.commit_trade(&legs).await {
                Ok(()) => {
                    info!(
                        "{} executed: {} {} @ {} (total {}, tag {})",
                        side, amount, symbol, price, total_value, strategy_tag
                    );
                    return Ok(TradeOutcome::Executed(TradeReceipt {
                        side,
                        symbol: symbol.to_string(),
                        amount,
                        price,
                        total_value,
                        strategy_tag: strategy_tag.to_string(),
                        signal_id: signal_id.map(str::to_string),
                        base_balance: base_after,
                        asset_balance: held_after,
                        timestamp,
                    }));
                }
                Err(LedgerError::StaleBalance { symbol: stale, .. }) if attempt < self.max_attempts => {
                    warn!(
                        "{} balance changed underneath {} {} (attempt {}/{}), retrying",
                        stale, side, symbol, attempt, self.max_attempts
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub(crate) fn units(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(UNIT_DECIMALS, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use storage::db::get_sqlite_memory_pool;
    use storage::repositories::SqliteLedger;

    async fn seeded(usd: Decimal) -> (Arc<dyn LedgerStore>, TradingEngine) {
        let ledger: Arc<dyn LedgerStore> =
            Arc::new(SqliteLedger::new(get_sqlite_memory_pool().await.unwrap()));
        ledger.seed_base_currency(BASE_CURRENCY, usd).await.unwrap();
        let engine = TradingEngine::new(ledger.clone(), SizingPolicy::default());
        (ledger, engine)
    }

    #[tokio::test]
    async fn test_buy_moves_both_balances_and_logs_a_pair() {
        let (ledger, engine) = seeded(dec!(10000)).await;

        let outcome = engine
            .execute_buy("BTC-USD", dec!(0.1), dec!(50000), "day", Some("sig-1"))
            .await
            .unwrap();

        assert!(outcome.is_executed());
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(5000));
        assert_eq!(ledger.get_balance("BTC-USD").await.unwrap(), dec!(0.1));

        let history = ledger.transaction_history(None, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        let (buy, spend) = history
            .iter()
            .fold((None, None), |(b, s), t| match t.transaction_type {
                TransactionType::Buy => (Some(t), s),
                TransactionType::Spend => (b, Some(t)),
                _ => (b, s),
            });
        let (buy, spend) = (buy.unwrap(), spend.unwrap());
        assert_eq!(buy.total_value, dec!(5000));
        assert_eq!(spend.amount, dec!(5000));
        assert_eq!(spend.price, dec!(1));
        assert_eq!(buy.signal_id, spend.signal_id);
        assert_eq!(buy.timestamp, spend.timestamp);
        assert_eq!(spend.strategy_tag, "day");
    }

    #[tokio::test]
    async fn test_overdraft_is_rejected_without_side_effects() {
        let (ledger, engine) = seeded(dec!(100)).await;

        let outcome = engine
            .execute_buy("ETH-USD", dec!(1), dec!(3000), "day", None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TradeOutcome::Rejected(TradeRejection::InsufficientFunds {
                symbol: "USD".to_string(),
                available: dec!(100),
                required: dec!(3000),
            })
        );
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(100));
        assert_eq!(ledger.get_balance("ETH-USD").await.unwrap(), dec!(0));
        assert_eq!(ledger.transaction_history(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_buy_of_exact_balance_empties_usd() {
        let (ledger, engine) = seeded(dec!(100)).await;
        let outcome = engine
            .execute_buy("SOL-USD", dec!(2), dec!(50), "MANUAL", None)
            .await
            .unwrap();
        assert!(outcome.is_executed());
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(0));
        let held: Vec<String> = ledger
            .portfolio_summary()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.symbol)
            .collect();
        assert_eq!(held, vec!["SOL-USD".to_string()]);
    }

    #[tokio::test]
    async fn test_sell_credits_usd_and_rejects_oversell() {
        let (ledger, engine) = seeded(dec!(10000)).await;
        engine
            .execute_buy("BTC-USD", dec!(0.1), dec!(50000), "day", None)
            .await
            .unwrap();

        let too_much = engine
            .execute_sell("BTC-USD", dec!(0.2), dec!(60000), "day", None)
            .await
            .unwrap();
        assert!(matches!(
            too_much,
            TradeOutcome::Rejected(TradeRejection::InsufficientFunds { .. })
        ));

        let outcome = engine
            .execute_sell("BTC-USD", dec!(0.1), dec!(60000), "day", Some("sig-2"))
            .await
            .unwrap();
        let TradeOutcome::Executed(receipt) = outcome else {
            panic!("sell should execute");
        };
        assert_eq!(receipt.total_value, dec!(6000));
        assert_eq!(receipt.asset_balance, dec!(0));
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(11000));
        assert_eq!(ledger.get_balance("BTC-USD").await.unwrap(), dec!(0));

        let latest = ledger.transaction_history(None, 2).await.unwrap();
        let kinds: Vec<TransactionType> = latest.iter().map(|t| t.transaction_type).collect();
        assert!(kinds.contains(&TransactionType::Sell));
        assert!(kinds.contains(&TransactionType::Receive));
    }

    #[tokio::test]
    async fn test_base_currency_and_non_positive_inputs_are_rejected() {
        let (ledger, engine) = seeded(dec!(10000)).await;

        for outcome in [
            engine.execute_buy("USD", dec!(1), dec!(1), "day", None).await.unwrap(),
            engine.execute_sell("USD", dec!(1), dec!(1), "day", None).await.unwrap(),
            engine.execute_buy("BTC-USD", dec!(0), dec!(50000), "day", None).await.unwrap(),
            engine.execute_buy("BTC-USD", dec!(1), dec!(-5), "day", None).await.unwrap(),
            engine.execute_sell("BTC-USD", dec!(-1), dec!(50000), "day", None).await.unwrap(),
        ] {
            assert!(!outcome.is_executed());
        }
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(10000));
        assert_eq!(ledger.transaction_history(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected_not_overflowed() {
        let (ledger, engine) = seeded(dec!(10000)).await;

        let sell = engine
            .execute_sell("BTC-USD", Decimal::MAX, dec!(50000), "MANUAL", None)
            .await
            .unwrap();
        assert_eq!(
            sell,
            TradeOutcome::Rejected(TradeRejection::InsufficientFunds {
                symbol: "BTC-USD".to_string(),
                available: dec!(0),
                required: Decimal::MAX,
            })
        );

        let buy = engine
            .execute_buy("BTC-USD", Decimal::MAX, dec!(50000), "MANUAL", None)
            .await
            .unwrap();
        assert_eq!(
            buy,
            TradeOutcome::Rejected(TradeRejection::Unrepresentable("BTC-USD".to_string()))
        );

        let dust = TradeSignal::new("day", "BTC-USD", SignalType::Buy, SignalStrength::Strong, dec!(0.0000000000000000000000000001));
        assert_eq!(
            engine.execute_signal(&dust).await.unwrap(),
            TradeOutcome::Rejected(TradeRejection::Unrepresentable("BTC-USD".to_string()))
        );

        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(10000));
        assert_eq!(ledger.transaction_history(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sell_whose_proceeds_overflow_is_rejected() {
        let (ledger, engine) = seeded(dec!(10000)).await;
        ledger.set_balance("BTC-USD", dec!(1000000)).await.unwrap();

        let outcome = engine
            .execute_sell("BTC-USD", dec!(1000000), Decimal::MAX, "MANUAL", None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TradeOutcome::Rejected(TradeRejection::Unrepresentable("BTC-USD".to_string()))
        );
        assert_eq!(ledger.get_balance("BTC-USD").await.unwrap(), dec!(1000000));
    }

    #[test]
    fn test_size_trade_table() {
        let engine_sizing = SizingPolicy::default();
        assert_eq!(engine_sizing.fraction(SignalStrength::Low), dec!(0.25));
        assert_eq!(engine_sizing.fraction(SignalStrength::Medium), dec!(0.5));
        assert_eq!(engine_sizing.fraction(SignalStrength::Strong), dec!(0.75));
        assert_eq!(engine_sizing.fraction(SignalStrength::Unrecognized), dec!(0.25));
    }

    #[tokio::test]
    async fn test_size_trade_uses_policy() {
        let (_, engine) = seeded(dec!(1)).await;
        assert_eq!(engine.size_trade(SignalStrength::Strong, dec!(10000)), dec!(7500));
        assert_eq!(engine.size_trade(SignalStrength::Medium, dec!(10000)), dec!(5000));
        assert_eq!(engine.size_trade(SignalStrength::Low, dec!(10000)), dec!(2500));
        assert_eq!(engine.size_trade(SignalStrength::parse("huge"), dec!(10000)), dec!(2500));
        assert_eq!(engine.size_trade(SignalStrength::Strong, dec!(0)), dec!(0));
    }

    #[tokio::test]
    async fn test_execute_signal_sizes_buys_and_sells() {
        let (ledger, engine) = seeded(dec!(10000)).await;

        let buy = TradeSignal::new("day", "BTC-USD", SignalType::Buy, SignalStrength::Strong, dec!(50000));
        let TradeOutcome::Executed(receipt) = engine.execute_signal(&buy).await.unwrap() else {
            panic!("strong buy should execute");
        };
        assert_eq!(receipt.amount, dec!(0.15));
        assert_eq!(receipt.total_value, dec!(7500));
        assert_eq!(receipt.signal_id.as_deref(), Some(buy.signal_id.as_str()));
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(2500));

        let sell = TradeSignal::new("day", "BTC-USD", SignalType::Sell, SignalStrength::Low, dec!(40000));
        let TradeOutcome::Executed(receipt) = engine.execute_signal(&sell).await.unwrap() else {
            panic!("low sell should execute");
        };
        assert_eq!(receipt.amount, dec!(0.0375));
        assert_eq!(ledger.get_balance("BTC-USD").await.unwrap(), dec!(0.1125));
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(4000));
    }

    #[tokio::test]
    async fn test_execute_signal_with_nothing_to_sell_or_hold() {
        let (_, engine) = seeded(dec!(10000)).await;

        let sell = TradeSignal::new("day", "ETH-USD", SignalType::Sell, SignalStrength::Strong, dec!(3000));
        assert_eq!(
            engine.execute_signal(&sell).await.unwrap(),
            TradeOutcome::Rejected(TradeRejection::NothingToSell("ETH-USD".to_string()))
        );

        let hold = TradeSignal::new("day", "ETH-USD", SignalType::parse("hold"), SignalStrength::Strong, dec!(3000));
        assert!(!engine.execute_signal(&hold).await.unwrap().is_executed());
    }

    #[tokio::test]
    async fn test_concurrent_buys_never_overdraw() {
        let (ledger, engine) = seeded(dec!(1000)).await;
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .execute_buy("BTC-USD", dec!(1), dec!(300), "day", None)
                    .await
                    .unwrap()
                    .is_executed()
            }));
        }

        let mut executed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                executed += 1;
            }
        }

        assert_eq!(executed, 3);
        assert_eq!(ledger.get_balance("USD").await.unwrap(), dec!(100));
        assert_eq!(ledger.get_balance("BTC-USD").await.unwrap(), dec!(3));
        assert_eq!(ledger.transaction_history(None, 100).await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_receipt_renders_for_notifications() {
        let (_, engine) = seeded(dec!(10000)).await;
        let TradeOutcome::Executed(receipt) = engine
            .execute_buy("ETH-USD", dec!(2), dec!(2500), "swing", None)
            .await
            .unwrap()
        else {
            panic!("buy should execute");
        };
        let text = receipt.to_string();
        assert!(text.contains("BUY 2 ETH-USD @ $2500"));
        assert!(text.contains("[swing]"));
    }
}
