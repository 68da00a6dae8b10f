use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::models::{AssetBalance, NewTransaction, TradeSignal, Transaction, TransactionType};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::info;

use super::{clamp_limit, parse_signal_labels, parse_transaction_type};
use crate::error::LedgerError;
use crate::ledger::{BalanceChange, LedgerStore, SEED_SIGNAL_ID, SEED_STRATEGY_TAG, TradeLegs, entry_total};

/// File-embedded ledger. Decimals are stored as their canonical string form.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_transaction(
        conn: &mut SqliteConnection,
        entry: &NewTransaction,
    ) -> Result<i64, LedgerError> {
        let total_value = entry_total(entry)?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
                INSERT INTO transactions (
                    symbol, transaction_type, amount, price, total_value,
                    strategy_tag, signal_id, timestamp
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
            "#,
        )
        .bind(&entry.symbol)
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount.to_string())
        .bind(entry.price.to_string())
        .bind(total_value.to_string())
        .bind(&entry.strategy_tag)
        .bind(entry.signal_id.as_deref())
        .bind(entry.timestamp)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn compare_and_set(
        conn: &mut SqliteConnection,
        change: &BalanceChange,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if change.expected.is_zero() {
            let inserted = sqlx::query(
                r#"
                    INSERT INTO portfolio (symbol, amount, last_updated)
                    VALUES (?, ?, ?)
                    ON CONFLICT(symbol) DO NOTHING
                "#,
            )
            .bind(&change.symbol)
            .bind(change.new_amount.to_string())
            .bind(at)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            if inserted == 1 {
                return Ok(());
            }
        }

        let updated = sqlx::query(
            "UPDATE portfolio SET amount = ?, last_updated = ? WHERE symbol = ? AND amount = ?",
        )
        .bind(change.new_amount.to_string())
        .bind(at)
        .bind(&change.symbol)
        .bind(change.expected.to_string())
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated != 1 {
            return Err(LedgerError::StaleBalance {
                symbol: change.symbol.clone(),
                expected: change.expected,
            });
        }
        Ok(())
    }
}

fn decimal(row: &SqliteRow, column: &'static str) -> Result<Decimal, LedgerError> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|_| LedgerError::Corrupt { column, value: raw })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, LedgerError> {
    Ok(Transaction {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        transaction_type: parse_transaction_type(row.try_get("transaction_type")?)?,
        amount: decimal(row, "amount")?,
        price: decimal(row, "price")?,
        total_value: decimal(row, "total_value")?,
        strategy_tag: row.try_get("strategy_tag")?,
        signal_id: row.try_get("signal_id")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn signal_from_row(row: &SqliteRow) -> Result<TradeSignal, LedgerError> {
    let signal_type: String = row.try_get("signal_type")?;
    let strength: String = row.try_get("strength")?;
    let (signal_type, strength) = parse_signal_labels(&signal_type, &strength);
    Ok(TradeSignal {
        signal_id: row.try_get("signal_id")?,
        strategy_name: row.try_get("strategy_name")?,
        symbol: row.try_get("symbol")?,
        signal_type,
        strength,
        price: decimal(row, "price")?,
        timestamp: row.try_get("timestamp")?,
        executed: row.try_get("executed")?,
        execution_timestamp: row.try_get("execution_timestamp")?,
        notes: row.try_get("notes")?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get_balance(&self, symbol: &str) -> Result<Decimal, LedgerError> {
        let raw = sqlx::query_scalar::<_, String>("SELECT amount FROM portfolio WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        match raw {
            Some(raw) => Decimal::from_str(&raw).map_err(|_| LedgerError::Corrupt {
                column: "amount",
                value: raw,
            }),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn set_balance(&self, symbol: &str, amount: Decimal) -> Result<(), LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeBalance {
                symbol: symbol.to_string(),
                amount,
            });
        }
        sqlx::query(
            r#"
                INSERT INTO portfolio (symbol, amount, last_updated)
                VALUES (?, ?, ?)
                ON CONFLICT(symbol) DO UPDATE SET
                    amount = excluded.amount,
                    last_updated = excluded.last_updated
            "#,
        )
        .bind(symbol)
        .bind(amount.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_transaction(&self, entry: &NewTransaction) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_transaction(&mut conn, entry).await
    }

    async fn portfolio_summary(&self) -> Result<Vec<AssetBalance>, LedgerError> {
        let rows = sqlx::query("SELECT symbol, amount, last_updated FROM portfolio ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        let mut holdings = Vec::with_capacity(rows.len());
        for row in rows {
            let amount = decimal(&row, "amount")?;
            if amount > Decimal::ZERO {
                holdings.push(AssetBalance {
                    symbol: row.try_get("symbol")?,
                    amount,
                    last_updated: row.try_get("last_updated")?,
                });
            }
        }
        Ok(holdings)
    }

    async fn transaction_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
                SELECT id, symbol, transaction_type, amount, price, total_value,
                       strategy_tag, signal_id, timestamp
                FROM transactions
            "#,
        );
        if let Some(symbol) = symbol {
            qb.push(" WHERE symbol = ").push_bind(symbol);
        }
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(clamp_limit(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn save_signal(&self, signal: &TradeSignal) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
                INSERT INTO signals (
                    signal_id, strategy_name, symbol, signal_type, strength, price,
                    timestamp, executed, execution_timestamp, notes
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.signal_id)
        .bind(&signal.strategy_name)
        .bind(&signal.symbol)
        .bind(signal.signal_type.to_string())
        .bind(signal.strength.as_str())
        .bind(signal.price.to_string())
        .bind(signal.timestamp)
        .bind(signal.executed)
        .bind(signal.execution_timestamp)
        .bind(signal.notes.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_signal_executed(
        &self,
        signal_id: &str,
        at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let updated = sqlx::query(
            r#"
                UPDATE signals
                SET executed = ?, execution_timestamp = ?, notes = COALESCE(?, notes)
                WHERE signal_id = ?
            "#,
        )
        .bind(true)
        .bind(at)
        .bind(notes)
        .bind(signal_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn signal_history(
        &self,
        strategy: Option<&str>,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TradeSignal>, LedgerError> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"
                SELECT signal_id, strategy_name, symbol, signal_type, strength, price,
                       timestamp, executed, execution_timestamp, notes
                FROM signals WHERE 1=1
            "#,
        );
        if let Some(strategy) = strategy {
            qb.push(" AND strategy_name = ").push_bind(strategy);
        }
        if let Some(symbol) = symbol {
            qb.push(" AND symbol = ").push_bind(symbol);
        }
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(clamp_limit(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(signal_from_row).collect()
    }

    async fn seed_base_currency(&self, symbol: &str, amount: Decimal) -> Result<bool, LedgerError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(
            r#"
                INSERT INTO portfolio (symbol, amount, last_updated)
                VALUES (?, ?, ?)
                ON CONFLICT(symbol) DO NOTHING
            "#,
        )
        .bind(symbol)
        .bind(amount.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if created {
            let entry = NewTransaction {
                symbol: symbol.to_string(),
                transaction_type: TransactionType::Initial,
                amount,
                price: Decimal::ONE,
                strategy_tag: SEED_STRATEGY_TAG.to_string(),
                signal_id: Some(SEED_SIGNAL_ID.to_string()),
                timestamp: now,
            };
            Self::insert_transaction(&mut tx, &entry).await?;
        }
        tx.commit().await?;

        if created {
            info!("First time setup: seeded SQLite portfolio with {} {}", amount, symbol);
        } else {
            info!("SQLite portfolio already initialized");
        }
        Ok(created)
    }

    async fn commit_trade(&self, legs: &TradeLegs) -> Result<(), LedgerError> {
        legs.check()?;
        let at = legs.asset_entry.timestamp;
        let mut tx = self.pool.begin().await?;

        Self::compare_and_set(&mut tx, &legs.base, at).await?;
        Self::compare_and_set(&mut tx, &legs.asset, at).await?;
        Self::insert_transaction(&mut tx, &legs.asset_entry).await?;
        Self::insert_transaction(&mut tx, &legs.base_entry).await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::get_sqlite_memory_pool;
    use common::models::{SignalStrength, SignalType};
    use rust_decimal_macros::dec;

    async fn ledger() -> SqliteLedger {
        SqliteLedger::new(get_sqlite_memory_pool().await.unwrap())
    }

    fn entry(symbol: &str, kind: TransactionType, amount: Decimal, price: Decimal) -> NewTransaction {
        NewTransaction {
            symbol: symbol.to_string(),
            transaction_type: kind,
            amount,
            price,
            strategy_tag: "test".to_string(),
            signal_id: Some("sig-1".to_string()),
            timestamp: Utc::now(),
        }
    }

    fn buy_legs(usd_before: Decimal, btc_before: Decimal, amount: Decimal, price: Decimal) -> TradeLegs {
        let cost = amount * price;
        let asset_entry = entry("BTC-USD", TransactionType::Buy, amount, price);
        let mut base_entry = entry("USD", TransactionType::Spend, cost, Decimal::ONE);
        base_entry.timestamp = asset_entry.timestamp;
        TradeLegs {
            asset: BalanceChange {
                symbol: "BTC-USD".to_string(),
                expected: btc_before,
                new_amount: btc_before + amount,
            },
            base: BalanceChange {
                symbol: "USD".to_string(),
                expected: usd_before,
                new_amount: usd_before - cost,
            },
            asset_entry,
            base_entry,
        }
    }

    #[tokio::test]
    async fn test_unknown_symbol_has_zero_balance() {
        let store = ledger().await;
        assert_eq!(store.get_balance("DOGE-USD").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_set_balance_upserts_and_refuses_negative() {
        let store = ledger().await;
        store.set_balance("ETH-USD", dec!(1.5)).await.unwrap();
        store.set_balance("ETH-USD", dec!(2.25)).await.unwrap();
        assert_eq!(store.get_balance("ETH-USD").await.unwrap(), dec!(2.25));

        let err = store.set_balance("ETH-USD", dec!(-1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::NegativeBalance { .. }));
        assert_eq!(store.get_balance("ETH-USD").await.unwrap(), dec!(2.25));
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = ledger().await;
        assert!(store.seed_base_currency("USD", dec!(10000)).await.unwrap());
        assert!(!store.seed_base_currency("USD", dec!(10000)).await.unwrap());

        let history = store.transaction_history(None, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transaction_type, TransactionType::Initial);
        assert_eq!(history[0].total_value, dec!(10000));
        assert_eq!(history[0].signal_id.as_deref(), Some("initial_setup"));
        assert_eq!(store.portfolio_summary().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_seed_does_not_overwrite_existing_balance() {
        let store = ledger().await;
        store.set_balance("USD", dec!(42)).await.unwrap();
        assert!(!store.seed_base_currency("USD", dec!(10000)).await.unwrap());
        assert_eq!(store.get_balance("USD").await.unwrap(), dec!(42));
        assert!(store.transaction_history(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_portfolio_summary_skips_empty_rows() {
        let store = ledger().await;
        store.set_balance("USD", dec!(100)).await.unwrap();
        store.set_balance("BTC-USD", dec!(0.0)).await.unwrap();
        store.set_balance("ADA-USD", dec!(3)).await.unwrap();

        let symbols: Vec<String> = store
            .portfolio_summary()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.symbol)
            .collect();
        assert_eq!(symbols, vec!["ADA-USD".to_string(), "USD".to_string()]);
    }

    #[tokio::test]
    async fn test_transaction_history_newest_first_with_filter_and_limit() {
        let store = ledger().await;
        for i in 1..=3 {
            store
                .append_transaction(&entry("BTC-USD", TransactionType::Buy, Decimal::from(i), dec!(10)))
                .await
                .unwrap();
            store
                .append_transaction(&entry("USD", TransactionType::Spend, Decimal::from(i * 10), dec!(1)))
                .await
                .unwrap();
        }

        let btc = store.transaction_history(Some("BTC-USD"), 2).await.unwrap();
        assert_eq!(btc.len(), 2);
        assert_eq!(btc[0].amount, dec!(3));
        assert_eq!(btc[1].amount, dec!(2));
        assert_eq!(btc[0].total_value, dec!(30));

        let all = store.transaction_history(None, 100).await.unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0].symbol, "USD");
    }

    #[tokio::test]
    async fn test_commit_trade_writes_both_legs() {
        let store = ledger().await;
        store.seed_base_currency("USD", dec!(10000)).await.unwrap();

        store
            .commit_trade(&buy_legs(dec!(10000), dec!(0), dec!(0.1), dec!(50000)))
            .await
            .unwrap();

        assert_eq!(store.get_balance("USD").await.unwrap(), dec!(5000));
        assert_eq!(store.get_balance("BTC-USD").await.unwrap(), dec!(0.1));
        let history = store.transaction_history(None, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].transaction_type, TransactionType::Spend);
        assert_eq!(history[1].transaction_type, TransactionType::Buy);
        assert_eq!(history[0].total_value, history[1].total_value);
    }

    #[tokio::test]
    async fn test_stale_commit_rolls_back_everything() {
        let store = ledger().await;
        store.seed_base_currency("USD", dec!(10000)).await.unwrap();

        // Read 10000, but someone else spent in the meantime.
        store.set_balance("USD", dec!(9000)).await.unwrap();
        let err = store
            .commit_trade(&buy_legs(dec!(10000), dec!(0), dec!(0.1), dec!(50000)))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::StaleBalance { ref symbol, .. } if symbol == "USD"));
        assert_eq!(store.get_balance("USD").await.unwrap(), dec!(9000));
        assert_eq!(store.get_balance("BTC-USD").await.unwrap(), dec!(0));
        assert_eq!(store.transaction_history(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_trade_refuses_unbalanced_or_negative_legs() {
        let store = ledger().await;
        store.seed_base_currency("USD", dec!(100)).await.unwrap();

        let overdraw = buy_legs(dec!(100), dec!(0), dec!(1), dec!(200));
        assert!(matches!(
            store.commit_trade(&overdraw).await.unwrap_err(),
            LedgerError::NegativeBalance { .. }
        ));

        let mut unbalanced = buy_legs(dec!(100), dec!(0), dec!(1), dec!(50));
        unbalanced.base_entry.amount = dec!(49);
        assert!(matches!(
            store.commit_trade(&unbalanced).await.unwrap_err(),
            LedgerError::UnbalancedLegs { .. }
        ));
        assert_eq!(store.get_balance("USD").await.unwrap(), dec!(100));
    }

    #[tokio::test]
    async fn test_entry_whose_total_overflows_is_refused() {
        let store = ledger().await;

        let err = store
            .append_transaction(&entry("BTC-USD", TransactionType::Buy, Decimal::MAX, dec!(2)))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Overflow { ref symbol } if symbol == "BTC-USD"));
        assert!(store.transaction_history(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signal_history_filters_and_marks_executed() {
        let store = ledger().await;
        let a = TradeSignal::new("day", "BTC-USD", SignalType::Buy, SignalStrength::Strong, dec!(50000));
        let b = TradeSignal::new("swing", "BTC-USD", SignalType::Sell, SignalStrength::Low, dec!(51000));
        let c = TradeSignal::new("day", "ETH-USD", SignalType::parse("HOLD"), SignalStrength::Medium, dec!(3000))
            .with_notes("non-actionable");
        for s in [&a, &b, &c] {
            store.save_signal(s).await.unwrap();
        }

        let day = store.signal_history(Some("day"), None, 10).await.unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].signal_id, c.signal_id);
        assert_eq!(day[0].signal_type, SignalType::Other("HOLD".to_string()));

        let day_btc = store.signal_history(Some("day"), Some("BTC-USD"), 10).await.unwrap();
        assert_eq!(day_btc.len(), 1);
        assert!(!day_btc[0].executed);

        let at = Utc::now();
        assert!(store.mark_signal_executed(&a.signal_id, at, Some("bought")).await.unwrap());
        assert!(!store.mark_signal_executed("missing", at, None).await.unwrap());

        let day_btc = store.signal_history(Some("day"), Some("BTC-USD"), 10).await.unwrap();
        assert!(day_btc[0].executed);
        assert_eq!(day_btc[0].execution_timestamp, Some(at));
        assert_eq!(day_btc[0].notes.as_deref(), Some("bought"));
        assert_eq!(day_btc[0].strength, SignalStrength::Strong);
        assert_eq!(day_btc[0].price, dec!(50000));
    }
}
