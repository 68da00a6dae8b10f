use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::models::{AssetBalance, NewTransaction, TradeSignal, Transaction, TransactionType};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use tracing::info;

use super::{clamp_limit, parse_signal_labels, parse_transaction_type};
use crate::error::LedgerError;
use crate::ledger::{BalanceChange, LedgerStore, SEED_SIGNAL_ID, SEED_STRATEGY_TAG, TradeLegs, entry_total};

pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_transaction(
        conn: &mut PgConnection,
        entry: &NewTransaction,
    ) -> Result<i64, LedgerError> {
        let total_value = entry_total(entry)?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
                INSERT INTO transactions (
                    symbol, transaction_type, amount, price, total_value,
                    strategy_tag, signal_id, timestamp
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
            "#,
        )
        .bind(&entry.symbol)
        .bind(entry.transaction_type.as_str())
        .bind(entry.amount)
        .bind(entry.price)
        .bind(total_value)
        .bind(&entry.strategy_tag)
        .bind(entry.signal_id.as_deref())
        .bind(entry.timestamp)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn compare_and_set(
        conn: &mut PgConnection,
        change: &BalanceChange,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if change.expected.is_zero() {
            let inserted = sqlx::query(
                r#"
                    INSERT INTO portfolio (symbol, amount, last_updated)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (symbol) DO NOTHING
                "#,
            )
            .bind(&change.symbol)
            .bind(change.new_amount)
            .bind(at)
            .execute(&mut *conn)
            .await?
            .rows_affected();
            if inserted == 1 {
                return Ok(());
            }
        }

        let updated = sqlx::query(
            "UPDATE portfolio SET amount = $1, last_updated = $2 WHERE symbol = $3 AND amount = $4",
        )
        .bind(change.new_amount)
        .bind(at)
        .bind(&change.symbol)
        .bind(change.expected)
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

fn transaction_from_row(row: &PgRow) -> Result<Transaction, LedgerError> {
    Ok(Transaction {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        transaction_type: parse_transaction_type(row.try_get("transaction_type")?)?,
        amount: row.try_get("amount")?,
        price: row.try_get("price")?,
        total_value: row.try_get("total_value")?,
        strategy_tag: row.try_get("strategy_tag")?,
        signal_id: row.try_get("signal_id")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn signal_from_row(row: &PgRow) -> Result<TradeSignal, LedgerError> {
    let signal_type: String = row.try_get("signal_type")?;
    let strength: String = row.try_get("strength")?;
    let (signal_type, strength) = parse_signal_labels(&signal_type, &strength);
    Ok(TradeSignal {
        signal_id: row.try_get("signal_id")?,
        strategy_name: row.try_get("strategy_name")?,
        symbol: row.try_get("symbol")?,
        signal_type,
        strength,
        price: row.try_get("price")?,
        timestamp: row.try_get("timestamp")?,
        executed: row.try_get("executed")?,
        execution_timestamp: row.try_get("execution_timestamp")?,
        notes: row.try_get("notes")?,
    })
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn get_balance(&self, symbol: &str) -> Result<Decimal, LedgerError> {
        let amount = sqlx::query_scalar::<_, Decimal>("SELECT amount FROM portfolio WHERE symbol = $1")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(amount.unwrap_or(Decimal::ZERO))
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
                VALUES ($1, $2, $3)
                ON CONFLICT (symbol) DO UPDATE SET
                    amount = EXCLUDED.amount,
                    last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(symbol)
        .bind(amount)
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
        let rows = sqlx::query(
            "SELECT symbol, amount, last_updated FROM portfolio WHERE amount > 0 ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AssetBalance {
                    symbol: row.try_get("symbol")?,
                    amount: row.try_get("amount")?,
                    last_updated: row.try_get("last_updated")?,
                })
            })
            .collect()
    }

    async fn transaction_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut qb = QueryBuilder::<Postgres>::new(
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
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&signal.signal_id)
        .bind(&signal.strategy_name)
        .bind(&signal.symbol)
        .bind(signal.signal_type.to_string())
        .bind(signal.strength.as_str())
        .bind(signal.price)
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
                SET executed = TRUE, execution_timestamp = $1, notes = COALESCE($2, notes)
                WHERE signal_id = $3
            "#,
        )
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
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
                SELECT signal_id, strategy_name, symbol, signal_type, strength, price,
                       timestamp, executed, execution_timestamp, notes
                FROM signals WHERE TRUE
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
                VALUES ($1, $2, $3)
                ON CONFLICT (symbol) DO NOTHING
            "#,
        )
        .bind(symbol)
        .bind(amount)
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
            info!("First time setup: seeded PostgreSQL portfolio with {} {}", amount, symbol);
        } else {
            info!("PostgreSQL portfolio already initialized");
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
