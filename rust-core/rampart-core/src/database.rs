//! # Database Module
//!
//! SQLx-backed storage for PostgreSQL and SQLite.
//!
//! [`DatabasePool`] is the [`StorageBackend`] the pipeline opens request
//! transactions on. Transaction-scoped settings (lock timeout, row-level
//! security identity) go through `set_config(name, value, true)` so they end
//! with the transaction and never leak onto a pooled connection. SQLite has
//! no equivalent; there both are logged no-ops.

use crate::error::{Error, Result};
use crate::modeller::{StorageBackend, StorageTransaction};
use crate::query::ValueKind;
use crate::storage::Dialect;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Postgres, Row as _, Sqlite, Transaction, TypeInfo};
use std::collections::HashMap;
use tracing::debug;

/// One result row keyed by column name
pub type Row = HashMap<String, DbValue>;

/// Database connection pool supporting multiple backends
#[derive(Clone, Debug)]
pub enum DatabasePool {
    /// SQLite connection pool
    Sqlite(SqlitePool),
    /// PostgreSQL connection pool
    Postgres(PgPool),
}

impl DatabasePool {
    /// Connect by URL scheme (`sqlite:` or `postgres://`)
    ///
    /// # Errors
    ///
    /// Fails for unsupported schemes and connection errors.
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Self::connect_sqlite(url, max_connections).await
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::connect_postgres(url, max_connections).await
        } else {
            Err(Error::config("DATABASE_URL", "expected a sqlite: or postgres:// URL"))
        }
    }

    /// Connect to a SQLite database
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pool = DatabasePool::connect_sqlite("sqlite::memory:", Some(1)).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened.
    pub async fn connect_sqlite(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| Error::database(format!("SQLite connection failed: {e}")))?;

        Ok(Self::Sqlite(pool))
    }

    /// Connect to a PostgreSQL database
    ///
    /// # Errors
    ///
    /// Fails if the server is unreachable or rejects the credentials.
    pub async fn connect_postgres(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(10))
            .connect(url)
            .await
            .map_err(|e| Error::database(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self::Postgres(pool))
    }

    /// SQL flavour of this pool
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::Postgres(_) => Dialect::Postgres,
        }
    }

    /// Execute a statement outside any request transaction
    ///
    /// # Errors
    ///
    /// Returns the driver error.
    pub async fn execute(&self, statement: &str) -> Result<u64> {
        let affected = match self {
            Self::Sqlite(pool) => sqlx::query(statement).execute(pool).await?.rows_affected(),
            Self::Postgres(pool) => sqlx::query(statement).execute(pool).await?.rows_affected(),
        };
        Ok(affected)
    }

    /// Fetch all rows outside any request transaction
    ///
    /// # Errors
    ///
    /// Returns the driver error.
    pub async fn fetch_all(&self, statement: &str) -> Result<Vec<Row>> {
        match self {
            Self::Sqlite(pool) => {
                let rows: Vec<SqliteRow> = sqlx::query(statement).fetch_all(pool).await?;
                Ok(rows.iter().map(sqlite_row_to_map).collect())
            }
            Self::Postgres(pool) => {
                let rows: Vec<PgRow> = sqlx::query(statement).fetch_all(pool).await?;
                Ok(rows.iter().map(pg_row_to_map).collect())
            }
        }
    }

    /// Round-trip a trivial query
    ///
    /// # Errors
    ///
    /// Returns the driver error when the database is unreachable.
    pub async fn ping(&self) -> Result<()> {
        self.execute("SELECT 1").await.map(|_| ())
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

#[async_trait]
impl StorageBackend for DatabasePool {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>> {
        let inner = match self {
            Self::Sqlite(pool) => TxInner::Sqlite(pool.begin().await?),
            Self::Postgres(pool) => TxInner::Postgres(pool.begin().await?),
        };
        Ok(Box::new(DatabaseTransaction {
            dialect: self.dialect(),
            inner: Some(inner),
        }))
    }
}

enum TxInner {
    Sqlite(Transaction<'static, Sqlite>),
    Postgres(Transaction<'static, Postgres>),
}

/// An open SQLx transaction
pub struct DatabaseTransaction {
    dialect: Dialect,
    inner: Option<TxInner>,
}

impl DatabaseTransaction {
    fn live(&mut self, operation: &'static str) -> Result<&mut TxInner> {
        self.inner
            .as_mut()
            .ok_or(Error::TransactionClosed { operation })
    }

    fn finish(&mut self, operation: &'static str) -> Result<TxInner> {
        self.inner.take().ok_or(Error::TransactionClosed { operation })
    }
}

#[async_trait]
impl StorageTransaction for DatabaseTransaction {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&mut self, statement: &str, params: &[DbValue]) -> Result<u64> {
        let affected = match self.live("execute")? {
            TxInner::Sqlite(tx) => bind_sqlite(statement, params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            TxInner::Postgres(tx) => bind_postgres(statement, params)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn fetch_all(&mut self, statement: &str, params: &[DbValue]) -> Result<Vec<Row>> {
        match self.live("fetch")? {
            TxInner::Sqlite(tx) => {
                let rows = bind_sqlite(statement, params).fetch_all(&mut **tx).await?;
                Ok(rows.iter().map(sqlite_row_to_map).collect())
            }
            TxInner::Postgres(tx) => {
                let rows = bind_postgres(statement, params).fetch_all(&mut **tx).await?;
                Ok(rows.iter().map(pg_row_to_map).collect())
            }
        }
    }

    async fn set_lock_timeout(&mut self, seconds: u64) -> Result<()> {
        self.set_identity("lock_timeout", &format!("{seconds}s")).await
    }

    async fn set_identity(&mut self, setting: &str, value: &str) -> Result<()> {
        match self.live("set transaction setting")? {
            TxInner::Sqlite(_) => {
                debug!(setting = %setting, "SQLite has no transaction-scoped settings, skipping");
            }
            TxInner::Postgres(tx) => {
                sqlx::query("SELECT set_config($1, $2, true)")
                    .bind(setting)
                    .bind(value)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        match self.finish("commit")? {
            TxInner::Sqlite(tx) => tx.commit().await?,
            TxInner::Postgres(tx) => tx.commit().await?,
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.finish("rollback")? {
            TxInner::Sqlite(tx) => tx.rollback().await?,
            TxInner::Postgres(tx) => tx.rollback().await?,
        }
        Ok(())
    }
}

fn bind_sqlite<'q>(statement: &'q str, params: &[DbValue]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params
        .iter()
        .cloned()
        .fold(sqlx::query(statement), |query, param| match param {
            DbValue::Null => query.bind(None::<String>),
            DbValue::Int(v) => query.bind(v),
            DbValue::Float(v) => query.bind(v),
            DbValue::String(v) => query.bind(v),
            DbValue::Bool(v) => query.bind(v),
            DbValue::Bytes(v) => query.bind(v),
        })
}

fn bind_postgres<'q>(statement: &'q str, params: &[DbValue]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .cloned()
        .fold(sqlx::query(statement), |query, param| match param {
            DbValue::Null => query.bind(None::<String>),
            DbValue::Int(v) => query.bind(v),
            DbValue::Float(v) => query.bind(v),
            DbValue::String(v) => query.bind(v),
            DbValue::Bool(v) => query.bind(v),
            DbValue::Bytes(v) => query.bind(v),
        })
}

/// A column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DbValue {
    /// Null value
    Null,
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Boolean value
    Bool(bool),
    /// Binary data
    Bytes(Vec<u8>),
}

impl DbValue {
    /// Type a query-string value for binding as `kind`
    ///
    /// Text, and values that do not parse as `kind`, bind as strings so the
    /// column type decides the comparison.
    #[must_use]
    pub fn from_query(raw: &str, kind: ValueKind) -> Self {
        let typed = match kind {
            ValueKind::Text => None,
            ValueKind::Integer => raw.parse::<i64>().ok().map(Self::Int),
            ValueKind::Number => raw
                .parse::<i64>()
                .ok()
                .map(Self::Int)
                .or_else(|| raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(Self::Float)),
            ValueKind::Boolean => match raw {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
        };
        typed.unwrap_or_else(|| Self::String(raw.to_string()))
    }
}

fn sqlite_row_to_map(row: &SqliteRow) -> Row {
    let mut map = HashMap::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INTEGER" => row.try_get::<i64, _>(i).map(DbValue::Int),
            "REAL" => row.try_get::<f64, _>(i).map(DbValue::Float),
            "BOOLEAN" => row.try_get::<bool, _>(i).map(DbValue::Bool),
            "BLOB" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes),
            _ => row.try_get::<String, _>(i).map(DbValue::String),
        }
        .unwrap_or(DbValue::Null);

        map.insert(column.name().to_string(), value);
    }

    map
}

fn pg_row_to_map(row: &PgRow) -> Row {
    let mut map = HashMap::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<i16, _>(i).map(|v| DbValue::Int(v.into())),
            "INT4" => row.try_get::<i32, _>(i).map(|v| DbValue::Int(v.into())),
            "INT8" => row.try_get::<i64, _>(i).map(DbValue::Int),
            "FLOAT4" => row.try_get::<f32, _>(i).map(|v| DbValue::Float(v.into())),
            "FLOAT8" => row.try_get::<f64, _>(i).map(DbValue::Float),
            "BOOL" => row.try_get::<bool, _>(i).map(DbValue::Bool),
            "BYTEA" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes),
            _ => row.try_get::<String, _>(i).map(DbValue::String),
        }
        .unwrap_or(DbValue::Null);

        map.insert(column.name().to_string(), value);
    }

    map
}
