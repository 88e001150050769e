//! # Modeller
//!
//! The per-request handle binding domain data access to exactly one storage
//! transaction.
//!
//! A handle is opened by the transaction stage, lent to the domain handler,
//! and finished by the transaction stage with exactly one `commit` or
//! `rollback`. Once finished, every operation fails with
//! [`Error::TransactionClosed`]; nothing is retried.

use crate::database::{DbValue, Row};
use crate::error::{Error, Result};
use crate::storage::{render_select, Dialect, StorageOptions};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A storage engine able to open transactions
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Open a new transaction
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>>;
}

/// One open storage transaction
///
/// `commit` and `rollback` finish the transaction; implementations return
/// [`Error::TransactionClosed`] for any call made afterwards.
#[async_trait]
pub trait StorageTransaction: Send {
    /// SQL flavour used when rendering statements for this transaction
    fn dialect(&self) -> Dialect;

    /// Run a statement, returning affected rows
    async fn execute(&mut self, statement: &str, params: &[DbValue]) -> Result<u64>;

    /// Run a query, returning every row
    async fn fetch_all(&mut self, statement: &str, params: &[DbValue]) -> Result<Vec<Row>>;

    /// Bound lock waits for the rest of this transaction only
    async fn set_lock_timeout(&mut self, seconds: u64) -> Result<()>;

    /// Write a transaction-local setting (row-level-security identity)
    async fn set_identity(&mut self, setting: &str, value: &str) -> Result<()>;

    /// Commit
    async fn commit(&mut self) -> Result<()>;

    /// Roll back
    async fn rollback(&mut self) -> Result<()>;
}

/// Prepares repository state on a freshly opened transaction
#[async_trait]
pub trait RepositoryPreparer: Send + Sync {
    /// Run before the handle is handed out
    async fn prepare(&self, tx: &mut dyn StorageTransaction) -> Result<()>;
}

/// Resolves statements by name
pub trait QueryPreparer: Send + Sync {
    /// SQL text for `name`
    fn statement(&self, name: &str) -> Option<&str>;
}

/// Statements run once at the start of every transaction
#[derive(Debug, Clone, Default)]
pub struct SetupStatements {
    statements: Vec<String>,
}

impl SetupStatements {
    /// No setup
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement
    #[must_use]
    pub fn with(mut self, statement: impl Into<String>) -> Self {
        self.statements.push(statement.into());
        self
    }
}

#[async_trait]
impl RepositoryPreparer for SetupStatements {
    async fn prepare(&self, tx: &mut dyn StorageTransaction) -> Result<()> {
        for statement in &self.statements {
            tx.execute(statement, &[]).await?;
        }
        Ok(())
    }
}

/// Named statements registered at start-up
#[derive(Debug, Clone, Default)]
pub struct StatementCatalog {
    statements: HashMap<String, String>,
}

impl StatementCatalog {
    /// Empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sql` under `name`
    #[must_use]
    pub fn with_statement(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.statements.insert(name.into(), sql.into());
        self
    }
}

impl QueryPreparer for StatementCatalog {
    fn statement(&self, name: &str) -> Option<&str> {
        self.statements.get(name).map(String::as_str)
    }
}

/// How a handle was finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Committed
    Committed,
    /// Rolled back
    RolledBack,
}

/// Per-request data-access handle over one transaction
pub struct ModellerHandle {
    tx: Option<Box<dyn StorageTransaction>>,
    queries: Arc<dyn QueryPreparer>,
    completion: Option<Completion>,
}

impl std::fmt::Debug for ModellerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModellerHandle")
            .field("open", &self.tx.is_some())
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

impl ModellerHandle {
    /// Bind a handle to `tx`, running `repository` preparation first
    ///
    /// # Errors
    ///
    /// Returns the preparation failure after rolling `tx` back.
    pub async fn init(
        repository: &dyn RepositoryPreparer,
        queries: Arc<dyn QueryPreparer>,
        mut tx: Box<dyn StorageTransaction>,
    ) -> Result<Self> {
        if let Err(err) = repository.prepare(tx.as_mut()).await {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback after failed preparation also failed");
            }
            return Err(err);
        }
        Ok(Self {
            tx: Some(tx),
            queries,
            completion: None,
        })
    }

    /// Whether the transaction is still open
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// How the handle was finished, if it was
    #[must_use]
    pub const fn completion(&self) -> Option<Completion> {
        self.completion
    }

    fn open(&mut self, operation: &'static str) -> Result<&mut Box<dyn StorageTransaction>> {
        self.tx
            .as_mut()
            .ok_or(Error::TransactionClosed { operation })
    }

    /// Bound lock waits for this request's transaction
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished or the backend rejects the setting.
    pub async fn set_lock_timeout(&mut self, seconds: u64) -> Result<()> {
        self.open("set lock timeout")?.set_lock_timeout(seconds).await
    }

    /// Scope this transaction to a caller identity
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished or the backend rejects the setting.
    pub async fn set_identity(&mut self, setting: &str, value: &str) -> Result<()> {
        self.open("set identity")?.set_identity(setting, value).await
    }

    /// Run a statement
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished or the statement fails.
    pub async fn execute(&mut self, statement: &str, params: &[DbValue]) -> Result<u64> {
        self.open("execute")?.execute(statement, params).await
    }

    /// Run a query
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished or the query fails.
    pub async fn fetch_all(&mut self, statement: &str, params: &[DbValue]) -> Result<Vec<Row>> {
        self.open("fetch")?.fetch_all(statement, params).await
    }

    fn named(&self, name: &str) -> Result<String> {
        self.queries
            .statement(name)
            .map(str::to_string)
            .ok_or_else(|| Error::UnknownStatement {
                name: name.to_string(),
            })
    }

    /// Run a catalog statement
    ///
    /// # Errors
    ///
    /// Fails for unknown names, finished transactions and statement errors.
    pub async fn execute_named(&mut self, name: &str, params: &[DbValue]) -> Result<u64> {
        let sql = self.named(name)?;
        self.execute(&sql, params).await
    }

    /// Run a catalog query
    ///
    /// # Errors
    ///
    /// Fails for unknown names, finished transactions and query errors.
    pub async fn fetch_named(&mut self, name: &str, params: &[DbValue]) -> Result<Vec<Row>> {
        let sql = self.named(name)?;
        self.fetch_all(&sql, params).await
    }

    /// Fetch one page of `table` as described by `options`
    ///
    /// Returns up to `options.limit` rows, sentinel included.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is finished or the query fails.
    pub async fn select_page(&mut self, table: &str, options: &StorageOptions) -> Result<Vec<Row>> {
        let tx = self.open("fetch")?;
        let select = render_select(table, options, tx.dialect());
        debug!(sql = %select.sql, "Selecting page");
        tx.fetch_all(&select.sql, &select.params).await
    }

    /// Commit and close the handle
    ///
    /// # Errors
    ///
    /// [`Error::TransactionClosed`] if already finished; otherwise the
    /// backend's commit failure.
    pub async fn commit(&mut self) -> Result<()> {
        let mut tx = self.tx.take().ok_or(Error::TransactionClosed {
            operation: "commit",
        })?;
        self.completion = Some(Completion::Committed);
        tx.commit().await
    }

    /// Roll back and close the handle
    ///
    /// # Errors
    ///
    /// [`Error::TransactionClosed`] if already finished; otherwise the
    /// backend's rollback failure.
    pub async fn rollback(&mut self) -> Result<()> {
        let mut tx = self.tx.take().ok_or(Error::TransactionClosed {
            operation: "rollback",
        })?;
        self.completion = Some(Completion::RolledBack);
        tx.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBackend;

    async fn handle(backend: &RecordingBackend) -> ModellerHandle {
        ModellerHandle::init(
            &SetupStatements::new(),
            Arc::new(StatementCatalog::new()),
            backend.begin().await.unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_commit_once() {
        let backend = RecordingBackend::new();
        let mut modeller = handle(&backend).await;

        modeller.commit().await.unwrap();
        assert!(!modeller.is_open());
        assert_eq!(modeller.completion(), Some(Completion::Committed));

        let again = modeller.commit().await;
        assert!(matches!(again, Err(Error::TransactionClosed { operation: "commit" })));
        let rollback = modeller.rollback().await;
        assert!(matches!(rollback, Err(Error::TransactionClosed { .. })));

        assert_eq!(backend.commits(), 1);
        assert_eq!(backend.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_rollback_then_operations_fail() {
        let backend = RecordingBackend::new();
        let mut modeller = handle(&backend).await;

        modeller.rollback().await.unwrap();
        assert!(modeller.set_lock_timeout(3).await.is_err());
        assert!(modeller.execute("SELECT 1", &[]).await.is_err());
        assert_eq!(backend.commits(), 0);
        assert_eq!(backend.rollbacks(), 1);
    }

    #[test]
    fn test_lock_timeout_forwarded() {
        let backend = RecordingBackend::new();
        tokio_test::block_on(async {
            let mut modeller = handle(&backend).await;
            modeller.set_lock_timeout(5).await.unwrap();
            modeller.set_identity("app.tenant_id", "guild-7").await.unwrap();
        });
        assert_eq!(backend.lock_timeouts(), vec![5]);
        assert_eq!(
            backend.identities(),
            vec![("app.tenant_id".to_string(), "guild-7".to_string())]
        );
    }

    #[tokio::test]
    async fn test_setup_statements_run_at_init() {
        let backend = RecordingBackend::new();
        let setup = SetupStatements::new().with("SET LOCAL search_path = game");
        let _modeller = ModellerHandle::init(
            &setup,
            Arc::new(StatementCatalog::new()),
            backend.begin().await.unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(backend.statements(), vec!["SET LOCAL search_path = game".to_string()]);
    }

    #[tokio::test]
    async fn test_named_statements() {
        let backend = RecordingBackend::new();
        let catalog = StatementCatalog::new().with_statement("count", "SELECT COUNT(*) FROM dungeon");
        let mut modeller = ModellerHandle::init(
            &SetupStatements::new(),
            Arc::new(catalog),
            backend.begin().await.unwrap(),
        )
        .await
        .unwrap();

        modeller.fetch_named("count", &[]).await.unwrap();
        assert_eq!(backend.statements(), vec!["SELECT COUNT(*) FROM dungeon".to_string()]);

        let missing = modeller.execute_named("drop_everything", &[]).await;
        assert!(matches!(missing, Err(Error::UnknownStatement { .. })));
    }

    #[tokio::test]
    async fn test_failed_preparation_rolls_back() {
        let backend = RecordingBackend::failing_on("BROKEN");
        let setup = SetupStatements::new().with("BROKEN");
        let result = ModellerHandle::init(
            &setup,
            Arc::new(StatementCatalog::new()),
            backend.begin().await.unwrap(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(backend.rollbacks(), 1);
        assert_eq!(backend.commits(), 0);
    }
}
