//! In-process fakes shared by the unit tests.

use crate::database::{DbValue, Row};
use crate::error::{Error, Result};
use crate::middleware::{DomainHandler, HandlerContext};
use crate::modeller::{ModellerHandle, StorageBackend, StorageTransaction};
use crate::registry::DomainError;
use crate::schema::{MemorySchemaSource, SchemaBundle, SchemaRef};
use crate::server::Response;
use crate::storage::{Dialect, StorageOptions};
use crate::types::PathParams;
use async_trait::async_trait;
use tracing::Span;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Log {
    begins: usize,
    commits: usize,
    rollbacks: usize,
    lock_timeouts: Vec<u64>,
    identities: Vec<(String, String)>,
    statements: Vec<String>,
}

/// Storage backend that records every call instead of touching a database
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    log: Arc<Mutex<Log>>,
    fail_on: Option<String>,
    fail_commit: bool,
    fail_rollback: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements equal to `statement` fail
    pub fn failing_on(statement: &str) -> Self {
        Self {
            fail_on: Some(statement.to_string()),
            ..Self::default()
        }
    }

    /// Every commit fails
    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    /// Every rollback fails
    pub fn failing_rollback() -> Self {
        Self {
            fail_rollback: true,
            ..Self::default()
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Log) -> T) -> T {
        f(&self.log.lock().unwrap())
    }

    pub fn begins(&self) -> usize {
        self.read(|l| l.begins)
    }

    pub fn commits(&self) -> usize {
        self.read(|l| l.commits)
    }

    pub fn rollbacks(&self) -> usize {
        self.read(|l| l.rollbacks)
    }

    pub fn lock_timeouts(&self) -> Vec<u64> {
        self.read(|l| l.lock_timeouts.clone())
    }

    pub fn identities(&self) -> Vec<(String, String)> {
        self.read(|l| l.identities.clone())
    }

    pub fn statements(&self) -> Vec<String> {
        self.read(|l| l.statements.clone())
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>> {
        self.log.lock().unwrap().begins += 1;
        Ok(Box::new(RecordingTransaction {
            backend: self.clone(),
            open: true,
        }))
    }
}

struct RecordingTransaction {
    backend: RecordingBackend,
    open: bool,
}

impl RecordingTransaction {
    fn check(&self, operation: &'static str) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::TransactionClosed { operation })
        }
    }

    fn record(&self, statement: &str) -> Result<()> {
        self.check("execute")?;
        if self.backend.fail_on.as_deref() == Some(statement) {
            return Err(Error::database(format!("statement failed: {statement}")));
        }
        self.backend
            .log
            .lock()
            .unwrap()
            .statements
            .push(statement.to_string());
        Ok(())
    }
}

#[async_trait]
impl StorageTransaction for RecordingTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&mut self, statement: &str, _params: &[DbValue]) -> Result<u64> {
        self.record(statement)?;
        Ok(1)
    }

    async fn fetch_all(&mut self, statement: &str, _params: &[DbValue]) -> Result<Vec<Row>> {
        self.record(statement)?;
        Ok(Vec::new())
    }

    async fn set_lock_timeout(&mut self, seconds: u64) -> Result<()> {
        self.check("set lock timeout")?;
        self.backend.log.lock().unwrap().lock_timeouts.push(seconds);
        Ok(())
    }

    async fn set_identity(&mut self, setting: &str, value: &str) -> Result<()> {
        self.check("set identity")?;
        self.backend
            .log
            .lock()
            .unwrap()
            .identities
            .push((setting.to_string(), value.to_string()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.check("commit")?;
        self.open = false;
        self.backend.log.lock().unwrap().commits += 1;
        if self.backend.fail_commit {
            return Err(Error::database("commit failed"));
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.check("rollback")?;
        self.open = false;
        self.backend.log.lock().unwrap().rollbacks += 1;
        if self.backend.fail_rollback {
            return Err(Error::database("rollback failed"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    Ok,
    NotFound,
    Fault,
}

/// Handler with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct StaticHandler {
    reply: Reply,
}

impl StaticHandler {
    /// 200 `{"ok":true}`
    pub const fn ok() -> Self {
        Self { reply: Reply::Ok }
    }

    /// A `resource_not_found` domain error
    pub const fn not_found() -> Self {
        Self {
            reply: Reply::NotFound,
        }
    }

    /// An internal failure that must not leak
    pub const fn fault() -> Self {
        Self { reply: Reply::Fault }
    }
}

#[async_trait]
impl DomainHandler for StaticHandler {
    async fn handle(
        &self,
        _ctx: &HandlerContext<'_>,
        path: &PathParams,
        _options: &StorageOptions,
        _span: &Span,
        _modeller: &mut ModellerHandle,
    ) -> anyhow::Result<Response> {
        match self.reply {
            Reply::Ok => Ok(Response::json(r#"{"ok":true}"#)),
            Reply::NotFound => {
                let id = path.get_int("id").unwrap_or_default();
                Err(DomainError::not_found(format!("character {id}")).into())
            }
            Reply::Fault => Err(anyhow::anyhow!("disk full writing character")),
        }
    }
}

/// Location of the person schema in [`person_source`]
pub fn person_ref() -> SchemaRef {
    SchemaRef::new("/schemas", "character", "person.json")
}

/// Bundle of the person schema alone
pub fn person_bundle() -> SchemaBundle {
    SchemaBundle::new(person_ref())
}

/// A schema requiring `first_name`, `last_name` and `age`
pub fn person_schema() -> Value {
    json!({
        "type": "object",
        "required": ["first_name", "last_name", "age"],
        "properties": {
            "first_name": {"type": "string"},
            "last_name": {"type": "string"},
            "age": {"type": "integer", "minimum": 0}
        }
    })
}

/// Location of the `number >= 1`, `name: string` query schema
pub fn number_query_ref() -> SchemaRef {
    SchemaRef::new("/schemas", "query", "number.json")
}

/// Schema source holding the person and number schemas
pub fn person_source() -> MemorySchemaSource {
    MemorySchemaSource::new()
        .with_document(&person_ref(), person_schema())
        .with_document(
            &number_query_ref(),
            json!({
                "type": "object",
                "properties": {
                    "number": {"type": "integer", "minimum": 1},
                    "name": {"type": "string"}
                }
            }),
        )
}
