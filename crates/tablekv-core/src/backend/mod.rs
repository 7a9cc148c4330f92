//! Table storage backends
//!
//! The container talks to storage through two capability traits:
//!
//! - [`TableService`]: the account-level client. Hands out table handles and
//!   answers health probes.
//! - [`Table`]: one named table. Entities are addressed by
//!   `(partition_key, row_key)` and carry a service-assigned ETag and
//!   timestamp.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryTableService`]: in-process emulator (`UseDevelopmentStorage=true`)
//! - [`SqliteTableService`]: SQLite-backed tables (`DataSource=...`)
//!
//! [`connect`] picks one from a connection string.

pub mod connection;
pub mod error;
pub mod memory;
pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};

pub use connection::{
    BackendKind, ConnectionString, ConnectionStringError, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use error::{classify, BackendError, BackendResult, FailureKind};
pub use memory::{MemoryTable, MemoryTableService};
pub use sqlite::{SqliteTable, SqliteTableService};

/// A row as stored by the table service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub data: String,
    /// Assigned by the service on every write
    pub etag: Option<String>,
    /// Assigned by the service on every write
    pub timestamp: Option<DateTime<Utc>>,
}

impl TableEntity {
    /// Build an entity for writing; ETag and timestamp are left to the service
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            data: data.into(),
            etag: None,
            timestamp: None,
        }
    }
}

/// Position to resume a partition scan from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub next_partition_key: String,
    pub next_row_key: String,
}

/// One page of a partition scan
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub entities: Vec<TableEntity>,
    /// Present when more entities remain
    pub continuation: Option<Continuation>,
}

/// Service-level properties returned by the health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProperties {
    /// Backend flavour, e.g. `memory` or `sqlite`
    pub kind: &'static str,
    /// Backend version string
    pub version: String,
}

/// Account-level table client
pub trait TableService: Send + Sync {
    type Table: Table;

    /// Get a handle to a table; does not check that it exists
    fn table(&self, name: &str) -> Self::Table;

    /// Cheap administrative call used for health checks
    fn service_properties(&self) -> impl Future<Output = BackendResult<ServiceProperties>> + Send;
}

/// Operations on a single table
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    /// Create the table if missing. Returns `true` when it was created.
    fn create_if_not_exists(&self) -> impl Future<Output = BackendResult<bool>> + Send;

    /// Insert a new entity; `409` if the key is taken
    fn insert(&self, entity: TableEntity) -> impl Future<Output = BackendResult<TableEntity>> + Send;

    /// Write an entity.
    ///
    /// Without `if_match` this is insert-or-replace. With `if_match` it is a
    /// replace that only succeeds when the stored ETag equals it: `412` on
    /// mismatch, `404` when the entity is gone.
    fn upsert(
        &self,
        entity: TableEntity,
        if_match: Option<&str>,
    ) -> impl Future<Output = BackendResult<TableEntity>> + Send;

    /// Remove an entity; `404` if it does not exist
    fn delete(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> impl Future<Output = BackendResult<()>> + Send;

    /// Point lookup
    fn retrieve(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> impl Future<Output = BackendResult<Option<TableEntity>>> + Send;

    /// Read one segment of a partition, ordered by row key
    fn query_partition(
        &self,
        partition_key: &str,
        continuation: Option<Continuation>,
    ) -> impl Future<Output = BackendResult<Segment>> + Send;
}

/// Table service selected from a connection string
#[derive(Clone)]
pub enum StorageBackend {
    Memory(MemoryTableService),
    Sqlite(SqliteTableService),
}

/// Table handle of a [`StorageBackend`]
pub enum StorageTable {
    Memory(MemoryTable),
    Sqlite(SqliteTable),
}

/// Connect to the table service described by a connection string
pub fn connect(connection_string: &str) -> Result<StorageBackend, ConnectError> {
    let parsed = ConnectionString::parse(connection_string)?;
    match parsed.backend {
        BackendKind::Development => Ok(StorageBackend::Memory(MemoryTableService::with_page_size(
            parsed.page_size,
        ))),
        BackendKind::Sqlite(path) => {
            let service = SqliteTableService::open(&path, parsed.page_size)?;
            Ok(StorageBackend::Sqlite(service))
        }
    }
}

/// Errors raised while connecting to a table service
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("Invalid connection string: {0}")]
    ConnectionString(#[from] ConnectionStringError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl TableService for StorageBackend {
    type Table = StorageTable;

    fn table(&self, name: &str) -> StorageTable {
        match self {
            StorageBackend::Memory(s) => StorageTable::Memory(s.table(name)),
            StorageBackend::Sqlite(s) => StorageTable::Sqlite(s.table(name)),
        }
    }

    async fn service_properties(&self) -> BackendResult<ServiceProperties> {
        match self {
            StorageBackend::Memory(s) => s.service_properties().await,
            StorageBackend::Sqlite(s) => s.service_properties().await,
        }
    }
}

impl Table for StorageTable {
    fn name(&self) -> &str {
        match self {
            StorageTable::Memory(t) => t.name(),
            StorageTable::Sqlite(t) => t.name(),
        }
    }

    async fn create_if_not_exists(&self) -> BackendResult<bool> {
        match self {
            StorageTable::Memory(t) => t.create_if_not_exists().await,
            StorageTable::Sqlite(t) => t.create_if_not_exists().await,
        }
    }

    async fn insert(&self, entity: TableEntity) -> BackendResult<TableEntity> {
        match self {
            StorageTable::Memory(t) => t.insert(entity).await,
            StorageTable::Sqlite(t) => t.insert(entity).await,
        }
    }

    async fn upsert(&self, entity: TableEntity, if_match: Option<&str>) -> BackendResult<TableEntity> {
        match self {
            StorageTable::Memory(t) => t.upsert(entity, if_match).await,
            StorageTable::Sqlite(t) => t.upsert(entity, if_match).await,
        }
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> BackendResult<()> {
        match self {
            StorageTable::Memory(t) => t.delete(partition_key, row_key).await,
            StorageTable::Sqlite(t) => t.delete(partition_key, row_key).await,
        }
    }

    async fn retrieve(&self, partition_key: &str, row_key: &str) -> BackendResult<Option<TableEntity>> {
        match self {
            StorageTable::Memory(t) => t.retrieve(partition_key, row_key).await,
            StorageTable::Sqlite(t) => t.retrieve(partition_key, row_key).await,
        }
    }

    async fn query_partition(
        &self,
        partition_key: &str,
        continuation: Option<Continuation>,
    ) -> BackendResult<Segment> {
        match self {
            StorageTable::Memory(t) => t.query_partition(partition_key, continuation).await,
            StorageTable::Sqlite(t) => t.query_partition(partition_key, continuation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_development_storage() {
        let backend = connect("UseDevelopmentStorage=true").unwrap();
        assert!(matches!(backend, StorageBackend::Memory(_)));
    }

    #[test]
    fn test_connect_sqlite_in_memory() {
        let backend = connect("DataSource=:memory:").unwrap();
        assert!(matches!(backend, StorageBackend::Sqlite(_)));
    }

    #[test]
    fn test_connect_rejects_bad_connection_string() {
        let err = connect("not a connection string").err().unwrap();
        assert!(matches!(err, ConnectError::ConnectionString(_)));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_backend() {
        let backend = connect("UseDevelopmentStorage=true;PageSize=1").unwrap();
        let props = backend.service_properties().await.unwrap();
        assert_eq!(props.kind, "memory");

        let table = backend.table("values");
        assert_eq!(table.name(), "values");
        assert!(table.create_if_not_exists().await.unwrap());

        table.insert(TableEntity::new("p", "a", "1")).await.unwrap();
        table.insert(TableEntity::new("p", "b", "2")).await.unwrap();

        let first = table.query_partition("p", None).await.unwrap();
        assert_eq!(first.entities.len(), 1);
        assert!(first.continuation.is_some());
    }
}
