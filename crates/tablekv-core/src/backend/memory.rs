//! In-process table service
//!
//! Emulates the table service semantics the container relies on: tables
//! must be created before use, rows are unique per `(partition, row)`,
//! every write gets a fresh ETag and timestamp, and partition scans come
//! back in segments with a continuation.
//!
//! The service can be switched offline to simulate an unreachable backend;
//! every call then fails with `503`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::error::{BackendError, BackendResult};
use super::{Continuation, Segment, ServiceProperties, Table, TableEntity, TableService};
use super::connection::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

type Rows = BTreeMap<(String, String), TableEntity>;

struct MemoryState {
    tables: Mutex<HashMap<String, Rows>>,
    page_size: usize,
    offline: AtomicBool,
    etag_sequence: AtomicU64,
    create_calls: AtomicUsize,
}

/// In-process table service (`UseDevelopmentStorage=true`)
///
/// Cloning shares the underlying tables.
#[derive(Clone)]
pub struct MemoryTableService {
    state: Arc<MemoryState>,
}

impl MemoryTableService {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a service whose partition scans return at most `page_size` rows per segment
    ///
    /// The size is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Arc::new(MemoryState {
                tables: Mutex::new(HashMap::new()),
                page_size: page_size.clamp(1, MAX_PAGE_SIZE),
                offline: AtomicBool::new(false),
                etag_sequence: AtomicU64::new(0),
                create_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Simulate the service becoming unreachable (or reachable again)
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of create-if-not-exists calls received
    pub fn create_table_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    /// Check whether a table exists
    pub async fn table_exists(&self, name: &str) -> bool {
        self.state.tables.lock().await.contains_key(name)
    }
}

impl Default for MemoryTableService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("Table service is unreachable"));
        }
        Ok(())
    }

    /// Stamp an entity with a fresh ETag and timestamp
    fn stamp(&self, mut entity: TableEntity) -> TableEntity {
        let seq = self.etag_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        entity.etag = Some(format!(
            "W/\"datetime'{}'-{:x}\"",
            now.format("%Y-%m-%dT%H:%M:%S%.fZ"),
            seq
        ));
        entity.timestamp = Some(now);
        entity
    }
}

impl TableService for MemoryTableService {
    type Table = MemoryTable;

    fn table(&self, name: &str) -> MemoryTable {
        MemoryTable {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        }
    }

    async fn service_properties(&self) -> BackendResult<ServiceProperties> {
        self.state.check_online()?;
        Ok(ServiceProperties {
            kind: "memory",
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

/// Handle to one table of a [`MemoryTableService`]
pub struct MemoryTable {
    name: String,
    state: Arc<MemoryState>,
}

impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> BackendResult<bool> {
        self.state.check_online()?;
        self.state.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.state.tables.lock().await;
        if tables.contains_key(&self.name) {
            return Ok(false);
        }
        tables.insert(self.name.clone(), Rows::new());
        debug!(table = %self.name, "Created table");
        Ok(true)
    }

    async fn insert(&self, entity: TableEntity) -> BackendResult<TableEntity> {
        self.state.check_online()?;

        let mut tables = self.state.tables.lock().await;
        let rows = tables
            .get_mut(&self.name)
            .ok_or_else(|| BackendError::table_not_found(&self.name))?;

        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if rows.contains_key(&key) {
            return Err(BackendError::already_exists(format!(
                "The specified entity already exists: ({}, {})",
                key.0, key.1
            )));
        }

        let stored = self.state.stamp(entity);
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn upsert(&self, entity: TableEntity, if_match: Option<&str>) -> BackendResult<TableEntity> {
        self.state.check_online()?;

        let mut tables = self.state.tables.lock().await;
        let rows = tables
            .get_mut(&self.name)
            .ok_or_else(|| BackendError::table_not_found(&self.name))?;

        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if let Some(expected) = if_match {
            match rows.get(&key) {
                None => {
                    return Err(BackendError::not_found(format!(
                        "The specified entity does not exist: ({}, {})",
                        key.0, key.1
                    )))
                }
                Some(current) if current.etag.as_deref() != Some(expected) => {
                    return Err(BackendError::condition_not_satisfied(
                        "The update condition specified in the request was not satisfied",
                    ))
                }
                Some(_) => {}
            }
        }

        let stored = self.state.stamp(entity);
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> BackendResult<()> {
        self.state.check_online()?;

        let mut tables = self.state.tables.lock().await;
        let rows = tables
            .get_mut(&self.name)
            .ok_or_else(|| BackendError::table_not_found(&self.name))?;

        rows.remove(&(partition_key.to_string(), row_key.to_string()))
            .map(|_| ())
            .ok_or_else(|| {
                BackendError::not_found(format!(
                    "The specified entity does not exist: ({}, {})",
                    partition_key, row_key
                ))
            })
    }

    async fn retrieve(&self, partition_key: &str, row_key: &str) -> BackendResult<Option<TableEntity>> {
        self.state.check_online()?;

        let tables = self.state.tables.lock().await;
        let rows = tables
            .get(&self.name)
            .ok_or_else(|| BackendError::table_not_found(&self.name))?;

        Ok(rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    async fn query_partition(
        &self,
        partition_key: &str,
        continuation: Option<Continuation>,
    ) -> BackendResult<Segment> {
        self.state.check_online()?;

        let tables = self.state.tables.lock().await;
        let rows = tables
            .get(&self.name)
            .ok_or_else(|| BackendError::table_not_found(&self.name))?;

        let start_row = continuation
            .map(|c| c.next_row_key)
            .unwrap_or_default();
        let start = (partition_key.to_string(), start_row);

        let page_size = self.state.page_size;
        let mut entities = Vec::with_capacity(page_size.min(64));
        let mut next = None;
        for ((pk, rk), entity) in rows.range(start..) {
            if pk != partition_key {
                break;
            }
            if entities.len() == page_size {
                next = Some(Continuation {
                    next_partition_key: pk.clone(),
                    next_row_key: rk.clone(),
                });
                break;
            }
            entities.push(entity.clone());
        }

        Ok(Segment {
            entities,
            continuation: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::error::FailureKind;

    async fn provisioned(page_size: usize) -> (MemoryTableService, MemoryTable) {
        let service = MemoryTableService::with_page_size(page_size);
        let table = service.table("values");
        table.create_if_not_exists().await.unwrap();
        (service, table)
    }

    #[tokio::test]
    async fn test_create_if_not_exists_is_idempotent() {
        let service = MemoryTableService::new();
        let table = service.table("values");

        assert!(table.create_if_not_exists().await.unwrap());
        assert!(!table.create_if_not_exists().await.unwrap());
        assert!(service.table_exists("values").await);
        assert_eq!(service.create_table_calls(), 2);
    }

    #[tokio::test]
    async fn test_operations_on_missing_table_fail() {
        let service = MemoryTableService::new();
        let table = service.table("missing");

        let err = table.retrieve("p", "k").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_insert_assigns_etag_and_timestamp() {
        let (_service, table) = provisioned(10).await;

        let stored = table.insert(TableEntity::new("p", "k", "v")).await.unwrap();
        assert!(stored.etag.is_some());
        assert!(stored.timestamp.is_some());

        let err = table.insert(TableEntity::new("p", "k", "other")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Conflict);
    }

    #[tokio::test]
    async fn test_conditional_upsert() {
        let (_service, table) = provisioned(10).await;

        let first = table.insert(TableEntity::new("p", "k", "v1")).await.unwrap();
        let etag = first.etag.clone().unwrap();

        let second = table
            .upsert(TableEntity::new("p", "k", "v2"), Some(&etag))
            .await
            .unwrap();
        assert_ne!(second.etag, first.etag);

        // The first ETag is now stale
        let err = table
            .upsert(TableEntity::new("p", "k", "v3"), Some(&etag))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::PreconditionFailed);

        let err = table
            .upsert(TableEntity::new("p", "gone", "v"), Some(&etag))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_query_partition_pages() {
        let (_service, table) = provisioned(2).await;
        for key in ["a", "b", "c", "d", "e"] {
            table.insert(TableEntity::new("p", key, key)).await.unwrap();
        }
        table.insert(TableEntity::new("q", "a", "other")).await.unwrap();

        let mut keys = Vec::new();
        let mut continuation = None;
        let mut pages = 0;
        loop {
            let segment = table.query_partition("p", continuation).await.unwrap();
            pages += 1;
            keys.extend(segment.entities.into_iter().map(|e| e.row_key));
            continuation = segment.continuation;
            if continuation.is_none() {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_offline_service_fails_every_call() {
        let (service, table) = provisioned(10).await;
        service.set_offline(true);

        let err = service.service_properties().await.unwrap_err();
        assert_eq!(err.status(), 503);
        assert_eq!(err.kind(), FailureKind::Other);
        assert!(table.retrieve("p", "k").await.is_err());

        service.set_offline(false);
        assert!(service.service_properties().await.is_ok());
    }
}
