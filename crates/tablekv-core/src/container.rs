//! Key-value container
//!
//! [`KeyValueContainer`] stores [`Record`]s in one backing table. The
//! collection id is the partition key and the record key is the row key.
//!
//! ## Provisioning
//!
//! The table is created lazily on first use with create-if-not-exists and
//! the handle is memoized for the lifetime of the container. Concurrent
//! first callers wait on the same initialization, so only one provisioning
//! call reaches the backend. A failed provisioning attempt leaves nothing
//! cached and the next operation tries again.
//!
//! ## Concurrency
//!
//! Version checks happen in the backend. A rejected conditional write is
//! reported as [`Error::ConflictingResource`]; nothing is retried here.

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{
    connect, BackendError, ConnectError, FailureKind, StorageBackend, Table, TableEntity,
    TableService,
};
use crate::config::ServicesConfig;
use crate::error::{Error, Result};
use crate::model::{Record, StatusResult, VersionToken};

const CONFLICT_ON_CREATE: &str = "There is already a value with the key specified.";
const CONFLICT_ON_UPSERT: &str = "ETag mismatch: the resource has been updated by another client.";
const NOT_FOUND: &str = "Requested resource doesn't exist";

/// Strip every character the table service does not allow in table names
///
/// Only ASCII letters and digits survive.
pub fn sanitize_table_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// CRUD over partitioned key-value records in a single table
pub struct KeyValueContainer<S: TableService> {
    service: S,
    table_name: String,
    table: OnceCell<S::Table>,
}

impl KeyValueContainer<StorageBackend> {
    /// Connect to the backend named by the configuration
    pub fn from_config(config: &ServicesConfig) -> Result<Self> {
        let service = connect(&config.storage_connection_string).map_err(|e| match e {
            ConnectError::ConnectionString(inner) => {
                error!(error = %inner, "Invalid storage account information provided");
                Error::InvalidConfiguration(inner.to_string())
            }
            ConnectError::Backend(inner) => Error::Backend(inner),
        })?;
        Self::new(service, &config.storage_collection_name)
    }
}

impl<S: TableService> KeyValueContainer<S> {
    /// Create a container over `service` for the given logical collection name
    ///
    /// Fails with [`Error::InvalidConfiguration`] when the name has no
    /// alphanumeric characters.
    pub fn new(service: S, collection_name: &str) -> Result<Self> {
        let table_name = sanitize_table_name(collection_name);
        if table_name.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "Collection name '{}' contains no alphanumeric characters",
                collection_name
            )));
        }

        info!(table = %table_name, "Started");
        Ok(Self {
            service,
            table_name,
            table: OnceCell::new(),
        })
    }

    /// Name of the backing table
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// The underlying table service
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Whether the backing table has been provisioned by this container
    pub fn is_provisioned(&self) -> bool {
        self.table.initialized()
    }

    /// Get the table handle, provisioning it on first use
    async fn table(&self) -> Result<&S::Table> {
        self.table
            .get_or_try_init(|| async {
                let table = self.service.table(&self.table_name);
                let created = table.create_if_not_exists().await?;
                if created {
                    info!(table = %self.table_name, "Created backing table");
                } else {
                    debug!(table = %self.table_name, "Backing table already exists");
                }
                Ok::<_, Error>(table)
            })
            .await
    }

    /// Insert a new record
    ///
    /// Fails with [`Error::ConflictingResource`] if the key is taken.
    pub async fn create(&self, collection_id: &str, key: &str, data: &str) -> Result<Record> {
        let table = self.table().await?;

        match table.insert(TableEntity::new(collection_id, key, data)).await {
            Ok(entity) => to_record(entity),
            Err(e) if e.kind() == FailureKind::Conflict => {
                info!(collection_id, key, "{}", CONFLICT_ON_CREATE);
                Err(Error::ConflictingResource(CONFLICT_ON_CREATE.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one record
    ///
    /// Fails with [`Error::ResourceNotFound`] if there is no such record.
    pub async fn get(&self, collection_id: &str, key: &str) -> Result<Record> {
        let table = self.table().await?;

        match table.retrieve(collection_id, key).await? {
            Some(entity) => to_record(entity),
            None => {
                info!(collection_id, key, "{}", NOT_FOUND);
                Err(Error::ResourceNotFound(NOT_FOUND.to_string()))
            }
        }
    }

    /// Fetch every record of a collection
    ///
    /// Follows continuations until the scan is exhausted. Unknown
    /// collections yield an empty list.
    pub async fn list_all(&self, collection_id: &str) -> Result<Vec<Record>> {
        self.scan(collection_id, None).await
    }

    /// Like [`list_all`](Self::list_all), but stops fetching pages once
    /// `cancel` fires and returns [`Error::Cancelled`]
    pub async fn list_all_cancellable(
        &self,
        collection_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        self.scan(collection_id, Some(cancel)).await
    }

    async fn scan(
        &self,
        collection_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Record>> {
        let table = self.table().await?;

        let mut records = Vec::new();
        let mut continuation = None;
        let mut pages = 0usize;
        loop {
            let query = table.query_partition(collection_id, continuation.take());
            let segment = match cancel {
                Some(token) => {
                    if token.is_cancelled() {
                        info!(collection_id, pages, "Listing cancelled");
                        return Err(Error::Cancelled);
                    }
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            info!(collection_id, pages, "Listing cancelled");
                            return Err(Error::Cancelled);
                        }
                        segment = query => segment?,
                    }
                }
                None => query.await?,
            };
            pages += 1;

            for entity in segment.entities {
                records.push(to_record(entity)?);
            }

            match segment.continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!(collection_id, pages, count = records.len(), "Listed collection");
        Ok(records)
    }

    /// Insert or replace a record
    ///
    /// Without a version token the write is unconditional. With one, the
    /// write only succeeds if the stored record still carries that token;
    /// otherwise (including when the record has since been deleted) it fails
    /// with [`Error::ConflictingResource`].
    pub async fn upsert(
        &self,
        collection_id: &str,
        key: &str,
        data: &str,
        version: Option<&VersionToken>,
    ) -> Result<Record> {
        let table = self.table().await?;
        let entity = TableEntity::new(collection_id, key, data);

        match table.upsert(entity, version.map(VersionToken::as_etag)).await {
            Ok(entity) => to_record(entity),
            Err(e) if version.is_some() && is_version_mismatch(&e) => {
                let etag = version.map(ToString::to_string).unwrap_or_default();
                info!(collection_id, key, etag = %etag, "{}", CONFLICT_ON_UPSERT);
                Err(Error::ConflictingResource(CONFLICT_ON_UPSERT.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a record
    ///
    /// Deleting a record that does not exist succeeds.
    pub async fn delete(&self, collection_id: &str, key: &str) -> Result<()> {
        let table = self.table().await?;

        match table.delete(collection_id, key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == FailureKind::NotFound => {
                debug!(collection_id, key, "Delete of missing record ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check that the table service is reachable
    ///
    /// Never fails; problems are reported in the returned status.
    pub async fn ping(&self) -> StatusResult {
        match self.service.service_properties().await {
            Ok(props) => {
                debug!(kind = props.kind, version = %props.version, "Storage check passed");
                StatusResult::healthy("Alive and well!")
            }
            Err(e) => {
                info!(error = %e, "Storage check failed");
                StatusResult::unhealthy(format!("Storage check failed: {}", e))
            }
        }
    }
}

/// A conditional write was rejected because the stored version moved on
fn is_version_mismatch(error: &BackendError) -> bool {
    matches!(
        error.kind(),
        FailureKind::PreconditionFailed | FailureKind::NotFound
    )
}

fn to_record(entity: TableEntity) -> Result<Record> {
    Record::from_entity(entity).ok_or_else(|| {
        Error::Backend(BackendError::internal(
            "Table service response is missing the ETag or timestamp",
        ))
    })
}
