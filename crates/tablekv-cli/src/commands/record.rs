//! Record command handlers

use std::io::Read;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tablekv_core::{KeyValueContainer, TableService, VersionToken};

use crate::output::Output;

/// Resolve the payload argument; `-` reads it from stdin
pub fn read_data(arg: String) -> Result<String> {
    if arg != "-" {
        return Ok(arg);
    }
    let mut data = String::new();
    std::io::stdin()
        .read_to_string(&mut data)
        .context("Failed to read data from stdin")?;
    Ok(data)
}

/// Create a new record
pub async fn create<S: TableService>(
    container: &KeyValueContainer<S>,
    collection_id: String,
    key: String,
    data: String,
    output: &Output,
) -> Result<()> {
    let record = container
        .create(&collection_id, &key, &data)
        .await
        .with_context(|| format!("Failed to create '{}/{}'", collection_id, key))?;

    output.success(&format!("Created {}/{}", collection_id, key));
    output.print_record(&record);
    Ok(())
}

/// Show a single record
pub async fn get<S: TableService>(
    container: &KeyValueContainer<S>,
    collection_id: String,
    key: String,
    output: &Output,
) -> Result<()> {
    let record = container
        .get(&collection_id, &key)
        .await
        .with_context(|| format!("Failed to get '{}/{}'", collection_id, key))?;

    output.print_record(&record);
    Ok(())
}

/// List every record of a collection
///
/// Ctrl-C stops the listing instead of printing a partial result.
pub async fn list<S: TableService>(
    container: &KeyValueContainer<S>,
    collection_id: String,
    output: &Output,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping listing");
                cancel.cancel();
            }
        })
    };

    let result = container.list_all_cancellable(&collection_id, &cancel).await;
    watcher.abort();

    let records = result.with_context(|| format!("Failed to list '{}'", collection_id))?;
    output.print_records(&collection_id, &records);
    Ok(())
}

/// Insert or replace a record, optionally guarded by an ETag
pub async fn upsert<S: TableService>(
    container: &KeyValueContainer<S>,
    collection_id: String,
    key: String,
    data: String,
    etag: Option<String>,
    output: &Output,
) -> Result<()> {
    let version = etag
        .map(|e| e.parse::<VersionToken>())
        .transpose()
        .context("Invalid --etag value")?;

    let record = container
        .upsert(&collection_id, &key, &data, version.as_ref())
        .await
        .with_context(|| format!("Failed to upsert '{}/{}'", collection_id, key))?;

    output.success(&format!("Saved {}/{}", collection_id, key));
    output.print_record(&record);
    Ok(())
}

/// Delete a record (succeeds if it is already gone)
pub async fn delete<S: TableService>(
    container: &KeyValueContainer<S>,
    collection_id: String,
    key: String,
    output: &Output,
) -> Result<()> {
    container
        .delete(&collection_id, &key)
        .await
        .with_context(|| format!("Failed to delete '{}/{}'", collection_id, key))?;

    output.success(&format!("Deleted {}/{}", collection_id, key));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tablekv_core::backend::MemoryTableService;
    use tablekv_core::Error;

    fn setup() -> (KeyValueContainer<MemoryTableService>, Output) {
        let container = KeyValueContainer::new(MemoryTableService::new(), "values").unwrap();
        (container, Output::new(OutputFormat::Quiet))
    }

    #[test]
    fn test_read_data_passes_literal_through() {
        assert_eq!(read_data("{\"a\":1}".to_string()).unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let (container, output) = setup();

        create(&container, "devices".into(), "d1".into(), "v".into(), &output)
            .await
            .unwrap();
        get(&container, "devices".into(), "d1".into(), &output)
            .await
            .unwrap();
        list(&container, "devices".into(), &output).await.unwrap();

        delete(&container, "devices".into(), "d1".into(), &output)
            .await
            .unwrap();
        let err = get(&container, "devices".into(), "d1".into(), &output)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_with_stale_etag_fails() {
        let (container, output) = setup();

        let first = container.create("devices", "d1", "v1").await.unwrap();
        let stale = first.version().to_string();
        upsert(&container, "devices".into(), "d1".into(), "v2".into(), Some(stale.clone()), &output)
            .await
            .unwrap();

        let err = upsert(&container, "devices".into(), "d1".into(), "v3".into(), Some(stale), &output)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ConflictingResource(_))
        ));
    }

    #[tokio::test]
    async fn test_records_persist_in_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let services = tablekv_core::ServicesConfig {
            storage_connection_string: format!(
                "DataSource={}",
                dir.path().join("tablekv.db").display()
            ),
            storage_collection_name: "values".to_string(),
        };
        let output = Output::new(OutputFormat::Quiet);

        let container = KeyValueContainer::from_config(&services).unwrap();
        create(&container, "devices".into(), "d1".into(), "v".into(), &output)
            .await
            .unwrap();
        drop(container);

        let reopened = KeyValueContainer::from_config(&services).unwrap();
        let record = reopened.get("devices", "d1").await.unwrap();
        assert_eq!(record.data(), "v");
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_etag() {
        let (container, output) = setup();

        let result = upsert(&container, "devices".into(), "d1".into(), "v".into(), Some(String::new()), &output).await;
        assert!(result.is_err());
        // Nothing was written
        assert!(container.list_all("devices").await.unwrap().is_empty());
    }
}
