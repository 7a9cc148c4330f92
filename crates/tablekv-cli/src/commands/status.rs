//! Status command handler

use anyhow::{bail, Result};

use tablekv_core::{KeyValueContainer, TableService};

use crate::output::Output;

/// Check that the storage backend is reachable
///
/// Prints the status either way; fails when the backend is unhealthy so
/// the exit code can be used in scripts.
pub async fn ping<S: TableService>(container: &KeyValueContainer<S>, output: &Output) -> Result<()> {
    let status = container.ping().await;
    output.print_status(&status);

    if !status.is_healthy {
        bail!("Storage backend is unhealthy");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tablekv_core::backend::MemoryTableService;

    #[tokio::test]
    async fn test_ping_reports_unhealthy_as_error() {
        let container = KeyValueContainer::new(MemoryTableService::new(), "values").unwrap();
        let output = Output::new(OutputFormat::Quiet);

        assert!(ping(&container, &output).await.is_ok());

        container.service().set_offline(true);
        assert!(ping(&container, &output).await.is_err());
    }
}
