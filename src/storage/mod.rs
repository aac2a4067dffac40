pub mod clickhouse;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ExporterEndpoint, ExporterId, NewExporter, Sample};

pub use self::clickhouse::ClickhouseStorage;
pub use self::memory::MemoryStorage;

/// Default number of rows returned by [`Storage::recent_samples`].
pub const DEFAULT_RECENT_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("clickhouse error: {0}")]
    Clickhouse(#[from] clickhouse_rs::errors::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Persistence for samples and the exporter registry.
///
/// Registry reads are point-in-time snapshots and inserts are individual; no
/// lock spans calls, so two callers can both see a url as absent and both
/// insert it.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Persists all samples and returns how many were stored.
    async fn append_samples(&self, samples: &[Sample]) -> Result<usize, StorageError>;

    /// Stores new exporters, assigning ids, and returns the stored rows.
    ///
    /// Ids are unique among live exporters and never reused, even with several
    /// writers: [`ClickhouseStorage`] keeps the earliest claim on a contested id
    /// and reallocates the others.
    async fn append_endpoints(
        &self,
        endpoints: &[NewExporter],
    ) -> Result<Vec<ExporterEndpoint>, StorageError>;

    /// Every registered exporter ordered by id.
    async fn list_endpoints(&self) -> Result<Vec<ExporterEndpoint>, StorageError>;

    async fn list_enabled_endpoints(&self) -> Result<Vec<ExporterEndpoint>, StorageError> {
        Ok(self
            .list_endpoints()
            .await?
            .into_iter()
            .filter(|e| e.enabled)
            .collect())
    }

    async fn exists_by_url(&self, url: &str) -> Result<bool, StorageError>;

    async fn get_endpoint(&self, id: ExporterId) -> Result<Option<ExporterEndpoint>, StorageError>;

    /// Returns false if no exporter has this id.
    async fn set_enabled(&self, id: ExporterId, enabled: bool) -> Result<bool, StorageError>;

    /// Returns false if no exporter has this id.
    async fn delete_endpoint(&self, id: ExporterId) -> Result<bool, StorageError>;

    /// Newest samples first, optionally restricted to one device.
    async fn recent_samples(
        &self,
        limit: usize,
        device: Option<&str>,
    ) -> Result<Vec<Sample>, StorageError>;
}

// an empty device filter means no filter
pub(crate) fn device_filter(device: Option<&str>) -> Option<&str> {
    device.filter(|d| !d.is_empty())
}
