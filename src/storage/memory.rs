use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{device_filter, Storage, StorageError};
use crate::model::{ExporterEndpoint, ExporterId, NewExporter, Sample};

/// Samples kept by [`MemoryStorage::new`] before the oldest are dropped.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 100_000;

/// In-process storage. Nothing survives a restart.
///
/// Samples live in a bounded buffer: once it is full every append evicts the
/// oldest samples.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug)]
struct Inner {
    endpoints: Vec<ExporterEndpoint>,
    samples: VecDeque<Sample>,
    capacity: usize,
    next_id: ExporterId,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SAMPLE_CAPACITY)
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                endpoints: Vec::new(),
                samples: VecDeque::with_capacity(capacity.min(DEFAULT_SAMPLE_CAPACITY)),
                capacity,
                next_id: 0,
            })),
        }
    }

    /// Every retained sample in insertion order.
    pub async fn samples(&self) -> Vec<Sample> {
        self.inner.read().await.samples.iter().cloned().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn append_samples(&self, samples: &[Sample]) -> Result<usize, StorageError> {
        let mut inner = self.inner.write().await;
        let capacity = inner.capacity;

        // only the newest `capacity` samples of a batch can be retained
        let kept = &samples[samples.len().saturating_sub(capacity)..];
        let overflow = (inner.samples.len() + kept.len()).saturating_sub(capacity);
        inner.samples.drain(..overflow);
        inner.samples.extend(kept.iter().cloned());

        tracing::debug!(count = kept.len(), evicted = overflow, "stored samples");
        Ok(kept.len())
    }

    async fn append_endpoints(
        &self,
        endpoints: &[NewExporter],
    ) -> Result<Vec<ExporterEndpoint>, StorageError> {
        let mut inner = self.inner.write().await;
        let mut stored = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            inner.next_id += 1;
            let endpoint = endpoint.clone().with_id(inner.next_id);
            inner.endpoints.push(endpoint.clone());
            stored.push(endpoint);
        }

        tracing::debug!(count = stored.len(), "stored endpoints");
        Ok(stored)
    }

    async fn list_endpoints(&self) -> Result<Vec<ExporterEndpoint>, StorageError> {
        Ok(self.inner.read().await.endpoints.clone())
    }

    async fn exists_by_url(&self, url: &str) -> Result<bool, StorageError> {
        Ok(self.inner.read().await.endpoints.iter().any(|e| e.url == url))
    }

    async fn get_endpoint(&self, id: ExporterId) -> Result<Option<ExporterEndpoint>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .endpoints
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn set_enabled(&self, id: ExporterId, enabled: bool) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        match inner.endpoints.iter_mut().find(|e| e.id == id) {
            Some(endpoint) => {
                endpoint.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_endpoint(&self, id: ExporterId) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        let before = inner.endpoints.len();
        inner.endpoints.retain(|e| e.id != id);
        Ok(inner.endpoints.len() != before)
    }

    async fn recent_samples(
        &self,
        limit: usize,
        device: Option<&str>,
    ) -> Result<Vec<Sample>, StorageError> {
        let inner = self.inner.read().await;
        let device = device_filter(device);

        let mut samples: Vec<Sample> = inner
            .samples
            .iter()
            .filter(|s| device.map(|d| s.device == d).unwrap_or(true))
            .cloned()
            .collect();

        // stable, so equal timestamps keep newest-inserted first after the reverse
        samples.reverse();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        samples.truncate(limit);

        Ok(samples)
    }
}
