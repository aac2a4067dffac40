pub mod probe;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use http::uri;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::DiscoveryConfig;
use crate::fetch::Fetch;
use crate::model::{DiscoveryOutcome, ExporterEndpoint};
use crate::storage::{Storage, StorageError};

pub use self::probe::{fingerprint, DiscoveryProbe};

/// Host suffixes probed by a subnet scan.
const SUBNET_HOSTS: std::ops::RangeInclusive<u8> = 1..=254;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),
    #[error("invalid subnet prefix {0:?}, expected three octets such as 192.168.1")]
    InvalidPrefix(String),
}

/// Finds exporters and writes them into the registry.
#[derive(Debug, Clone)]
pub struct Discovery {
    storage: Arc<dyn Storage>,
    probe: DiscoveryProbe,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(storage: Arc<dyn Storage>, fetcher: Arc<dyn Fetch>, config: DiscoveryConfig) -> Self {
        let probe = DiscoveryProbe::new(fetcher, config.probe_timeout);
        Self {
            storage,
            probe,
            config,
        }
    }

    /// Canonical metrics url for an address, e.g. `http://10.0.0.4:9100/metrics`.
    pub fn url_for(&self, address: &str) -> Result<String, DiscoveryError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(DiscoveryError::InvalidAddress(address.to_string()));
        }

        uri::Builder::new()
            .scheme(self.config.scheme.as_str())
            .authority(format!("{}:{}", address, self.config.port).as_str())
            .path_and_query(self.config.path.as_str())
            .build()
            .map(|uri| uri.to_string())
            .map_err(|_| DiscoveryError::InvalidAddress(address.to_string()))
    }

    /// Adds the exporter at one address unless its url is already registered.
    pub async fn add_single(&self, address: &str) -> Result<DiscoveryOutcome, DiscoveryError> {
        let url = self.url_for(address)?;

        if self.storage.exists_by_url(&url).await? {
            tracing::info!(%url, "exporter already registered");
            return Ok(DiscoveryOutcome::AlreadyExists);
        }

        let candidate = match self.probe.probe(&url).await {
            Some(candidate) => candidate,
            None => {
                tracing::info!(%url, "exporter not found or unreachable");
                return Ok(DiscoveryOutcome::Unreachable);
            }
        };

        let endpoint = self
            .storage
            .append_endpoints(&[candidate])
            .await?
            .pop()
            .ok_or_else(|| StorageError::Internal("insert returned no endpoint".into()))?;

        tracing::info!(id = endpoint.id, name = %endpoint.name, %url, "added exporter");
        Ok(DiscoveryOutcome::Added(endpoint))
    }

    /// Probes hosts 1..=254 of a `a.b.c` prefix, skipping urls that were
    /// registered when the scan started, and stores everything that answered
    /// in one batch.
    pub async fn scan_subnet(&self, prefix: &str) -> Result<Vec<ExporterEndpoint>, DiscoveryError> {
        let prefix = parse_prefix(prefix)?;

        let existing: HashSet<String> = self
            .storage
            .list_endpoints()
            .await?
            .into_iter()
            .map(|e| e.url)
            .collect();

        let mut candidates = Vec::new();
        for host in SUBNET_HOSTS {
            let url = self.url_for(&format!("{}.{}", prefix, host))?;
            if !existing.contains(&url) {
                candidates.push(url);
            }
        }

        tracing::info!(
            "scanning {}.0/24: {} candidates, {} already registered",
            prefix,
            candidates.len(),
            SUBNET_HOSTS.count() - candidates.len()
        );

        let gate = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let tasks: Vec<_> = candidates
            .into_iter()
            .map(|url| {
                let gate = gate.clone();
                let probe = self.probe.clone();
                tokio::spawn(async move {
                    // the permit is held until the probe finishes, whatever the outcome
                    let _permit = gate.acquire_owned().await.ok()?;
                    probe.probe(&url).await
                })
            })
            .collect();

        let mut found = Vec::new();
        for result in join_all(tasks).await {
            match result {
                Ok(Some(candidate)) => found.push(candidate),
                Ok(None) => {}
                Err(e) => tracing::error!("probe task failed: {}", e),
            }
        }

        if found.is_empty() {
            tracing::info!("scan of {}.0/24 found no new exporters", prefix);
            return Ok(Vec::new());
        }

        let stored = self.storage.append_endpoints(&found).await?;
        tracing::info!("scan of {}.0/24 added {} exporters", prefix, stored.len());

        Ok(stored)
    }
}

// "192.168.1" -> "192.168.1", normalised and validated
fn parse_prefix(prefix: &str) -> Result<String, DiscoveryError> {
    let octets: Vec<&str> = prefix.trim().split('.').collect();
    if octets.len() != 3 {
        return Err(DiscoveryError::InvalidPrefix(prefix.to_string()));
    }

    let octets = octets
        .iter()
        .map(|o| o.parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| DiscoveryError::InvalidPrefix(prefix.to_string()))?;

    Ok(format!("{}.{}.{}", octets[0], octets[1], octets[2]))
}
