use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::ScrapeConfig;
use crate::exposition;
use crate::fetch::{Fetch, FetchError, FetchResponse};
use crate::model::ExporterEndpoint;
use crate::storage::{Storage, StorageError};

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Outcome of one collection cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub exporters: usize,
    pub failed: usize,
    pub saved: usize,
    pub skipped_lines: usize,
}

/// Polls every enabled exporter on a fixed interval.
///
/// Exporters are visited one at a time and a cycle never overlaps the next:
/// the wait only starts once a cycle has finished.
#[derive(Debug)]
pub struct Scraper {
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn Fetch>,
    config: ScrapeConfig,
}

impl Scraper {
    pub fn new(storage: Arc<dyn Storage>, fetcher: Arc<dyn Fetch>, config: ScrapeConfig) -> Self {
        Self {
            storage,
            fetcher,
            config,
        }
    }

    /// Runs cycles until `shutdown` turns true or its sender is dropped. The
    /// wait between cycles is interrupted as soon as shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.config.interval, "scraper started");

        while !*shutdown.borrow() {
            if let Err(e) = self.collect_cycle().await {
                tracing::error!("collection cycle failed: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("scraper stopped");
    }

    /// Scrapes every enabled exporter once. Only a failure to read the
    /// registry fails the cycle; per-exporter failures are logged and counted.
    pub async fn collect_cycle(&self) -> Result<CycleReport, StorageError> {
        let endpoints = self.storage.list_enabled_endpoints().await?;

        let mut report = CycleReport {
            exporters: endpoints.len(),
            ..Default::default()
        };

        if endpoints.is_empty() {
            tracing::info!("no enabled exporters, skipping collection");
            return Ok(report);
        }

        tracing::info!("collecting metrics from {} exporters", endpoints.len());

        for endpoint in &endpoints {
            match self.scrape(endpoint).await {
                Ok((saved, skipped)) => {
                    report.saved += saved;
                    report.skipped_lines += skipped;
                    tracing::info!(
                        name = %endpoint.name,
                        url = %endpoint.url,
                        "saved {} samples",
                        saved
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        name = %endpoint.name,
                        url = %endpoint.url,
                        "error collecting metrics: {}",
                        e
                    );
                }
            }
        }

        Ok(report)
    }

    /// Fetch, parse and store one exporter. Returns saved samples and
    /// skipped lines.
    pub async fn scrape(&self, endpoint: &ExporterEndpoint) -> Result<(usize, usize), ScrapeError> {
        let response = self
            .fetcher
            .get(&endpoint.url, self.config.timeout)
            .await
            .and_then(FetchResponse::error_for_status)?;

        let timestamp = response.date.unwrap_or_else(Utc::now);
        let batch = exposition::parse_batch(&response.body, timestamp, endpoint.id);

        let saved = self.storage.append_samples(&batch.samples).await?;

        Ok((saved, batch.skipped))
    }
}
