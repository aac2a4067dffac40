use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use clickhouse_rs::{Block, Options, Pool};

use super::{device_filter, Storage, StorageError};
use crate::model::{ExporterEndpoint, ExporterId, NewExporter, Sample};

static CREATE_EXPORTERS: &str = r"CREATE TABLE IF NOT EXISTS exporters (
        id UInt32,
        name String,
        url String,
        enabled UInt8,
        deleted UInt8,
        version UInt64
    ) ENGINE = ReplacingMergeTree(version) ORDER BY (id, url)
";

static CREATE_SAMPLES: &str = r"CREATE TABLE IF NOT EXISTS samples (
        timestamp Int64,
        exporter_id UInt32,
        metric String,
        device String,
        value Float64
    ) ENGINE = MergeTree() PARTITION BY toYYYYMMDD(toDateTime(timestamp)) ORDER BY (timestamp)
";

static SELECT_EXPORTERS: &str = "SELECT id, name, url, enabled FROM exporters FINAL WHERE deleted = 0";

/// Rounds of id allocation before `append_endpoints` gives up.
const MAX_ID_ATTEMPTS: usize = 5;

/// A live exporter row as seen while checking for id collisions.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IdClaim {
    id: ExporterId,
    url: String,
    version: u64,
}

/// ClickHouse-backed storage.
///
/// Exporter rows are versioned: toggling or deleting an exporter writes a new
/// version of its row and reads go through `FINAL`.
///
/// Ids are allocated as `max(id) + 1`, which two writers can race on. Rows are
/// keyed by `(id, url)` so a clash never collapses two exporters into one;
/// after inserting, a writer looks for other urls holding its ids and, if it
/// claimed an id later than them, withdraws its row and allocates again.
#[derive(Clone)]
pub struct ClickhouseStorage {
    pool: Pool,
}

impl std::fmt::Debug for ClickhouseStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickhouseStorage").finish()
    }
}

impl ClickhouseStorage {
    /// Connects and creates the tables if they are missing.
    pub async fn connect(options: Options) -> Result<Self, StorageError> {
        let pool = Pool::new(options);
        let mut client = pool.get_handle().await?;

        for ddl in &[CREATE_EXPORTERS, CREATE_SAMPLES] {
            tracing::debug!("{}", ddl);
            client.execute(*ddl).await?;
        }

        Ok(Self { pool })
    }

    async fn query_endpoints(&self, sql: String) -> Result<Vec<ExporterEndpoint>, StorageError> {
        tracing::debug!("{}", sql);
        let mut client = self.pool.get_handle().await?;
        let block = client.query(sql).fetch_all().await?;

        let mut endpoints = Vec::new();
        for row in block.rows() {
            let enabled: u8 = row.get("enabled")?;
            endpoints.push(ExporterEndpoint {
                id: row.get("id")?,
                name: row.get("name")?,
                url: row.get("url")?,
                enabled: enabled != 0,
            });
        }

        Ok(endpoints)
    }

    async fn max_id(&self) -> Result<ExporterId, StorageError> {
        // tombstoned rows count too, so a withdrawn id is never handed out again
        let mut client = self.pool.get_handle().await?;
        let block = client
            .query("SELECT max(id) AS max_id FROM exporters")
            .fetch_all()
            .await?;
        match block.rows().next() {
            Some(row) => Ok(row.get("max_id")?),
            None => Ok(0),
        }
    }

    async fn claims(&self, endpoints: &[ExporterEndpoint]) -> Result<Vec<IdClaim>, StorageError> {
        let ids: Vec<String> = endpoints.iter().map(|e| e.id.to_string()).collect();
        let sql = format!(
            "SELECT id, url, version FROM exporters FINAL WHERE deleted = 0 AND id IN ({})",
            ids.join(", ")
        );
        tracing::debug!("{}", sql);

        let mut client = self.pool.get_handle().await?;
        let block = client.query(sql).fetch_all().await?;

        let mut claims = Vec::new();
        for row in block.rows() {
            claims.push(IdClaim {
                id: row.get("id")?,
                url: row.get("url")?,
                version: row.get("version")?,
            });
        }

        Ok(claims)
    }

    /// Writes the rows and returns the version they were written with.
    async fn write_endpoints(
        &self,
        endpoints: &[ExporterEndpoint],
        deleted: bool,
    ) -> Result<u64, StorageError> {
        let version = row_version();
        let block = Block::new()
            .column("id", endpoints.iter().map(|e| e.id).collect::<Vec<u32>>())
            .column("name", endpoints.iter().map(|e| e.name.clone()).collect::<Vec<String>>())
            .column("url", endpoints.iter().map(|e| e.url.clone()).collect::<Vec<String>>())
            .column("enabled", endpoints.iter().map(|e| e.enabled as u8).collect::<Vec<u8>>())
            .column("deleted", vec![deleted as u8; endpoints.len()])
            .column("version", vec![version; endpoints.len()]);

        let mut client = self.pool.get_handle().await?;
        client.insert("exporters", block).await?;
        Ok(version)
    }
}

#[async_trait]
impl Storage for ClickhouseStorage {
    async fn append_samples(&self, samples: &[Sample]) -> Result<usize, StorageError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let block = Block::new()
            .column(
                "timestamp",
                samples.iter().map(|s| s.timestamp.timestamp()).collect::<Vec<i64>>(),
            )
            .column("exporter_id", samples.iter().map(|s| s.exporter_id).collect::<Vec<u32>>())
            .column("metric", samples.iter().map(|s| s.metric.clone()).collect::<Vec<String>>())
            .column("device", samples.iter().map(|s| s.device.clone()).collect::<Vec<String>>())
            .column("value", samples.iter().map(|s| s.value).collect::<Vec<f64>>());

        let mut client = self.pool.get_handle().await?;
        client.insert("samples", block).await?;

        tracing::debug!(count = samples.len(), "wrote samples");
        Ok(samples.len())
    }

    async fn append_endpoints(
        &self,
        endpoints: &[NewExporter],
    ) -> Result<Vec<ExporterEndpoint>, StorageError> {
        if endpoints.is_empty() {
            return Ok(Vec::new());
        }

        let mut pending: Vec<NewExporter> = endpoints.to_vec();
        let mut stored = Vec::with_capacity(endpoints.len());

        for _ in 0..MAX_ID_ATTEMPTS {
            let mut next_id = self.max_id().await?;
            let batch: Vec<ExporterEndpoint> = pending
                .iter()
                .map(|e| {
                    next_id += 1;
                    e.clone().with_id(next_id)
                })
                .collect();

            let version = self.write_endpoints(&batch, false).await?;
            let lost = lost_claims(&batch, version, &self.claims(&batch).await?);

            if !lost.is_empty() {
                tracing::warn!(count = lost.len(), "exporter ids taken by another writer, retrying");
                self.write_endpoints(&lost, true).await?;
            }

            pending = lost
                .iter()
                .map(|e| NewExporter {
                    name: e.name.clone(),
                    url: e.url.clone(),
                    enabled: e.enabled,
                })
                .collect();
            stored.extend(batch.into_iter().filter(|e| !lost.contains(e)));

            if pending.is_empty() {
                stored.sort_by_key(|e| e.id);
                tracing::debug!(count = stored.len(), "wrote endpoints");
                return Ok(stored);
            }
        }

        Err(StorageError::Internal(format!(
            "could not allocate ids for {} exporters",
            pending.len()
        )))
    }

    async fn list_endpoints(&self) -> Result<Vec<ExporterEndpoint>, StorageError> {
        self.query_endpoints(format!("{} ORDER BY id", SELECT_EXPORTERS))
            .await
    }

    async fn list_enabled_endpoints(&self) -> Result<Vec<ExporterEndpoint>, StorageError> {
        self.query_endpoints(format!("{} AND enabled = 1 ORDER BY id", SELECT_EXPORTERS))
            .await
    }

    async fn exists_by_url(&self, url: &str) -> Result<bool, StorageError> {
        let sql = format!(
            "SELECT count() AS n FROM exporters FINAL WHERE deleted = 0 AND url = {}",
            quote(url)
        );
        tracing::debug!("{}", sql);

        let mut client = self.pool.get_handle().await?;
        let block = client.query(sql).fetch_all().await?;
        let count: u64 = match block.rows().next() {
            Some(row) => row.get("n")?,
            None => 0,
        };

        Ok(count > 0)
    }

    async fn get_endpoint(&self, id: ExporterId) -> Result<Option<ExporterEndpoint>, StorageError> {
        let mut endpoints = self
            .query_endpoints(format!("{} AND id = {}", SELECT_EXPORTERS, id))
            .await?;
        Ok(endpoints.pop())
    }

    async fn set_enabled(&self, id: ExporterId, enabled: bool) -> Result<bool, StorageError> {
        match self.get_endpoint(id).await? {
            Some(mut endpoint) => {
                endpoint.enabled = enabled;
                self.write_endpoints(&[endpoint], false).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_endpoint(&self, id: ExporterId) -> Result<bool, StorageError> {
        match self.get_endpoint(id).await? {
            Some(endpoint) => {
                self.write_endpoints(&[endpoint], true).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_samples(
        &self,
        limit: usize,
        device: Option<&str>,
    ) -> Result<Vec<Sample>, StorageError> {
        let filter = match device_filter(device) {
            Some(device) => format!("WHERE device = {}", quote(device)),
            None => String::new(),
        };
        let sql = format!(
            "SELECT timestamp, exporter_id, metric, device, value FROM samples {} ORDER BY timestamp DESC LIMIT {}",
            filter, limit
        );
        tracing::debug!("{}", sql);

        let mut client = self.pool.get_handle().await?;
        let block = client.query(sql).fetch_all().await?;

        let mut samples = Vec::new();
        for row in block.rows() {
            let seconds: i64 = row.get("timestamp")?;
            let timestamp = Utc
                .timestamp_opt(seconds, 0)
                .single()
                .ok_or_else(|| StorageError::Internal(format!("bad timestamp {}", seconds)))?;

            samples.push(Sample {
                timestamp,
                metric: row.get("metric")?,
                device: row.get("device")?,
                value: row.get("value")?,
                exporter_id: row.get("exporter_id")?,
            });
        }

        Ok(samples)
    }
}

/// Rows of `ours` (all written with `version`) whose id another url claimed
/// first. Ties on version go to the smaller url so both writers agree.
fn lost_claims(ours: &[ExporterEndpoint], version: u64, claims: &[IdClaim]) -> Vec<ExporterEndpoint> {
    ours.iter()
        .filter(|e| {
            claims.iter().any(|c| {
                c.id == e.id && c.url != e.url && (c.version, c.url.as_str()) < (version, e.url.as_str())
            })
        })
        .cloned()
        .collect()
}

fn row_version() -> u64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64
}

// single-quoted ClickHouse string literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
