#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Duration;

use nodescrape::{
    ExporterEndpoint, ExporterId, Fetch, FetchError, FetchResponse, MemoryStorage, NewExporter,
    Sample, Storage, StorageError,
};

pub const NODE_PAYLOAD: &str = r#"# HELP node_network_receive_bytes_total Network device statistic receive_bytes.
# TYPE node_network_receive_bytes_total counter
node_network_receive_bytes_total{device="en0"} 4.551458554e+09
node_network_receive_bytes_total{device="lo0"} 1.2345e+06
# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
node_cpu_seconds_total{cpu="0",mode="idle"} 8123.5
node_netstat_Tcp_ActiveOpens 4242
node_sockstat_TCP_inuse 17
node_network_up{} 1
node_uname_info{domainname="(none)",machine="x86_64",nodename="alpha",release="6.1.0",sysname="Linux"} 1
"#;

/// In-process [`Fetch`] that answers from a fixed table and records each
/// call with the timeout it was given. Unknown urls are unreachable.
#[derive(Debug, Default)]
pub struct ScriptedFetch {
    responses: HashMap<String, FetchResponse>,
    delay: Duration,
    calls: Mutex<Vec<(String, Duration)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, body: &str) -> Self {
        self.respond_with(url, FetchResponse::ok(body))
    }

    pub fn respond_with(mut self, url: &str, response: FetchResponse) -> Self {
        self.responses.insert(url.to_string(), response);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(url, _)| url.clone()).collect()
    }

    /// Distinct timeouts seen so far.
    pub fn timeouts(&self) -> Vec<Duration> {
        let mut timeouts: Vec<Duration> = self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect();
        timeouts.sort();
        timeouts.dedup();
        timeouts
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
        self.calls.lock().unwrap().push((url.to_string(), timeout));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Unreachable(url.to_string()))
    }
}

/// [`MemoryStorage`] whose writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    pub fail_samples: bool,
    pub fail_endpoints: bool,
}

fn broken() -> StorageError {
    StorageError::Internal("disk on fire".into())
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn append_samples(&self, samples: &[Sample]) -> Result<usize, StorageError> {
        if self.fail_samples {
            return Err(broken());
        }
        self.inner.append_samples(samples).await
    }

    async fn append_endpoints(
        &self,
        endpoints: &[NewExporter],
    ) -> Result<Vec<ExporterEndpoint>, StorageError> {
        if self.fail_endpoints {
            return Err(broken());
        }
        self.inner.append_endpoints(endpoints).await
    }

    async fn list_endpoints(&self) -> Result<Vec<ExporterEndpoint>, StorageError> {
        self.inner.list_endpoints().await
    }

    async fn exists_by_url(&self, url: &str) -> Result<bool, StorageError> {
        self.inner.exists_by_url(url).await
    }

    async fn get_endpoint(&self, id: ExporterId) -> Result<Option<ExporterEndpoint>, StorageError> {
        self.inner.get_endpoint(id).await
    }

    async fn set_enabled(&self, id: ExporterId, enabled: bool) -> Result<bool, StorageError> {
        self.inner.set_enabled(id, enabled).await
    }

    async fn delete_endpoint(&self, id: ExporterId) -> Result<bool, StorageError> {
        self.inner.delete_endpoint(id).await
    }

    async fn recent_samples(
        &self,
        limit: usize,
        device: Option<&str>,
    ) -> Result<Vec<Sample>, StorageError> {
        self.inner.recent_samples(limit, device).await
    }
}

pub async fn register(storage: &dyn Storage, name: &str, url: &str) -> ExporterEndpoint {
    storage
        .append_endpoints(&[NewExporter::new(name, url)])
        .await
        .unwrap()
        .remove(0)
}
