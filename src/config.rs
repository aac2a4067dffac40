use tokio::time::Duration;

pub static DEFAULT_SCRAPE_SCHEME: &str = "http";
pub static DEFAULT_METRICS_PORT: u16 = 9100;
pub static DEFAULT_METRICS_PATH: &str = "/metrics";

pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Wait between the end of one cycle and the start of the next.
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCRAPE_INTERVAL,
            timeout: DEFAULT_SCRAPE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub scheme: String,
    pub port: u16,
    pub path: String,
    pub probe_timeout: Duration,
    /// Upper bound on probes in flight during a subnet scan.
    pub max_in_flight: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCRAPE_SCHEME.into(),
            port: DEFAULT_METRICS_PORT,
            path: DEFAULT_METRICS_PATH.into(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}
