//! Discovers node exporters on a local network, polls them on a fixed
//! interval and stores a whitelisted subset of their network metrics.

#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod discovery;
pub mod exposition;
pub mod fetch;
pub mod model;
pub mod scraper;
pub mod storage;

pub use config::{DiscoveryConfig, ScrapeConfig};
pub use discovery::{Discovery, DiscoveryError, DiscoveryProbe};
pub use exposition::{parse_batch, parse_line, ParseError, ParsedBatch};
pub use fetch::{Fetch, FetchError, FetchResponse, HttpFetcher};
pub use model::{DiscoveryOutcome, ExporterEndpoint, ExporterId, NewExporter, Sample};
pub use scraper::{CycleReport, ScrapeError, Scraper};
pub use storage::{ClickhouseStorage, MemoryStorage, Storage, StorageError};
