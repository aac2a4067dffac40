use std::sync::Arc;

use futures::future::FutureExt;
use structopt::StructOpt;
use tokio::sync::watch;
use tokio::time::Duration;

use nodescrape::{
    ClickhouseStorage, Discovery, DiscoveryConfig, DiscoveryOutcome, ExporterId, HttpFetcher,
    MemoryStorage, ScrapeConfig, Scraper, Storage,
};

#[derive(StructOpt, Debug)]
#[structopt(about = "discovers node exporters and stores their network metrics")]
pub struct Command {
    /// ClickHouse url; without it everything is kept in memory
    #[structopt(short, long)]
    pub ch_uri: Option<clickhouse_rs::Options>,

    #[structopt(long, default_value = "info")]
    pub log_level: tracing::Level,

    #[structopt(subcommand)]
    pub action: Action,
}

#[derive(StructOpt, Debug)]
pub enum Action {
    /// Poll every enabled exporter until interrupted
    Run {
        /// Seconds between collection cycles
        #[structopt(long, default_value = "10")]
        interval: u64,
        /// Seconds before a scrape request is abandoned
        #[structopt(long, default_value = "10")]
        scrape_timeout: u64,
        /// Addresses to add before polling starts
        #[structopt(long = "add")]
        add: Vec<String>,
        /// Subnet prefixes (e.g. 192.168.1) to scan before polling starts
        #[structopt(long = "scan")]
        scan: Vec<String>,
    },
    /// Add the exporter at one address
    Add { address: String },
    /// Scan hosts 1-254 of a three-octet prefix
    Scan { prefix: String },
    /// List registered exporters
    List,
    Enable { id: ExporterId },
    Disable { id: ExporterId },
    Remove { id: ExporterId },
    /// Show the most recent samples
    Recent {
        /// Number of samples to show, at least 1
        #[structopt(long, default_value = "100", parse(try_from_str = parse_limit))]
        limit: usize,
        #[structopt(long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // parse the command line args
    let opt: Command = Command::from_args();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(opt.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let storage: Arc<dyn Storage> = match opt.ch_uri {
        Some(options) => Arc::new(ClickhouseStorage::connect(options).await?),
        None => {
            tracing::warn!("no --ch-uri given, using in-memory storage; nothing survives a restart");
            Arc::new(MemoryStorage::new())
        }
    };

    let fetcher = Arc::new(HttpFetcher::new()?);
    let discovery = Discovery::new(storage.clone(), fetcher.clone(), DiscoveryConfig::default());

    match opt.action {
        Action::Run {
            interval,
            scrape_timeout,
            add,
            scan,
        } => {
            for address in &add {
                report_outcome(address, discovery.add_single(address).await?);
            }
            for prefix in &scan {
                discovery.scan_subnet(prefix).await?;
            }

            let config = ScrapeConfig {
                interval: Duration::from_secs(interval),
                timeout: Duration::from_secs(scrape_timeout),
            };
            let scraper = Scraper::new(storage, fetcher, config);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            // dropping the remote handle cancels the scraper
            let (remote, remote_handle) = scraper.run(shutdown_rx).remote_handle();
            tokio::spawn(remote);

            shutdown_signal().await;
            shutdown_tx.send(true)?;
            remote_handle.await;
        }
        Action::Add { address } => {
            let outcome = discovery.add_single(&address).await?;
            report_outcome(&address, outcome);
        }
        Action::Scan { prefix } => {
            let found = discovery.scan_subnet(&prefix).await?;
            tracing::info!("found {} new exporters", found.len());
            for endpoint in found {
                tracing::info!(id = endpoint.id, name = %endpoint.name, url = %endpoint.url, "exporter");
            }
        }
        Action::List => {
            for endpoint in storage.list_endpoints().await? {
                tracing::info!(
                    id = endpoint.id,
                    name = %endpoint.name,
                    url = %endpoint.url,
                    enabled = endpoint.enabled,
                    "exporter"
                );
            }
        }
        Action::Enable { id } => toggle(storage.as_ref(), id, true).await?,
        Action::Disable { id } => toggle(storage.as_ref(), id, false).await?,
        Action::Remove { id } => {
            if storage.delete_endpoint(id).await? {
                tracing::info!(id, "removed exporter");
            } else {
                tracing::warn!(id, "no such exporter");
            }
        }
        Action::Recent { limit, device } => {
            let samples = storage.recent_samples(limit, device.as_deref()).await?;
            tracing::info!("fetched {} samples", samples.len());
            for sample in samples {
                tracing::info!(
                    timestamp = %sample.timestamp,
                    exporter_id = sample.exporter_id,
                    device = %sample.device,
                    value = sample.value,
                    "{}",
                    sample.metric
                );
            }
        }
    }

    Ok(())
}

fn parse_limit(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("limit must be at least 1".into()),
        Ok(limit) => Ok(limit),
        Err(e) => Err(e.to_string()),
    }
}

fn report_outcome(address: &str, outcome: DiscoveryOutcome) {
    match outcome {
        DiscoveryOutcome::Added(endpoint) => {
            tracing::info!(id = endpoint.id, name = %endpoint.name, url = %endpoint.url, "added")
        }
        DiscoveryOutcome::AlreadyExists => {
            tracing::warn!("exporter at {} already exists", address)
        }
        DiscoveryOutcome::Unreachable => {
            tracing::warn!("node exporter not found or unreachable at {}", address)
        }
    }
}

async fn toggle(storage: &dyn Storage, id: ExporterId, enabled: bool) -> Result<(), anyhow::Error> {
    if storage.set_enabled(id, enabled).await? {
        tracing::info!(id, enabled, "updated exporter");
    } else {
        tracing::warn!(id, "no such exporter");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received terminate signal"),
    }
}
