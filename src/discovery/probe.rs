use std::sync::Arc;

use http::uri::Uri;
use regex::Regex;
use tokio::time::Duration;

use crate::fetch::{Fetch, FetchResponse};
use crate::model::NewExporter;

/// The metric whose labels identify the host an exporter runs on.
static HOST_IDENTITY_METRIC: &str = "node_uname_info";

lazy_static! {
    static ref NODENAME: Regex = Regex::new(r#"nodename="([^"]+)""#).unwrap();
}

/// One bounded-time reachability check against a candidate url. Never
/// touches the registry.
#[derive(Debug, Clone)]
pub struct DiscoveryProbe {
    fetcher: Arc<dyn Fetch>,
    timeout: Duration,
}

impl DiscoveryProbe {
    pub fn new(fetcher: Arc<dyn Fetch>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    pub async fn probe(&self, url: &str) -> Option<NewExporter> {
        let result = self
            .fetcher
            .get(url, self.timeout)
            .await
            .and_then(FetchResponse::error_for_status);

        match result {
            Ok(response) => Some(NewExporter::new(fingerprint(&response.body, url), url)),
            Err(e) => {
                // most addresses in a scan fail, keep this quiet
                tracing::debug!(url, error = %e, "failed to discover exporter");
                None
            }
        }
    }
}

/// Display name for an exporter: its `nodename` label if the payload has a
/// host identity line, otherwise `exporter-<host>`.
pub fn fingerprint(payload: &str, url: &str) -> String {
    payload
        .lines()
        .filter(|line| line.starts_with(HOST_IDENTITY_METRIC))
        .find_map(|line| NODENAME.captures(line))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| format!("exporter-{}", host_of(url)))
}

fn host_of(url: &str) -> String {
    url.parse::<Uri>()
        .ok()
        .and_then(|uri| uri.host().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_nodename_from_uname_info() {
        let payload = "# HELP node_uname_info Labeled system information\n\
                       node_uname_info{domainname=\"(none)\",machine=\"x86_64\",nodename=\"web-01\",release=\"6.1.0\"} 1\n";
        assert_eq!(fingerprint(payload, "http://10.0.0.4:9100/metrics"), "web-01");
    }

    #[test]
    fn first_match_wins() {
        let payload = "node_uname_info{nodename=\"first\"} 1\nnode_uname_info{nodename=\"second\"} 1\n";
        assert_eq!(fingerprint(payload, "http://10.0.0.4:9100/metrics"), "first");
    }

    #[test]
    fn falls_back_to_host() {
        let payload = "node_network_up{device=\"eth0\"} 1\n";
        assert_eq!(
            fingerprint(payload, "http://10.0.0.4:9100/metrics"),
            "exporter-10.0.0.4"
        );
    }

    #[test]
    fn ignores_nodename_outside_identity_line() {
        let payload = "some_other_info{nodename=\"nope\"} 1\n";
        assert_eq!(
            fingerprint(payload, "http://192.168.1.20:9100/metrics"),
            "exporter-192.168.1.20"
        );
    }
}
