use chrono::{DateTime, Utc};

pub type ExporterId = u32;

/// One parsed observation from an exporter's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub device: String,
    pub value: f64,
    pub exporter_id: ExporterId,
}

/// A registered exporter. The url is unique within the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterEndpoint {
    pub id: ExporterId,
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

/// An exporter that has been found but not yet stored, so it has no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExporter {
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

impl NewExporter {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }

    pub fn with_id(self, id: ExporterId) -> ExporterEndpoint {
        ExporterEndpoint {
            id,
            name: self.name,
            url: self.url,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Added(ExporterEndpoint),
    AlreadyExists,
    Unreachable,
}
