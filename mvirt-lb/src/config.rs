//! Provider configuration and desired-topology files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::topology::{BackendSet, Listener, Topology, ValidationError};

/// Default provider region.
pub const DEFAULT_REGION: &str = "us-phoenix-1";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid provider endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("{0} must be printable ASCII")]
    InvalidMetadata(&'static str),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid topology in {}: {source}", .path.display())]
    Topology {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Everything needed to talk to the provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub region: String,
    pub compartment_id: String,
    pub subnet_ids: Vec<String>,
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(endpoint: impl Into<String>, compartment_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: DEFAULT_REGION.to_string(),
            compartment_id: compartment_id.into(),
            subnet_ids: Vec::new(),
            auth_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("endpoint"));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        if self.compartment_id.trim().is_empty() {
            return Err(ConfigError::Missing("compartment"));
        }
        if self.subnet_ids.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Missing("subnet id"));
        }
        Ok(())
    }
}

/// On-disk form of a desired topology, written by the translation layer.
#[derive(Debug, Deserialize)]
struct DesiredFile {
    load_balancer_id: String,
    #[serde(default)]
    backend_sets: Vec<BackendSet>,
    #[serde(default)]
    listeners: Vec<Listener>,
}

/// Desired topology of one load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub load_balancer_id: String,
    pub topology: Topology,
}

/// Read a desired-topology JSON file.
///
/// Duplicate names are rejected here; reference checks happen per pass.
pub fn load_desired(path: &Path) -> Result<DesiredState> {
    let data = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: DesiredFile = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if file.load_balancer_id.trim().is_empty() {
        return Err(ConfigError::Missing("load_balancer_id"));
    }

    let topology = Topology::from_parts(file.backend_sets, file.listeners).map_err(|source| {
        ConfigError::Topology {
            path: path.to_path_buf(),
            source,
        }
    })?;

    Ok(DesiredState {
        load_balancer_id: file.load_balancer_id,
        topology,
    })
}
