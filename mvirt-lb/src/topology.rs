//! Load balancer topology model.
//!
//! Value types describing the logical shape of one load balancer at one point
//! in time: backend sets with their backends and health checks, and the
//! listeners routing into them. Backend sets and listeners are keyed by name,
//! which is the join key between a desired and an actual snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default load-balancing policy for backend sets.
pub const DEFAULT_POLICY: &str = "ROUND_ROBIN";

/// Topology validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{kind} name is required")]
    NameRequired { kind: &'static str },

    #[error("duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("{kind} stored under key '{key}' is named '{name}'")]
    KeyMismatch {
        kind: &'static str,
        key: String,
        name: String,
    },

    #[error("listener '{listener}' references unknown backend set '{backend_set}'")]
    UnknownBackendSet {
        listener: String,
        backend_set: String,
    },

    #[error("port of {0} must be non-zero")]
    InvalidPort(String),

    #[error("backend in backend set '{0}' has no address")]
    BackendAddressRequired(String),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Traffic protocol of a listener or health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Http,
    Http2,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Http => "HTTP",
            Protocol::Http2 => "HTTP2",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "HTTP" => Ok(Protocol::Http),
            "HTTP2" => Ok(Protocol::Http2),
            _ => Err(ValidationError::UnknownProtocol(s.to_string())),
        }
    }
}

/// A single routable endpoint. Identity is the (address, port) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Backend {
    pub address: String,
    pub port: u16,
}

impl Backend {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Health-check policy shared by all backends of a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthChecker {
    pub protocol: Protocol,
    /// 0 probes each backend on its own port.
    pub port: u16,
    pub url_path: Option<String>,
    pub interval_ms: u32,
    pub timeout_ms: u32,
    pub retries: u32,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            port: 0,
            url_path: None,
            interval_ms: 10_000,
            timeout_ms: 3_000,
            retries: 3,
        }
    }
}

/// Named group of backends sharing a health-check policy.
///
/// Membership is unordered and unique by (address, port).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSet {
    pub name: String,
    #[serde(default = "default_policy")]
    pub policy: String,
    #[serde(default)]
    pub health_checker: HealthChecker,
    #[serde(default)]
    pub backends: BTreeSet<Backend>,
}

fn default_policy() -> String {
    DEFAULT_POLICY.to_string()
}

impl BackendSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: default_policy(),
            health_checker: HealthChecker::default(),
            backends: BTreeSet::new(),
        }
    }

    pub fn with_backends(mut self, backends: impl IntoIterator<Item = Backend>) -> Self {
        self.backends.extend(backends);
        self
    }

    /// Whether policy and health checker match, ignoring membership.
    pub fn same_settings(&self, other: &BackendSet) -> bool {
        self.policy == other.policy && self.health_checker == other.health_checker
    }
}

/// Named binding of a protocol and port to a default backend set.
///
/// Equality covers every field; any difference means the listener is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub default_backend_set_name: String,
    pub protocol: Protocol,
    pub port: u16,
}

impl Listener {
    pub fn new(
        name: impl Into<String>,
        default_backend_set_name: impl Into<String>,
        protocol: Protocol,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            default_backend_set_name: default_backend_set_name.into(),
            protocol,
            port,
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{} -> {})",
            self.name, self.protocol, self.port, self.default_backend_set_name
        )
    }
}

/// Complete backend set and listener state of one load balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub backend_sets: BTreeMap<String, BackendSet>,
    pub listeners: BTreeMap<String, Listener>,
}

impl Topology {
    /// Build a topology from unkeyed parts, rejecting duplicate names.
    pub fn from_parts(
        backend_sets: impl IntoIterator<Item = BackendSet>,
        listeners: impl IntoIterator<Item = Listener>,
    ) -> Result<Self> {
        let mut topology = Topology::default();
        for set in backend_sets {
            if topology.backend_sets.contains_key(&set.name) {
                return Err(ValidationError::DuplicateName {
                    kind: "backend set",
                    name: set.name,
                });
            }
            topology.backend_sets.insert(set.name.clone(), set);
        }
        for listener in listeners {
            if topology.listeners.contains_key(&listener.name) {
                return Err(ValidationError::DuplicateName {
                    kind: "listener",
                    name: listener.name,
                });
            }
            topology.listeners.insert(listener.name.clone(), listener);
        }
        Ok(topology)
    }

    pub fn backend_set(&self, name: &str) -> Option<&BackendSet> {
        self.backend_sets.get(name)
    }

    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.get(name)
    }

    /// Listeners whose default backend set is `backend_set`.
    pub fn listeners_referencing<'a>(
        &'a self,
        backend_set: &'a str,
    ) -> impl Iterator<Item = &'a Listener> + 'a {
        self.listeners
            .values()
            .filter(move |l| l.default_backend_set_name == backend_set)
    }

    pub fn is_empty(&self) -> bool {
        self.backend_sets.is_empty() && self.listeners.is_empty()
    }

    /// Check internal consistency: names, keys, ports, and listener references.
    pub fn validate(&self) -> Result<()> {
        for (key, set) in &self.backend_sets {
            if set.name.trim().is_empty() {
                return Err(ValidationError::NameRequired {
                    kind: "backend set",
                });
            }
            if key != &set.name {
                return Err(ValidationError::KeyMismatch {
                    kind: "backend set",
                    key: key.clone(),
                    name: set.name.clone(),
                });
            }
            for backend in &set.backends {
                if backend.address.trim().is_empty() {
                    return Err(ValidationError::BackendAddressRequired(set.name.clone()));
                }
                if backend.port == 0 {
                    return Err(ValidationError::InvalidPort(format!(
                        "backend {} in backend set '{}'",
                        backend, set.name
                    )));
                }
            }
        }

        for (key, listener) in &self.listeners {
            if listener.name.trim().is_empty() {
                return Err(ValidationError::NameRequired { kind: "listener" });
            }
            if key != &listener.name {
                return Err(ValidationError::KeyMismatch {
                    kind: "listener",
                    key: key.clone(),
                    name: listener.name.clone(),
                });
            }
            if listener.port == 0 {
                return Err(ValidationError::InvalidPort(format!(
                    "listener '{}'",
                    listener.name
                )));
            }
            if !self
                .backend_sets
                .contains_key(&listener.default_backend_set_name)
            {
                return Err(ValidationError::UnknownBackendSet {
                    listener: listener.name.clone(),
                    backend_set: listener.default_backend_set_name.clone(),
                });
            }
        }

        Ok(())
    }
}
