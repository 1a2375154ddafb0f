//! Remote load balancer provider.
//!
//! `RemoteLb` is the capability the reconciler drives. Implementations must
//! classify their failures into the `RemoteError` variants below:
//! - rate limiting, timeouts, 5xx-class and transport failures are transient
//!   and retried by the caller
//! - not-found, conflict, validation and authorization failures are permanent

pub mod grpc;

use async_trait::async_trait;
use thiserror::Error;

use crate::topology::{Backend, BackendSet, HealthChecker, Listener, Topology};

pub use grpc::GrpcRemoteLb;

/// Provider errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited(_)
                | RemoteError::Timeout(_)
                | RemoteError::Unavailable(_)
                | RemoteError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Operations the reconciler needs from the provider.
#[async_trait]
pub trait RemoteLb: Send + Sync {
    /// Fetch the current topology of a load balancer.
    async fn fetch_topology(&self, load_balancer_id: &str) -> Result<Topology>;

    /// Create a backend set together with its backends.
    async fn create_backend_set(
        &self,
        load_balancer_id: &str,
        backend_set: &BackendSet,
    ) -> Result<()>;

    /// Replace the policy and health checker of an existing backend set.
    async fn update_backend_set(
        &self,
        load_balancer_id: &str,
        name: &str,
        policy: &str,
        health_checker: &HealthChecker,
    ) -> Result<()>;

    async fn delete_backend_set(&self, load_balancer_id: &str, name: &str) -> Result<()>;

    async fn add_backend(
        &self,
        load_balancer_id: &str,
        backend_set_name: &str,
        backend: &Backend,
    ) -> Result<()>;

    async fn remove_backend(
        &self,
        load_balancer_id: &str,
        backend_set_name: &str,
        backend: &Backend,
    ) -> Result<()>;

    async fn create_listener(&self, load_balancer_id: &str, listener: &Listener) -> Result<()>;

    async fn delete_listener(&self, load_balancer_id: &str, name: &str) -> Result<()>;
}
