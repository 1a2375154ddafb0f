//! mvirt-lb: converges remote load balancers to a desired topology.
//!
//! Each pass fetches the provider's current backend sets and listeners, diffs
//! them against the desired topology and applies the difference in an order
//! that never leaves a listener pointing at a missing backend set.

pub mod config;
pub mod controller;
pub mod diff;
pub mod reconciler;
pub mod remote;
pub mod topology;

pub use config::{load_desired, ConfigError, DesiredState, ProviderConfig};
pub use controller::{Controller, PassStatus};
pub use diff::{diff_topology, ModificationSet};
pub use reconciler::{
    LoadBalancerReconciler, ReconcileError, ReconcileReport, ReconcilerConfig, RetryPolicy,
};
pub use remote::{GrpcRemoteLb, RemoteError, RemoteLb};
pub use topology::{Backend, BackendSet, HealthChecker, Listener, Protocol, Topology};
