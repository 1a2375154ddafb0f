//! Shared test utilities for mvirt-lb integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mvirt_lb::reconciler::{LoadBalancerReconciler, ReconcilerConfig, RetryPolicy};
use mvirt_lb::remote::{RemoteError, RemoteLb, Result};
use mvirt_lb::topology::{Backend, BackendSet, HealthChecker, Listener, Protocol, Topology};
use tokio_util::sync::CancellationToken;

pub const LB: &str = "lb-1";

#[derive(Default)]
struct State {
    topologies: HashMap<String, Topology>,
    /// Call string -> (error, remaining failures).
    faults: HashMap<String, (RemoteError, u32)>,
    fetch_fault: Option<RemoteError>,
    cancel_after: Option<(String, CancellationToken)>,
    calls: Vec<String>,
    fetches: usize,
}

/// In-memory provider enforcing the same referential constraints as the real one.
///
/// Every mutating call is logged as `"<method> <target>"`, e.g.
/// `"add_backend bs1 10.0.0.1:80"`, including calls that fail.
#[derive(Default)]
pub struct MemoryRemoteLb {
    state: Mutex<State>,
}

impl MemoryRemoteLb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Provider holding `topology` for load balancer [`LB`].
    pub fn with_topology(topology: Topology) -> Arc<Self> {
        let remote = Self::new();
        remote.set_topology(LB, topology);
        remote
    }

    pub fn set_topology(&self, load_balancer_id: &str, topology: Topology) {
        self.state
            .lock()
            .unwrap()
            .topologies
            .insert(load_balancer_id.to_string(), topology);
    }

    pub fn topology(&self) -> Topology {
        self.state
            .lock()
            .unwrap()
            .topologies
            .get(LB)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `times` calls matching `call` with `error`.
    pub fn fail(&self, call: &str, error: RemoteError, times: u32) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(call.to_string(), (error, times));
    }

    pub fn fail_fetch(&self, error: RemoteError) {
        self.state.lock().unwrap().fetch_fault = Some(error);
    }

    /// Cancel `token` right after `call` has been applied.
    pub fn cancel_after(&self, call: &str, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((call.to_string(), token));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    fn mutate(
        &self,
        load_balancer_id: &str,
        call: String,
        apply: impl FnOnce(&mut Topology) -> Result<()>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());

        if let Some((error, remaining)) = state.faults.get_mut(&call) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }

        let topology = state
            .topologies
            .get_mut(load_balancer_id)
            .ok_or_else(|| RemoteError::NotFound(format!("load balancer {}", load_balancer_id)))?;
        apply(topology)?;

        if let Some((trigger, token)) = &state.cancel_after {
            if *trigger == call {
                token.cancel();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteLb for MemoryRemoteLb {
    async fn fetch_topology(&self, load_balancer_id: &str) -> Result<Topology> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        if let Some(error) = &state.fetch_fault {
            return Err(error.clone());
        }
        state
            .topologies
            .get(load_balancer_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("load balancer {}", load_balancer_id)))
    }

    async fn create_backend_set(
        &self,
        load_balancer_id: &str,
        backend_set: &BackendSet,
    ) -> Result<()> {
        let call = format!("create_backend_set {}", backend_set.name);
        self.mutate(load_balancer_id, call, |t| {
            if t.backend_sets.contains_key(&backend_set.name) {
                return Err(RemoteError::Conflict(format!(
                    "backend set {} exists",
                    backend_set.name
                )));
            }
            t.backend_sets
                .insert(backend_set.name.clone(), backend_set.clone());
            Ok(())
        })
    }

    async fn update_backend_set(
        &self,
        load_balancer_id: &str,
        name: &str,
        policy: &str,
        health_checker: &HealthChecker,
    ) -> Result<()> {
        let call = format!("update_backend_set {}", name);
        self.mutate(load_balancer_id, call, |t| {
            let set = t
                .backend_sets
                .get_mut(name)
                .ok_or_else(|| RemoteError::NotFound(format!("backend set {}", name)))?;
            set.policy = policy.to_string();
            set.health_checker = health_checker.clone();
            Ok(())
        })
    }

    async fn delete_backend_set(&self, load_balancer_id: &str, name: &str) -> Result<()> {
        let call = format!("delete_backend_set {}", name);
        self.mutate(load_balancer_id, call, |t| {
            if let Some(listener) = t.listeners_referencing(name).next() {
                return Err(RemoteError::Conflict(format!(
                    "backend set {} is used by listener {}",
                    name, listener.name
                )));
            }
            t.backend_sets
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| RemoteError::NotFound(format!("backend set {}", name)))
        })
    }

    async fn add_backend(
        &self,
        load_balancer_id: &str,
        backend_set_name: &str,
        backend: &Backend,
    ) -> Result<()> {
        let call = format!("add_backend {} {}", backend_set_name, backend);
        self.mutate(load_balancer_id, call, |t| {
            let set = t.backend_sets.get_mut(backend_set_name).ok_or_else(|| {
                RemoteError::NotFound(format!("backend set {}", backend_set_name))
            })?;
            if !set.backends.insert(backend.clone()) {
                return Err(RemoteError::Conflict(format!("backend {} exists", backend)));
            }
            Ok(())
        })
    }

    async fn remove_backend(
        &self,
        load_balancer_id: &str,
        backend_set_name: &str,
        backend: &Backend,
    ) -> Result<()> {
        let call = format!("remove_backend {} {}", backend_set_name, backend);
        self.mutate(load_balancer_id, call, |t| {
            let set = t.backend_sets.get_mut(backend_set_name).ok_or_else(|| {
                RemoteError::NotFound(format!("backend set {}", backend_set_name))
            })?;
            if !set.backends.remove(backend) {
                return Err(RemoteError::NotFound(format!("backend {}", backend)));
            }
            Ok(())
        })
    }

    async fn create_listener(&self, load_balancer_id: &str, listener: &Listener) -> Result<()> {
        let call = format!("create_listener {}", listener.name);
        self.mutate(load_balancer_id, call, |t| {
            if t.listeners.contains_key(&listener.name) {
                return Err(RemoteError::Conflict(format!(
                    "listener {} exists",
                    listener.name
                )));
            }
            if !t
                .backend_sets
                .contains_key(&listener.default_backend_set_name)
            {
                return Err(RemoteError::NotFound(format!(
                    "backend set {}",
                    listener.default_backend_set_name
                )));
            }
            t.listeners.insert(listener.name.clone(), listener.clone());
            Ok(())
        })
    }

    async fn delete_listener(&self, load_balancer_id: &str, name: &str) -> Result<()> {
        let call = format!("delete_listener {}", name);
        self.mutate(load_balancer_id, call, |t| {
            t.listeners
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| RemoteError::NotFound(format!("listener {}", name)))
        })
    }
}

/// Retry policy with millisecond backoff so tests stay fast.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
}

pub fn make_reconciler(remote: Arc<MemoryRemoteLb>) -> LoadBalancerReconciler {
    make_reconciler_with(remote, 4, 1)
}

pub fn make_reconciler_with(
    remote: Arc<MemoryRemoteLb>,
    max_attempts: u32,
    concurrency: usize,
) -> LoadBalancerReconciler {
    LoadBalancerReconciler::new(
        remote,
        ReconcilerConfig {
            retry: fast_retry(max_attempts),
            concurrency,
            verify: true,
        },
    )
}

pub fn make_backend_set(name: &str, backends: &[(&str, u16)]) -> BackendSet {
    BackendSet::new(name).with_backends(backends.iter().map(|(a, p)| Backend::new(*a, *p)))
}

pub fn make_listener(name: &str, backend_set: &str, port: u16) -> Listener {
    Listener::new(name, backend_set, Protocol::Tcp, port)
}

pub fn make_topology(sets: Vec<BackendSet>, listeners: Vec<Listener>) -> Topology {
    Topology::from_parts(sets, listeners).unwrap()
}

/// Index of the first call equal to `call`.
pub fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{} was not called; calls: {:?}", call, calls))
}
