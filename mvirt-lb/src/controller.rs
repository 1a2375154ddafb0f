//! Periodic control loop driving reconciliation passes.
//!
//! Desired-topology files are re-read on every tick. Each load balancer gets
//! its own pass task; a load balancer whose previous pass is still running is
//! skipped for that tick.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{load_desired, DesiredState};
use crate::reconciler::{LoadBalancerReconciler, Plan};

/// Outcome of one pass as seen by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// Every operation succeeded and verification found nothing left.
    Converged,
    /// Some operations failed or were skipped; the next pass retries them.
    Degraded,
    /// Cancelled before the plan finished.
    Cancelled,
    /// Fetch or validation failed; nothing was applied.
    Failed,
    /// A pass for the same load balancer was still running.
    Busy,
    /// The desired-topology file could not be loaded.
    InvalidSource,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Marks a load balancer as having a pass in flight until dropped.
struct PassGuard {
    in_flight: InFlight,
    load_balancer_id: String,
}

impl PassGuard {
    fn acquire(in_flight: &InFlight, load_balancer_id: &str) -> Option<Self> {
        let mut ids = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(load_balancer_id.to_string()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            load_balancer_id: load_balancer_id.to_string(),
        })
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.load_balancer_id);
    }
}

pub struct Controller {
    reconciler: Arc<LoadBalancerReconciler>,
    sources: Vec<PathBuf>,
    interval: Duration,
    in_flight: InFlight,
}

impl Controller {
    pub fn new(
        reconciler: Arc<LoadBalancerReconciler>,
        sources: Vec<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            sources,
            interval,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run one pass for every source and wait for all of them.
    ///
    /// Statuses are returned in source order.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Vec<PassStatus> {
        let mut passes = JoinSet::new();
        let mut statuses = self.start_passes(&mut passes, cancel);

        while let Some(joined) = passes.join_next().await {
            match joined {
                Ok((index, status)) => statuses[index] = Some(status),
                Err(e) => error!("Reconciliation task failed: {}", e),
            }
        }

        statuses
            .into_iter()
            .map(|s| s.unwrap_or(PassStatus::Failed))
            .collect()
    }

    /// Run passes every interval until cancelled, then wait for in-flight passes.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Reconciling {} desired topologies every {:?}",
            self.sources.len(),
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.start_passes(&mut passes, &cancel);
                }
                Some(joined) = passes.join_next() => {
                    if let Err(e) = joined {
                        error!("Reconciliation task failed: {}", e);
                    }
                }
            }
        }

        if !passes.is_empty() {
            info!("Waiting for {} in-flight passes", passes.len());
        }
        while let Some(joined) = passes.join_next().await {
            if let Err(e) = joined {
                error!("Reconciliation task failed: {}", e);
            }
        }
        info!("Controller stopped");
    }

    /// Compute the plan for every source without applying anything.
    pub async fn plan_all(&self) -> Result<Vec<(String, Plan)>> {
        let mut plans = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let desired = load_desired(source)
                .with_context(|| format!("Failed to load {}", source.display()))?;
            let plan = self
                .reconciler
                .plan(&desired.load_balancer_id, &desired.topology)
                .await
                .with_context(|| format!("Failed to plan {}", desired.load_balancer_id))?;
            plans.push((desired.load_balancer_id, plan));
        }
        Ok(plans)
    }

    /// Load every source and spawn a pass for each load balancer not already busy.
    ///
    /// Returns a slot per source; slots filled here did not spawn a task.
    fn start_passes(
        &self,
        passes: &mut JoinSet<(usize, PassStatus)>,
        cancel: &CancellationToken,
    ) -> Vec<Option<PassStatus>> {
        let mut statuses = vec![None; self.sources.len()];

        for (index, source) in self.sources.iter().enumerate() {
            let desired = match load_desired(source) {
                Ok(desired) => desired,
                Err(e) => {
                    error!("Skipping {}: {}", source.display(), e);
                    statuses[index] = Some(PassStatus::InvalidSource);
                    continue;
                }
            };

            let Some(guard) = PassGuard::acquire(&self.in_flight, &desired.load_balancer_id)
            else {
                debug!(
                    "Pass for {} still in flight, skipping",
                    desired.load_balancer_id
                );
                statuses[index] = Some(PassStatus::Busy);
                continue;
            };

            let reconciler = Arc::clone(&self.reconciler);
            let cancel = cancel.clone();
            passes.spawn(async move {
                let status = run_pass(&reconciler, &desired, &cancel).await;
                drop(guard);
                (index, status)
            });
        }

        statuses
    }
}

async fn run_pass(
    reconciler: &LoadBalancerReconciler,
    desired: &DesiredState,
    cancel: &CancellationToken,
) -> PassStatus {
    let lb = &desired.load_balancer_id;
    match reconciler.reconcile(lb, &desired.topology, cancel).await {
        Ok(report) if report.cancelled => PassStatus::Cancelled,
        Ok(report) if report.is_complete() && report.converged != Some(false) => {
            PassStatus::Converged
        }
        Ok(report) => {
            for outcome in report.failed() {
                warn!("{}: {} failed: {:?}", lb, outcome.operation, outcome.result);
            }
            warn!("Load balancer {} is degraded: {}", lb, report.summary());
            PassStatus::Degraded
        }
        Err(e) => {
            error!("Reconciliation of {} failed: {}", lb, e);
            PassStatus::Failed
        }
    }
}
