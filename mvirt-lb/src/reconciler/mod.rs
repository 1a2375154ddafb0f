//! Load balancer reconciler.
//!
//! One pass fetches the actual topology from the provider, diffs it against the
//! desired topology, and applies the resulting operations phase by phase.
//! Nothing is cached between passes, so re-running after a partial failure
//! picks up exactly the operations that did not land.

pub mod plan;
pub mod report;
pub mod retry;

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::diff::diff_topology;
use crate::remote::{RemoteError, RemoteLb};
use crate::topology::{Topology, ValidationError};

pub use plan::{Dependency, Operation, Phase, Plan, PlannedOperation};
pub use report::{OperationOutcome, OperationResult, ReconcileReport, ReportSummary};
pub use retry::RetryPolicy;

/// Errors that abort a pass before anything is applied.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch topology of load balancer {load_balancer_id}: {source}")]
    Fetch {
        load_balancer_id: String,
        #[source]
        source: RemoteError,
    },

    #[error("invalid desired topology: {0}")]
    Validation(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub retry: RetryPolicy,
    /// Maximum operations in flight within one phase.
    pub concurrency: usize,
    /// Re-fetch and re-diff after applying.
    pub verify: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 8,
            verify: true,
        }
    }
}

/// Reconciles load balancers held by a remote provider.
pub struct LoadBalancerReconciler {
    remote: Arc<dyn RemoteLb>,
    config: ReconcilerConfig,
}

impl LoadBalancerReconciler {
    pub fn new(remote: Arc<dyn RemoteLb>, config: ReconcilerConfig) -> Self {
        Self { remote, config }
    }

    async fn fetch(&self, load_balancer_id: &str) -> Result<Topology> {
        self.remote
            .fetch_topology(load_balancer_id)
            .await
            .map_err(|source| ReconcileError::Fetch {
                load_balancer_id: load_balancer_id.to_string(),
                source,
            })
    }

    /// Compute what a pass would do without applying anything.
    pub async fn plan(&self, load_balancer_id: &str, desired: &Topology) -> Result<Plan> {
        let actual = self.fetch(load_balancer_id).await?;
        let mods = diff_topology(desired, &actual)?;
        Ok(Plan::build(&actual, &mods))
    }

    /// Run one fetch-diff-apply pass.
    ///
    /// Fetch and validation failures abort the pass. Failed operations are
    /// recorded and the rest of the plan still runs, except operations that
    /// depend on a failed one. Once `cancel` fires no further operation starts.
    pub async fn reconcile(
        &self,
        load_balancer_id: &str,
        desired: &Topology,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        info!("Reconciling load balancer {}", load_balancer_id);

        let plan = self.plan(load_balancer_id, desired).await?;
        let mut report = ReconcileReport::new(load_balancer_id);

        if plan.is_empty() {
            debug!("Load balancer {} is up to date", load_balancer_id);
            report.converged = Some(true);
            return Ok(report);
        }
        debug!("Plan for {}:\n{}", load_balancer_id, plan);

        // Conditions that did not come true this pass.
        let mut broken: HashSet<Dependency> = HashSet::new();

        for phase in Phase::ALL {
            let planned: Vec<&PlannedOperation> = plan.in_phase(phase).collect();
            if planned.is_empty() {
                continue;
            }

            if cancel.is_cancelled() {
                report.cancelled = true;
                for p in planned {
                    report.outcomes.push(OperationOutcome {
                        phase,
                        operation: p.operation.clone(),
                        result: OperationResult::NotStarted,
                    });
                }
                continue;
            }

            let mut results: Vec<Option<OperationResult>> = vec![None; planned.len()];
            let mut runnable = Vec::new();
            for (i, p) in planned.iter().enumerate() {
                match p.depends_on.iter().find(|d| broken.contains(*d)) {
                    Some(dep) => {
                        warn!(
                            "Skipping {} on {}: {} did not happen",
                            p.operation, load_balancer_id, dep
                        );
                        results[i] = Some(OperationResult::Skipped {
                            failed_dependency: dep.clone(),
                        });
                    }
                    None => runnable.push((i, &p.operation)),
                }
            }

            let calls: Vec<_> = runnable
                .into_iter()
                .map(|(i, op)| async move { (i, self.apply(load_balancer_id, op, cancel).await) })
                .collect();
            let applied: Vec<(usize, OperationResult)> = stream::iter(calls)
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;
            for (i, result) in applied {
                results[i] = Some(result);
            }

            for (p, result) in planned.into_iter().zip(results) {
                let result = result.unwrap_or(OperationResult::NotStarted);
                if !result.is_success() {
                    if let Some(dep) = p.operation.provides() {
                        broken.insert(dep);
                    }
                }
                if result == OperationResult::NotStarted {
                    report.cancelled = true;
                }
                report.outcomes.push(OperationOutcome {
                    phase,
                    operation: p.operation.clone(),
                    result,
                });
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
        }
        if !report.cancelled && self.config.verify {
            report.converged = match self.verify(load_balancer_id, desired).await {
                Ok(converged) => Some(converged),
                Err(e) => {
                    warn!("Verification of {} failed: {}", load_balancer_id, e);
                    None
                }
            };
        }

        info!(
            "Reconciled load balancer {}: {}",
            load_balancer_id,
            report.summary()
        );
        Ok(report)
    }

    /// Remove every listener and backend set from a load balancer.
    pub async fn finalize(
        &self,
        load_balancer_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        info!("Finalizing load balancer {}", load_balancer_id);
        self.reconcile(load_balancer_id, &Topology::default(), cancel)
            .await
    }

    async fn verify(&self, load_balancer_id: &str, desired: &Topology) -> Result<bool> {
        let actual = self.fetch(load_balancer_id).await?;
        let remaining = diff_topology(desired, &actual)?;
        if !remaining.is_empty() {
            debug!(
                "Load balancer {} still differs after apply: {:?}",
                load_balancer_id, remaining
            );
        }
        Ok(remaining.is_empty())
    }

    async fn apply(
        &self,
        load_balancer_id: &str,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> OperationResult {
        if cancel.is_cancelled() {
            return OperationResult::NotStarted;
        }

        let what = operation.to_string();
        let attempted = retry::with_retry(&self.config.retry, cancel, &what, move || {
            self.call(load_balancer_id, operation)
        })
        .await;

        match attempted.result {
            Ok(()) => {
                info!("Applied {} on {}", what, load_balancer_id);
                OperationResult::Succeeded {
                    attempts: attempted.attempts,
                }
            }
            Err(error) => {
                warn!(
                    attempts = attempted.attempts,
                    "Failed to {} on {}: {}", what, load_balancer_id, error
                );
                OperationResult::Failed {
                    error,
                    attempts: attempted.attempts,
                }
            }
        }
    }

    async fn call(
        &self,
        load_balancer_id: &str,
        operation: &Operation,
    ) -> std::result::Result<(), RemoteError> {
        match operation {
            Operation::CreateBackendSet(set) => {
                self.remote.create_backend_set(load_balancer_id, set).await
            }
            Operation::UpdateBackendSet(set) => {
                self.remote
                    .update_backend_set(
                        load_balancer_id,
                        &set.name,
                        &set.policy,
                        &set.health_checker,
                    )
                    .await
            }
            Operation::AddBackend {
                backend_set,
                backend,
            } => {
                self.remote
                    .add_backend(load_balancer_id, backend_set, backend)
                    .await
            }
            Operation::RemoveBackend {
                backend_set,
                backend,
            } => {
                self.remote
                    .remove_backend(load_balancer_id, backend_set, backend)
                    .await
            }
            Operation::DeleteListener(listener) => {
                self.remote
                    .delete_listener(load_balancer_id, &listener.name)
                    .await
            }
            Operation::CreateListener(listener) => {
                self.remote.create_listener(load_balancer_id, listener).await
            }
            Operation::DeleteBackendSet(name) => {
                self.remote.delete_backend_set(load_balancer_id, name).await
            }
        }
    }
}
