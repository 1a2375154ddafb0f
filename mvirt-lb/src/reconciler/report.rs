//! Aggregate outcome of one reconciliation pass.

use std::fmt;

use super::plan::{Dependency, Operation, Phase};
use crate::remote::RemoteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Succeeded { attempts: u32 },
    Failed { error: RemoteError, attempts: u32 },
    /// A dependency from an earlier phase failed or was itself skipped.
    Skipped { failed_dependency: Dependency },
    /// The pass was cancelled before the operation started.
    NotStarted,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub phase: Phase,
    pub operation: Operation,
    pub result: OperationResult,
}

/// Report of one pass, in plan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub load_balancer_id: String,
    pub outcomes: Vec<OperationOutcome>,
    pub cancelled: bool,
    /// Result of re-diffing after apply; `None` if verification did not run.
    pub converged: Option<bool>,
}

impl ReconcileReport {
    pub fn new(load_balancer_id: &str) -> Self {
        Self {
            load_balancer_id: load_balancer_id.to_string(),
            outcomes: Vec::new(),
            cancelled: false,
            converged: None,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, OperationResult::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, OperationResult::Skipped { .. }))
    }

    pub fn not_started(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.result == OperationResult::NotStarted)
    }

    /// Every operation succeeded and the pass ran to the end.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(|o| o.result.is_success())
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            succeeded: self.succeeded().count(),
            failed: self.failed().count(),
            skipped: self.skipped().count(),
            not_started: self.not_started().count(),
            cancelled: self.cancelled,
            converged: self.converged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_started: usize,
    pub cancelled: bool,
    pub converged: Option<bool>,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped, {} not started",
            self.succeeded, self.failed, self.skipped, self.not_started
        )?;
        if self.cancelled {
            f.write_str(", cancelled")?;
        }
        match self.converged {
            Some(true) => f.write_str(", converged"),
            Some(false) => f.write_str(", not converged"),
            None => Ok(()),
        }
    }
}
