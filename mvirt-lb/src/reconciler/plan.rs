//! Apply plan - orders a modification set into dependency-respecting phases.
//!
//! Phases run strictly one after another; operations within a phase are
//! independent of each other:
//! 1. create, update and extend backend sets
//! 2. remove stale and replaced listeners
//! 3. add new and replacement listeners
//! 4. remove backends and delete unreferenced backend sets

use std::collections::BTreeSet;
use std::fmt;

use crate::diff::ModificationSet;
use crate::topology::{Backend, BackendSet, Listener, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    PrepareBackendSets,
    RemoveListeners,
    AddListeners,
    PruneBackendSets,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::PrepareBackendSets,
        Phase::RemoveListeners,
        Phase::AddListeners,
        Phase::PruneBackendSets,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PrepareBackendSets => "prepare-backend-sets",
            Phase::RemoveListeners => "remove-listeners",
            Phase::AddListeners => "add-listeners",
            Phase::PruneBackendSets => "prune-backend-sets",
        })
    }
}

/// A single mutating call against the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateBackendSet(BackendSet),
    UpdateBackendSet(BackendSet),
    AddBackend {
        backend_set: String,
        backend: Backend,
    },
    RemoveBackend {
        backend_set: String,
        backend: Backend,
    },
    DeleteListener(Listener),
    CreateListener(Listener),
    DeleteBackendSet(String),
}

impl Operation {
    pub fn phase(&self) -> Phase {
        match self {
            Operation::CreateBackendSet(_)
            | Operation::UpdateBackendSet(_)
            | Operation::AddBackend { .. } => Phase::PrepareBackendSets,
            Operation::DeleteListener(_) => Phase::RemoveListeners,
            Operation::CreateListener(_) => Phase::AddListeners,
            Operation::RemoveBackend { .. } | Operation::DeleteBackendSet(_) => {
                Phase::PruneBackendSets
            }
        }
    }

    /// The condition later operations may depend on, if any.
    pub fn provides(&self) -> Option<Dependency> {
        match self {
            Operation::CreateBackendSet(set) => {
                Some(Dependency::BackendSetCreated(set.name.clone()))
            }
            Operation::AddBackend { backend_set, .. } => {
                Some(Dependency::BackendsAdded(backend_set.clone()))
            }
            Operation::DeleteListener(listener) => {
                Some(Dependency::ListenerRemoved(listener.name.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateBackendSet(set) => write!(
                f,
                "create backend set {} ({} backends)",
                set.name,
                set.backends.len()
            ),
            Operation::UpdateBackendSet(set) => write!(
                f,
                "update backend set {} (policy {}, {} health check)",
                set.name, set.policy, set.health_checker.protocol
            ),
            Operation::AddBackend {
                backend_set,
                backend,
            } => write!(f, "add backend {} to {}", backend, backend_set),
            Operation::RemoveBackend {
                backend_set,
                backend,
            } => write!(f, "remove backend {} from {}", backend, backend_set),
            Operation::DeleteListener(listener) => write!(f, "delete listener {}", listener),
            Operation::CreateListener(listener) => write!(f, "create listener {}", listener),
            Operation::DeleteBackendSet(name) => write!(f, "delete backend set {}", name),
        }
    }
}

/// A condition established by an earlier operation of the same pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dependency {
    BackendSetCreated(String),
    /// Every addition to the named backend set succeeded.
    BackendsAdded(String),
    ListenerRemoved(String),
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::BackendSetCreated(name) => write!(f, "creation of backend set {}", name),
            Dependency::BackendsAdded(name) => write!(f, "backend additions to {}", name),
            Dependency::ListenerRemoved(name) => write!(f, "removal of listener {}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    pub operation: Operation,
    pub depends_on: Vec<Dependency>,
}

impl PlannedOperation {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            depends_on: Vec::new(),
        }
    }
}

/// Phase-ordered operations for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    operations: Vec<PlannedOperation>,
}

impl Plan {
    /// Build the plan for `mods`, computed against the `actual` snapshot.
    pub fn build(actual: &Topology, mods: &ModificationSet) -> Self {
        let created: BTreeSet<&str> = mods
            .backend_sets_to_create
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        let removed: BTreeSet<&str> = mods
            .listeners
            .removals
            .iter()
            .map(|l| l.name.as_str())
            .collect();

        let mut operations = Vec::new();

        for set in &mods.backend_sets_to_create {
            operations.push(PlannedOperation::new(Operation::CreateBackendSet(
                set.clone(),
            )));
        }
        for set in &mods.backend_sets_to_update {
            operations.push(PlannedOperation::new(Operation::UpdateBackendSet(
                set.clone(),
            )));
        }
        for (name, backends) in &mods.backends {
            for backend in &backends.additions {
                operations.push(PlannedOperation::new(Operation::AddBackend {
                    backend_set: name.clone(),
                    backend: backend.clone(),
                }));
            }
        }

        for listener in &mods.listeners.removals {
            operations.push(PlannedOperation::new(Operation::DeleteListener(
                listener.clone(),
            )));
        }

        for listener in &mods.listeners.additions {
            let mut depends_on = Vec::new();
            if created.contains(listener.default_backend_set_name.as_str()) {
                depends_on.push(Dependency::BackendSetCreated(
                    listener.default_backend_set_name.clone(),
                ));
            }
            if removed.contains(listener.name.as_str()) {
                depends_on.push(Dependency::ListenerRemoved(listener.name.clone()));
            }
            operations.push(PlannedOperation {
                operation: Operation::CreateListener(listener.clone()),
                depends_on,
            });
        }

        // A set only shrinks once its replacements are in.
        for (name, backends) in &mods.backends {
            let depends_on: Vec<Dependency> = if backends.additions.is_empty() {
                Vec::new()
            } else {
                vec![Dependency::BackendsAdded(name.clone())]
            };
            for backend in &backends.removals {
                operations.push(PlannedOperation {
                    operation: Operation::RemoveBackend {
                        backend_set: name.clone(),
                        backend: backend.clone(),
                    },
                    depends_on: depends_on.clone(),
                });
            }
        }
        for name in &mods.backend_sets_to_delete {
            let depends_on = actual
                .listeners_referencing(name)
                .filter(|l| removed.contains(l.name.as_str()))
                .map(|l| Dependency::ListenerRemoved(l.name.clone()))
                .collect();
            operations.push(PlannedOperation {
                operation: Operation::DeleteBackendSet(name.clone()),
                depends_on,
            });
        }

        Self { operations }
    }

    pub fn operations(&self) -> &[PlannedOperation] {
        &self.operations
    }

    pub fn in_phase(&self, phase: Phase) -> impl Iterator<Item = &PlannedOperation> {
        self.operations
            .iter()
            .filter(move |p| p.operation.phase() == phase)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "  (no changes)");
        }
        for phase in Phase::ALL {
            for planned in self.in_phase(phase) {
                write!(f, "  [{}] {}", phase, planned.operation)?;
                if !planned.depends_on.is_empty() {
                    let deps: Vec<String> =
                        planned.depends_on.iter().map(ToString::to_string).collect();
                    write!(f, " (after {})", deps.join(", "))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
