//! Diff engine - computes the modifications that converge actual to desired.
//!
//! All functions here are pure. Output order is deterministic: backends sort
//! by (address, port), backend sets and listeners by name. Callers must not
//! rely on order beyond the phase ordering applied by the reconciler.

use std::collections::BTreeMap;

use crate::topology::{Backend, BackendSet, Listener, Result, Topology, ValidationError};

/// Backend membership changes for one backend set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendModifications {
    pub additions: Vec<Backend>,
    pub removals: Vec<Backend>,
}

impl BackendModifications {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Listener changes. A changed listener shows up in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerModifications {
    pub additions: Vec<Listener>,
    pub removals: Vec<Listener>,
}

impl ListenerModifications {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Names of listeners that are removed and re-added.
    pub fn replaced(&self) -> impl Iterator<Item = &str> {
        self.additions
            .iter()
            .filter(|a| self.removals.iter().any(|r| r.name == a.name))
            .map(|a| a.name.as_str())
    }
}

/// Everything that has to change for one load balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModificationSet {
    /// Backend sets missing from actual, created with their full membership.
    pub backend_sets_to_create: Vec<BackendSet>,
    /// Backend sets present on both sides whose policy or health check drifted.
    pub backend_sets_to_update: Vec<BackendSet>,
    /// Names of actual backend sets absent from desired.
    pub backend_sets_to_delete: Vec<String>,
    /// Membership changes of backend sets present on both sides.
    pub backends: BTreeMap<String, BackendModifications>,
    pub listeners: ListenerModifications,
}

impl ModificationSet {
    pub fn is_empty(&self) -> bool {
        self.backend_sets_to_create.is_empty()
            && self.backend_sets_to_update.is_empty()
            && self.backend_sets_to_delete.is_empty()
            && self.backends.is_empty()
            && self.listeners.is_empty()
    }
}

/// Backends to add to and remove from `actual` so it matches `desired`.
pub fn compute_backend_modifications(
    desired: &BackendSet,
    actual: &BackendSet,
) -> BackendModifications {
    BackendModifications {
        additions: desired
            .backends
            .difference(&actual.backends)
            .cloned()
            .collect(),
        removals: actual
            .backends
            .difference(&desired.backends)
            .cloned()
            .collect(),
    }
}

/// Listener additions and removals between two name-keyed listener maps.
///
/// Fails if a map stores a listener under a key other than its name.
pub fn compute_listener_modifications(
    desired: &BTreeMap<String, Listener>,
    actual: &BTreeMap<String, Listener>,
) -> Result<ListenerModifications> {
    check_keys(desired)?;
    check_keys(actual)?;

    let mut mods = ListenerModifications::default();
    for (name, want) in desired {
        match actual.get(name) {
            None => mods.additions.push(want.clone()),
            Some(have) if have != want => {
                mods.removals.push(have.clone());
                mods.additions.push(want.clone());
            }
            Some(_) => {}
        }
    }
    for (name, have) in actual {
        if !desired.contains_key(name) {
            mods.removals.push(have.clone());
        }
    }
    mods.removals.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(mods)
}

fn check_keys(listeners: &BTreeMap<String, Listener>) -> Result<()> {
    match listeners.iter().find(|(key, l)| *key != &l.name) {
        Some((key, l)) => Err(ValidationError::KeyMismatch {
            kind: "listener",
            key: key.clone(),
            name: l.name.clone(),
        }),
        None => Ok(()),
    }
}

/// Validate `desired` and compute the full modification set against `actual`.
pub fn diff_topology(desired: &Topology, actual: &Topology) -> Result<ModificationSet> {
    desired.validate()?;

    let mut mods = ModificationSet {
        listeners: compute_listener_modifications(&desired.listeners, &actual.listeners)?,
        ..Default::default()
    };

    for (name, want) in &desired.backend_sets {
        match actual.backend_sets.get(name) {
            // Diffing against an empty set would add every member; creation
            // carries them instead.
            None => mods.backend_sets_to_create.push(want.clone()),
            Some(have) => {
                if !want.same_settings(have) {
                    mods.backend_sets_to_update.push(want.clone());
                }
                let backends = compute_backend_modifications(want, have);
                if !backends.is_empty() {
                    mods.backends.insert(name.clone(), backends);
                }
            }
        }
    }

    mods.backend_sets_to_delete = actual
        .backend_sets
        .keys()
        .filter(|name| !desired.backend_sets.contains_key(*name))
        .cloned()
        .collect();

    Ok(mods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{HealthChecker, Protocol};

    fn backends(items: &[(&str, u16)]) -> Vec<Backend> {
        items.iter().map(|(a, p)| Backend::new(*a, *p)).collect()
    }

    fn make_set(items: &[(&str, u16)]) -> BackendSet {
        BackendSet::new("bs").with_backends(backends(items))
    }

    fn tcp(name: &str, backend_set: &str, port: u16) -> Listener {
        Listener::new(name, backend_set, Protocol::Tcp, port)
    }

    fn listener_map(listeners: &[Listener]) -> BTreeMap<String, Listener> {
        listeners
            .iter()
            .map(|l| (l.name.clone(), l.clone()))
            .collect()
    }

    #[test]
    fn test_backend_modifications() {
        let cases = [
            (
                make_set(&[("0.0.0.0", 80), ("0.0.0.1", 80)]),
                make_set(&[("0.0.0.0", 80)]),
                backends(&[("0.0.0.1", 80)]),
                vec![],
            ),
            (
                make_set(&[("0.0.0.0", 80)]),
                make_set(&[("0.0.0.0", 80), ("0.0.0.1", 80)]),
                vec![],
                backends(&[("0.0.0.1", 80)]),
            ),
            (
                make_set(&[("0.0.0.0", 80)]),
                make_set(&[("0.0.0.1", 80)]),
                backends(&[("0.0.0.0", 80)]),
                backends(&[("0.0.0.1", 80)]),
            ),
            (
                make_set(&[("0.0.0.0", 443), ("0.0.0.1", 443)]),
                make_set(&[("0.0.0.0", 80), ("0.0.0.1", 80)]),
                backends(&[("0.0.0.0", 443), ("0.0.0.1", 443)]),
                backends(&[("0.0.0.0", 80), ("0.0.0.1", 80)]),
            ),
            (
                make_set(&[("0.0.0.0", 80)]),
                make_set(&[("0.0.0.0", 80)]),
                vec![],
                vec![],
            ),
        ];

        for (desired, actual, additions, removals) in cases {
            let mods = compute_backend_modifications(&desired, &actual);
            assert_eq!(mods.additions, additions, "additions for {desired:?} vs {actual:?}");
            assert_eq!(mods.removals, removals, "removals for {desired:?} vs {actual:?}");
        }
    }

    #[test]
    fn test_backend_modifications_identical_is_empty() {
        let set = make_set(&[("10.0.0.1", 80), ("10.0.0.2", 80), ("fd00::1", 8080)]);
        assert!(compute_backend_modifications(&set, &set).is_empty());
    }

    #[test]
    fn test_backend_modifications_disjoint_and_no_overlap() {
        let desired = make_set(&[("10.0.0.1", 80), ("10.0.0.2", 80)]);
        let actual = make_set(&[("10.0.0.3", 80), ("10.0.0.1", 81)]);
        let mods = compute_backend_modifications(&desired, &actual);

        assert_eq!(mods.additions, desired.backends.iter().cloned().collect::<Vec<_>>());
        assert_eq!(mods.removals, actual.backends.iter().cloned().collect::<Vec<_>>());
        assert!(mods.additions.iter().all(|b| !mods.removals.contains(b)));
    }

    #[test]
    fn test_backend_modifications_against_empty() {
        let desired = make_set(&[("a", 80)]);
        let mods = compute_backend_modifications(&desired, &BackendSet::new("bs"));
        assert_eq!(mods.additions, backends(&[("a", 80)]));
        assert!(mods.removals.is_empty());

        let desired = make_set(&[("a", 80)]);
        let actual = make_set(&[("a", 80), ("b", 80)]);
        let mods = compute_backend_modifications(&desired, &actual);
        assert!(mods.additions.is_empty());
        assert_eq!(mods.removals, backends(&[("b", 80)]));
    }

    #[test]
    fn test_listener_modifications() {
        let cases = [
            (
                vec![tcp("TCP-443", "TCP-443", 443)],
                vec![tcp("TCP-80", "TCP-80", 80)],
                vec![tcp("TCP-443", "TCP-443", 443)],
                vec![tcp("TCP-80", "TCP-80", 80)],
            ),
            (
                vec![tcp("TCP-80", "TCP-80", 80)],
                vec![tcp("TCP-80", "TCP-80", 80)],
                vec![],
                vec![],
            ),
            (
                vec![tcp("TCP-80", "TCP-80", 80), tcp("TCP-443", "TCP-443", 443)],
                vec![tcp("TCP-80", "TCP-80", 80)],
                vec![tcp("TCP-443", "TCP-443", 443)],
                vec![],
            ),
            (
                vec![tcp("TCP-80", "TCP-80", 80)],
                vec![tcp("TCP-80", "TCP-80", 80), tcp("TCP-443", "TCP-443", 443)],
                vec![],
                vec![tcp("TCP-443", "TCP-443", 443)],
            ),
        ];

        for (desired, actual, additions, removals) in cases {
            let mods =
                compute_listener_modifications(&listener_map(&desired), &listener_map(&actual))
                    .unwrap();
            assert_eq!(mods.additions, additions, "additions for {desired:?} vs {actual:?}");
            assert_eq!(mods.removals, removals, "removals for {desired:?} vs {actual:?}");
        }
    }

    #[test]
    fn test_listener_modifications_replace() {
        let desired = listener_map(&[tcp("L", "bs1", 443)]);
        let actual = listener_map(&[tcp("L", "bs1", 80)]);
        let mods = compute_listener_modifications(&desired, &actual).unwrap();

        assert_eq!(mods.removals, vec![actual["L"].clone()]);
        assert_eq!(mods.additions, vec![desired["L"].clone()]);
        assert_eq!(mods.replaced().collect::<Vec<_>>(), vec!["L"]);
    }

    #[test]
    fn test_listener_modifications_replace_on_any_field() {
        let base = tcp("L", "bs1", 80);
        let variants = [
            tcp("L", "bs2", 80),
            Listener::new("L", "bs1", Protocol::Http, 80),
            tcp("L", "bs1", 8080),
        ];
        for changed in variants {
            let mods = compute_listener_modifications(
                &listener_map(std::slice::from_ref(&changed)),
                &listener_map(std::slice::from_ref(&base)),
            )
            .unwrap();
            assert_eq!(mods.additions, vec![changed.clone()]);
            assert_eq!(mods.removals, vec![base.clone()]);
        }
    }

    #[test]
    fn test_listener_modifications_disjoint() {
        let desired = [tcp("a", "bs", 1), tcp("b", "bs", 2)];
        let actual = [tcp("c", "bs", 3), tcp("d", "bs", 4)];
        let mods =
            compute_listener_modifications(&listener_map(&desired), &listener_map(&actual))
                .unwrap();
        assert_eq!(mods.additions, desired.to_vec());
        assert_eq!(mods.removals, actual.to_vec());
        assert_eq!(mods.replaced().count(), 0);
    }

    #[test]
    fn test_listener_modifications_key_mismatch() {
        let mut desired = BTreeMap::new();
        desired.insert("wrong".to_string(), tcp("L", "bs", 80));
        let result = compute_listener_modifications(&desired, &BTreeMap::new());
        assert!(matches!(
            result,
            Err(ValidationError::KeyMismatch { kind: "listener", .. })
        ));
    }

    #[test]
    fn test_diff_topology() {
        let desired = Topology::from_parts(
            [
                BackendSet::new("keep")
                    .with_backends(backends(&[("10.0.0.1", 80), ("10.0.0.2", 80)])),
                BackendSet::new("new").with_backends(backends(&[("10.0.1.1", 443)])),
            ],
            [tcp("TCP-80", "keep", 80), tcp("TCP-443", "new", 443)],
        )
        .unwrap();
        let mut drifted = BackendSet::new("keep")
            .with_backends(backends(&[("10.0.0.1", 80), ("10.0.0.3", 80)]));
        drifted.health_checker = HealthChecker {
            protocol: Protocol::Http,
            url_path: Some("/healthz".to_string()),
            ..Default::default()
        };
        let actual = Topology::from_parts(
            [drifted, BackendSet::new("old")],
            [tcp("TCP-80", "keep", 80), tcp("TCP-8080", "old", 8080)],
        )
        .unwrap();

        let mods = diff_topology(&desired, &actual).unwrap();
        assert_eq!(mods.backend_sets_to_create, vec![desired.backend_sets["new"].clone()]);
        assert_eq!(mods.backend_sets_to_update, vec![desired.backend_sets["keep"].clone()]);
        assert_eq!(mods.backend_sets_to_delete, vec!["old".to_string()]);
        assert_eq!(
            mods.backends["keep"],
            BackendModifications {
                additions: backends(&[("10.0.0.2", 80)]),
                removals: backends(&[("10.0.0.3", 80)]),
            }
        );
        assert_eq!(mods.listeners.additions, vec![tcp("TCP-443", "new", 443)]);
        assert_eq!(mods.listeners.removals, vec![tcp("TCP-8080", "old", 8080)]);
    }

    #[test]
    fn test_diff_topology_identical_is_empty() {
        let topology = Topology::from_parts(
            [BackendSet::new("bs").with_backends(backends(&[("10.0.0.1", 80)]))],
            [tcp("TCP-80", "bs", 80)],
        )
        .unwrap();
        assert!(diff_topology(&topology, &topology).unwrap().is_empty());
    }

    #[test]
    fn test_diff_topology_rejects_invalid_desired() {
        let desired = Topology::from_parts(Vec::new(), [tcp("TCP-80", "missing", 80)]).unwrap();
        assert!(matches!(
            diff_topology(&desired, &Topology::default()),
            Err(ValidationError::UnknownBackendSet { .. })
        ));
    }
}
