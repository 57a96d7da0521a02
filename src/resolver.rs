//! Dependency Resolver
//!
//! Kahn's algorithm with an ordered ready set: fragments with no ordering
//! constraint between them come out in ascending identifier order, so the
//! same catalog always yields the same order.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::SynthesisError;
use crate::fragments::Fragment;

/// Orders fragments so that every fragment follows all of its dependencies.
pub fn resolve_order<'a, I>(fragments: I) -> Result<Vec<&'a Fragment>, SynthesisError>
where
    I: IntoIterator<Item = &'a Fragment>,
{
    let mut by_id: BTreeMap<&str, &Fragment> = BTreeMap::new();
    for fragment in fragments {
        if by_id.insert(fragment.id.as_str(), fragment).is_some() {
            return Err(SynthesisError::DuplicateFragment(fragment.id.clone()));
        }
    }

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (&id, fragment) in &by_id {
        let deps = fragment.dependencies();
        for &dep in &deps {
            if !by_id.contains_key(dep) {
                return Err(SynthesisError::UnresolvedDependency {
                    fragment: id.to_string(),
                    dependency: dep.to_string(),
                });
            }
            dependents.entry(dep).or_default().push(id);
        }
        // Name references impose no order, but their targets must exist.
        if let Some(missing) = fragment
            .name_references()
            .into_iter()
            .find(|target| !by_id.contains_key(target))
        {
            return Err(SynthesisError::UnresolvedDependency {
                fragment: id.to_string(),
                dependency: missing.to_string(),
            });
        }
        in_degree.insert(id, deps.len());
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted = Vec::with_capacity(by_id.len());
    while let Some(id) = ready.pop_first() {
        sorted.push(by_id[id]);
        for &dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(deg) = in_degree.get_mut(dependent) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if sorted.len() != by_id.len() {
        let blocked: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(&id, _)| id)
            .collect();
        return Err(SynthesisError::CyclicDependency(find_cycle(&blocked, &by_id)));
    }

    debug!(count = sorted.len(), "resolved fragment order");
    Ok(sorted)
}

/// Walks dependency edges among blocked fragments until one repeats.
///
/// Every blocked fragment has at least one blocked dependency, so the walk
/// always closes a cycle. Only the cycle itself is returned, starting at
/// the first member reached.
fn find_cycle(blocked: &BTreeSet<&str>, by_id: &BTreeMap<&str, &Fragment>) -> Vec<String> {
    let mut path: Vec<&str> = vec![];
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    let mut current = match blocked.first() {
        Some(&id) => id,
        None => return vec![],
    };

    loop {
        if let Some(&start) = seen.get(current) {
            return path[start..].iter().map(|s| s.to_string()).collect();
        }
        seen.insert(current, path.len());
        path.push(current);

        let next = by_id
            .get(current)
            .and_then(|f| f.dependencies().into_iter().find(|d| blocked.contains(d)));
        match next {
            Some(dep) => current = dep,
            None => return blocked.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::{PropertyValue, ResourceType};

    fn ids(order: &[&Fragment]) -> Vec<String> {
        order.iter().map(|f| f.id.clone()).collect()
    }

    #[test]
    fn test_subnets_in_identifier_order_nat_last() {
        let fragments = vec![
            Fragment::new("NATGateway", ResourceType::NAT_GATEWAY).depends_on("PublicSubnet1"),
            Fragment::new("PublicSubnet1", ResourceType::SUBNET).depends_on("VPC"),
            Fragment::new("PrivateSubnet1", ResourceType::SUBNET).depends_on("VPC"),
            Fragment::new("VPC", ResourceType::VPC),
        ];
        let order = resolve_order(&fragments).unwrap();
        assert_eq!(
            ids(&order),
            vec!["VPC", "PrivateSubnet1", "PublicSubnet1", "NATGateway"]
        );
    }

    #[test]
    fn test_two_cycle_reported_exactly() {
        let fragments = vec![
            Fragment::new("A", ResourceType::VPC).depends_on("B"),
            Fragment::new("B", ResourceType::VPC).depends_on("A"),
            Fragment::new("C", ResourceType::VPC).depends_on("A"),
        ];
        let err = resolve_order(&fragments).unwrap_err();
        match err {
            SynthesisError::CyclicDependency(cycle) => assert_eq!(cycle, vec!["A", "B"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_behind_dependent_is_isolated() {
        // Z sits downstream of the cycle but is not part of it.
        let fragments = vec![
            Fragment::new("A", ResourceType::VPC).depends_on("Z"),
            Fragment::new("Z", ResourceType::VPC).depends_on("X"),
            Fragment::new("X", ResourceType::VPC).depends_on("Y"),
            Fragment::new("Y", ResourceType::VPC).depends_on("X"),
        ];
        match resolve_order(&fragments).unwrap_err() {
            SynthesisError::CyclicDependency(cycle) => assert_eq!(cycle, vec!["X", "Y"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let fragments = vec![Fragment::new("Loop", ResourceType::VPC).depends_on("Loop")];
        match resolve_order(&fragments).unwrap_err() {
            SynthesisError::CyclicDependency(cycle) => assert_eq!(cycle, vec!["Loop"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_target_unresolved() {
        let fragments = vec![Fragment::new("Route", ResourceType::ROUTE).depends_on("Gateway")];
        let err = resolve_order(&fragments).unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::UnresolvedDependency { fragment, dependency }
                if fragment == "Route" && dependency == "Gateway"
        ));
    }

    #[test]
    fn test_name_reference_target_must_exist() {
        let fragments = vec![
            Fragment::new("QueuePolicy", ResourceType::QUEUE_POLICY)
                .with_property("SourceBucket", PropertyValue::name_of("LogBucket")),
        ];
        let err = resolve_order(&fragments).unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::UnresolvedDependency { fragment, dependency }
                if fragment == "QueuePolicy" && dependency == "LogBucket"
        ));
    }

    #[test]
    fn test_name_reference_is_not_an_edge() {
        // Bucket depends on Policy; Policy only embeds Bucket's name.
        let fragments = vec![
            Fragment::new("Bucket", ResourceType::S3_BUCKET).depends_on("Policy"),
            Fragment::new("Policy", ResourceType::QUEUE_POLICY)
                .with_property("SourceBucket", PropertyValue::name_of("Bucket")),
        ];
        let order = resolve_order(&fragments).unwrap();
        assert_eq!(ids(&order), vec!["Policy", "Bucket"]);
    }
}
