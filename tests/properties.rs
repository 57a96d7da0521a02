//! Property tests for ordering, cycle reporting and idempotence.

use landingzone_core::{
    fragments::{Fragment, FragmentCatalog, PropertyValue, ResourceType},
    resolve_order, SynthesisConfig, SynthesisError, SynthesisPipeline,
};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::BTreeSet;

/// Node `i` may only depend on nodes `0..i`, so the graph is acyclic.
fn dag(picks: &[Vec<Index>]) -> Vec<Fragment> {
    picks
        .iter()
        .enumerate()
        .map(|(i, deps)| {
            let mut f = Fragment::new(format!("F{:02}", i), ResourceType::SUBNET);
            if i > 0 {
                let targets: BTreeSet<usize> = deps.iter().map(|d| d.index(i)).collect();
                for target in targets {
                    // Alternate between declared and referenced edges.
                    if target % 2 == 0 {
                        f = f.depends_on(format!("F{:02}", target));
                    } else {
                        f = f.with_property(
                            format!("Ref{:02}", target),
                            PropertyValue::reference(format!("F{:02}", target)),
                        );
                    }
                }
            }
            f
        })
        .collect()
}

fn dag_strategy() -> impl Strategy<Value = Vec<Vec<Index>>> {
    prop::collection::vec(prop::collection::vec(any::<Index>(), 0..4), 1..14)
}

fn ids(order: &[&Fragment]) -> Vec<String> {
    order.iter().map(|f| f.id.clone()).collect()
}

proptest! {
    /// Every fragment comes after all of its dependencies.
    #[test]
    fn order_is_topological(picks in dag_strategy()) {
        let fragments = dag(&picks);
        let order = resolve_order(&fragments).unwrap();
        prop_assert_eq!(order.len(), fragments.len());

        let pos = |id: &str| order.iter().position(|f| f.id == id).unwrap();
        for f in &order {
            for dep in f.dependencies() {
                prop_assert!(pos(dep) < pos(&f.id), "{} must precede {}", dep, f.id);
            }
        }
    }

    /// Input order never changes the result.
    #[test]
    fn order_is_deterministic(picks in dag_strategy()) {
        let fragments = dag(&picks);
        let mut reversed = fragments.clone();
        reversed.reverse();

        let a = ids(&resolve_order(&fragments).unwrap());
        let b = ids(&resolve_order(&fragments).unwrap());
        let c = ids(&resolve_order(&reversed).unwrap());
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a, &c);
    }

    /// Without edges the order is plain identifier order.
    #[test]
    fn unconstrained_fragments_sorted(n in 1usize..20) {
        let fragments: Vec<_> = (0..n)
            .rev()
            .map(|i| Fragment::new(format!("F{:02}", i), ResourceType::SUBNET))
            .collect();
        let order = ids(&resolve_order(&fragments).unwrap());
        let mut sorted = order.clone();
        sorted.sort();
        prop_assert_eq!(order, sorted);
    }

    /// A ring is reported with exactly its members, in dependency order.
    #[test]
    fn cycle_reports_exact_members(
        ring_len in 2usize..6,
        extras in prop::collection::vec(prop::collection::vec(any::<Index>(), 0..3), 0..6),
    ) {
        let ring: Vec<String> = (0..ring_len).map(|i| format!("R{}", i)).collect();
        let mut fragments: Vec<Fragment> = ring
            .iter()
            .enumerate()
            .map(|(i, id)| {
                Fragment::new(id.clone(), ResourceType::SUBNET)
                    .depends_on(ring[(i + 1) % ring_len].clone())
            })
            .collect();

        // Extras may hang off the ring or each other but are never part of a cycle.
        for (i, deps) in extras.iter().enumerate() {
            let mut f = Fragment::new(format!("E{}", i), ResourceType::SUBNET);
            for d in deps {
                let target = d.index(ring_len + i);
                let id = if target < ring_len {
                    ring[target].clone()
                } else {
                    format!("E{}", target - ring_len)
                };
                f = f.depends_on(id);
            }
            fragments.push(f);
        }

        match resolve_order(&fragments) {
            Err(SynthesisError::CyclicDependency(cycle)) => {
                let mut members = cycle.clone();
                members.sort();
                prop_assert_eq!(&members, &ring);

                for (i, id) in cycle.iter().enumerate() {
                    let next = &cycle[(i + 1) % cycle.len()];
                    let f = fragments.iter().find(|f| &f.id == id).unwrap();
                    prop_assert!(f.depends_on.contains(next));
                }
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other.map(|o| ids(&o))),
        }
    }

    /// Synthesizing the same input twice gives the same bytes.
    #[test]
    fn synthesis_is_idempotent(picks in dag_strategy(), prefix in "[a-z][a-z0-9]{0,8}") {
        let mut catalog = FragmentCatalog::new();
        for f in dag(&picks) {
            catalog.register(f).unwrap();
        }
        let pipeline = SynthesisPipeline::new(catalog);
        let config = SynthesisConfig::new(prefix, "123456789012", "eu-central-1").unwrap();

        let a = pipeline.synthesize(&config).unwrap().to_json().unwrap();
        let b = pipeline.synthesize(&config).unwrap().to_json().unwrap();
        prop_assert_eq!(a, b);
    }
}
