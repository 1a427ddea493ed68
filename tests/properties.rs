//! Property tests for cascade planning, connection validity and input gating

mod common;

use common::builders::{gain, CountingStepBuilder};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tickflow::engine::{DataKind, Group, LoopedTriggerConfig, Role, Step, Triggerable};

/// Edges `(from, to)` with `from < to`, so the graph is acyclic.
fn dag(max_nodes: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (2..max_nodes).prop_flat_map(|n| {
        let edges = prop::collection::vec((0..n, 0..n), 0..n * 2).prop_map(|pairs| {
            let mut seen = HashSet::new();
            pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .filter(|edge| seen.insert(*edge))
                .collect::<Vec<_>>()
        });
        (Just(n), edges)
    })
}

fn kind() -> impl Strategy<Value = DataKind> {
    prop_oneof![
        Just(DataKind::Scalar),
        Just(DataKind::Boolean),
        Just(DataKind::Vector),
        Just(DataKind::Matrix),
        Just(DataKind::Text),
        "[a-z]{1,6}".prop_map(DataKind::Custom),
    ]
}

fn producer(name: &str, kind: DataKind) -> Arc<Step> {
    Step::from_fn(
        name,
        move |slots| slots.declare_slot(Role::Output, "out", kind.clone(), false),
        |_| Ok(()),
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_cascade_respects_every_edge((n, edges) in dag(9)) {
        let group = Group::new("dag");
        let mut counters = Vec::new();
        for i in 0..n {
            let mut builder = CountingStepBuilder::new(&format!("s{}", i));
            for (from, _) in edges.iter().filter(|(_, to)| *to == i) {
                builder = builder.input(format!("i{}", from));
            }
            let (step, ticks) = builder.build();
            group.add_step(step).unwrap();
            counters.push(ticks);
        }
        for (from, to) in &edges {
            group.connect(&format!("s{}.out", from), &format!("s{}.i{}", to, from)).unwrap();
            group.connect_trigger(&format!("s{}", from), &format!("s{}", to)).unwrap();
        }
        let trigger = group.add_looped_trigger("t", LoopedTriggerConfig::default()).unwrap();
        for i in (0..n).filter(|i| !edges.iter().any(|(_, to)| to == i)) {
            group.assign(&format!("s{}", i), "t").unwrap();
        }

        let report = trigger.fire();
        let unique: HashSet<_> = report.ran.iter().collect();
        prop_assert_eq!(unique.len(), report.ran.len(), "a node ran twice");
        prop_assert_eq!(report.ran.len(), n);
        prop_assert!(report.cycles.is_empty());
        for ticks in &counters {
            prop_assert_eq!(ticks.load(Ordering::SeqCst), 1);
        }

        let order = trigger.triggering_order();
        let position = |i: usize| {
            let id = group.step(&format!("s{}", i)).unwrap().id();
            (order.depth_of(id).unwrap(), report.ran.iter().position(|r| *r == id).unwrap())
        };
        for (from, to) in &edges {
            let (from_depth, from_pos) = position(*from);
            let (to_depth, to_pos) = position(*to);
            prop_assert!(from_depth < to_depth, "s{} -> s{} not ordered by depth", from, to);
            prop_assert!(from_pos < to_pos);
        }
    }

    #[test]
    fn test_connect_matches_validity_check(kinds in prop::collection::vec(kind(), 1..6)) {
        let group = Group::new("validity");
        group.add_step(gain("sink", 1.0)).unwrap();
        let sink = group.step("sink").unwrap();

        for (i, kind) in kinds.into_iter().enumerate() {
            let name = format!("p{}", i);
            let source = producer(&name, kind);
            let handle = source.producer_handle(Role::Output, "out").unwrap();
            group.add_step(source).unwrap();

            let accepted = sink.check_validity("in", &handle).unwrap().is_accepted();
            let before = group.connections();
            let result = group.connect(&format!("{}.out", name), "sink.in");
            prop_assert_eq!(result.is_ok(), accepted);
            if accepted {
                let bound = sink.handle(Role::Input, "in").unwrap();
                prop_assert!(bound.same_as(&handle));
                prop_assert_eq!(group.connections().len(), 1);
            } else {
                prop_assert_eq!(group.connections(), before);
            }
        }
    }

    #[test]
    fn test_mandatory_inputs_gate_the_tick(
        connected in prop::collection::vec(any::<bool>(), 1..6),
        optional in any::<bool>(),
    ) {
        let group = Group::new("gate");
        let mut builder = CountingStepBuilder::new("target");
        if optional {
            builder = builder.optional_inputs();
        }
        for i in 0..connected.len() {
            builder = builder.input(format!("in{}", i));
        }
        let (target, ticks) = builder.build();
        group.add_step(target.clone()).unwrap();
        for (i, wired) in connected.iter().enumerate() {
            let (source, _) = CountingStepBuilder::new(&format!("src{}", i)).build();
            group.add_step(source).unwrap();
            if *wired {
                group.connect(&format!("src{}.out", i), &format!("target.in{}", i)).unwrap();
            }
        }
        let trigger = group.add_looped_trigger("t", LoopedTriggerConfig::default()).unwrap();
        group.assign("target", "t").unwrap();

        let report = trigger.fire();
        let should_run = optional || connected.iter().all(|w| *w);
        prop_assert_eq!(report.ran.contains(&target.id()), should_run);
        prop_assert_eq!(report.gated.len(), usize::from(!should_run));
        prop_assert_eq!(ticks.load(Ordering::SeqCst), u64::from(should_run));
    }
}
