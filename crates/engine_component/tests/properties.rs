//! Property tests for the store merge rules.
//!
//! Whatever order a set of operations arrives in, and however often each one
//! is delivered, every replica must end in the same state.

use std::collections::BTreeSet;

use engine_component::{Entity, GrowOnlyElement, GrowOnlyValueSet, LwwElementSet, LwwEntry};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Op {
    entity: u16,
    timestamp: u32,
    data: Option<Vec<u8>>,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    (
        0u16..4,
        0u32..6,
        prop::option::weighted(0.8, prop::collection::vec(0u8..4, 0..3)),
    )
        .prop_map(|(entity, timestamp, data)| Op {
            entity,
            timestamp,
            data,
        })
}

fn lww_state(ops: &[Op]) -> Vec<(Entity, LwwEntry)> {
    let mut store = LwwElementSet::new();
    for op in ops {
        store.merge(Entity::from_parts(op.entity, 0), op.timestamp, op.data.clone());
    }
    (0u16..4)
        .map(|n| Entity::from_parts(n, 0))
        .filter_map(|e| Some((e, store.entry(e)?.clone())))
        .collect()
}

fn gset_state(ops: &[Op]) -> Vec<(Entity, BTreeSet<GrowOnlyElement>)> {
    let mut store = GrowOnlyValueSet::new();
    for op in ops {
        store.merge(
            Entity::from_parts(op.entity, 0),
            op.timestamp,
            op.data.clone().unwrap_or_default(),
        );
    }
    store.iter().map(|(e, set)| (e, set.clone())).collect()
}

proptest! {
    #[test]
    fn lww_converges_under_any_order(
        ops in prop::collection::vec(op_strategy(), 0..24),
        seed in any::<u64>(),
    ) {
        let mut shuffled = ops.clone();
        // Deterministic Fisher-Yates driven by the seed.
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }
        prop_assert_eq!(lww_state(&ops), lww_state(&shuffled));
    }

    #[test]
    fn lww_merge_is_idempotent(ops in prop::collection::vec(op_strategy(), 0..24)) {
        let mut doubled = ops.clone();
        doubled.extend(ops.iter().cloned());
        prop_assert_eq!(lww_state(&ops), lww_state(&doubled));
    }

    #[test]
    fn lww_timestamp_never_decreases(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let mut store = LwwElementSet::new();
        let e = Entity::from_parts(0, 0);
        let mut last = 0;
        for op in ops {
            if op.entity % 2 == 0 {
                store.merge(e, op.timestamp, op.data);
            } else if let Some(data) = op.data {
                // Refused at `u32::MAX`, which leaves the entry as it was.
                let _ = store.put(e, data);
            } else {
                let _ = store.delete(e);
            }
            let now = store.entry(e).map_or(0, |entry| entry.timestamp);
            prop_assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn lww_tie_break_picks_greater_bytes(
        a in prop::collection::vec(any::<u8>(), 0..8),
        b in prop::collection::vec(any::<u8>(), 0..8),
        timestamp in any::<u32>(),
    ) {
        let e = Entity::from_parts(1, 0);
        let winner = a.clone().max(b.clone());

        let mut first = LwwElementSet::new();
        first.merge(e, timestamp, Some(a.clone()));
        first.merge(e, timestamp, Some(b.clone()));

        let mut second = LwwElementSet::new();
        second.merge(e, timestamp, Some(b));
        second.merge(e, timestamp, Some(a));

        prop_assert_eq!(first.get(e), Some(winner.as_slice()));
        prop_assert_eq!(second.get(e), Some(winner.as_slice()));
    }

    #[test]
    fn gset_converges_and_never_shrinks(ops in prop::collection::vec(op_strategy(), 0..24)) {
        let mut reversed = ops.clone();
        reversed.reverse();
        prop_assert_eq!(gset_state(&ops), gset_state(&reversed));

        let mut store = GrowOnlyValueSet::new();
        let mut size = 0;
        for op in &ops {
            store.merge(Entity::from_parts(op.entity, 0), op.timestamp, op.data.clone().unwrap_or_default());
            let now: usize = store.iter().map(|(_, set)| set.len()).sum();
            prop_assert!(now >= size);
            size = now;
        }
    }
}
