// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Random operation sequences checked against an all-pairs reference.

use proptest::prelude::*;
use understory_broadphase::{Aabb2D, BoxId, SapConfig, SapManager2D};

#[derive(Clone, Debug)]
enum Op {
    Add { rect: [i32; 4], group: u32 },
    AddWide { y: i32, group: u32 },
    Move { pick: usize, dx: i32, dy: i32 },
    Update { pick: usize, rect: [i32; 4] },
    Remove { pick: usize },
    Regroup { group: u32, other: u32, allow: bool },
}

/// Coordinates on a half-unit lattice so touching and identical boxes are
/// common and every sum stays exact.
fn rect(r: [i32; 4]) -> Aabb2D<f32> {
    let [x, y, w, h] = r.map(|v| v as f32 * 0.5);
    Aabb2D::from_corners(x, y, x + w, y + h)
}

fn rect_strategy() -> impl Strategy<Value = [i32; 4]> {
    (0_i32..48, 0_i32..48, 0_i32..10, 0_i32..10).prop_map(|(x, y, w, h)| [x, y, w, h])
}

/// Spans the whole float range on x, so its extent overflows to infinity.
fn wide(y: i32) -> Aabb2D<f32> {
    let y = y as f32 * 0.5;
    Aabb2D::from_corners(-f32::MAX, y, f32::MAX, y + 1.0)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (rect_strategy(), 0_u32..3).prop_map(|(rect, group)| Op::Add { rect, group }),
        1 => (0_i32..48, 0_u32..3).prop_map(|(y, group)| Op::AddWide { y, group }),
        4 => (any::<usize>(), -8_i32..9, -8_i32..9)
            .prop_map(|(pick, dx, dy)| Op::Move { pick, dx, dy }),
        2 => (any::<usize>(), rect_strategy()).prop_map(|(pick, rect)| Op::Update { pick, rect }),
        2 => any::<usize>().prop_map(|pick| Op::Remove { pick }),
        1 => (0_u32..3, 0_u32..3, any::<bool>())
            .prop_map(|(group, other, allow)| Op::Regroup { group, other, allow }),
    ]
}

fn small_leaves() -> SapConfig {
    SapConfig {
        max_boxes_in_segment: 4,
        min_boxes_in_segment: 2,
        max_box_occurrences: 256,
        initial_pair_capacity: 4,
        ..SapConfig::default()
    }
}

/// Group 2 ignores itself; group 0 ignores group 1 but not the reverse.
/// `Op::Regroup` edits the matrix from there.
fn manager() -> SapManager2D<()> {
    let mut sap = SapManager2D::with_config(small_leaves()).unwrap();
    sap.set_collision_flags(2, false, &[2]).unwrap();
    sap.set_collision_flags(0, false, &[1]).unwrap();
    sap
}

fn eligible(sap: &SapManager2D<()>, g1: u32, g2: u32) -> bool {
    let allows = |a: u32, b: u32| sap.collision_flags(a).unwrap().get(b);
    allows(g1, g2) || allows(g2, g1)
}

fn tracked(sap: &SapManager2D<()>) -> Vec<(BoxId, BoxId)> {
    let mut out: Vec<_> = sap.overlaps().map(|o| (o.first, o.second)).collect();
    out.sort_unstable();
    out
}

fn brute_force(sap: &SapManager2D<()>) -> Vec<(BoxId, BoxId)> {
    let ids: Vec<BoxId> = sap.box_ids().collect();
    let mut out = Vec::new();
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            let overlap = sap.bounds(a).unwrap().overlaps(sap.bounds(b).unwrap());
            if overlap && eligible(sap, sap.group(a).unwrap(), sap.group(b).unwrap()) {
                out.push(if a.index() < b.index() { (a, b) } else { (b, a) });
            }
        }
    }
    out.sort_unstable();
    out
}

fn apply(sap: &mut SapManager2D<()>, live: &mut Vec<BoxId>, op: &Op) {
    match *op {
        Op::Add { rect: r, group } => live.push(sap.add_box(rect(r), group, ()).unwrap()),
        Op::AddWide { y, group } => live.push(sap.add_box(wide(y), group, ()).unwrap()),
        Op::Move { pick, dx, dy } if !live.is_empty() => {
            let id = live[pick % live.len()];
            sap.move_box(id, &[dx as f32 * 0.5, dy as f32 * 0.5]).unwrap();
        }
        Op::Update { pick, rect: r } if !live.is_empty() => {
            let id = live[pick % live.len()];
            sap.update_box(id, rect(r)).unwrap();
        }
        Op::Remove { pick } if !live.is_empty() => {
            let id = live.swap_remove(pick % live.len());
            sap.remove_box(id).unwrap();
            assert!(!sap.contains(id));
        }
        Op::Regroup { group, other, allow } => {
            sap.set_collision_flags(group, allow, &[other]).unwrap();
            sap.update_collision_flags();
        }
        _ => {}
    }
}

proptest! {
    #[test]
    fn pair_set_matches_brute_force(ops in prop::collection::vec(op_strategy(), 1..120)) {
        let mut sap = manager();
        let mut live = Vec::new();
        for op in &ops {
            apply(&mut sap, &mut live, op);
            sap.validate();
            prop_assert_eq!(tracked(&sap), brute_force(&sap), "after {:?}", op);
            prop_assert_eq!(sap.len(), live.len());
        }
    }

    #[test]
    fn moving_back_restores_the_pair_set(
        ops in prop::collection::vec(op_strategy(), 1..80),
        pick in any::<usize>(),
        dx in -20_i32..21,
        dy in -20_i32..21,
    ) {
        let mut sap = manager();
        let mut live = Vec::new();
        for op in &ops {
            apply(&mut sap, &mut live, op);
        }
        prop_assume!(!live.is_empty());
        let id = live[pick % live.len()];
        let bounds = *sap.bounds(id).unwrap();
        let before = tracked(&sap);

        let delta = [dx as f32 * 0.5, dy as f32 * 0.5];
        sap.move_box(id, &delta).unwrap();
        sap.validate();
        sap.move_box(id, &[-delta[0], -delta[1]]).unwrap();
        sap.validate();

        prop_assert_eq!(*sap.bounds(id).unwrap(), bounds);
        prop_assert_eq!(tracked(&sap), before);
    }

    #[test]
    fn ray_hits_are_ordered_and_complete(
        ops in prop::collection::vec(op_strategy(), 1..100),
        y0 in 0_i32..60,
        dy in -4_i32..5,
        stop_after in 1_usize..6,
    ) {
        let mut sap = manager();
        let mut live = Vec::new();
        for op in &ops {
            apply(&mut sap, &mut live, op);
        }
        let mut caster = sap.ray_caster();
        caster.set_ray([-1.0, y0 as f32 * 0.5], [1.0, dy as f32 * 0.125]);

        let hits = caster.collect_hits();
        for w in hits.windows(2) {
            prop_assert!(w[0].1 <= w[1].1, "hits out of order: {:?}", w);
        }
        let mut got: Vec<BoxId> = hits.iter().map(|&(id, _)| id).collect();
        got.sort_unstable();
        let mut expected: Vec<BoxId> = sap
            .box_ids()
            .filter(|&id| caster.intersect(sap.bounds(id).unwrap()).is_some())
            .collect();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);

        let mut reported = Vec::new();
        caster.hits(|id, _| {
            reported.push(id);
            reported.len() < stop_after
        });
        let prefix: Vec<BoxId> = hits.iter().take(stop_after).map(|&(id, _)| id).collect();
        prop_assert_eq!(reported, prefix);
    }
}
