// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_broadphase::{Aabb2D, BoxId, SapManager2D};

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn next_f32(&mut self) -> f32 {
        let v = self.next_u64() >> 40;
        (v as f32) / ((1u64 << 24) as f32)
    }
    fn signed(&mut self) -> f32 {
        self.next_f32() * 2.0 - 1.0
    }
}

fn gen_random_boxes(count: usize, world: f32, size: f32, seed: u64) -> Vec<Aabb2D<f32>> {
    let mut rng = Rng::new(seed);
    (0..count)
        .map(|_| {
            let x = rng.next_f32() * world;
            let y = rng.next_f32() * world;
            let w = size * (0.5 + rng.next_f32());
            let h = size * (0.5 + rng.next_f32());
            Aabb2D::from_corners(x, y, x + w, y + h)
        })
        .collect()
}

fn populated(rects: &[Aabb2D<f32>]) -> (SapManager2D<u32>, Vec<BoxId>) {
    let mut sap = SapManager2D::new();
    let ids = rects
        .iter()
        .enumerate()
        .map(|(i, r)| sap.add_box(*r, 0, i as u32).unwrap())
        .collect();
    (sap, ids)
}

/// Box count and world side chosen so average density stays constant.
const SIZES: &[(usize, f32)] = &[(1_000, 800.0), (5_000, 1_800.0), (20_000, 3_600.0)];

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    for &(n, world) in SIZES {
        let rects = gen_random_boxes(n, world, 10.0, 0xCAFE_F00D_DEAD_BEEF);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("add_n{}", n), |b| {
            b.iter(|| {
                let (sap, _) = populated(&rects);
                black_box(sap.overlaps_count());
            })
        });
    }
    group.finish();
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames");
    for &(n, world) in SIZES {
        let rects = gen_random_boxes(n, world, 10.0, 0xBADC_F00D_1234_5678);
        let mut rng = Rng::new(0xC1A5_7E55_9999_ABCD);
        let deltas: Vec<[f32; 2]> = (0..n).map(|_| [rng.signed(), rng.signed()]).collect();
        let (mut sap, ids) = populated(&rects);
        let mut sign = 1.0_f32;
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("move_all_n{}", n), |b| {
            b.iter(|| {
                // Alternate directions so the scene does not drift apart.
                sign = -sign;
                for (id, d) in ids.iter().zip(&deltas) {
                    sap.move_box(*id, &[d[0] * sign, d[1] * sign]).unwrap();
                }
                black_box(sap.overlaps_count());
            })
        });
    }
    group.finish();
}

fn bench_rays(c: &mut Criterion) {
    let mut group = c.benchmark_group("rays");
    let (n, world) = SIZES[1];
    let rects = gen_random_boxes(n, world, 10.0, 0xFACE_FEED_CAFE_BABE);
    let (sap, _) = populated(&rects);
    let mut rng = Rng::new(0x1234_5678_9ABC_DEF0);
    let rays: Vec<([f32; 2], [f32; 2])> = (0..256)
        .map(|_| {
            let origin = [rng.next_f32() * world, rng.next_f32() * world];
            (origin, [rng.signed(), rng.signed()])
        })
        .collect();
    group.throughput(Throughput::Elements(rays.len() as u64));
    group.bench_function("all_hits", |b| {
        b.iter(|| {
            let mut caster = sap.ray_caster();
            let mut total = 0_usize;
            for (origin, dir) in &rays {
                caster.set_ray(*origin, *dir);
                caster.hits(|_, _| {
                    total += 1;
                    true
                });
            }
            black_box(total);
        })
    });
    group.bench_function("first_hit", |b| {
        b.iter(|| {
            let mut caster = sap.ray_caster();
            let mut found = 0_usize;
            for (origin, dir) in &rays {
                caster.set_ray(*origin, *dir);
                found += usize::from(caster.first_hit().is_some());
            }
            black_box(found);
        })
    });
    group.finish();
}

fn bench_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove");
    for &(n, world) in SIZES {
        let rects = gen_random_boxes(n, world, 10.0, 0xDEAD_BEEF_F00D_CAFE);
        let mut rng = Rng::new(0x0BAD_5EED_0BAD_5EED);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("remove_random_n{}", n), |b| {
            b.iter_batched(
                || {
                    let (sap, mut ids) = populated(&rects);
                    for i in (1..ids.len()).rev() {
                        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
                        ids.swap(i, j);
                    }
                    (sap, ids)
                },
                |(mut sap, ids)| {
                    for id in ids {
                        let _ = sap.remove_box(id).unwrap();
                    }
                    black_box(sap.is_empty());
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add, bench_frames, bench_rays, bench_remove);
criterion_main!(benches);
