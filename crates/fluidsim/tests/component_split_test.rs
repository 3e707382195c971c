//! S4: cutting the corridor of a settled U-bend splits one body of water
//! into two, via the rebuild path, without ever double-claiming a voxel.

use fluidsim::{SimConfig, Voxel, World, VMAX};
use glam::{IVec3, Vec3};

const DT: f32 = 1.0 / 60.0;
const WATER: u8 = 255;

const SHAFT_A: i32 = 4;
const SHAFT_B: i32 = 12;
const Z: i32 = 8;

fn set_cell(world: &World, p: IVec3, v: Voxel) {
    let idx = world.grid().voxel_at(p).expect("position inside world");
    world.set_voxel(idx, v).expect("simulation drained");
}

fn center(p: IVec3, voxel_size: f32) -> Vec3 {
    (p.as_vec3() + Vec3::splat(0.5)) * voxel_size
}

fn build_u_bend() -> World {
    let config = SimConfig {
        size_blocks: (1, 2, 1),
        ..SimConfig::default()
    };
    let world = World::new(config).unwrap();

    for x in 1..15 {
        for z in 1..15 {
            for y in 1..31 {
                let p = IVec3::new(x, y, z);
                let shaft = (x == SHAFT_A || x == SHAFT_B) && z == Z && (2..=28).contains(&y);
                let corridor = y == 2 && z == Z && (SHAFT_A..=SHAFT_B).contains(&x);
                if !shaft && !corridor {
                    set_cell(&world, p, Voxel::terrain());
                }
            }
        }
    }

    // Enough water that each column keeps a viable body after the split.
    let mut cell = Voxel::air();
    cell.fluid = VMAX;
    cell.viscosity = WATER;
    cell.unsettle(VMAX as i32);
    for i in 0..26 {
        set_cell(&world, IVec3::new(SHAFT_A, 2 + i, Z), cell);
    }
    for i in 0..16 {
        set_cell(&world, IVec3::new(SHAFT_B, 2 + i, Z), cell);
    }
    world
}

fn run_to_rest(world: &World, max_ticks: usize) -> usize {
    for i in 1..=max_ticks {
        world.tick(DT);
        world.wait_until_quiescent();
        if world.is_settled() {
            return i;
        }
    }
    panic!("world still active after {max_ticks} ticks");
}

/// Number of components claiming a position; more than one is a partition
/// violation at any moment in time.
fn claimants(world: &World, p: IVec3) -> usize {
    world
        .components()
        .iter()
        .filter(|(_, c)| c.contains(p))
        .count()
}

#[test]
fn corridor_cut_splits_the_body_in_two() {
    let world = build_u_bend();
    run_to_rest(&world, 6000);
    assert_eq!(world.component_count(), 1, "settled U-bend is one body");

    // Seal the corridor with terrain (the shaft columns keep their own
    // bottom cells). The displaced fluid has nowhere to vent under the
    // corridor ceiling and clamps away as the sealed cells settle.
    let voxel_size = world.config().voxel_size_m;
    for x in (SHAFT_A + 1)..SHAFT_B {
        world
            .modify_terrain(center(IVec3::new(x, 2, Z), voxel_size), true)
            .unwrap();
    }

    // Drive to rest again, watching the partition invariant on the way.
    let probes: Vec<IVec3> = (2..=28)
        .flat_map(|y| [IVec3::new(SHAFT_A, y, Z), IVec3::new(SHAFT_B, y, Z)])
        .collect();
    let mut ticks = 0;
    for i in 1..=8000 {
        world.tick(DT);
        world.wait_until_quiescent();
        if i % 10 == 0 {
            for &p in &probes {
                assert!(
                    claimants(&world, p) <= 1,
                    "voxel {p} claimed by two components mid-transition"
                );
            }
        }
        if world.is_settled() {
            ticks = i;
            break;
        }
    }
    assert!(ticks > 0, "world still active after the corridor cut");
    println!("split settled after {ticks} ticks");

    assert_eq!(
        world.component_count(),
        2,
        "the cut must leave two independent columns"
    );

    let guard = world.components();
    for (_, c) in guard.iter() {
        assert!(c.settled, "both bodies settled");
        assert!(!c.rebuilding);
        assert!(c.count >= 15, "viable body size, got {}", c.count);
        // The cached cardinality equals the sum of segment lengths.
        assert_eq!(c.count, c.recount());
        // Every member rests on a full, settled cell.
        for (&(x, y), row) in &c.rows {
            for seg in row {
                for z in seg.z_min..=seg.z_max {
                    let below = world.get_voxel_at(IVec3::new(x, y - 1, z));
                    assert!(
                        below.is_full() && below.is_settled(),
                        "member ({x}, {y}, {z}) is not supported"
                    );
                }
            }
        }
    }
    drop(guard);

    // One body per shaft, none spanning the gap.
    let a = world.component_at(IVec3::new(SHAFT_A, 3, Z));
    let b = world.component_at(IVec3::new(SHAFT_B, 3, Z));
    assert!(a.is_some() && b.is_some());
    assert_ne!(a, b, "columns must end up in different components");
    for x in (SHAFT_A + 1)..SHAFT_B {
        let p = IVec3::new(x, 2, Z);
        assert_eq!(claimants(&world, p), 0, "the sealed corridor must be unclaimed");
        let v = world.get_voxel_at(p);
        assert_eq!(v.solid, VMAX);
        assert_eq!(v.fluid, 0, "trapped fluid clamps away on settle");
    }
}
