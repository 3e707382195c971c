//! Façade contract tests: configuration validation, bounds behaviour, queued
//! edits and the snapshot codec.

use fluidsim::{FluidType, SimConfig, SimError, Voxel, World, VMAX};
use glam::{IVec3, Vec3};

const DT: f32 = 1.0 / 60.0;
const WATER: u8 = 255;

fn small_config() -> SimConfig {
    SimConfig {
        size_blocks: (1, 1, 1),
        ..SimConfig::default()
    }
}

#[test]
fn rejects_bad_configuration() {
    let mut cfg = small_config();
    cfg.chunk_size = 12;
    assert!(matches!(World::new(cfg), Err(SimError::InvalidConfig(_))));

    let mut cfg = small_config();
    cfg.size_blocks = (0, 1, 1);
    assert!(matches!(World::new(cfg), Err(SimError::InvalidConfig(_))));

    let mut cfg = small_config();
    cfg.fluid_types.push(FluidType::new("ghost", 0));
    assert!(matches!(World::new(cfg), Err(SimError::InvalidConfig(_))));
}

#[test]
fn unknown_fluid_is_rejected_at_the_api() {
    let world = World::new(small_config()).unwrap();
    let err = world.modify_fluid(Vec3::splat(2.0), 77, true);
    assert!(matches!(err, Err(SimError::InvalidConfig(_))));
    // Removal does not need a registered kind.
    assert!(world.modify_fluid(Vec3::splat(2.0), 77, false).is_ok());
}

#[test]
fn reads_outside_the_world_are_invalid_not_errors() {
    let world = World::new(small_config()).unwrap();

    let outside = world.get_voxel(Vec3::new(-10.0, 0.0, 0.0));
    assert!(!outside.is_valid());

    let border = world.get_voxel_at(IVec3::new(0, 5, 5));
    assert!(!border.is_valid(), "border frame is the invalid sentinel");

    // Bad indices are API errors.
    let bad = fluidsim::VoxelIndices {
        block: 99,
        chunk: 0,
        voxel: 0,
    };
    assert!(matches!(
        world.get_voxel_by_indices(bad),
        Err(SimError::OutOfBounds(_))
    ));
    assert!(matches!(
        world.unsettle_chunk(0, 9999),
        Err(SimError::OutOfBounds(_))
    ));

    // Edits outside the world are API errors too.
    assert!(matches!(
        world.modify_terrain(Vec3::new(-10.0, 0.0, 0.0), true),
        Err(SimError::OutOfBounds(_))
    ));
}

#[test]
fn queued_edits_merge_and_the_last_write_wins() {
    let world = World::new(small_config()).unwrap();
    let point = Vec3::new(4.0, 4.0, 4.0);
    let p = IVec3::new(8, 8, 8); // voxel_size 0.5

    world.modify_fluid(point, WATER, true).unwrap();
    world.modify_fluid(point, WATER, false).unwrap();
    world.modify_terrain(point, true).unwrap();

    world.tick(DT);
    world.wait_until_quiescent();

    let v = world.get_voxel_at(p);
    assert_eq!(v.solid, VMAX, "the last queued edit must win");
    assert_eq!(v.fluid, 0);
}

#[test]
fn border_edits_are_ignored() {
    let world = World::new(small_config()).unwrap();
    // (0.1, 0.1, 0.1) lands in the sentinel frame.
    world.modify_terrain(Vec3::splat(0.1), true).unwrap();
    world.tick(DT);
    world.wait_until_quiescent();
    let v = world.get_voxel_at(IVec3::new(0, 0, 0));
    assert!(!v.is_valid());
    assert_eq!(v.solid, 0, "sentinels stay untouched");
}

#[test]
fn snapshot_round_trip() {
    let world = World::new(small_config()).unwrap();
    for x in 1..15 {
        for z in 1..15 {
            let idx = world.grid().voxel_at(IVec3::new(x, 1, z)).unwrap();
            world.set_voxel(idx, Voxel::terrain()).unwrap();
        }
    }
    world.modify_fluid(Vec3::new(4.0, 3.0, 4.0), WATER, true).unwrap();
    for _ in 0..120 {
        world.tick(DT);
        world.wait_until_quiescent();
        if world.is_settled() {
            break;
        }
    }

    let bytes = world.save_state().unwrap();
    let total = world.total_fluid();

    let restored = World::new(small_config()).unwrap();
    restored.load_state(&bytes).unwrap();
    assert_eq!(restored.total_fluid(), total);
    for p in [IVec3::new(8, 6, 8), IVec3::new(8, 2, 8), IVec3::new(4, 1, 4)] {
        assert_eq!(
            world.get_voxel_at(p).fluid,
            restored.get_voxel_at(p).fluid,
            "voxel mismatch at {p}"
        );
        assert_eq!(world.get_voxel_at(p).solid, restored.get_voxel_at(p).solid);
    }

    // The restored fluid re-settles and regroups without help.
    for _ in 0..300 {
        restored.tick(DT);
        restored.wait_until_quiescent();
        if restored.is_settled() {
            break;
        }
    }
    assert!(restored.is_settled());

    // A differently shaped world refuses the snapshot.
    let other = World::new(SimConfig {
        size_blocks: (2, 1, 1),
        ..SimConfig::default()
    })
    .unwrap();
    assert!(matches!(
        other.load_state(&bytes),
        Err(SimError::InvalidConfig(_))
    ));

    // Garbage refuses too.
    assert!(matches!(
        restored.load_state(&bytes[..10]),
        Err(SimError::InvalidConfig(_))
    ));
}
