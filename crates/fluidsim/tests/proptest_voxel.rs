//! Property tests over the cell model and the addressing math.
//!
//! The settle counter is an activity integrator, not a clock: the properties
//! assert monotone decay in a static cell and saturation under activity,
//! never specific rates.

use fluidsim::{Direction, Grid, SimConfig, Voxel, EPSILON, VMAX};
use glam::IVec3;
use proptest::prelude::*;

fn grid() -> Grid {
    Grid::new(&SimConfig::default()).unwrap()
}

proptest! {
    #[test]
    fn settle_restores_rest_invariants(
        solid in 0u8..=VMAX,
        fluid in 0u8..=255u8,
        viscosity in 1u8..=255u8,
    ) {
        let mut v = Voxel::air();
        v.solid = solid;
        v.fluid = fluid;
        v.viscosity = if fluid > 0 { viscosity } else { 0 };
        let overflowed = v.current_volume() > VMAX as i32;
        v.unsettle(fluid as i32 + 1);

        v.settle();

        prop_assert!(v.is_settled());
        prop_assert!(v.current_volume() <= VMAX as i32);
        prop_assert_eq!(v.settle_counter, 0);
        // viscosity tags exist exactly where fluid does
        prop_assert_eq!(v.viscosity > 0, v.fluid > 0);
        // dust elimination: small fluid without overflow is gone
        if fluid <= EPSILON && !overflowed {
            prop_assert_eq!(v.fluid, 0);
        }
    }

    #[test]
    fn settle_counter_decays_monotonically(
        start in 0u16..=u16::MAX,
        viscosity in 0u8..=255u8,
        steps in 1usize..64,
    ) {
        let mut v = Voxel::air();
        v.solid = VMAX; // not pure air, so decay does not shortcut to settle
        v.fluid = 0;
        v.viscosity = viscosity;
        v.unsettle(0);
        v.settle_counter = start;

        let mut prev = v.settle_counter;
        for _ in 0..steps {
            v.decrease_settle();
            prop_assert!(v.settle_counter <= prev, "counter may never grow during decay");
            prev = v.settle_counter;
        }
    }

    #[test]
    fn unsettle_accumulates_and_saturates(
        deltas in proptest::collection::vec(-300i32..300, 1..20),
    ) {
        let mut v = Voxel::air();
        let mut prev = 0u16;
        for d in deltas {
            v.unsettle(d);
            prop_assert!(!v.is_settled());
            prop_assert!(v.settle_counter >= prev, "activity only adds evidence");
            prev = v.settle_counter;
        }
        v.unsettle(i32::MAX);
        prop_assert_eq!(v.settle_counter, u16::MAX, "saturates instead of wrapping");
    }

    #[test]
    fn world_addressing_round_trips(
        x in 0i32..64,
        y in 0i32..32,
        z in 0i32..64,
    ) {
        let g = grid();
        let idx = g.voxel_at(IVec3::new(x, y, z)).expect("inside world");
        prop_assert_eq!(g.world_pos(idx), IVec3::new(x, y, z));
    }

    #[test]
    fn neighbour_fast_path_matches_division(
        chunk in 0u16..8,
        voxel in 0u16..512,
        dir in 0usize..6,
    ) {
        let g = grid();
        let dir = Direction::ALL[dir];
        prop_assert_eq!(g.neighbour(chunk, voxel, dir), g.neighbour_slow(chunk, voxel, dir));
    }

    #[test]
    fn neighbour_steps_are_inverse(
        chunk in 0u16..8,
        voxel in 0u16..512,
        dir in 0usize..6,
    ) {
        let g = grid();
        let dir = Direction::ALL[dir];
        let (nc, nv, crossed) = g.neighbour(chunk, voxel, dir);
        let (bc, bv, crossed_back) = g.neighbour(nc, nv, dir.opposite());
        prop_assert_eq!((bc, bv), (chunk, voxel), "stepping back must return home");
        prop_assert_eq!(crossed, crossed_back);
    }
}
