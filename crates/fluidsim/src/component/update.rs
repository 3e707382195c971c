//! Per-component update job: validate membership, maintain the free-surface
//! outlet set, and equalize the surface to imitate pressure.

use super::{FluidComponent, Segment, MAX_VISCOSITY_NOT_EQUALIZE};
use crate::scheduler::SimWorld;
use crate::voxel::VMAX;
use glam::IVec3;
use rustc_hash::FxHashMap;

/// Run one update tick for one component. Counts as the component's settle
/// heartbeat: membership changes add evidence of activity, an unchanged tick
/// decays the counter.
pub(crate) fn run(world: &SimWorld, comp: &mut FluidComponent) {
    let removed = validate_segments(world, comp);
    refresh_outlets(world, comp);
    update_water_level(world, comp);

    if comp.viscosity > MAX_VISCOSITY_NOT_EQUALIZE {
        equalize(world, comp);
    }

    if removed != 0 {
        comp.unsettle(-(removed as i32));
    } else if comp.decrease_settle() {
        comp.recompute_bounds();
    }
}

/// Walk every segment in Z order and evict voxels that stopped being settled
/// fluid on solid support. Eviction splits the run; the still-valid tail is
/// kept as its own segment.
fn validate_segments(world: &SimWorld, comp: &mut FluidComponent) -> u32 {
    let mut keys: Vec<(i32, i32)> = comp.rows.keys().copied().collect();
    keys.sort_unstable();

    let mut removed = 0u32;
    for key in keys {
        let (x, y) = key;
        let Some(old) = comp.rows.remove(&key) else { continue };
        let mut fresh: Vec<Segment> = Vec::new();

        for seg in old {
            let mut run_start: Option<i32> = None;
            for z in seg.z_min..=seg.z_max {
                let p = IVec3::new(x, y, z);
                let v = world.voxel_at(p);
                let below = world.voxel_at(p - IVec3::Y);
                let ok = v.is_settled()
                    && v.has_fluid()
                    && below.is_settled()
                    && below.is_full();
                if ok {
                    run_start.get_or_insert(z);
                } else {
                    if let Some(start) = run_start.take() {
                        fresh.push(Segment { z_min: start, z_max: z - 1 });
                    }
                    removed += 1;
                    // Evicted cells go back to the cellular automaton.
                    world.write_voxel_at(p, |cell| cell.unsettle(cell.fluid.max(1) as i32));
                    world.wake_chunk_at(p);
                }
            }
            if let Some(start) = run_start {
                fresh.push(Segment { z_min: start, z_max: seg.z_max });
            }
        }

        if !fresh.is_empty() {
            comp.rows.insert(key, fresh);
        }
    }

    comp.count = comp.count.saturating_sub(removed);
    debug_assert_eq!(comp.count, comp.recount());
    removed
}

/// Drop outlets that stopped making sense, then gather fresh candidates from
/// the top two populated rows of every x-slice of the component. A partially
/// filled surface cell is its own outlet; a full cell bubbles the outlet one
/// cell up into compatible head room.
fn refresh_outlets(world: &SimWorld, comp: &mut FluidComponent) {
    let grid = &world.grid;
    let water_level = comp.water_level;
    comp.outlets.retain(|&idx| {
        let p = grid.world_pos(idx);
        let v = world.voxel(idx);
        if !v.is_valid() {
            return false;
        }
        if v.is_full() {
            // An outlet is a cell where liquid has room to move up or out; a
            // full cell qualifies only through compatible head room above.
            // Without it (bend bottoms capped by terrain) the cell is plain
            // interior and must not weigh into the surface average.
            let above = world.voxel_at(p + IVec3::Y);
            let head_room = v.has_compatible_viscosity(&above) && !above.is_full();
            return head_room && p.y >= water_level;
        }
        let empty_above = !v.has_fluid() && p.y > water_level;
        !empty_above
    });

    // Two highest populated y-rows per x.
    let mut tops: FxHashMap<i32, [i32; 2]> = FxHashMap::default();
    for &(x, y) in comp.rows.keys() {
        let entry = tops.entry(x).or_insert([i32::MIN, i32::MIN]);
        if y > entry[0] {
            entry[1] = entry[0];
            entry[0] = y;
        } else if y > entry[1] {
            entry[1] = y;
        }
    }

    for (&(x, y), row) in &comp.rows {
        let top = &tops[&x];
        if y != top[0] && y != top[1] {
            continue;
        }
        for seg in row {
            for z in seg.z_min..=seg.z_max {
                let p = IVec3::new(x, y, z);
                let v = world.voxel_at(p);
                if !v.is_settled() || !v.has_fluid() {
                    continue;
                }
                if !v.is_full() {
                    if let Some(idx) = grid.voxel_at(p) {
                        comp.outlets.insert(idx);
                    }
                } else {
                    let above = p + IVec3::Y;
                    let top_v = world.voxel_at(above);
                    if v.has_compatible_viscosity(&top_v) && !top_v.is_full() {
                        if let Some(idx) = grid.voxel_at(above) {
                            comp.outlets.insert(idx);
                        }
                    }
                }
            }
        }
    }
}

/// The water level tracks the lowest outlet. With no outlet left the probe
/// row climbs by one and the next update looks again.
fn update_water_level(world: &SimWorld, comp: &mut FluidComponent) {
    let lowest = comp
        .outlets
        .iter()
        .map(|&idx| world.grid.world_pos(idx).y)
        .min();
    match lowest {
        Some(y) => comp.water_level = y,
        None => comp.water_level += 1,
    }
}

/// Two-pass, approximately volume-preserving redistribution of fluid across
/// the outlets around their mean surface level.
///
/// Give pass: outlets below the mean are filled up to it, the added volume
/// accumulating in a balance. Take pass: outlets above the mean give fluid
/// back, highest first, until the balance is repaid. An outlet that runs dry
/// hands its role to the cell below it, so the surface can keep descending.
fn equalize(world: &SimWorld, comp: &mut FluidComponent) {
    let grid = &world.grid;
    let viscosity = comp.viscosity;

    struct Outlet {
        idx: crate::grid::VoxelIndices,
        pos: IVec3,
        fluid: i32,
        solid: i32,
    }
    let mut outlets: Vec<Outlet> = comp
        .outlets
        .iter()
        .map(|&idx| {
            let pos = grid.world_pos(idx);
            let v = world.voxel(idx);
            Outlet {
                idx,
                pos,
                fluid: v.fluid as i32,
                solid: v.solid as i32,
            }
        })
        .collect();
    if outlets.len() < 2 {
        return;
    }

    let level = |o: &Outlet| o.pos.y as i64 * VMAX as i64 + o.fluid as i64;
    let min = outlets.iter().map(&level).min().unwrap_or(0);
    let max = outlets.iter().map(&level).max().unwrap_or(0);
    if max - min < (VMAX / 2) as i64 {
        return;
    }

    let avg = outlets.iter().map(&level).sum::<i64>() / outlets.len() as i64;
    outlets.sort_unstable_by_key(|o| (level(o), o.pos.x, o.pos.z));

    let write = |world: &SimWorld, o: &Outlet, fluid: i32| {
        world.write_voxel_at_indices(o.idx, |cell| {
            let old = cell.fluid as i32;
            cell.fluid = fluid as u8;
            cell.viscosity = if fluid > 0 { viscosity } else { 0 };
            cell.unsettle(fluid - old);
        });
        world.wake_chunk(o.idx);
    };

    // Give pass: raise everything below the mean.
    let mut balance: i64 = 0;
    for o in outlets.iter_mut() {
        if level(o) >= avg {
            continue;
        }
        let target =
            (avg - o.pos.y as i64 * VMAX as i64).clamp(0, (VMAX as i64 - o.solid as i64).max(0)) as i32;
        if target > o.fluid {
            balance += (target - o.fluid) as i64;
            write(world, o, target);
            o.fluid = target;
        }
    }

    // Take pass: repay the balance from the highest outlets down.
    let mut descended: Vec<crate::grid::VoxelIndices> = Vec::new();
    for o in outlets.iter_mut().rev() {
        if balance <= 0 {
            break;
        }
        if level(o) <= avg {
            continue;
        }
        let target =
            (avg - o.pos.y as i64 * VMAX as i64).clamp(0, (VMAX as i64 - o.solid as i64).max(0)) as i32;
        let available = o.fluid - target;
        if available <= 0 {
            continue;
        }
        let take = available.min(balance.min(i32::MAX as i64) as i32);
        let remaining = o.fluid - take;
        balance -= take as i64;
        write(world, o, remaining);
        o.fluid = remaining;
        if remaining == 0 {
            if let Some(idx) = grid.voxel_at(o.pos - IVec3::Y) {
                descended.push(idx);
            }
        }
    }

    comp.outlets.extend(descended);
}
