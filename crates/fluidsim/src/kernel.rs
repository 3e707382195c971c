//! The simulation kernel: the three flow rules.
//!
//! Each tick runs three passes over every planned chunk, in order:
//!
//! 1. **Up** - overflow relief. A cell whose solid+fluid exceeds the resting
//!    ceiling (terrain added under water) vents the excess to the cell above;
//!    symmetrically every cell pulls the excess out of the cell below it.
//! 2. **Down** - gravity. Fluid drops into free volume below and is replaced
//!    by fluid from above.
//! 3. **Sideways** - levelling. Volume differences with the four lateral
//!    neighbours are split by the 1/5 share rule and scaled by viscosity.
//!
//! Every rule is written from the point of view of a single cell and only
//! ever writes that cell; the mirrored half of each exchange happens when the
//! neighbour runs the same rule against its own neighbourhood. The rules are
//! exactly symmetric under that mirroring, so volume is conserved as long as
//! both sides are simulated - which the cross-chunk unsettling at the end of
//! the tick guarantees.
//!
//! All arithmetic is integer on the byte-valued state and saturates; there is
//! no panic path here.

use crate::block::Block;
use crate::grid::{Direction, Grid, VoxelIndices};
use crate::voxel::{Voxel, NEIGHBOR_COUNT};
use rustc_hash::FxHashSet;

/// Lateral split: each neighbour sees 1/5 of a volume difference, leaving a
/// fifth for the cell itself.
const SHARE: i32 = (NEIGHBOR_COUNT - 1) as i32;

/// One pass of the tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
    Sideways,
}

impl Step {
    pub const ORDER: [Step; 3] = [Step::Up, Step::Down, Step::Sideways];
}

/// Run one step of one block's plan.
///
/// Reads the presented buffers of this block and its neighbours, writes this
/// block's inactive buffer. The scheduler flips buffers between steps; during
/// a step every presented buffer is immutable, so the read locks taken here
/// never wait.
pub fn run_step(grid: &Grid, blocks: &[Block], block: &Block, step: Step) {
    let plan = block.plan.lock().clone();
    if plan.is_empty() {
        return;
    }

    let own = block.read();
    let mut write = block.write_inactive();
    write.copy_from_slice(&own[..]);

    // Neighbour views: whichever buffer each adjacent block is presenting
    // right now. Missing blocks read as invalid cells (walls).
    let views: [Option<parking_lot::RwLockReadGuard<'_, crate::block::VoxelBuf>>; 6] =
        std::array::from_fn(|d| block.neighbors[d].map(|id| blocks[id as usize].read()));

    let fetch = |chunk: u16, voxel: u16, dir: Direction| -> Voxel {
        let (nc, nv, crossed) = grid.neighbour(chunk, voxel, dir);
        if !crossed {
            own[grid.buffer_index(nc, nv)]
        } else {
            match &views[dir.index()] {
                Some(buf) => buf[grid.buffer_index(nc, nv)],
                None => Voxel::INVALID,
            }
        }
    };

    let vpc = grid.voxels_per_chunk() as u16;
    let k = grid.chunk_size;
    let sideways = step == Step::Sideways;

    let mut unsettle_out: FxHashSet<(u32, u16)> = FxHashSet::default();
    let mut settled_fluid: Vec<VoxelIndices> = Vec::new();

    for &chunk in &plan {
        for voxel in 0..vpc {
            let cell = own[grid.buffer_index(chunk, voxel)];
            if !cell.is_valid() || cell.is_terrain() {
                continue;
            }

            let nbrs: [Voxel; 6] = std::array::from_fn(|d| fetch(chunk, voxel, Direction::ALL[d]));
            if cell.is_settled() && nbrs.iter().all(|n| n.is_settled()) {
                continue;
            }

            let (delta, incoming_visc) = match step {
                Step::Up => transfer_up(&cell, &nbrs),
                Step::Down => transfer_down(&cell, &nbrs),
                Step::Sideways => transfer_sideways(&cell, &nbrs),
            };

            let mut out = cell;
            // Saturating overflow budget: solid + fluid never exceeds the
            // byte range, even while venting stacked overflow.
            let ceiling = u8::MAX as i32 - cell.solid as i32;
            out.fluid = (cell.fluid as i32 + delta).clamp(0, ceiling) as u8;
            if incoming_visc != 0 {
                out.viscosity = incoming_visc;
            }
            if !out.has_fluid() {
                out.viscosity = 0;
            }

            let diff = out.fluid as i32 - cell.fluid as i32;
            if diff != 0 {
                out.unsettle(diff);
            } else if sideways && !out.is_settled() {
                // A cell inside a falling stream keeps its counter; everything
                // else decays towards rest.
                let falling = nbrs[Direction::Up.index()].has_fluid()
                    && !nbrs[Direction::Down.index()].is_settled();
                if !falling && out.decrease_settle() && out.has_fluid() {
                    settled_fluid.push(VoxelIndices {
                        block: block.id,
                        chunk,
                        voxel,
                    });
                }
            }

            write[grid.buffer_index(chunk, voxel)] = out;

            if sideways && !out.is_settled() {
                unsettle_out.insert((block.id, chunk));
                // Activity on a chunk face wakes the adjacent chunk so the
                // mirrored half of any boundary transfer runs next tick.
                let vc = grid.voxel_coords(voxel);
                let meta = &block.chunks[chunk as usize];
                for dir in Direction::ALL {
                    let on_face = match dir {
                        Direction::Right => vc.x == k - 1,
                        Direction::Left => vc.x == 0,
                        Direction::Up => vc.y == k - 1,
                        Direction::Down => vc.y == 0,
                        Direction::Forward => vc.z == k - 1,
                        Direction::Backward => vc.z == 0,
                    };
                    if on_face {
                        if let Some(link) = meta.neighbors[dir.index()] {
                            unsettle_out.insert(link);
                        }
                    }
                }
            }
        }
    }

    if !unsettle_out.is_empty() {
        block.to_unsettle.lock().extend(unsettle_out);
    }
    if !settled_fluid.is_empty() {
        block.to_process.lock().extend(settled_fluid);
    }
}

/// Step Up: push own overflow to the cell above, pull overflow from the cell
/// below. The arriving fluid keeps the lower cell's viscosity.
fn transfer_up(cell: &Voxel, nbrs: &[Voxel; 6]) -> (i32, u8) {
    let bottom = &nbrs[Direction::Down.index()];
    let top = &nbrs[Direction::Up.index()];

    let pull = if cell.has_compatible_viscosity(bottom) {
        bottom.excess_volume()
    } else {
        0
    };
    // Terrain is skipped by the kernel, so venting into it would destroy
    // volume: the mirrored pull never runs.
    let push = if cell.has_compatible_viscosity(top) && !top.is_terrain() {
        cell.excess_volume()
    } else {
        0
    };

    let visc = if pull > 0 { bottom.viscosity } else { 0 };
    (pull - push, visc)
}

/// Step Down: give fluid to the free volume below, take fluid from above.
fn transfer_down(cell: &Voxel, nbrs: &[Voxel; 6]) -> (i32, u8) {
    let bottom = &nbrs[Direction::Down.index()];
    let top = &nbrs[Direction::Up.index()];

    let out = if cell.has_compatible_viscosity(bottom) {
        (cell.fluid as i32).min(bottom.free_volume())
    } else {
        0
    };
    let inn = if cell.has_compatible_viscosity(top) {
        (top.fluid as i32).min(cell.free_volume())
    } else {
        0
    };

    let visc = if inn > 0 { top.viscosity } else { 0 };
    (inn - out, visc)
}

/// Step Sideways: level volume with the four lateral neighbours.
///
/// The raw exchange with each neighbour is a fifth of the volume difference,
/// capped by a fifth of the giver's fluid. The result is scaled by the moving
/// fluid's viscosity; a nonzero exchange whose scaled value truncates to zero
/// still moves one unit, otherwise strongly viscous fluids would freeze the
/// moment differences drop below their scale factor. Truncation and the
/// one-unit snap are both symmetric under mirroring, so the neighbour
/// computes the exact negation.
fn transfer_sideways(cell: &Voxel, nbrs: &[Voxel; 6]) -> (i32, u8) {
    let mut total = 0i32;
    let mut visc_in = 0u8;

    for dir in Direction::HORIZONTAL {
        let n = &nbrs[dir.index()];
        if !cell.has_compatible_viscosity(n) {
            continue;
        }

        let diff = (cell.current_volume() - n.current_volume()) / SHARE;
        let give = diff.clamp(0, cell.fluid as i32 / SHARE);
        let take = (-diff).clamp(0, n.fluid as i32 / SHARE);
        let t = take - give;
        if t == 0 {
            continue;
        }

        let rate = match if t > 0 { n.viscosity } else { cell.viscosity } {
            0 => u8::MAX as i32,
            r => r as i32,
        };
        let mut scaled = t * rate / u8::MAX as i32;
        if scaled == 0 {
            scaled = t.signum();
        }
        if scaled > 0 && visc_in == 0 {
            visc_in = n.viscosity;
        }
        total += scaled;
    }

    (total, visc_in)
}
