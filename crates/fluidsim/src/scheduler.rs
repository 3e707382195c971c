//! Tick orchestration.
//!
//! The tick is free-running: `tick` never blocks the calling thread. When the
//! previous tick's jobs are still in flight it returns immediately;
//! otherwise it applies queued external edits, freezes per-block plans and
//! dispatches the job graph onto the rayon pool:
//!
//! step 0 => barrier => step 1 => barrier => step 2 => barrier =>
//! block maintenance => barrier => component jobs.
//!
//! Within a step, blocks run independently and read their neighbours'
//! presented buffers; the only synchronization inside a tick is the barrier
//! (the completion of each `par_iter`). Buffer flips happen serially between
//! barriers, which is what "rebind the neighbour views" amounts to: the next
//! step's tasks resolve the new presented buffer when they start.

use crate::block::Block;
use crate::component::ComponentManager;
use crate::grid::{Direction, Grid, VoxelIndices};
use crate::kernel::{self, Step};
use crate::voxel::{Voxel, VMAX};
use glam::IVec3;
use parking_lot::{Condvar, Mutex, RwLock};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{trace, warn};

/// A queued external write. Edits merge by voxel; the last write wins.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Edit {
    Fluid { viscosity: u8, add: bool },
    Terrain { add: bool },
}

/// Everything the simulation owns, shared between the façade and in-flight
/// jobs.
pub(crate) struct SimWorld {
    pub grid: Grid,
    pub blocks: Vec<Block>,
    pub manager: RwLock<ComponentManager>,
    pub pending: Mutex<FxHashMap<VoxelIndices, Edit>>,
    /// Chunks whose fluid settled last tick; the application drains this to
    /// refresh meshes.
    pub settled_chunks: Mutex<Vec<(u32, u16)>>,
    in_flight: Mutex<bool>,
    done: Condvar,
}

impl SimWorld {
    pub fn new(grid: Grid, blocks: Vec<Block>) -> Self {
        let max_intake = grid.voxels_per_chunk();
        Self {
            grid,
            blocks,
            manager: RwLock::new(ComponentManager::new(max_intake)),
            pending: Mutex::new(FxHashMap::default()),
            settled_chunks: Mutex::new(Vec::new()),
            in_flight: Mutex::new(false),
            done: Condvar::new(),
        }
    }

    // --- job lifecycle ------------------------------------------------------

    fn try_begin(&self) -> bool {
        let mut flying = self.in_flight.lock();
        if *flying {
            false
        } else {
            *flying = true;
            true
        }
    }

    fn finish(&self) {
        let mut flying = self.in_flight.lock();
        *flying = false;
        self.done.notify_all();
    }

    pub fn is_idle(&self) -> bool {
        !*self.in_flight.lock()
    }

    /// Block until every outstanding job has drained.
    pub fn wait_until_quiescent(&self) {
        let mut flying = self.in_flight.lock();
        while *flying {
            self.done.wait(&mut flying);
        }
    }

    /// Nothing dirty, nothing queued, every component at rest.
    pub fn is_settled(&self) -> bool {
        if !self.is_idle() || !self.pending.lock().is_empty() {
            return false;
        }
        for b in &self.blocks {
            if !b.unsettled.lock().is_empty() || b.has_plan() {
                return false;
            }
        }
        self.manager.read().all_settled()
    }

    // --- tick ---------------------------------------------------------------

    pub fn tick(self: &Arc<Self>, dt: f32) {
        if !self.try_begin() {
            trace!("previous tick still in flight, skipping");
            return;
        }

        self.apply_pending();

        let mut planned = 0usize;
        for b in &self.blocks {
            match b.plan_tick() {
                Ok(settled) => {
                    if !settled.is_empty() {
                        let mut out = self.settled_chunks.lock();
                        out.extend(settled.into_iter().map(|c| (b.id, c)));
                    }
                    if b.has_plan() {
                        planned += 1;
                    }
                }
                Err(e) => warn!(block = b.id, error = %e, "skipping block this tick"),
            }
        }

        if planned == 0 && !self.manager.read().has_work() {
            self.finish();
            return;
        }

        trace!(planned, "dispatching simulation tick");
        let world = Arc::clone(self);
        rayon::spawn(move || {
            world.run_jobs(dt);
            world.finish();
        });
    }

    fn run_jobs(&self, dt: f32) {
        for step in Step::ORDER {
            self.blocks
                .par_iter()
                .for_each(|b| kernel::run_step(&self.grid, &self.blocks, b, step));
            // Present the freshly written buffers; serial, between barriers.
            for b in &self.blocks {
                if b.has_plan() {
                    b.flip();
                }
            }
        }

        self.blocks.par_iter().for_each(|b| self.block_maintenance(b));

        let mut manager = self.manager.write();
        manager.tick(self, dt);
    }

    /// Route the kernel outputs: dirty chunks into their owning blocks,
    /// just-settled fluid into the component intake.
    fn block_maintenance(&self, block: &Block) {
        let routed: Vec<(u32, u16)> = block.to_unsettle.lock().drain().collect();
        for (owner, chunk) in routed {
            self.blocks[owner as usize].unsettle_chunk(chunk);
        }

        let settled: Vec<VoxelIndices> = std::mem::take(&mut *block.to_process.lock());
        if !settled.is_empty() {
            self.manager.read().intake.lock().extend(settled);
        }
    }

    // --- pending edits ------------------------------------------------------

    /// Drain the merged edit map into the presented buffers. Runs only
    /// between ticks, when no job can race the write locks.
    fn apply_pending(&self) {
        let mut edits: Vec<(VoxelIndices, Edit)> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if edits.is_empty() {
            return;
        }
        edits.sort_unstable_by_key(|(idx, _)| (idx.block, idx.chunk, idx.voxel));

        let mut rebuilds: FxHashSet<usize> = FxHashSet::default();
        for (idx, edit) in edits {
            let cell = self.voxel(idx);
            if !cell.is_valid() {
                continue; // border sentinels are not editable
            }

            // Terrain edits and fluid subtraction may change a body's
            // topology: every component touching the edited cell or a face
            // neighbour gets rebuilt.
            let suspect = matches!(
                edit,
                Edit::Terrain { .. } | Edit::Fluid { add: false, .. }
            );
            if suspect {
                let p = self.grid.world_pos(idx);
                let manager = self.manager.read();
                for probe in std::iter::once(p).chain(Direction::ALL.map(|d| p + d.offset())) {
                    if let Some(id) = manager.get_component(probe) {
                        rebuilds.insert(id);
                    }
                }
            }

            self.write_voxel_at_indices(idx, |cell| match edit {
                Edit::Fluid { viscosity, add: true } => {
                    cell.fluid = VMAX;
                    cell.viscosity = viscosity;
                    cell.unsettle(VMAX as i32);
                }
                Edit::Fluid { add: false, .. } => {
                    let had = cell.fluid as i32;
                    cell.fluid = 0;
                    cell.viscosity = 0;
                    cell.unsettle(had.max(1));
                }
                Edit::Terrain { add: true } => {
                    cell.solid = VMAX;
                    cell.unsettle(VMAX as i32);
                }
                Edit::Terrain { add: false } => {
                    let had = cell.solid as i32;
                    cell.solid = 0;
                    cell.unsettle(had.max(1));
                }
            });
            self.wake_chunk(idx);
        }

        if !rebuilds.is_empty() {
            let mut manager = self.manager.write();
            for id in rebuilds {
                manager.mark_for_rebuild(id);
            }
        }
    }

    // --- voxel access -------------------------------------------------------

    /// Snapshot a voxel by block-local address.
    pub fn voxel(&self, idx: VoxelIndices) -> Voxel {
        self.blocks[idx.block as usize].voxel(&self.grid, idx.chunk, idx.voxel)
    }

    /// Snapshot a voxel by world position. Outside the world this is the
    /// invalid sentinel, same as the border frame.
    pub fn voxel_at(&self, p: IVec3) -> Voxel {
        match self.grid.voxel_at(p) {
            Some(idx) => self.voxel(idx),
            None => Voxel::INVALID,
        }
    }

    /// Mutate a voxel in its block's presented buffer.
    pub fn write_voxel_at_indices(&self, idx: VoxelIndices, f: impl FnOnce(&mut Voxel)) {
        self.blocks[idx.block as usize].with_voxel_mut(&self.grid, idx.chunk, idx.voxel, f);
    }

    /// Mutate a voxel by world position; no-op outside the world.
    pub fn write_voxel_at(&self, p: IVec3, f: impl FnOnce(&mut Voxel)) {
        if let Some(idx) = self.grid.voxel_at(p) {
            self.write_voxel_at_indices(idx, f);
        }
    }

    /// Mark the voxel's chunk dirty, plus the adjacent chunk for every chunk
    /// face the voxel sits on, so mirrored boundary transfers always run.
    pub fn wake_chunk(&self, idx: VoxelIndices) {
        let block = &self.blocks[idx.block as usize];
        block.unsettle_chunk(idx.chunk);

        let k = self.grid.chunk_size;
        let vc = self.grid.voxel_coords(idx.voxel);
        let meta = &block.chunks[idx.chunk as usize];
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
                if let Some((owner, chunk)) = meta.neighbors[dir.index()] {
                    self.blocks[owner as usize].unsettle_chunk(chunk);
                }
            }
        }
    }

    /// [`SimWorld::wake_chunk`] by world position; no-op outside the world.
    pub fn wake_chunk_at(&self, p: IVec3) {
        if let Some(idx) = self.grid.voxel_at(p) {
            self.wake_chunk(idx);
        }
    }

    /// Sum of fluid over all presented buffers.
    pub fn total_fluid(&self) -> u64 {
        self.blocks.iter().map(|b| b.total_fluid()).sum()
    }
}
