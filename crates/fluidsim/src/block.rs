//! Per-block simulation data.
//!
//! A block owns two equally sized voxel buffers. During a kernel step the
//! block's task writes the inactive buffer while everyone (itself and its
//! neighbours) reads the active one; the scheduler flips the active index
//! between step barriers. Nothing here pins pointers: readers resolve the
//! active buffer at step start, which is exactly the "rebind neighbour
//! views" of the tick protocol.

use crate::chunk::Chunk;
use crate::error::SimError;
use crate::grid::{Grid, VoxelIndices};
use crate::voxel::Voxel;
use glam::UVec3;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type VoxelBuf = Box<[Voxel]>;

/// The simulation unit: M³ chunks, double-buffered voxel storage, dirty-chunk
/// bookkeeping and the per-tick kernel outputs.
pub struct Block {
    /// Linear id within the world.
    pub id: u32,
    /// Position on the block lattice.
    pub pos: UVec3,
    /// Chunk metadata, indexed by chunk id.
    pub chunks: Vec<Chunk>,
    /// Neighbouring block ids, indexed by `Direction::index()`.
    pub neighbors: [Option<u32>; 6],

    bufs: [RwLock<VoxelBuf>; 2],
    active: AtomicUsize,

    /// Incoming dirty set, mutated concurrently by maintenance tasks and by
    /// external writes between ticks.
    pub unsettled: Mutex<FxHashSet<u16>>,
    /// Frozen plan for the current tick.
    pub plan: Mutex<Vec<u16>>,
    /// Kernel output: chunks (own or neighbouring block's) that must be dirty
    /// next tick.
    pub to_unsettle: Mutex<FxHashSet<(u32, u16)>>,
    /// Kernel output: voxels whose fluid just settled, bound for the
    /// component manager.
    pub to_process: Mutex<Vec<VoxelIndices>>,
}

impl Block {
    /// Allocate a block worth of voxels (twice, for the two buffers).
    /// Allocation failure maps to `ResourceExhausted` instead of aborting.
    pub fn new(grid: &Grid, id: u32) -> Result<Block, SimError> {
        let len = grid.voxels_per_block();
        let alloc = |what: &str| -> Result<Vec<Voxel>, SimError> {
            let mut v: Vec<Voxel> = Vec::new();
            v.try_reserve_exact(len).map_err(|e| {
                SimError::ResourceExhausted(format!("block {id} {what} buffer: {e}"))
            })?;
            v.resize(len, Voxel::air());
            Ok(v)
        };

        let pos = grid.block_pos(id);
        let mut chunks = Vec::with_capacity(grid.chunks_per_block());
        for c in 0..grid.chunks_per_block() as u16 {
            chunks.push(Chunk::new(c, grid.chunk_origin(id, c)));
        }

        // The world's outermost voxel shell is a sentinel frame: walls the
        // kernel never simulates and transfers never cross.
        let mut front = alloc("read")?;
        for chunk in 0..grid.chunks_per_block() as u16 {
            let origin = grid.chunk_origin(id, chunk);
            for voxel in 0..grid.voxels_per_chunk() as u16 {
                let p = origin + grid.voxel_coords(voxel).as_ivec3();
                if grid.is_border(p) {
                    front[grid.buffer_index(chunk, voxel)] = Voxel::INVALID;
                }
            }
        }
        let mut back = alloc("write")?;
        back.copy_from_slice(&front);

        Ok(Block {
            id,
            pos,
            chunks,
            neighbors: [None; 6],
            bufs: [
                RwLock::new(front.into_boxed_slice()),
                RwLock::new(back.into_boxed_slice()),
            ],
            active: AtomicUsize::new(0),
            unsettled: Mutex::new(FxHashSet::default()),
            plan: Mutex::new(Vec::new()),
            to_unsettle: Mutex::new(FxHashSet::default()),
            to_process: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Read view of the buffer the block is currently presenting.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, VoxelBuf> {
        self.bufs[self.active_index()].read()
    }

    /// Write access to the inactive buffer. Only the block's own step task
    /// takes this during a step, so it never contends.
    #[inline]
    pub fn write_inactive(&self) -> RwLockWriteGuard<'_, VoxelBuf> {
        self.bufs[self.active_index() ^ 1].write()
    }

    /// Write access to the *active* buffer, for external edits and component
    /// updates between steps.
    #[inline]
    pub fn write_active(&self) -> RwLockWriteGuard<'_, VoxelBuf> {
        self.bufs[self.active_index()].write()
    }

    /// Present the freshly written buffer. Called by the scheduler between
    /// step barriers, never concurrently with step tasks.
    pub fn flip(&self) {
        self.active.fetch_xor(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn has_plan(&self) -> bool {
        !self.plan.lock().is_empty()
    }

    /// Add a chunk to the incoming dirty set. Idempotent.
    pub fn unsettle_chunk(&self, chunk: u16) {
        self.unsettled.lock().insert(chunk);
    }

    /// Freeze the incoming dirty set into this tick's plan.
    ///
    /// Returns the chunks that were simulated last tick but did not come back
    /// dirty: they just settled and their meshes want a rebuild. On
    /// allocation failure the dirty set is left untouched so the block simply
    /// retries next tick.
    pub fn plan_tick(&self) -> Result<Vec<u16>, SimError> {
        let mut incoming = self.unsettled.lock();
        let mut plan = self.plan.lock();

        let mut settled: Vec<u16> = plan
            .iter()
            .copied()
            .filter(|c| !incoming.contains(c))
            .collect();
        settled.sort_unstable();

        let mut next: Vec<u16> = Vec::new();
        next.try_reserve_exact(incoming.len()).map_err(|e| {
            SimError::ResourceExhausted(format!("block {} plan: {e}", self.id))
        })?;
        next.extend(incoming.drain());
        next.sort_unstable();
        *plan = next;

        Ok(settled)
    }

    /// Snapshot one voxel from the presented buffer.
    #[inline]
    pub fn voxel(&self, grid: &Grid, chunk: u16, voxel: u16) -> Voxel {
        self.read()[grid.buffer_index(chunk, voxel)]
    }

    /// Mutate one voxel in the presented buffer.
    pub fn with_voxel_mut<R>(
        &self,
        grid: &Grid,
        chunk: u16,
        voxel: u16,
        f: impl FnOnce(&mut Voxel) -> R,
    ) -> R {
        let mut buf = self.write_active();
        f(&mut buf[grid.buffer_index(chunk, voxel)])
    }

    /// Sum of fluid over the presented buffer.
    pub fn total_fluid(&self) -> u64 {
        self.read().iter().map(|v| v.fluid as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn plan_reports_settled_chunks() {
        let grid = Grid::new(&SimConfig::default()).unwrap();
        let block = Block::new(&grid, 0).unwrap();

        block.unsettle_chunk(1);
        block.unsettle_chunk(3);
        let settled = block.plan_tick().unwrap();
        assert!(settled.is_empty());
        assert_eq!(*block.plan.lock(), vec![1, 3]);

        // Chunk 3 comes back dirty, chunk 1 does not: 1 just settled.
        block.unsettle_chunk(3);
        let settled = block.plan_tick().unwrap();
        assert_eq!(settled, vec![1]);
        assert_eq!(*block.plan.lock(), vec![3]);
    }

    #[test]
    fn flip_swaps_presented_buffer() {
        let grid = Grid::new(&SimConfig::default()).unwrap();
        let block = Block::new(&grid, 0).unwrap();

        {
            let mut w = block.write_inactive();
            w[0].fluid = 42;
        }
        assert_eq!(block.read()[0].fluid, 0);
        block.flip();
        assert_eq!(block.read()[0].fluid, 42);
    }
}
