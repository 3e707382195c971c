//! Public façade of the simulation engine.
//!
//! The surrounding application talks to [`World`]: it queues fluid/terrain
//! edits, drives ticks, reads voxel snapshots and drains the settled-chunk
//! list for mesh rebuilds. Everything heavier lives behind the scheduler.

use crate::block::Block;
use crate::component::Aabb;
use crate::config::SimConfig;
use crate::error::SimError;
use crate::grid::{Direction, Grid, VoxelIndices};
use crate::persist;
use crate::scheduler::{Edit, SimWorld};
use crate::voxel::Voxel;
use glam::{IVec3, Vec3};
use std::sync::Arc;

/// Read-only summary of one fluid component.
#[derive(Clone, Debug)]
pub struct ComponentStats {
    pub count: u32,
    pub bounds: Aabb,
    pub water_level: i32,
    pub viscosity: u8,
    pub settled: bool,
    pub rebuilding: bool,
    pub outlet_count: usize,
}

/// A fluid simulation world: blocks of chunks of voxels, plus the component
/// tracker. Cheap to clone handles are not provided on purpose; the owner
/// drives ticks and teardown.
pub struct World {
    inner: Arc<SimWorld>,
    config: SimConfig,
}

impl World {
    /// Allocate the world, wire neighbour pointers and establish the border
    /// sentinel frame.
    pub fn new(config: SimConfig) -> Result<World, SimError> {
        let grid = Grid::new(&config)?;

        let mut blocks = Vec::with_capacity(grid.block_count());
        for id in 0..grid.block_count() as u32 {
            blocks.push(Block::new(&grid, id)?);
        }

        // Block-level neighbour pointers.
        for block in blocks.iter_mut() {
            for dir in Direction::ALL {
                block.neighbors[dir.index()] = grid.block_neighbor(block.id, dir);
            }
        }

        // Chunk-level links, possibly crossing into a neighbour block.
        let m = grid.block_chunks;
        for block in blocks.iter_mut() {
            for chunk in 0..grid.chunks_per_block() as u16 {
                for dir in Direction::ALL {
                    let c = grid.chunk_coords(chunk).as_ivec3() + dir.offset();
                    let link = if c.min_element() >= 0 && c.max_element() < m as i32 {
                        Some((block.id, grid.chunk_id(c.as_uvec3())))
                    } else {
                        let wrapped = c.rem_euclid(IVec3::splat(m as i32)).as_uvec3();
                        grid.block_neighbor(block.id, dir)
                            .map(|nb| (nb, grid.chunk_id(wrapped)))
                    };
                    block.chunks[chunk as usize].neighbors[dir.index()] = link;
                }
            }
        }

        Ok(World {
            inner: Arc::new(SimWorld::new(grid, blocks)),
            config,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.inner.grid
    }

    // --- reads --------------------------------------------------------------

    /// Voxel snapshot at a metric position. Outside the world (or on the
    /// border frame) this is the documented invalid voxel, not an error.
    /// Safe between ticks; between steps it reads the step-boundary buffer.
    pub fn get_voxel(&self, pos: Vec3) -> Voxel {
        match self.inner.grid.world_to_voxel(pos) {
            Some(idx) => self.inner.voxel(idx),
            None => Voxel::INVALID,
        }
    }

    /// Voxel snapshot at integer world coordinates.
    pub fn get_voxel_at(&self, p: IVec3) -> Voxel {
        self.inner.voxel_at(p)
    }

    /// Voxel snapshot by block-local address; bad indices are an error.
    pub fn get_voxel_by_indices(&self, idx: VoxelIndices) -> Result<Voxel, SimError> {
        self.check_indices(idx)?;
        Ok(self.inner.voxel(idx))
    }

    /// Sum of fluid over the whole world, for diagnostics and HUDs.
    pub fn total_fluid(&self) -> u64 {
        self.inner.total_fluid()
    }

    // --- queued edits -------------------------------------------------------

    /// Queue pouring (or removing) one cell of fluid. Applied during the next
    /// pre-tick drain; multiple writes to one cell merge, later wins.
    pub fn modify_fluid(&self, point: Vec3, viscosity: u8, add: bool) -> Result<(), SimError> {
        if add && self.config.fluid_by_viscosity(viscosity).is_none() {
            return Err(SimError::InvalidConfig(format!(
                "unknown fluid viscosity {viscosity}"
            )));
        }
        self.queue(point, Edit::Fluid { viscosity, add })
    }

    /// Queue adding or carving terrain.
    pub fn modify_terrain(&self, point: Vec3, add: bool) -> Result<(), SimError> {
        self.queue(point, Edit::Terrain { add })
    }

    /// Queue carving terrain; alias for `modify_terrain(point, false)`.
    pub fn remove_terrain(&self, point: Vec3) -> Result<(), SimError> {
        self.modify_terrain(point, false)
    }

    fn queue(&self, point: Vec3, edit: Edit) -> Result<(), SimError> {
        let idx = self
            .inner
            .grid
            .world_to_voxel(point)
            .ok_or_else(|| SimError::OutOfBounds(format!("edit at {point} outside the world")))?;
        self.inner.pending.lock().insert(idx, edit);
        Ok(())
    }

    /// Idempotent addition to a block's dirty set.
    pub fn unsettle_chunk(&self, block: u32, chunk: u16) -> Result<(), SimError> {
        let grid = &self.inner.grid;
        if block as usize >= self.inner.blocks.len() || chunk as usize >= grid.chunks_per_block() {
            return Err(SimError::OutOfBounds(format!(
                "chunk {chunk} of block {block}"
            )));
        }
        self.inner.blocks[block as usize].unsettle_chunk(chunk);
        Ok(())
    }

    /// Immediate cell write, for world construction and tools that already
    /// hold the simulation drained. Fails with `Conflict` while jobs are in
    /// flight.
    pub fn set_voxel(&self, idx: VoxelIndices, voxel: Voxel) -> Result<(), SimError> {
        self.check_indices(idx)?;
        if !self.inner.is_idle() {
            return Err(SimError::Conflict("set_voxel while jobs are in flight"));
        }
        if !self.inner.voxel(idx).is_valid() {
            return Ok(()); // border sentinels stay walls
        }
        self.inner.write_voxel_at_indices(idx, |cell| *cell = voxel);
        self.inner.wake_chunk(idx);
        Ok(())
    }

    // --- driving ------------------------------------------------------------

    /// Advance the simulation. Non-blocking: while the previous tick's jobs
    /// are still in flight this returns immediately.
    pub fn tick(&self, dt: f32) {
        self.inner.tick(dt);
    }

    /// Block until every outstanding job has drained.
    pub fn wait_until_quiescent(&self) {
        self.inner.wait_until_quiescent();
    }

    /// True when no job is in flight.
    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// True when nothing in the world wants simulation: no dirty chunks, no
    /// queued edits, every component at rest.
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }

    /// Chunks whose fluid settled last tick; the application refreshes their
    /// meshes. Draining is destructive.
    pub fn drain_settled_chunks(&self) -> Vec<(u32, u16)> {
        std::mem::take(&mut *self.inner.settled_chunks.lock())
    }

    // --- components ---------------------------------------------------------

    /// Component claiming the voxel at integer world coordinates, if any.
    pub fn component_at(&self, p: IVec3) -> Option<usize> {
        self.inner.manager.read().get_component(p)
    }

    pub fn component_stats(&self, id: usize) -> Option<ComponentStats> {
        let manager = self.inner.manager.read();
        manager.component(id).map(|c| ComponentStats {
            count: c.count,
            bounds: c.bounds,
            water_level: c.water_level,
            viscosity: c.viscosity,
            settled: c.settled,
            rebuilding: c.rebuilding,
            outlet_count: c.outlets.len(),
        })
    }

    pub fn component_count(&self) -> usize {
        self.inner.manager.read().len()
    }

    /// Read access to the component tracker, for listings and invariant
    /// checks. Holding the guard blocks the component phase of the next tick;
    /// keep it short.
    pub fn components(&self) -> parking_lot::RwLockReadGuard<'_, crate::component::ComponentManager> {
        self.inner.manager.read()
    }

    /// Force a component to rebuild from a single seed voxel on the next
    /// maintenance pass. Terrain edits and fluid removal do this on their
    /// own; the call is for tools that mutate the world behind the engine's
    /// back.
    pub fn mark_component_for_rebuild(&self, id: usize) {
        self.inner.manager.write().mark_for_rebuild(id);
    }

    // --- persistence --------------------------------------------------------

    /// Serialize the world's voxel state into the flat 6-byte-per-voxel block
    /// layout. Requires the simulation to be drained.
    pub fn save_state(&self) -> Result<Vec<u8>, SimError> {
        if !self.inner.is_idle() {
            return Err(SimError::Conflict("save_state while jobs are in flight"));
        }
        Ok(persist::save(&self.inner))
    }

    /// Restore a snapshot produced by [`World::save_state`]. The grid shape
    /// must match; components are rebuilt from the restored fluid.
    pub fn load_state(&self, bytes: &[u8]) -> Result<(), SimError> {
        if !self.inner.is_idle() {
            return Err(SimError::Conflict("load_state while jobs are in flight"));
        }
        persist::load(&self.inner, bytes)
    }

    fn check_indices(&self, idx: VoxelIndices) -> Result<(), SimError> {
        let grid = &self.inner.grid;
        if idx.block as usize >= self.inner.blocks.len()
            || idx.chunk as usize >= grid.chunks_per_block()
            || idx.voxel as usize >= grid.voxels_per_chunk()
        {
            return Err(SimError::OutOfBounds(format!(
                "block {} chunk {} voxel {}",
                idx.block, idx.chunk, idx.voxel
            )));
        }
        Ok(())
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // Jobs are never cancelled mid-flight; teardown drains them first.
        self.inner.wait_until_quiescent();
    }
}
