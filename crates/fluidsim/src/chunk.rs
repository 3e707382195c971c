//! Chunk bookkeeping.
//!
//! Voxel storage lives in the block's packed buffers; a chunk is the
//! dirty-tracking and mesh-rebuild unit and only carries its identity plus
//! links to the six neighbouring chunks, which may belong to another block.

use glam::IVec3;

/// Link to a neighbouring chunk: (block id, chunk id within that block).
pub type ChunkLink = Option<(u32, u16)>;

/// One K³ group of voxels. A chunk is "unsettled" iff it is present in its
/// block's dirty set; nothing here changes during simulation.
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Linear id within the owning block.
    pub id: u16,
    /// Cached world position of the minimum corner.
    pub origin: IVec3,
    /// Face neighbours, indexed by `Direction::index()`. None at the edge of
    /// the world.
    pub neighbors: [ChunkLink; 6],
}

impl Chunk {
    pub fn new(id: u16, origin: IVec3) -> Self {
        Self {
            id,
            origin,
            neighbors: [None; 6],
        }
    }
}
