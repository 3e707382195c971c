//! Block/chunk/voxel addressing.
//!
//! The world is a lattice of blocks, each M³ chunks of K³ voxels. K and M are
//! powers of two, so all intra-block addressing runs on shifts and masks; the
//! block lattice itself has runtime dimensions and uses plain arithmetic.
//! The outermost one-voxel shell of the world is a sentinel frame of invalid
//! cells and is never simulated.

use crate::config::SimConfig;
use crate::error::SimError;
use glam::{IVec3, UVec3, Vec3};

/// The six face directions. Y is up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Forward,
    Backward,
    Right,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Up,
        Direction::Down,
        Direction::Forward,
        Direction::Backward,
        Direction::Right,
        Direction::Left,
    ];

    /// The four lateral directions used by the levelling step.
    pub const HORIZONTAL: [Direction; 4] = [
        Direction::Forward,
        Direction::Backward,
        Direction::Right,
        Direction::Left,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn offset(self) -> IVec3 {
        match self {
            Direction::Up => IVec3::new(0, 1, 0),
            Direction::Down => IVec3::new(0, -1, 0),
            Direction::Forward => IVec3::new(0, 0, 1),
            Direction::Backward => IVec3::new(0, 0, -1),
            Direction::Right => IVec3::new(1, 0, 0),
            Direction::Left => IVec3::new(-1, 0, 0),
        }
    }

    #[inline]
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
            Direction::Right => Direction::Left,
            Direction::Left => Direction::Right,
        }
    }
}

/// Block-local address of one voxel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoxelIndices {
    /// Linear block id within the world.
    pub block: u32,
    /// Linear chunk id within the block.
    pub chunk: u16,
    /// Linear voxel id within the chunk.
    pub voxel: u16,
}

/// World geometry and addressing math. Immutable after construction.
#[derive(Clone, Debug)]
pub struct Grid {
    /// World size in blocks per axis.
    pub blocks: UVec3,
    /// Voxels per chunk axis (K).
    pub chunk_size: u32,
    /// Chunks per block axis (M).
    pub block_chunks: u32,
    /// Voxel edge length in metres.
    pub voxel_size: f32,
    chunk_shift: u32,
    block_shift: u32,
}

impl Grid {
    pub fn new(config: &SimConfig) -> Result<Grid, SimError> {
        config.validate()?;
        let (bx, by, bz) = config.size_blocks;
        Ok(Grid {
            blocks: UVec3::new(bx, by, bz),
            chunk_size: config.chunk_size,
            block_chunks: config.block_chunks,
            voxel_size: config.voxel_size_m,
            chunk_shift: config.chunk_size.trailing_zeros(),
            block_shift: config.block_chunks.trailing_zeros(),
        })
    }

    #[inline]
    pub fn voxels_per_chunk(&self) -> usize {
        (self.chunk_size * self.chunk_size * self.chunk_size) as usize
    }

    #[inline]
    pub fn chunks_per_block(&self) -> usize {
        (self.block_chunks * self.block_chunks * self.block_chunks) as usize
    }

    #[inline]
    pub fn voxels_per_block(&self) -> usize {
        self.voxels_per_chunk() * self.chunks_per_block()
    }

    /// Voxels per block axis (K·M).
    #[inline]
    pub fn block_dim(&self) -> u32 {
        self.chunk_size * self.block_chunks
    }

    /// World size in voxels per axis, border frame included.
    #[inline]
    pub fn size_voxels(&self) -> UVec3 {
        self.blocks * self.block_dim()
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        (self.blocks.x * self.blocks.y * self.blocks.z) as usize
    }

    // --- packing ----------------------------------------------------------

    #[inline]
    pub fn voxel_id(&self, local: UVec3) -> u16 {
        debug_assert!(local.max_element() < self.chunk_size);
        (local.x | (local.y << self.chunk_shift) | (local.z << (self.chunk_shift * 2))) as u16
    }

    #[inline]
    pub fn voxel_coords(&self, voxel: u16) -> UVec3 {
        let mask = self.chunk_size - 1;
        let v = voxel as u32;
        UVec3::new(
            v & mask,
            (v >> self.chunk_shift) & mask,
            (v >> (self.chunk_shift * 2)) & mask,
        )
    }

    #[inline]
    pub fn chunk_id(&self, local: UVec3) -> u16 {
        debug_assert!(local.max_element() < self.block_chunks);
        (local.x | (local.y << self.block_shift) | (local.z << (self.block_shift * 2))) as u16
    }

    #[inline]
    pub fn chunk_coords(&self, chunk: u16) -> UVec3 {
        let mask = self.block_chunks - 1;
        let c = chunk as u32;
        UVec3::new(
            c & mask,
            (c >> self.block_shift) & mask,
            (c >> (self.block_shift * 2)) & mask,
        )
    }

    /// Index of a voxel inside a block's packed buffer. Voxels are stored
    /// contiguously per chunk so a chunk can be walked as one slice.
    #[inline]
    pub fn buffer_index(&self, chunk: u16, voxel: u16) -> usize {
        chunk as usize * self.voxels_per_chunk() + voxel as usize
    }

    // --- block lattice (runtime dimensions, plain arithmetic) -------------

    #[inline]
    pub fn block_index(&self, pos: UVec3) -> u32 {
        debug_assert!(pos.x < self.blocks.x && pos.y < self.blocks.y && pos.z < self.blocks.z);
        (pos.z * self.blocks.y + pos.y) * self.blocks.x + pos.x
    }

    #[inline]
    pub fn block_pos(&self, block: u32) -> UVec3 {
        let x = block % self.blocks.x;
        let y = (block / self.blocks.x) % self.blocks.y;
        let z = block / (self.blocks.x * self.blocks.y);
        UVec3::new(x, y, z)
    }

    /// Neighbouring block id, or None at the edge of the world.
    pub fn block_neighbor(&self, block: u32, dir: Direction) -> Option<u32> {
        let pos = self.block_pos(block).as_ivec3() + dir.offset();
        if pos.min_element() < 0
            || pos.x >= self.blocks.x as i32
            || pos.y >= self.blocks.y as i32
            || pos.z >= self.blocks.z as i32
        {
            None
        } else {
            Some(self.block_index(pos.as_uvec3()))
        }
    }

    // --- neighbour resolution ---------------------------------------------

    /// Resolve the cell one step in `dir` from (`chunk`, `voxel`).
    ///
    /// Returns the neighbour's block-local ids and whether the step crossed
    /// the block boundary. When it did, the returned ids are valid in the
    /// adjacent block *as if it existed*; combining the flag with the block's
    /// neighbour pointer yields the final address or "outside".
    #[inline]
    pub fn neighbour(&self, chunk: u16, voxel: u16, dir: Direction) -> (u16, u16, bool) {
        let k = self.chunk_size;
        let m = self.block_chunks;
        let mut v = self.voxel_coords(voxel);
        let mut c = self.chunk_coords(chunk);
        let mut crossed = false;

        // One axis moves; the wrap cascades voxel -> chunk -> block.
        let (axis_v, axis_c, positive): (&mut u32, &mut u32, bool) = match dir {
            Direction::Right => (&mut v.x, &mut c.x, true),
            Direction::Left => (&mut v.x, &mut c.x, false),
            Direction::Up => (&mut v.y, &mut c.y, true),
            Direction::Down => (&mut v.y, &mut c.y, false),
            Direction::Forward => (&mut v.z, &mut c.z, true),
            Direction::Backward => (&mut v.z, &mut c.z, false),
        };

        if positive {
            *axis_v += 1;
            if *axis_v == k {
                *axis_v = 0;
                *axis_c += 1;
                if *axis_c == m {
                    *axis_c = 0;
                    crossed = true;
                }
            }
        } else if *axis_v == 0 {
            *axis_v = k - 1;
            if *axis_c == 0 {
                *axis_c = m - 1;
                crossed = true;
            } else {
                *axis_c -= 1;
            }
        } else {
            *axis_v -= 1;
        }

        (self.chunk_id(c), self.voxel_id(v), crossed)
    }

    /// Division-based variant of [`Grid::neighbour`] for dimensions that are
    /// not powers of two. Kept equivalent to the fast path; the unit tests
    /// cross-check the two.
    pub fn neighbour_slow(&self, chunk: u16, voxel: u16, dir: Direction) -> (u16, u16, bool) {
        let k = self.chunk_size as i64;
        let m = self.block_chunks as i64;
        let vc = self.voxel_coords(voxel).as_ivec3();
        let cc = self.chunk_coords(chunk).as_ivec3();
        let world = cc.as_i64vec3() * k + vc.as_i64vec3() + dir.offset().as_i64vec3();

        let span = k * m;
        let wrapped = glam::I64Vec3::new(
            world.x.rem_euclid(span),
            world.y.rem_euclid(span),
            world.z.rem_euclid(span),
        );
        let crossed = wrapped != world;
        let c = (wrapped / k).as_uvec3();
        let v = (wrapped % k).as_uvec3();
        (self.chunk_id(c), self.voxel_id(v), crossed)
    }

    // --- world coordinates -------------------------------------------------

    /// Address of the voxel containing a metric position, if inside the world.
    pub fn world_to_voxel(&self, pos: Vec3) -> Option<VoxelIndices> {
        let p = (pos / self.voxel_size).floor();
        self.voxel_at(IVec3::new(p.x as i32, p.y as i32, p.z as i32))
    }

    /// Address of the voxel at integer world coordinates, if inside the world.
    pub fn voxel_at(&self, p: IVec3) -> Option<VoxelIndices> {
        let size = self.size_voxels();
        if p.min_element() < 0
            || p.x >= size.x as i32
            || p.y >= size.y as i32
            || p.z >= size.z as i32
        {
            return None;
        }
        let u = p.as_uvec3();
        let whole_shift = self.chunk_shift + self.block_shift;
        let bpos = u >> whole_shift;
        let cpos = (u >> self.chunk_shift) & UVec3::splat(self.block_chunks - 1);
        let vpos = u & UVec3::splat(self.chunk_size - 1);
        Some(VoxelIndices {
            block: self.block_index(bpos),
            chunk: self.chunk_id(cpos),
            voxel: self.voxel_id(vpos),
        })
    }

    /// Integer world coordinates of a voxel address.
    pub fn world_pos(&self, idx: VoxelIndices) -> IVec3 {
        let b = self.block_pos(idx.block) * self.block_dim();
        let c = self.chunk_coords(idx.chunk) * self.chunk_size;
        (b + c + self.voxel_coords(idx.voxel)).as_ivec3()
    }

    /// Metric centre of a voxel.
    pub fn voxel_center(&self, idx: VoxelIndices) -> Vec3 {
        (self.world_pos(idx).as_vec3() + Vec3::splat(0.5)) * self.voxel_size
    }

    /// True on the world's one-voxel sentinel shell.
    pub fn is_border(&self, p: IVec3) -> bool {
        let size = self.size_voxels();
        p.min_element() == 0
            || p.x == size.x as i32 - 1
            || p.y == size.y as i32 - 1
            || p.z == size.z as i32 - 1
    }

    /// World origin of a chunk (its minimum corner).
    pub fn chunk_origin(&self, block: u32, chunk: u16) -> IVec3 {
        let b = self.block_pos(block) * self.block_dim();
        let c = self.chunk_coords(chunk) * self.chunk_size;
        (b + c).as_ivec3()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::new(&SimConfig::default()).unwrap()
    }

    #[test]
    fn voxel_id_round_trip() {
        let g = grid();
        for z in 0..g.chunk_size {
            for y in 0..g.chunk_size {
                for x in 0..g.chunk_size {
                    let local = UVec3::new(x, y, z);
                    assert_eq!(g.voxel_coords(g.voxel_id(local)), local);
                }
            }
        }
    }

    #[test]
    fn world_round_trip() {
        let g = grid();
        for p in [
            IVec3::new(0, 0, 0),
            IVec3::new(1, 2, 3),
            IVec3::new(15, 15, 15),
            IVec3::new(16, 3, 40),
            IVec3::new(63, 31, 63),
        ] {
            let idx = g.voxel_at(p).expect("inside world");
            assert_eq!(g.world_pos(idx), p, "round trip failed for {p}");
        }
        assert!(g.voxel_at(IVec3::new(-1, 0, 0)).is_none());
        assert!(g.voxel_at(IVec3::new(64, 0, 0)).is_none());
    }

    #[test]
    fn neighbour_within_chunk() {
        let g = grid();
        let v = g.voxel_id(UVec3::new(3, 3, 3));
        let (nc, nv, crossed) = g.neighbour(0, v, Direction::Right);
        assert!(!crossed);
        assert_eq!(nc, 0);
        assert_eq!(g.voxel_coords(nv), UVec3::new(4, 3, 3));
    }

    #[test]
    fn neighbour_crosses_chunk_and_block() {
        let g = grid();
        // K-1 on X inside chunk 0: stepping right lands in the next chunk.
        let v = g.voxel_id(UVec3::new(g.chunk_size - 1, 0, 0));
        let (nc, nv, crossed) = g.neighbour(0, v, Direction::Right);
        assert!(!crossed);
        assert_eq!(g.chunk_coords(nc), UVec3::new(1, 0, 0));
        assert_eq!(g.voxel_coords(nv), UVec3::new(0, 0, 0));

        // Last chunk on X: stepping right crosses the block.
        let c = g.chunk_id(UVec3::new(g.block_chunks - 1, 0, 0));
        let (nc, nv, crossed) = g.neighbour(c, v, Direction::Right);
        assert!(crossed);
        assert_eq!(g.chunk_coords(nc), UVec3::new(0, 0, 0));
        assert_eq!(g.voxel_coords(nv), UVec3::new(0, 0, 0));
    }

    #[test]
    fn neighbour_fast_matches_slow() {
        let g = grid();
        for chunk in 0..g.chunks_per_block() as u16 {
            for voxel in (0..g.voxels_per_chunk() as u16).step_by(7) {
                for dir in Direction::ALL {
                    assert_eq!(
                        g.neighbour(chunk, voxel, dir),
                        g.neighbour_slow(chunk, voxel, dir),
                        "mismatch at chunk {chunk} voxel {voxel} {dir:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn border_detection() {
        let g = grid();
        let size = g.size_voxels();
        assert!(g.is_border(IVec3::new(0, 5, 5)));
        assert!(g.is_border(IVec3::new(5, 5, size.z as i32 - 1)));
        assert!(!g.is_border(IVec3::new(1, 1, 1)));
    }

    #[test]
    fn block_neighbors() {
        let g = grid();
        let origin = g.block_index(UVec3::new(0, 0, 0));
        assert_eq!(g.block_neighbor(origin, Direction::Left), None);
        assert_eq!(g.block_neighbor(origin, Direction::Down), None);
        let right = g.block_neighbor(origin, Direction::Right).unwrap();
        assert_eq!(g.block_pos(right), UVec3::new(1, 0, 0));
    }
}
