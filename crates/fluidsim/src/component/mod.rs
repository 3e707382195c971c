//! Connected bodies of settled fluid.
//!
//! A component is a compact description of one body of water (or lava): for
//! every (x, y) row it stores the maximal Z-runs ("segments") of settled
//! fluid voxels, plus the outlet set at its free surface. Components never
//! own voxels - they reference cells of the block buffers by position and
//! the manager keeps every voxel in at most one component.

mod manager;
mod update;

pub use manager::ComponentManager;

use crate::grid::VoxelIndices;
use glam::IVec3;
use rustc_hash::{FxHashMap, FxHashSet};

/// A body below this many cells is dissolved (once old enough).
pub const MIN_COMPONENT_SIZE: u32 = 15;

/// Grace period before a small or empty component is dissolved, seconds.
pub const MIN_COMPONENT_LIFETIME: f32 = 0.5;

/// Fluids at or below this viscosity keep their staircase: lava-class flows
/// are deliberately not equalized.
pub const MAX_VISCOSITY_NOT_EQUALIZE: u8 = 20;

/// The eight (x, y) row neighbours used for cross-row assignment and merging.
pub const ROW_NEIGHBORS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// A maximal run of component voxels along Z within one (x, y) row.
/// Inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub z_min: i32,
    pub z_max: i32,
}

impl Segment {
    #[inline]
    pub fn point(z: i32) -> Self {
        Self { z_min: z, z_max: z }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        (self.z_max - self.z_min + 1) as u32
    }

    #[inline]
    pub fn contains(&self, z: i32) -> bool {
        self.z_min <= z && z <= self.z_max
    }

    /// Overlapping or directly adjacent: two such segments in one row are one
    /// run and must merge.
    #[inline]
    pub fn touches(&self, other: &Segment) -> bool {
        self.z_min <= other.z_max + 1 && other.z_min <= self.z_max + 1
    }
}

/// Insert `z` into a sorted, disjoint, non-adjacent segment list, merging
/// whatever runs it bridges. Returns false if `z` was already covered.
pub(crate) fn insert_into_row(row: &mut Vec<Segment>, z: i32) -> bool {
    for seg in row.iter() {
        if seg.contains(z) {
            return false;
        }
    }
    row.push(Segment::point(z));
    normalize_row(row);
    true
}

/// Re-sort a row and merge touching segments ("fix transitive intersections").
pub(crate) fn normalize_row(row: &mut Vec<Segment>) {
    row.sort_unstable_by_key(|s| s.z_min);
    let mut merged: Vec<Segment> = Vec::with_capacity(row.len());
    for seg in row.drain(..) {
        match merged.last_mut() {
            Some(last) if last.touches(&seg) => {
                last.z_max = last.z_max.max(seg.z_max);
                last.z_min = last.z_min.min(seg.z_min);
            }
            _ => merged.push(seg),
        }
    }
    *row = merged;
}

/// Inclusive axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Aabb {
    pub min: IVec3,
    pub max: IVec3,
}

impl Aabb {
    #[inline]
    pub fn point(p: IVec3) -> Self {
        Self { min: p, max: p }
    }

    #[inline]
    pub fn contains(&self, p: IVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    #[inline]
    pub fn encapsulate(&mut self, p: IVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn union(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Grown by one cell on every side, for contact tests.
    #[inline]
    pub fn grown(&self) -> Aabb {
        Aabb {
            min: self.min - IVec3::ONE,
            max: self.max + IVec3::ONE,
        }
    }

    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }
}

/// One connected body of settled fluid.
#[derive(Clone, Debug)]
pub struct FluidComponent {
    /// Fluid kind of every member voxel.
    pub viscosity: u8,
    /// (x, y) row -> sorted disjoint Z-runs.
    pub rows: FxHashMap<(i32, i32), Vec<Segment>>,
    /// Cells on or just above the free surface.
    pub outlets: FxHashSet<VoxelIndices>,
    /// Inclusive bounds; grows eagerly, shrinks on settle.
    pub bounds: Aabb,
    /// Member voxel cardinality.
    pub count: u32,
    /// Y of the lowest outlet, or the probe row while no outlet is known.
    pub water_level: i32,
    /// Seconds since creation or reinitialization.
    pub lifetime: f32,
    pub settle_counter: u16,
    pub settled: bool,
    pub to_rebuild: bool,
    pub rebuilding: bool,
}

impl FluidComponent {
    pub fn new(seed: IVec3, viscosity: u8) -> Self {
        let mut rows = FxHashMap::default();
        rows.insert((seed.x, seed.y), vec![Segment::point(seed.z)]);
        Self {
            viscosity,
            rows,
            outlets: FxHashSet::default(),
            bounds: Aabb::point(seed),
            count: 1,
            water_level: seed.y,
            lifetime: 0.0,
            settle_counter: 0,
            settled: false,
            to_rebuild: false,
            rebuilding: false,
        }
    }

    /// Membership test: AABB first, then the row's segments.
    pub fn contains(&self, p: IVec3) -> bool {
        self.bounds.contains(p)
            && self
                .rows
                .get(&(p.x, p.y))
                .is_some_and(|row| row.iter().any(|s| s.contains(p.z)))
    }

    /// Same-row contact: a segment in the voxel's own row overlaps or touches
    /// it. Returns false when the voxel is already covered.
    pub fn same_row_touch(&self, p: IVec3) -> bool {
        self.rows.get(&(p.x, p.y)).is_some_and(|row| {
            row.iter()
                .any(|s| !s.contains(p.z) && s.touches(&Segment::point(p.z)))
        })
    }

    /// Cross-row contact: one of the eight row neighbours holds a segment
    /// covering the voxel's Z.
    pub fn cross_row_touch(&self, p: IVec3) -> bool {
        ROW_NEIGHBORS.iter().any(|(dx, dy)| {
            self.rows
                .get(&(p.x + dx, p.y + dy))
                .is_some_and(|row| row.iter().any(|s| s.contains(p.z)))
        })
    }

    /// Contact in any form, for merge detection.
    pub fn touches(&self, p: IVec3) -> bool {
        self.bounds.grown().contains(p)
            && (self.same_row_touch(p) || self.cross_row_touch(p) || self.contains(p))
    }

    /// Add one voxel. Returns false when it was already a member.
    pub fn add_cell(&mut self, p: IVec3) -> bool {
        let row = self.rows.entry((p.x, p.y)).or_default();
        if !insert_into_row(row, p.z) {
            return false;
        }
        self.count += 1;
        self.bounds.encapsulate(p);
        self.unsettle(1);
        true
    }

    /// Absorb another component of the same fluid kind.
    pub fn absorb(&mut self, other: FluidComponent) {
        debug_assert_eq!(self.viscosity, other.viscosity);
        for ((x, y), mut segs) in other.rows {
            let row = self.rows.entry((x, y)).or_default();
            row.append(&mut segs);
            normalize_row(row);
        }
        self.outlets.extend(other.outlets);
        self.bounds.union(&other.bounds);
        self.count += other.count;
        self.water_level = self.water_level.min(other.water_level);
        self.rebuilding |= other.rebuilding;
        self.to_rebuild |= other.to_rebuild;
        self.unsettle(other.count as i32);
    }

    /// Sum of segment lengths; equals `count` whenever bookkeeping is intact.
    pub fn recount(&self) -> u32 {
        self.rows
            .values()
            .map(|row| row.iter().map(Segment::len).sum::<u32>())
            .sum()
    }

    pub fn recompute_bounds(&mut self) {
        let mut iter = self.rows.iter().flat_map(|(&(x, y), row)| {
            row.iter()
                .flat_map(move |s| [IVec3::new(x, y, s.z_min), IVec3::new(x, y, s.z_max)])
        });
        if let Some(first) = iter.next() {
            let mut bounds = Aabb::point(first);
            for p in iter {
                bounds.encapsulate(p);
            }
            self.bounds = bounds;
        }
    }

    /// Activity evidence scales with how much membership changed.
    pub fn unsettle(&mut self, count_delta: i32) {
        let rate = if self.viscosity == 0 { u8::MAX } else { self.viscosity } as u32;
        let add = (count_delta.unsigned_abs()).saturating_mul(rate).min(u16::MAX as u32);
        self.settle_counter = self.settle_counter.saturating_add(add as u16);
        self.settled = false;
    }

    /// Decay towards rest. Returns true if this call settled the component;
    /// settling clears `rebuilding` and the caller recomputes the bounds.
    pub fn decrease_settle(&mut self) -> bool {
        if self.settle_counter == 0 {
            if !self.settled {
                self.settled = true;
                self.rebuilding = false;
                return true;
            }
            return false;
        }
        let rate = if self.viscosity == 0 { u8::MAX } else { self.viscosity };
        self.settle_counter = self.settle_counter.saturating_sub(rate as u16);
        false
    }

    /// Should the per-tick update job run for this component?
    pub fn wants_update(&self) -> bool {
        !self.settled
            && !self.to_rebuild
            && self.lifetime > MIN_COMPONENT_LIFETIME
            && self.count >= MIN_COMPONENT_SIZE
    }

    /// Dissolution condition, checked by manager maintenance.
    pub fn wants_removal(&self) -> bool {
        self.lifetime > MIN_COMPONENT_LIFETIME
            && ((!self.rebuilding && self.count < MIN_COMPONENT_SIZE) || self.rows.is_empty())
    }
}
