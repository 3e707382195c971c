//! The component manager: groups settled fluid into bodies and keeps the
//! partition sound as fluid moves, merges and disappears.
//!
//! Block maintenance tasks push just-settled fluid voxels into the intake
//! set; the manager drains it a chunk's worth per tick, growing existing
//! bodies row by row, seeding at most one new body per tick and resolving
//! merges as segments bridge. There is deliberately no global
//! voxel-to-component map - membership queries go AABB first, then the row's
//! few segments.

use super::{update, FluidComponent, MIN_COMPONENT_SIZE};
use crate::grid::VoxelIndices;
use crate::scheduler::SimWorld;
use crate::voxel::Voxel;
use glam::IVec3;
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use slab::Slab;
use tracing::debug;

pub struct ComponentManager {
    components: Slab<FluidComponent>,
    /// Thread-safe intake: block maintenance writes, manager maintenance
    /// drains. A mutex is adequate at these sizes.
    pub(crate) intake: Mutex<FxHashSet<VoxelIndices>>,
    /// At most one chunk's worth of intake is processed per tick.
    max_intake_per_tick: usize,
}

impl ComponentManager {
    pub fn new(max_intake_per_tick: usize) -> Self {
        Self {
            components: Slab::new(),
            intake: Mutex::new(FxHashSet::default()),
            max_intake_per_tick,
        }
    }

    /// Coarse AABB test, then a scan of the (x, y) row's segments.
    pub fn get_component(&self, p: IVec3) -> Option<usize> {
        self.components
            .iter()
            .find(|(_, c)| c.contains(p))
            .map(|(id, _)| id)
    }

    pub fn component(&self, id: usize) -> Option<&FluidComponent> {
        self.components.get(id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FluidComponent)> {
        self.components.iter()
    }

    /// Request a from-scratch reconstruction: next maintenance keeps one seed
    /// voxel and hands every other member back to the simulation.
    pub fn mark_for_rebuild(&mut self, id: usize) {
        if let Some(c) = self.components.get_mut(id) {
            c.to_rebuild = true;
            c.settled = false;
        }
    }

    /// Anything left that justifies scheduling component jobs this tick?
    pub fn has_work(&self) -> bool {
        !self.intake.lock().is_empty()
            || self
                .components
                .iter()
                .any(|(_, c)| !c.settled || c.to_rebuild)
    }

    /// Every tracked body at rest. Unplaceable intake residue does not count
    /// as activity: it stays parked until something changes around it.
    pub fn all_settled(&self) -> bool {
        self.components
            .iter()
            .all(|(_, c)| c.settled && !c.to_rebuild)
    }

    /// The component phase of one tick: age, update jobs, maintenance.
    pub(crate) fn tick(&mut self, world: &SimWorld, dt: f32) {
        for (_, c) in self.components.iter_mut() {
            c.lifetime += dt;
        }

        let jobs: Vec<&mut FluidComponent> = self
            .components
            .iter_mut()
            .filter(|(_, c)| c.wants_update())
            .map(|(_, c)| c)
            .collect();
        jobs.into_par_iter().for_each(|c| update::run(world, c));

        self.maintenance(world);
    }

    /// Drain the intake, grow/seed/merge bodies, dissolve the dead ones.
    fn maintenance(&mut self, world: &SimWorld) {
        let mut drained: Vec<VoxelIndices> = {
            let mut intake = self.intake.lock();
            intake.drain().collect()
        };
        // Bottom-up, deterministic: bodies grow from their support.
        drained.sort_unstable_by_key(|&idx| {
            let p = world.grid.world_pos(idx);
            (p.y, p.x, p.z)
        });
        let budget = self.max_intake_per_tick.min(drained.len());
        let overflow = drained.split_off(budget);

        let mut unplaced: Vec<VoxelIndices> = Vec::new();
        for idx in drained {
            let p = world.grid.world_pos(idx);
            let v = world.voxel(idx);
            if !v.is_valid() || !v.is_settled() || !v.has_fluid() {
                continue; // stale entry, the fluid moved on
            }
            if self.get_component(p).is_some() {
                continue; // already claimed
            }
            match self.try_assign(p, &v) {
                Some(id) => {
                    self.merge_sweep(id, p);
                }
                None => unplaced.push(idx),
            }
        }

        // At most one new body per tick, seeded bottom-up from whatever the
        // assignment passes could not place.
        if unplaced.len() + overflow.len() > MIN_COMPONENT_SIZE as usize {
            let mut created = false;
            unplaced.retain(|&idx| {
                if created {
                    return true;
                }
                let p = world.grid.world_pos(idx);
                let v = world.voxel(idx);
                if self.create_component(world, p, &v).is_some() {
                    created = true;
                    return false;
                }
                true
            });
        }

        {
            let mut intake = self.intake.lock();
            intake.extend(unplaced);
            intake.extend(overflow);
        }

        let rebuilds: Vec<usize> = self
            .components
            .iter()
            .filter(|(_, c)| c.to_rebuild)
            .map(|(id, _)| id)
            .collect();
        for id in rebuilds {
            self.rebuild(world, id);
        }

        let removals: Vec<usize> = self
            .components
            .iter()
            .filter(|(_, c)| c.wants_removal())
            .map(|(id, _)| id)
            .collect();
        for id in removals {
            self.remove_component(world, id);
        }
    }

    /// Two-pass assignment: first a segment in the voxel's own row, then a
    /// covering segment in one of the eight row-adjacent neighbours.
    fn try_assign(&mut self, p: IVec3, v: &Voxel) -> Option<usize> {
        for same_row in [true, false] {
            let found = self.components.iter().find(|(_, c)| {
                c.viscosity == v.viscosity
                    && c.bounds.grown().contains(p)
                    && if same_row {
                        c.same_row_touch(p)
                    } else {
                        c.cross_row_touch(p)
                    }
            });
            if let Some((id, _)) = found {
                self.components[id].add_cell(p);
                return Some(id);
            }
        }
        None
    }

    /// The freshly touched position may now bridge two bodies; keep merging
    /// until nothing else touches it.
    fn merge_sweep(&mut self, mut id: usize, p: IVec3) -> usize {
        loop {
            let viscosity = self.components[id].viscosity;
            let other = self
                .components
                .iter()
                .find(|(oid, c)| *oid != id && c.viscosity == viscosity && c.touches(p))
                .map(|(oid, _)| oid);
            match other {
                Some(oid) => id = self.merge(id, oid),
                None => return id,
            }
        }
    }

    /// Larger eats smaller; a rebuilding component always eats a
    /// non-rebuilding peer so a reconstruction cannot be swallowed mid-way.
    fn merge(&mut self, a: usize, b: usize) -> usize {
        let (eater, eaten) = {
            let ca = &self.components[a];
            let cb = &self.components[b];
            if ca.rebuilding && !cb.rebuilding {
                (a, b)
            } else if cb.rebuilding && !ca.rebuilding {
                (b, a)
            } else if ca.count >= cb.count {
                (a, b)
            } else {
                (b, a)
            }
        };
        let eaten_body = self.components.remove(eaten);
        debug!(
            eater,
            eaten,
            eaten_count = eaten_body.count,
            "merging fluid components"
        );
        self.components[eater].absorb(eaten_body);
        eater
    }

    /// Seed a new single-voxel body, unless something below this column
    /// already owns the spot.
    fn create_component(&mut self, world: &SimWorld, p: IVec3, v: &Voxel) -> Option<usize> {
        if !v.is_settled() || !v.has_fluid() {
            return None;
        }
        let below = world.voxel_at(p - IVec3::Y);
        if !below.is_settled() || !below.is_full() {
            return None;
        }

        // Scan down through full cells: a component already present below
        // means this column belongs to it and will be claimed by assignment.
        let mut q = p - IVec3::Y;
        loop {
            let cell = world.voxel_at(q);
            if !cell.is_valid() || !cell.is_full() {
                break;
            }
            if self.get_component(q).is_some() {
                return None;
            }
            q.y -= 1;
        }

        let mut body = FluidComponent::new(p, v.viscosity);
        body.unsettle(1);
        let id = self.components.insert(body);
        debug!(id, pos = ?p, viscosity = v.viscosity, "created fluid component");
        Some(self.merge_sweep(id, p))
    }

    /// Keep one seed voxel, hand everything else back to the simulation and
    /// start re-growing. Marks the body as `rebuilding` so it wins merges.
    fn rebuild(&mut self, world: &SimWorld, id: usize) {
        let comp = &mut self.components[id];
        let Some(&seed_key) = comp.rows.keys().min_by_key(|&&(x, y)| (y, x)) else {
            // Nothing left to rebuild from; removal will collect it.
            comp.to_rebuild = false;
            return;
        };
        let seed_z = comp.rows[&seed_key]
            .iter()
            .map(|s| s.z_min)
            .min()
            .unwrap_or(0);
        let seed = IVec3::new(seed_key.0, seed_key.1, seed_z);

        for (&(x, y), row) in &comp.rows {
            for seg in row {
                for z in seg.z_min..=seg.z_max {
                    let p = IVec3::new(x, y, z);
                    if p == seed {
                        continue;
                    }
                    world.write_voxel_at(p, |cell| cell.unsettle(cell.fluid.max(1) as i32));
                    world.wake_chunk_at(p);
                }
            }
        }

        debug!(id, seed = ?seed, "rebuilding fluid component");
        comp.rows.clear();
        comp.rows.insert(seed_key, vec![super::Segment::point(seed_z)]);
        comp.outlets.clear();
        comp.bounds = super::Aabb::point(seed);
        comp.count = 1;
        comp.water_level = seed.y;
        comp.lifetime = 0.0;
        comp.settle_counter = 0;
        comp.to_rebuild = false;
        comp.rebuilding = true;
        comp.settled = false;
        comp.unsettle(1);
    }

    /// Dissolve a body, unsettling its voxels so the simulation reclaims
    /// them.
    fn remove_component(&mut self, world: &SimWorld, id: usize) {
        let comp = self.components.remove(id);
        debug!(id, count = comp.count, "removing fluid component");
        for (&(x, y), row) in &comp.rows {
            for seg in row {
                for z in seg.z_min..=seg.z_max {
                    let p = IVec3::new(x, y, z);
                    world.write_voxel_at(p, |cell| cell.unsettle(cell.fluid.max(1) as i32));
                    world.wake_chunk_at(p);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::config::SimConfig;
    use crate::grid::Grid;
    use crate::voxel::{Voxel, VMAX};

    /// A single-block 16^3 world with a terrain floor at y=1, no ticking.
    fn test_world() -> SimWorld {
        let cfg = SimConfig {
            size_blocks: (1, 1, 1),
            ..SimConfig::default()
        };
        let grid = Grid::new(&cfg).unwrap();
        let blocks = vec![Block::new(&grid, 0).unwrap()];
        let world = SimWorld::new(grid, blocks);
        for x in 1..15 {
            for z in 1..15 {
                world.write_voxel_at(IVec3::new(x, 1, z), |c| *c = Voxel::terrain());
            }
        }
        world
    }

    /// A settled cell of water sitting wherever it is placed.
    fn settled_water(amount: u8) -> Voxel {
        let mut v = Voxel::air();
        v.fluid = amount;
        v.viscosity = 255;
        v
    }

    fn queue(world: &SimWorld, mgr: &ComponentManager, p: IVec3) {
        world.write_voxel_at(p, |c| *c = settled_water(VMAX));
        mgr.intake.lock().insert(world.grid.voxel_at(p).unwrap());
    }

    #[test]
    fn rebuilding_component_always_eats_a_larger_peer() {
        let mut mgr = ComponentManager::new(512);

        let mut big = FluidComponent::new(IVec3::new(5, 2, 5), 255);
        for z in 6..20 {
            big.add_cell(IVec3::new(5, 2, z));
        }
        let mut small = FluidComponent::new(IVec3::new(5, 3, 5), 255);
        small.rebuilding = true;

        let big_id = mgr.components.insert(big);
        let small_id = mgr.components.insert(small);
        let survivor = mgr.merge(big_id, small_id);

        assert_eq!(survivor, small_id, "rebuilding peer must win the merge");
        let body = &mgr.components[survivor];
        assert!(body.rebuilding);
        assert_eq!(body.count, 16);
        assert_eq!(body.count, body.recount());
    }

    #[test]
    fn intake_assignment_grows_an_existing_body() {
        let world = test_world();
        let mut mgr = ComponentManager::new(512);

        let mut body = FluidComponent::new(IVec3::new(5, 2, 5), 255);
        for z in 6..=7 {
            body.add_cell(IVec3::new(5, 2, z));
            world.write_voxel_at(IVec3::new(5, 2, z), |c| *c = settled_water(VMAX));
        }
        world.write_voxel_at(IVec3::new(5, 2, 5), |c| *c = settled_water(VMAX));
        let id = mgr.components.insert(body);

        // Same row: extends the 5..7 run. Cross row: lands one x over.
        queue(&world, &mgr, IVec3::new(5, 2, 8));
        queue(&world, &mgr, IVec3::new(6, 2, 6));
        mgr.maintenance(&world);

        let body = &mgr.components[id];
        assert_eq!(body.count, 5);
        assert_eq!(body.count, body.recount());
        assert!(body.contains(IVec3::new(5, 2, 8)));
        assert!(body.contains(IVec3::new(6, 2, 6)));
        assert!(mgr.intake.lock().is_empty());
    }

    #[test]
    fn creation_seeds_one_body_then_assignment_fills_it() {
        let world = test_world();
        let mut mgr = ComponentManager::new(512);

        // 16 settled supported cells, more than the viability minimum.
        for z in 1..=8 {
            queue(&world, &mgr, IVec3::new(7, 2, z));
            queue(&world, &mgr, IVec3::new(8, 2, z));
        }

        mgr.maintenance(&world);
        assert_eq!(mgr.len(), 1, "exactly one new body per maintenance tick");

        // The next pass drains the rest into the seeded body.
        mgr.maintenance(&world);
        let (_, body) = mgr.iter().next().unwrap();
        assert_eq!(body.count, 16);
        assert_eq!(body.count, body.recount());
        assert!(mgr.intake.lock().is_empty());
    }

    #[test]
    fn disconnected_fluid_is_left_in_the_intake() {
        let world = test_world();
        let mut mgr = ComponentManager::new(512);

        let body = FluidComponent::new(IVec3::new(3, 2, 3), 255);
        world.write_voxel_at(IVec3::new(3, 2, 3), |c| *c = settled_water(VMAX));
        mgr.components.insert(body);

        // Far from the body and too few to seed a new one.
        queue(&world, &mgr, IVec3::new(12, 2, 12));
        mgr.maintenance(&world);

        assert_eq!(mgr.len(), 1);
        assert_eq!(mgr.intake.lock().len(), 1, "unplaceable voxel stays queued");
    }
}
