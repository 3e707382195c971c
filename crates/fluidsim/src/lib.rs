//! Cellular-automaton fluid simulation over destructible voxel terrain.
//!
//! Liquid lives as byte-valued mass inside voxels; three integer flow rules
//! (overflow up, gravity down, lateral levelling) move it between cells, a
//! block-scoped double-buffered scheduler runs those rules in parallel, and
//! a connected-component tracker groups settled fluid into bodies whose free
//! surfaces get equalized to imitate pressure.
//!
//! This crate is framework-agnostic - it handles simulation only. Terrain
//! authoring, meshing and rendering live with the caller, which talks to the
//! engine through [`World`]:
//!
//! ```
//! use fluidsim::{SimConfig, World};
//! use glam::Vec3;
//!
//! let world = World::new(SimConfig::default()).unwrap();
//!
//! // Pour one cell of water, then drive the simulation.
//! let water = world.config().fluid_types[0].viscosity;
//! world.modify_fluid(Vec3::new(4.0, 8.0, 4.0), water, true).unwrap();
//! for _ in 0..60 {
//!     world.tick(1.0 / 60.0);
//!     world.wait_until_quiescent();
//! }
//! ```

pub mod block;
pub mod chunk;
pub mod component;
pub mod config;
pub mod error;
pub mod grid;
pub mod kernel;
mod persist;
mod scheduler;
pub mod voxel;
pub mod world;

pub use component::{
    Aabb, ComponentManager, FluidComponent, Segment, MAX_VISCOSITY_NOT_EQUALIZE,
    MIN_COMPONENT_LIFETIME, MIN_COMPONENT_SIZE,
};
pub use config::{FluidType, SimConfig};
pub use error::SimError;
pub use grid::{Direction, Grid, VoxelIndices};
pub use kernel::Step;
pub use voxel::{Voxel, EPSILON, NEIGHBOR_COUNT, VMAX};
pub use world::{ComponentStats, World};
