//! Simulation configuration and the fluid type registry.

use crate::error::SimError;
use serde::{Deserialize, Serialize};

/// A named fluid kind. The viscosity byte doubles as the fluid's identity
/// tag inside voxels: 0 is reserved for "no fluid".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FluidType {
    /// Display name ("water", "lava", ...).
    pub label: String,
    /// Flow rate tag, 1-255. Smaller = more viscous = slower to settle.
    pub viscosity: u8,
}

impl FluidType {
    pub fn new(label: &str, viscosity: u8) -> Self {
        Self {
            label: label.to_string(),
            viscosity,
        }
    }
}

/// World sizing and fluid registry.
///
/// Chunk and block sides must be powers of two so voxel addressing can run on
/// bit shifts; the *world* size in blocks is unconstrained.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimConfig {
    /// World size in blocks per axis (X, Y, Z). Y is up.
    pub size_blocks: (u32, u32, u32),
    /// Edge length of one voxel in metres.
    pub voxel_size_m: f32,
    /// Voxels per chunk axis (K). Power of two.
    pub chunk_size: u32,
    /// Chunks per block axis (M). Power of two.
    pub block_chunks: u32,
    /// Registered fluid kinds. Pouring an unknown viscosity is rejected.
    pub fluid_types: Vec<FluidType>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            size_blocks: (4, 2, 4),
            voxel_size_m: 0.5,
            chunk_size: 8,
            block_chunks: 2,
            fluid_types: vec![FluidType::new("water", 255), FluidType::new("lava", 20)],
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        let (bx, by, bz) = self.size_blocks;
        if bx == 0 || by == 0 || bz == 0 {
            return Err(SimError::InvalidConfig("world size must be positive".into()));
        }
        if !(self.voxel_size_m > 0.0) {
            return Err(SimError::InvalidConfig("voxel size must be positive".into()));
        }
        if self.chunk_size == 0 || !self.chunk_size.is_power_of_two() {
            return Err(SimError::InvalidConfig(format!(
                "chunk size {} is not a power of two",
                self.chunk_size
            )));
        }
        if self.block_chunks == 0 || !self.block_chunks.is_power_of_two() {
            return Err(SimError::InvalidConfig(format!(
                "block side {} is not a power of two",
                self.block_chunks
            )));
        }
        // Chunk-local and block-local ids are stored as u16.
        if self.chunk_size > 32 {
            return Err(SimError::InvalidConfig(format!(
                "chunk size {} exceeds the supported maximum of 32",
                self.chunk_size
            )));
        }
        if self.block_chunks > 32 {
            return Err(SimError::InvalidConfig(format!(
                "block side {} exceeds the supported maximum of 32",
                self.block_chunks
            )));
        }
        for fluid in &self.fluid_types {
            if fluid.viscosity == 0 {
                return Err(SimError::InvalidConfig(format!(
                    "fluid '{}' uses viscosity 0, which is reserved",
                    fluid.label
                )));
            }
        }
        for (i, a) in self.fluid_types.iter().enumerate() {
            for b in self.fluid_types.iter().skip(i + 1) {
                if a.viscosity == b.viscosity {
                    return Err(SimError::InvalidConfig(format!(
                        "fluids '{}' and '{}' share viscosity {}",
                        a.label, b.label, a.viscosity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a registered fluid by its viscosity tag.
    pub fn fluid_by_viscosity(&self, viscosity: u8) -> Option<&FluidType> {
        self.fluid_types.iter().find(|f| f.viscosity == viscosity)
    }
}
