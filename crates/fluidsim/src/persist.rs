//! Voxel snapshot codec.
//!
//! The persisted form is a flat array of blocks, each block its voxel buffer,
//! each voxel six bytes: solid, fluid, viscosity, flags, settle counter (LE
//! u16). A small header pins the grid shape so a snapshot cannot be restored
//! into a differently sized world.

use crate::component::ComponentManager;
use crate::error::SimError;
use crate::scheduler::SimWorld;
use crate::voxel::Voxel;

const MAGIC: &[u8; 4] = b"FSIM";
const VERSION: u16 = 1;
const VOXEL_BYTES: usize = 6;

pub(crate) fn encode_voxel(v: &Voxel, out: &mut Vec<u8>) {
    out.push(v.solid);
    out.push(v.fluid);
    out.push(v.viscosity);
    out.push(v.flags_byte());
    out.extend_from_slice(&v.settle_counter.to_le_bytes());
}

pub(crate) fn decode_voxel(bytes: &[u8; VOXEL_BYTES]) -> Voxel {
    Voxel::from_parts(
        bytes[0],
        bytes[1],
        bytes[2],
        bytes[3] & 0b11,
        u16::from_le_bytes([bytes[4], bytes[5]]),
    )
}

pub(crate) fn save(world: &SimWorld) -> Vec<u8> {
    let grid = &world.grid;
    let mut out = Vec::with_capacity(
        24 + world.blocks.len() * grid.voxels_per_block() * VOXEL_BYTES,
    );
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    for dim in [
        grid.blocks.x,
        grid.blocks.y,
        grid.blocks.z,
        grid.chunk_size,
        grid.block_chunks,
    ] {
        out.extend_from_slice(&dim.to_le_bytes());
    }
    for block in &world.blocks {
        for voxel in block.read().iter() {
            encode_voxel(voxel, &mut out);
        }
    }
    out
}

pub(crate) fn load(world: &SimWorld, bytes: &[u8]) -> Result<(), SimError> {
    let grid = &world.grid;
    let header = 4 + 2 + 5 * 4;
    let expected = header + world.blocks.len() * grid.voxels_per_block() * VOXEL_BYTES;
    if bytes.len() != expected {
        return Err(SimError::InvalidConfig(format!(
            "snapshot is {} bytes, expected {expected}",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(SimError::InvalidConfig("snapshot magic mismatch".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(SimError::InvalidConfig(format!(
            "snapshot version {version}, expected {VERSION}"
        )));
    }
    let mut dims = [0u32; 5];
    for (i, dim) in dims.iter_mut().enumerate() {
        let at = 6 + i * 4;
        *dim = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    }
    if dims != [
        grid.blocks.x,
        grid.blocks.y,
        grid.blocks.z,
        grid.chunk_size,
        grid.block_chunks,
    ] {
        return Err(SimError::InvalidConfig(
            "snapshot grid shape does not match this world".into(),
        ));
    }

    let mut at = header;
    for block in &world.blocks {
        {
            let mut buf = block.write_active();
            for cell in buf.iter_mut() {
                let mut six = [0u8; VOXEL_BYTES];
                six.copy_from_slice(&bytes[at..at + VOXEL_BYTES]);
                *cell = decode_voxel(&six);
                at += VOXEL_BYTES;
            }
        }
        block.plan.lock().clear();
        block.unsettled.lock().clear();
        block.to_unsettle.lock().clear();
        block.to_process.lock().clear();
    }

    // Components reference the old fluid layout; drop them and let the
    // restored fluid re-settle into fresh bodies.
    *world.manager.write() = ComponentManager::new(grid.voxels_per_chunk());
    world.pending.lock().clear();
    world.settled_chunks.lock().clear();
    for block in &world.blocks {
        for chunk in 0..grid.chunks_per_block() as u16 {
            let base = grid.buffer_index(chunk, 0);
            let has_fluid = {
                let buf = block.read();
                buf[base..base + grid.voxels_per_chunk()]
                    .iter()
                    .any(|v| v.has_fluid())
            };
            if has_fluid {
                let mut buf = block.write_active();
                for cell in buf[base..base + grid.voxels_per_chunk()].iter_mut() {
                    if cell.has_fluid() {
                        cell.unsettle(cell.fluid as i32);
                    }
                }
                block.unsettle_chunk(chunk);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::VMAX;

    #[test]
    fn voxel_codec_round_trip() {
        let mut v = Voxel::air();
        v.solid = 12;
        v.fluid = VMAX;
        v.viscosity = 255;
        v.unsettle(300);

        let mut bytes = Vec::new();
        encode_voxel(&v, &mut bytes);
        assert_eq!(bytes.len(), VOXEL_BYTES);

        let mut six = [0u8; VOXEL_BYTES];
        six.copy_from_slice(&bytes);
        assert_eq!(decode_voxel(&six), v);
    }
}
