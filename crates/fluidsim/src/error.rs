//! Error types for the fluid simulation engine.

use thiserror::Error;

/// Top-level error type for simulation operations.
///
/// Kernel arithmetic never surfaces here: all per-cell math saturates.
/// These variants cover configuration, API misuse and resource pressure.
#[derive(Debug, Error)]
pub enum SimError {
    /// Bad grid constants, zero-sized world, or an unknown fluid type.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// API-level indices or edit targets outside the allocated world.
    ///
    /// Read queries outside the sentinel border are *not* errors; they return
    /// the documented invalid voxel.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// A direct write was attempted while simulation jobs are in flight.
    /// The caller must `wait_until_quiescent` first.
    #[error("simulation not drained: {0}")]
    Conflict(&'static str),

    /// Allocation failed while creating job data. The affected tick is
    /// skipped and retried; the world keeps its last-known-good state.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}
