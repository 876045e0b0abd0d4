//! Error types for compute backends and the step pipeline.

use crate::backend::Stage;

/// Failure reported by a compute backend.
///
/// Every variant is fatal to the current step. The pipeline never retries or
/// skips a stage.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No compute adapter matched the request.
    #[error("no suitable compute adapter found")]
    NoAdapter,

    /// The adapter refused to hand out a device.
    #[error("failed to create compute device: {0}")]
    RequestDevice(String),

    /// A stage program failed to compile or link.
    #[error("failed to build {stage} stage: {message}")]
    ShaderCompile {
        /// Stage whose program was rejected.
        stage: Stage,
        /// Backend-provided diagnostic.
        message: String,
    },

    /// A dispatch could not be launched or did not complete.
    #[error("{stage} dispatch failed: {message}")]
    Dispatch {
        /// Stage that failed.
        stage: Stage,
        /// Backend-provided diagnostic.
        message: String,
    },

    /// Mapping or copying device memory back to the host failed.
    #[error("device readback failed: {0}")]
    Readback(String),

    /// A transfer or dispatch was issued before `allocate`.
    #[error("device buffers are not allocated")]
    NotAllocated,

    /// A transfer does not fit the buffers currently allocated.
    #[error("transfer of {required} particles exceeds allocated capacity {allocated}")]
    CapacityMismatch {
        /// Particles the caller tried to move.
        required: usize,
        /// Capacity of the current device buffers.
        allocated: usize,
    },
}
