// =============================================================================
// QMesh Distributed QPU - Codec Error Types
// =============================================================================
// Table of Contents:
//   1. CodecError - Task document failures
// =============================================================================
// Purpose: Errors raised while decoding, validating or updating a task
//          document. These are codec-local and propagate to the caller; they
//          never reach the shot loop.
// =============================================================================

use thiserror::Error;

// =============================================================================
// 1. CodecError - Task document failures
// =============================================================================

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed task document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Empty task document")]
    EmptyDocument,

    #[error("Remote operation '{opcode}' is not allowed inside a composite body")]
    RemoteOperationInCompositeBody { opcode: String },

    #[error("Parameter update carries {provided} values but the circuit only has {capacity} parametric slots")]
    ParameterUpdateOverflow { provided: usize, capacity: usize },

    #[error("Parameter update ends mid-instruction: opcode '{opcode}' needs {required} values, {available} left")]
    ParameterUpdateTruncated {
        opcode: String,
        required: usize,
        available: usize,
    },

    #[error("Parameter update received before any circuit was decoded")]
    UpdateBeforeCircuit,
}
