// =============================================================================
// QMesh Distributed QPU - Kernel Error Types
// =============================================================================
// Table of Contents:
//   1. KernelError - State kernel failures
// =============================================================================
// Purpose: Error type for the state kernel. Gate-alphabet violations, operand
//          arity mismatches, out-of-range indices and numerical failures are
//          all surfaced here; the interpreter treats every variant as fatal
//          for the task that triggered it.
// =============================================================================

use thiserror::Error;

// =============================================================================
// 1. KernelError - State kernel failures
// =============================================================================

#[derive(Debug, Clone, Error)]
pub enum KernelError {
    #[error("Invalid qubit index {index}: register has {total} qubits")]
    InvalidQubitIndex { index: usize, total: usize },

    #[error("Gate {gate} acts on {required} qubits, but {provided} were provided")]
    QubitCountMismatch {
        gate: &'static str,
        required: usize,
        provided: usize,
    },

    #[error("Gate {gate} takes {expected} parameters, got {actual}")]
    ParameterCountMismatch {
        gate: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Gate {gate} is parametric and cannot be applied without parameters")]
    MissingParameters { gate: &'static str },

    #[error("Gate {gate} is not parametric")]
    UnexpectedParameters { gate: &'static str },

    #[error("Duplicate qubit in gate operands: qubit {0}")]
    DuplicateQubit(usize),

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Simulator backend not linked in this build: {0}")]
    BackendNotAvailable(String),

    #[error("Unknown simulator identifier: {0}")]
    UnknownSimulator(String),
}
