// =============================================================================
// QMesh Distributed QPU - State Kernel
// =============================================================================
// Table of Contents:
//   1. Module Declarations
//   2. Prelude Module
// =============================================================================
// Purpose: Ordered-qubit state-vector register supporting a closed gate
//          alphabet, destructive projective measurement, per-qubit reset and
//          whole-register restart, plus seeded sampling for non-dynamic
//          circuits. Exposes the capability set behind StateKernelInterface
//          so that alternative simulator backends only need a thin adapter.
// =============================================================================

pub mod alphabet;
pub mod error;
pub mod kernel;
pub mod register;

pub mod prelude {
    pub use crate::alphabet::GateKind;
    pub use crate::error::KernelError;
    pub use crate::kernel::{build_kernel, SimulatorKind, StateKernelInterface, StateVectorKernel};
    pub use crate::register::StateVectorRegister;
}

pub use alphabet::GateKind;
pub use error::KernelError;
pub use kernel::{build_kernel, SimulatorKind, StateKernelInterface, StateVectorKernel};
pub use register::StateVectorRegister;
