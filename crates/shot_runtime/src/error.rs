// =============================================================================
// QMesh Distributed QPU - Interpreter Error Types
// =============================================================================
// Table of Contents:
//   1. InterpreterError - Batch-fatal failures
//   2. TaskFatalError - Failures isolated to one task
//   3. DispatchFailure - Internal dispatch result
// =============================================================================
// Purpose: Two localities of failure. Batch-fatal errors abort the shot and
//          surface as the {"ERROR": ...} result document; task-fatal errors
//          end the offending task early (its classical register keeps what
//          was already written) while the shot continues for everyone else.
// =============================================================================

use peer_services::ChannelError;
use state_kernel::KernelError;
use thiserror::Error;

// =============================================================================
// 1. InterpreterError - Batch-fatal failures
// =============================================================================

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("Instruction error: {0}")]
    Instruction(String),

    #[error("COPY arity mismatch: {destinations} destination clbits vs {sources} source clbits")]
    ArityMismatch { destinations: usize, sources: usize },

    #[error("Deadlock: a round made no progress with {unfinished} unfinished task(s)")]
    Deadlock { unfinished: usize },

    #[error("Quantum channel protocol imbalance: {0}")]
    ProtocolImbalance(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

// =============================================================================
// 2. TaskFatalError - Failures isolated to one task
// =============================================================================

#[derive(Debug, Error)]
pub enum TaskFatalError {
    #[error(transparent)]
    Kernel(KernelError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

// =============================================================================
// 3. DispatchFailure - Internal dispatch result
// =============================================================================

#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error(transparent)]
    TaskFatal(TaskFatalError),

    #[error(transparent)]
    BatchFatal(InterpreterError),
}

impl From<KernelError> for DispatchFailure {
    fn from(error: KernelError) -> Self {
        DispatchFailure::TaskFatal(TaskFatalError::Kernel(error))
    }
}

impl From<ChannelError> for DispatchFailure {
    fn from(error: ChannelError) -> Self {
        DispatchFailure::TaskFatal(TaskFatalError::Channel(error))
    }
}

impl DispatchFailure {
    pub fn instruction(message: impl Into<String>) -> Self {
        DispatchFailure::BatchFatal(InterpreterError::Instruction(message.into()))
    }
}
