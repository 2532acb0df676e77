// =============================================================================
// QMesh Distributed QPU - Peer Service Error Types
// =============================================================================
// Table of Contents:
//   1. ChannelError - Classical channel failures
//   2. RegistryError - Discovery registry failures
// =============================================================================
// Purpose: Error types for the classical channel and the discovery registry.
//          Timeout and Closed are the two channel kinds the interpreter
//          treats as task-fatal; everything else is a setup failure.
// =============================================================================

use thiserror::Error;

// =============================================================================
// 1. ChannelError - Classical channel failures
// =============================================================================

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Receive from peer {peer} exceeded the configured bound")]
    Timeout { peer: String },

    #[error("Peer {peer} disconnected")]
    Closed { peer: String },

    #[error("No connection was established with peer {peer}")]
    NotConnected { peer: String },

    #[error("Peer {peer} is not present in the discovery registry")]
    PeerNotRegistered { peer: String },

    #[error("Failed to send to peer {peer}: {reason}")]
    SendFailed { peer: String, reason: String },

    #[error("Malformed measurement payload from peer {peer}")]
    MalformedMeasurement { peer: String },

    #[error("Channel transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// =============================================================================
// 2. RegistryError - Discovery registry failures
// =============================================================================

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry file access failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out waiting for {expected} peers with prefix {prefix}, found {found}")]
    WaitTimeout {
        prefix: String,
        expected: usize,
        found: usize,
    },
}
