// =============================================================================
// QMesh Distributed QPU - Peer Services
// =============================================================================
// Table of Contents:
//   1. Module Declarations
//   2. Prelude Module
// =============================================================================
// Purpose: Peer-addressed classical transport between QPU processes plus the
//          discovery registry that advertises their endpoints. One logical
//          channel per peer pair carries both measurement bits and opaque
//          info payloads, FIFO per (sender, receiver) direction.
// =============================================================================

pub mod channel;
pub mod error;
pub mod framing;
pub mod registry;

pub mod prelude {
    pub use crate::channel::ClassicalChannel;
    pub use crate::error::{ChannelError, RegistryError};
    pub use crate::registry::{DeploymentMode, DiscoveryRegistry, PeerRecord};
}

pub use channel::ClassicalChannel;
pub use error::{ChannelError, RegistryError};
pub use registry::{DeploymentMode, DiscoveryRegistry, PeerRecord};
