//! Game ⇄ studio synchronization link for TAS tooling.
//!
//! A game publishes its playback state and a studio drives it with commands
//! over one local socket, in strict alternating turns, recovering from any
//! failure by resetting the session.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket streams and retrying connect/accept
//! - [`frame`]: `[kind][length][payload]` message framing
//! - [`endpoint`]: game and studio endpoints with handshake and reset recovery

/// Re-export transport types.
pub mod transport {
    pub use tascomm_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tascomm_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use tascomm_endpoint::*;
}

pub use tascomm_endpoint::{
    EndpointConfig, EndpointError, GameEndpoint, GameHandle, GameHost, StudioEndpoint,
    StudioHandle, StudioHost,
};
