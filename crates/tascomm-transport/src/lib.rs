//! Local duplex byte transport for the game/studio link.
//!
//! This is the lowest layer of tascomm. It provides:
//! - [`IpcStream`], a connected Read + Write byte stream
//! - [`UnixDomainSocket`], the listener/dialer used to (re)open a session
//! - [`RetryPolicy`], the bounded backoff applied while the peer is absent
//!
//! Everything else builds on top of the [`IpcStream`] type provided here.

pub mod error;
pub mod retry;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use retry::{is_transient, RetryPolicy};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::{connect_with_retry, UnixDomainSocket};
