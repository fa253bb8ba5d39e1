//! How an endpoint (re)opens its transport for each session.

#[cfg(unix)]
use std::path::{Path, PathBuf};

use tascomm_transport::IpcStream;
#[cfg(unix)]
use tascomm_transport::{connect_with_retry, RetryPolicy, UnixDomainSocket};
#[cfg(unix)]
use tracing::{debug, info};

/// Opens one transport per session.
///
/// `open` may block for one bounded retry round; the endpoint loop calls it
/// again after `reconnect_delay` when it fails.
pub trait Connector: Send + 'static {
    fn open(&mut self) -> tascomm_transport::Result<IpcStream>;
}

impl<F> Connector for F
where
    F: FnMut() -> tascomm_transport::Result<IpcStream> + Send + 'static,
{
    fn open(&mut self) -> tascomm_transport::Result<IpcStream> {
        self()
    }
}

/// Dial a listening socket, retrying while it is absent.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct SocketConnector {
    path: PathBuf,
    retry: RetryPolicy,
}

#[cfg(unix)]
impl SocketConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl Connector for SocketConnector {
    fn open(&mut self) -> tascomm_transport::Result<IpcStream> {
        let stream = connect_with_retry(&self.path, &self.retry)?;
        info!(path = ?self.path, "connected");
        Ok(stream)
    }
}

/// Own a bound socket and accept one peer per session.
#[cfg(unix)]
pub struct SocketAcceptor {
    listener: UnixDomainSocket,
    retry: RetryPolicy,
}

#[cfg(unix)]
impl SocketAcceptor {
    /// Bind now so a peer can dial as soon as this returns.
    pub fn bind(path: impl AsRef<Path>) -> tascomm_transport::Result<Self> {
        Ok(Self {
            listener: UnixDomainSocket::bind(path)?,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        self.listener.path()
    }
}

/// Process on the far end of an accepted socket.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: u32,
}

#[cfg(unix)]
impl PeerCredentials {
    fn of(stream: &IpcStream) -> Option<Self> {
        stream
            .peer_credentials()
            .map(|(uid, gid, pid)| Self { uid, gid, pid })
    }
}

#[cfg(unix)]
impl Connector for SocketAcceptor {
    fn open(&mut self) -> tascomm_transport::Result<IpcStream> {
        let stream = self.listener.accept_with_retry(&self.retry)?;
        match PeerCredentials::of(&stream) {
            Some(peer) => info!(pid = peer.pid, uid = peer.uid, gid = peer.gid, "peer accepted"),
            None => info!("peer accepted"),
        }
        debug!(path = ?self.listener.path(), "listener still bound");
        Ok(stream)
    }
}
