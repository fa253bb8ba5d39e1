//! The loop shared by both roles: open, handshake, alternate turns, reset.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tascomm_frame::{
    FrameConfig, FrameError, FrameReader, FrameWriter, Message, MessageKind, Origin,
};
use tascomm_transport::{IpcStream, TransportError};
use tracing::{debug, info, trace, warn};

use crate::connector::Connector;
use crate::error::{Disposition, EndpointError, Result};
use crate::handshake::HandshakeConfig;
use crate::outbound::{CommandQueue, LatestSlot};
use crate::protocol::Payload;
use crate::state::{ConnectionState, StateCell};

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Runtime configuration for an endpoint loop.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Payload limit and write timeout for session frames. The read timeout
    /// is replaced by `read_slice`; an unset write timeout falls back to
    /// `idle_timeout`.
    pub frame: FrameConfig,
    pub handshake: HandshakeConfig,
    /// Pause between a failed session or open attempt and the next one.
    pub reconnect_delay: Duration,
    /// Give up on a peer that sends nothing for this long. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Sleep before sending a `Wait` frame when there is nothing to say.
    pub idle_pause: Duration,
    /// Granularity of blocking reads, bounding how late shutdown is noticed.
    pub read_slice: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            handshake: HandshakeConfig::default(),
            reconnect_delay: Duration::from_millis(100),
            idle_timeout: Some(Duration::from_secs(10)),
            idle_pause: Duration::from_millis(5),
            read_slice: Duration::from_millis(50),
        }
    }
}

/// State shared between the loop thread and every handle.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    pub(crate) commands: CommandQueue,
    /// Latest-wins outbound frame, sent only when no command is queued.
    pub(crate) latest: LatestSlot<Message>,
    shutdown: AtomicBool,
    reset_requested: AtomicBool,
    active: Mutex<Option<IpcStream>>,
}

impl Shared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queue `message` for the current session. Returns `false`, dropping
    /// it, when no session is ready.
    pub(crate) fn push_command(&self, message: Message) -> bool {
        self.state
            .when_ready(|_| self.commands.push(message))
            .is_some()
    }

    fn attach(&self, stream: Option<IpcStream>) {
        *self.active() = stream;
    }

    fn close_active(&self) {
        if let Some(stream) = self.active().take() {
            if let Err(err) = stream.close() {
                debug!(error = %err, "closing transport failed");
            }
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<IpcStream>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One side of the protocol, plugged into the shared loop.
pub(crate) trait Role: Send + 'static {
    /// `game` or `studio`; names the thread and tags logs.
    const NAME: &'static str;

    /// Kinds only this side sends. Receiving one ends the session.
    const SENDS: Origin;

    fn handshake(
        &mut self,
        reader: &mut FrameReader<IpcStream>,
        writer: &mut FrameWriter<IpcStream>,
        config: &HandshakeConfig,
    ) -> Result<()>;

    /// Whether this side sends the first frame once the session is ready.
    fn writes_first(&self) -> bool;

    /// Called on the loop thread right after the state becomes `Ready`.
    fn on_ready(&mut self) {}

    fn dispatch(&mut self, payload: Payload) -> Result<()>;

    /// The session was torn down; the loop will reconnect unless stopping.
    fn on_reset(&mut self, reason: &EndpointError);

    /// The loop is ending with an unrecoverable error.
    fn on_fatal(&mut self, _reason: &EndpointError) {}
}

/// Handle to a running endpoint loop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    shared: Arc<Shared>,
    thread: Arc<Mutex<Option<JoinHandle<Result<()>>>>>,
}

impl EndpointHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Block until a session is ready, up to `timeout`.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.shared.state.wait_until_ready(timeout)
    }

    /// Number of sessions that completed the handshake.
    pub fn sessions(&self) -> u64 {
        self.shared.state.sessions()
    }

    /// Drop the current session; the loop reconnects afterwards.
    ///
    /// The peer is told with a `Reset` frame on this side's next write turn.
    /// No-op while no session is ready.
    pub fn request_reset(&self) {
        let requested = self
            .shared
            .state
            .when_ready(|_| self.shared.reset_requested.store(true, Ordering::Release));
        if requested.is_some() {
            info!("reset requested");
        }
    }

    /// Ask the loop to stop and unblock any transport I/O in progress.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            info!("endpoint shutting down");
        }
        self.shared.close_active();
    }

    /// Whether the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread_slot()
            .as_ref()
            .is_none_or(|thread| thread.is_finished())
    }

    /// Wait for the loop thread to exit and return how it ended.
    ///
    /// `Ok` after [`shutdown`](Self::shutdown); `Err` for a fatal session
    /// error such as a version mismatch. Later calls return `Ok`.
    pub fn join(&self) -> Result<()> {
        let Some(thread) = self.thread_slot().take() else {
            return Ok(());
        };
        thread.join().map_err(|_| EndpointError::ThreadPanicked)?
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    fn thread_slot(&self) -> MutexGuard<'_, Option<JoinHandle<Result<()>>>> {
        self.thread.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Start the loop thread for `role`.
pub(crate) fn spawn<R: Role, C: Connector>(
    role: R,
    connector: C,
    shared: Arc<Shared>,
    config: EndpointConfig,
) -> Result<EndpointHandle> {
    let loop_shared = Arc::clone(&shared);
    let thread = thread::Builder::new()
        .name(format!("tascomm-{}", R::NAME))
        .spawn(move || run_loop(role, connector, loop_shared, config))
        .map_err(|err| EndpointError::Transport(TransportError::Io(err)))?;

    Ok(EndpointHandle {
        shared,
        thread: Arc::new(Mutex::new(Some(thread))),
    })
}

fn run_loop<R: Role, C: Connector>(
    mut role: R,
    mut connector: C,
    shared: Arc<Shared>,
    config: EndpointConfig,
) -> Result<()> {
    info!(role = R::NAME, "endpoint started");
    loop {
        if shared.is_shutting_down() {
            return Ok(());
        }

        let stream = match connector.open() {
            Ok(stream) => stream,
            Err(err) => {
                debug!(role = R::NAME, error = %err, "transport not available yet");
                pause(&shared, config.reconnect_delay);
                continue;
            }
        };

        let err = match run_session(&mut role, stream, &shared, &config) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        let err = if shared.is_shutting_down() {
            EndpointError::Shutdown
        } else {
            err
        };

        match err.disposition() {
            Disposition::Stop => {
                teardown(&mut role, &shared, &err);
                info!(role = R::NAME, "endpoint stopped");
                return Ok(());
            }
            Disposition::Fatal => {
                teardown(&mut role, &shared, &err);
                role.on_fatal(&err);
                return Err(err);
            }
            Disposition::Reset => {
                warn!(role = R::NAME, error = %err, "session reset");
                teardown(&mut role, &shared, &err);
                pause(&shared, config.reconnect_delay);
            }
        }
    }
}

fn run_session<R: Role>(
    role: &mut R,
    stream: IpcStream,
    shared: &Shared,
    config: &EndpointConfig,
) -> Result<Infallible> {
    shared.state.transition(ConnectionState::begin_handshake)?;
    shared.attach(Some(stream.try_clone()?));
    if shared.is_shutting_down() {
        return Err(EndpointError::Shutdown);
    }

    let frame_config = FrameConfig {
        read_timeout: Some(config.read_slice),
        write_timeout: config.frame.write_timeout.or(config.idle_timeout),
        ..config.frame.clone()
    };
    let mut reader = FrameReader::with_config_ipc(stream.try_clone()?, frame_config.clone())?;
    let mut writer = FrameWriter::with_config_ipc(stream, frame_config)?;

    role.handshake(&mut reader, &mut writer, &config.handshake)?;
    shared.state.transition(ConnectionState::complete_handshake)?;
    role.on_ready();

    if !role.writes_first() {
        recv_turn(role, &mut reader, shared, config)?;
    }
    loop {
        write_turn(&mut writer, shared, config)?;
        recv_turn(role, &mut reader, shared, config)?;
    }
}

/// Send exactly one frame: the oldest command, else the latest snapshot,
/// else `Wait`.
fn write_turn(
    writer: &mut FrameWriter<IpcStream>,
    shared: &Shared,
    config: &EndpointConfig,
) -> Result<()> {
    if shared.reset_requested.swap(false, Ordering::AcqRel) {
        if let Err(err) = writer.write_message(&Message::empty(MessageKind::Reset)) {
            debug!(error = %err, "could not tell peer about reset");
        }
        return Err(EndpointError::ResetRequested);
    }

    let message = match next_outbound(shared) {
        Some(message) => message,
        None => {
            thread::sleep(config.idle_pause);
            next_outbound(shared).unwrap_or_else(|| Message::empty(MessageKind::Wait))
        }
    };

    writer.write_message(&message)?;
    log_frame("sent", &message);
    Ok(())
}

fn next_outbound(shared: &Shared) -> Option<Message> {
    shared.commands.pop().or_else(|| shared.latest.take())
}

/// Receive exactly one frame and hand it to the role.
fn recv_turn<R: Role>(
    role: &mut R,
    reader: &mut FrameReader<IpcStream>,
    shared: &Shared,
    config: &EndpointConfig,
) -> Result<()> {
    let started = Instant::now();
    let message = loop {
        if shared.is_shutting_down() {
            return Err(EndpointError::Shutdown);
        }
        match reader.read_message() {
            Ok(message) => break message,
            Err(err) if err.is_timeout() => {
                if let Some(idle) = config.idle_timeout {
                    if started.elapsed() >= idle {
                        return Err(EndpointError::Timeout(idle));
                    }
                }
            }
            Err(FrameError::ConnectionClosed) => {
                return Err(EndpointError::Disconnected(
                    "peer closed the connection".to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        }
    };

    log_frame("received", &message);
    if message.kind.origin() == R::SENDS {
        return Err(EndpointError::unexpected(message.kind, R::NAME));
    }
    role.dispatch(Payload::from_message(&message)?)
}

fn log_frame(direction: &'static str, message: &Message) {
    if message.kind == MessageKind::Wait {
        trace!(direction, kind = %message.kind, "frame");
    } else {
        debug!(direction, kind = %message.kind, len = message.payload.len(), "frame");
    }
}

/// Close the transport, drop everything queued for the dead session and
/// return to `Uninitialized`.
fn teardown<R: Role>(role: &mut R, shared: &Shared, reason: &EndpointError) {
    let live = shared.state.transition(ConnectionState::begin_reset).is_ok();
    shared.close_active();
    shared.reset_requested.store(false, Ordering::Release);

    let dropped = shared.commands.clear();
    shared.latest.clear();
    if dropped > 0 {
        debug!(role = R::NAME, dropped, "discarded queued commands");
    }

    role.on_reset(reason);

    if live {
        if let Err(err) = shared.state.transition(ConnectionState::finish_reset) {
            warn!(error = %err, "state out of sync after reset");
        }
    }
}

/// Sleep for `delay`, waking early on shutdown.
fn pause(shared: &Shared, delay: Duration) {
    let deadline = Instant::now() + delay;
    while !shared.is_shutting_down() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(SHUTDOWN_POLL.min(deadline - now));
    }
}
