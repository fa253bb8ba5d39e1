//! The studio side: shows the game's state and drives it with commands.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tascomm_frame::{FrameReader, FrameWriter, Origin};
use tascomm_transport::IpcStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::connector::Connector;
use crate::correlation::{CorrelationTable, QueryError, Ticket};
use crate::endpoint::{self, EndpointConfig, EndpointHandle, Role, Shared};
use crate::error::{EndpointError, Result};
use crate::handshake::{handshake_studio, HandshakeConfig};
use crate::hotkey::{BindingTable, HotkeyId};
use crate::outbound::LatestSlot;
use crate::payload::{
    GameDataType, HotkeyPressed, LineUpdates, PlaybackSnapshot, SettingToggle, VersionInfo,
};
use crate::protocol::Payload;
use crate::NoopHost;

/// Receives game data on the studio's endpoint thread.
///
/// Callbacks must return quickly: the link does not advance while they run.
#[allow(unused_variables)]
pub trait StudioHost: Send + 'static {
    /// A session is ready with a compatible game.
    fn on_ready(&mut self, peer: &VersionInfo) {}

    fn on_state(&mut self, snapshot: &PlaybackSnapshot) {}

    fn on_bindings(&mut self, bindings: &BindingTable) {}

    fn on_lines_updated(&mut self, lines: &LineUpdates) {}

    fn on_reset(&mut self, reason: &EndpointError) {}

    /// The game needs a newer studio. The endpoint stops after this call.
    fn on_version_incompatible(&mut self, game_version: &str, required: &str, local: &str) {}
}

#[derive(Debug, Default)]
struct StudioState {
    current: LatestSlot<PlaybackSnapshot>,
    bindings: RwLock<Arc<BindingTable>>,
    path: Mutex<String>,
    peer: Mutex<Option<VersionInfo>>,
    queries: Arc<CorrelationTable>,
}

impl StudioState {
    fn path(&self) -> MutexGuard<'_, String> {
        self.path.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self) -> MutexGuard<'_, Option<VersionInfo>> {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_bindings(&self, bindings: BindingTable) -> Arc<BindingTable> {
        let bindings = Arc::new(bindings);
        *self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&bindings);
        bindings
    }
}

/// Builder for a studio endpoint.
pub struct StudioEndpoint<C, H = NoopHost> {
    connector: C,
    host: H,
    config: EndpointConfig,
    path: String,
}

impl<C: Connector> StudioEndpoint<C, NoopHost> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            host: NoopHost,
            config: EndpointConfig::default(),
            path: String::new(),
        }
    }
}

impl<C: Connector, H: StudioHost> StudioEndpoint<C, H> {
    pub fn with_host<H2: StudioHost>(self, host: H2) -> StudioEndpoint<C, H2> {
        StudioEndpoint {
            connector: self.connector,
            host,
            config: self.config,
            path: self.path,
        }
    }

    pub fn with_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// File announced to the game in the first handshake.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Start the endpoint thread. It accepts, handshakes and recovers on its
    /// own until shutdown or a version mismatch.
    pub fn spawn(self) -> Result<StudioHandle> {
        let shared = Arc::new(Shared::default());
        let studio = Arc::new(StudioState {
            path: Mutex::new(self.path),
            ..StudioState::default()
        });
        let role = StudioRole {
            host: self.host,
            studio: Arc::clone(&studio),
        };
        let endpoint = endpoint::spawn(role, self.connector, shared, self.config)?;
        Ok(StudioHandle { endpoint, studio })
    }
}

/// Handle to a running studio endpoint.
#[derive(Debug, Clone)]
pub struct StudioHandle {
    endpoint: EndpointHandle,
    studio: Arc<StudioState>,
}

impl Deref for StudioHandle {
    type Target = EndpointHandle;

    fn deref(&self) -> &EndpointHandle {
        &self.endpoint
    }
}

impl StudioHandle {
    /// Announce a new file. Also used by the next handshake.
    pub fn send_path(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        *self.studio.path() = path.clone();
        self.send_command(Payload::Path(path))
    }

    pub fn send_hotkey_pressed(&self, hotkey: HotkeyId, released: bool) -> Result<()> {
        self.send_command(Payload::HotkeyPressed(HotkeyPressed { hotkey, released }))
    }

    /// Set a game setting; a `null` value toggles it.
    pub fn toggle_game_setting(
        &self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<()> {
        self.send_command(Payload::ToggleSetting(SettingToggle {
            name: name.into(),
            value,
        }))
    }

    pub fn convert_to_libtas(&self, path: impl Into<String>) -> Result<()> {
        self.send_command(Payload::ConvertToLibTas(path.into()))
    }

    /// Send a query and return a ticket to wait on.
    pub fn issue_query(
        &self,
        kind: GameDataType,
        argument: serde_json::Value,
    ) -> std::result::Result<Ticket, QueryError> {
        let shared = self.endpoint.shared();
        shared
            .state
            .when_ready(|_| self.studio.queries.issue(&shared.commands, kind, argument))
            .ok_or(QueryError::NotReady)
    }

    /// Ask the game for data and block until it answers.
    ///
    /// Never call this from a [`StudioHost`] callback: the answer is read by
    /// the same thread.
    pub fn query(
        &self,
        kind: GameDataType,
        argument: serde_json::Value,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> std::result::Result<String, QueryError> {
        self.issue_query(kind, argument)?.wait(cancel, timeout)
    }

    /// The newest snapshot received in the current session.
    pub fn current_state(&self) -> Option<PlaybackSnapshot> {
        self.studio.current.peek()
    }

    /// The game's binding table as last received.
    pub fn bindings(&self) -> Arc<BindingTable> {
        Arc::clone(
            &self
                .studio
                .bindings
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Versions announced by the connected game.
    pub fn peer_version(&self) -> Option<VersionInfo> {
        self.studio.peer().clone()
    }

    /// Path announced to the game.
    pub fn path(&self) -> String {
        self.studio.path().clone()
    }

    fn send_command(&self, payload: Payload) -> Result<()> {
        let kind = payload.kind();
        if !self.endpoint.shared().push_command(payload.to_message()?) {
            debug!(%kind, "not connected, dropping command");
        }
        Ok(())
    }
}

struct StudioRole<H> {
    host: H,
    studio: Arc<StudioState>,
}

impl<H: StudioHost> Role for StudioRole<H> {
    const NAME: &'static str = "studio";
    const SENDS: Origin = Origin::Studio;

    fn handshake(
        &mut self,
        reader: &mut FrameReader<IpcStream>,
        writer: &mut FrameWriter<IpcStream>,
        config: &HandshakeConfig,
    ) -> Result<()> {
        let path = self.studio.path().clone();
        let result = handshake_studio(reader, writer, &path, config)?;
        self.studio.set_bindings(result.bindings);
        *self.studio.peer() = Some(result.peer);
        Ok(())
    }

    fn writes_first(&self) -> bool {
        true
    }

    fn on_ready(&mut self) {
        if let Some(peer) = self.studio.peer().clone() {
            self.host.on_ready(&peer);
        }
    }

    fn dispatch(&mut self, payload: Payload) -> Result<()> {
        match payload {
            Payload::Wait => {}
            Payload::State(snapshot) => {
                self.studio.current.put(snapshot.clone());
                self.host.on_state(&snapshot);
            }
            Payload::Bindings(bindings) => {
                let bindings = self.studio.set_bindings(bindings);
                self.host.on_bindings(&bindings);
            }
            Payload::UpdateLines(lines) => self.host.on_lines_updated(&lines),
            Payload::QueryResult(response) => {
                self.studio.queries.resolve(response.token, response.result);
            }
            Payload::EstablishConnection | Payload::Reset => {
                return Err(EndpointError::ResetByPeer(payload.kind()));
            }
            Payload::VersionInfo(_) => {
                return Err(EndpointError::violation(
                    "VersionInfo is only valid during the handshake",
                ));
            }
            // Own kinds never get here; see `Role::SENDS`.
            other => return Err(EndpointError::unexpected(other.kind(), Self::NAME)),
        }
        Ok(())
    }

    fn on_reset(&mut self, reason: &EndpointError) {
        self.studio.queries.cancel_all();
        self.studio.current.clear();
        *self.studio.peer() = None;
        self.host.on_reset(reason);
    }

    fn on_fatal(&mut self, reason: &EndpointError) {
        if let EndpointError::VersionIncompatible {
            peer_version,
            required,
            local,
        } = reason
        {
            error!(%peer_version, %required, %local, "incompatible game, giving up");
            self.host
                .on_version_incompatible(peer_version, required, local);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use serde_json::json;
    use tascomm_frame::{Message, MessageKind};

    use super::*;
    use crate::handshake::send;
    use crate::hotkey::KeyCode;
    use crate::payload::{QueryRequest, QueryResponse, TasStates};
    use crate::state::ConnectionState;

    #[derive(Debug, PartialEq)]
    enum Event {
        Ready(VersionInfo),
        State(u32),
        Bindings(usize),
        Lines(LineUpdates),
        Reset(String),
        Incompatible(String, String, String),
    }

    struct Recorder {
        events: mpsc::Sender<Event>,
    }

    impl StudioHost for Recorder {
        fn on_ready(&mut self, peer: &VersionInfo) {
            let _ = self.events.send(Event::Ready(peer.clone()));
        }

        fn on_state(&mut self, snapshot: &PlaybackSnapshot) {
            let _ = self.events.send(Event::State(snapshot.current_frame_in_tas));
        }

        fn on_bindings(&mut self, bindings: &BindingTable) {
            let _ = self.events.send(Event::Bindings(bindings.len()));
        }

        fn on_lines_updated(&mut self, lines: &LineUpdates) {
            let _ = self.events.send(Event::Lines(lines.clone()));
        }

        fn on_reset(&mut self, reason: &EndpointError) {
            let _ = self.events.send(Event::Reset(reason.to_string()));
        }

        fn on_version_incompatible(&mut self, game_version: &str, required: &str, local: &str) {
            let _ = self.events.send(Event::Incompatible(
                game_version.to_string(),
                required.to_string(),
                local.to_string(),
            ));
        }
    }

    /// Drives the game side of a session by hand.
    struct FakeGame {
        reader: FrameReader<IpcStream>,
        writer: FrameWriter<IpcStream>,
    }

    impl FakeGame {
        fn handshake(stream: IpcStream, min_studio: &str) -> (Self, String) {
            let mut game = FakeGame {
                reader: FrameReader::new(stream.try_clone().unwrap()),
                writer: FrameWriter::new(stream),
            };
            send(&mut game.writer, &Payload::Reset).unwrap();
            assert_eq!(game.read().kind, MessageKind::EstablishConnection);
            let Payload::Path(path) = game.payload() else {
                panic!("expected a path");
            };
            let bindings = BindingTable::new().with(HotkeyId::Pause, [KeyCode(80)]);
            send(&mut game.writer, &Payload::Bindings(bindings)).unwrap();
            send(
                &mut game.writer,
                &Payload::VersionInfo(VersionInfo::new("3.40.0", min_studio)),
            )
            .unwrap();
            (game, path)
        }

        fn read(&mut self) -> Message {
            self.reader.read_message().unwrap()
        }

        fn payload(&mut self) -> Payload {
            Payload::from_message(&self.read()).unwrap()
        }

        /// One game turn: read the studio's frame, answer with `reply`.
        fn turn(&mut self, reply: Payload) -> Payload {
            let received = self.payload();
            send(&mut self.writer, &reply).unwrap();
            received
        }
    }

    fn spawn_studio(
        stream: IpcStream,
        path: &str,
        version: &str,
    ) -> (StudioHandle, mpsc::Receiver<Event>) {
        let (events, rx) = mpsc::channel();
        let mut streams = vec![stream].into_iter();
        let connector = move || {
            streams.next().ok_or_else(|| {
                tascomm_transport::TransportError::Io(std::io::Error::from(
                    std::io::ErrorKind::ConnectionRefused,
                ))
            })
        };
        let config = EndpointConfig {
            reconnect_delay: Duration::from_millis(10),
            idle_pause: Duration::from_millis(1),
            read_slice: Duration::from_millis(10),
            handshake: HandshakeConfig {
                local_version: version.to_string(),
                ..HandshakeConfig::default()
            },
            ..EndpointConfig::default()
        };
        let handle = StudioEndpoint::new(connector)
            .with_host(Recorder { events })
            .with_path(path)
            .with_config(config)
            .spawn()
            .unwrap();
        (handle, rx)
    }

    fn next(events: &mpsc::Receiver<Event>) -> Event {
        events.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn handshake_reports_ready_with_bindings() {
        let (ours, theirs) = IpcStream::pair().unwrap();
        let (studio, events) = spawn_studio(ours, "/tas/1A.tas", "2.6.0");

        let (_game, path) = FakeGame::handshake(theirs, "2.5");
        assert_eq!(path, "/tas/1A.tas");
        assert_eq!(next(&events), Event::Ready(VersionInfo::new("3.40.0", "2.5")));
        assert_eq!(studio.bindings().len(), 1);
        assert_eq!(
            studio.peer_version().map(|v| v.game_version),
            Some("3.40.0".to_string())
        );

        studio.shutdown();
        studio.join().unwrap();
    }

    #[test]
    fn state_and_lines_reach_the_host() {
        let (ours, theirs) = IpcStream::pair().unwrap();
        let (studio, events) = spawn_studio(ours, "", "2.6.0");
        let (mut game, _) = FakeGame::handshake(theirs, "2.5");
        next(&events);

        let snapshot = PlaybackSnapshot {
            current_frame_in_tas: 42,
            tas_states: TasStates::ENABLE,
            ..PlaybackSnapshot::default()
        };
        assert_eq!(game.turn(Payload::State(snapshot)), Payload::Wait);
        assert_eq!(next(&events), Event::State(42));

        let mut lines = LineUpdates::new();
        lines.insert(7, "  12,R".to_string());
        game.turn(Payload::UpdateLines(lines.clone()));
        assert_eq!(next(&events), Event::Lines(lines));

        game.turn(Payload::Bindings(BindingTable::new()));
        assert_eq!(next(&events), Event::Bindings(0));
        assert!(studio.bindings().is_empty());
        assert_eq!(
            studio.current_state().map(|s| s.current_frame_in_tas),
            Some(42)
        );

        studio.shutdown();
        studio.join().unwrap();
    }

    #[test]
    fn commands_go_out_in_order() {
        let (ours, theirs) = IpcStream::pair().unwrap();
        let (studio, events) = spawn_studio(ours, "", "2.6.0");
        let (mut game, _) = FakeGame::handshake(theirs, "2.5");
        next(&events);

        studio.send_path("/tas/2B.tas").unwrap();
        studio
            .send_hotkey_pressed(HotkeyId::FastForward, false)
            .unwrap();
        studio
            .toggle_game_setting("Hitboxes", serde_json::Value::Null)
            .unwrap();

        let mut received = Vec::new();
        while received.len() < 3 {
            match game.turn(Payload::Wait) {
                Payload::Wait => {}
                other => received.push(other.kind()),
            }
        }
        assert_eq!(
            received,
            vec![
                MessageKind::SendPath,
                MessageKind::SendHotkeyPressed,
                MessageKind::ToggleGameSetting
            ]
        );
        assert_eq!(studio.path(), "/tas/2B.tas");

        studio.shutdown();
        studio.join().unwrap();
    }

    #[test]
    fn query_round_trip() {
        let (ours, theirs) = IpcStream::pair().unwrap();
        let (studio, events) = spawn_studio(ours, "", "2.6.0");
        let (mut game, _) = FakeGame::handshake(theirs, "2.5");
        next(&events);

        let asking = {
            let studio = studio.clone();
            thread::spawn(move || {
                studio.query(
                    GameDataType::ModInfo,
                    json!(null),
                    &CancellationToken::new(),
                    Some(Duration::from_secs(5)),
                )
            })
        };

        let request: QueryRequest = loop {
            if let Payload::Query(request) = game.turn(Payload::Wait) {
                break request;
            }
        };
        assert_eq!(request.kind, GameDataType::ModInfo);
        game.turn(Payload::QueryResult(QueryResponse {
            token: request.token,
            result: "CelesteTAS 3.40.0".to_string(),
        }));

        assert_eq!(asking.join().unwrap(), Ok("CelesteTAS 3.40.0".to_string()));

        studio.shutdown();
        studio.join().unwrap();
    }

    #[test]
    fn queries_need_a_session() {
        let (ours, _theirs) = IpcStream::pair().unwrap();
        let (studio, _events) = spawn_studio(ours, "", "2.6.0");
        assert_eq!(
            studio
                .issue_query(GameDataType::ExactGameInfo, json!(null))
                .unwrap_err(),
            QueryError::NotReady
        );
        studio.send_path("/tas/later.tas").unwrap();
        assert_eq!(studio.path(), "/tas/later.tas");

        studio.shutdown();
        studio.join().unwrap();
    }

    #[test]
    fn reset_fails_pending_queries() {
        let (ours, theirs) = IpcStream::pair().unwrap();
        let (studio, events) = spawn_studio(ours, "", "2.6.0");
        let (mut game, _) = FakeGame::handshake(theirs, "2.5");
        next(&events);

        let ticket = studio
            .issue_query(GameDataType::ConsoleCommand, json!("load 1A"))
            .unwrap();
        game.turn(Payload::Reset);

        assert_eq!(
            ticket.wait(&CancellationToken::new(), Some(Duration::from_secs(5))),
            Err(QueryError::ConnectionReset)
        );
        assert!(matches!(next(&events), Event::Reset(_)));
        assert!(studio.current_state().is_none());

        studio.shutdown();
        studio.join().unwrap();
    }

    #[test]
    fn path_from_game_forces_reset() {
        let (ours, theirs) = IpcStream::pair().unwrap();
        let (studio, events) = spawn_studio(ours, "", "2.6.0");
        let (mut game, _) = FakeGame::handshake(theirs, "2.5");
        next(&events);

        game.turn(Payload::Path("/nope".to_string()));
        let Event::Reset(reason) = next(&events) else {
            panic!("expected a reset");
        };
        assert!(reason.contains("studio endpoint does not accept SendPath"), "{reason}");

        studio.shutdown();
        studio.join().unwrap();
    }

    #[test]
    fn version_gate_stops_the_endpoint() {
        let (ours, theirs) = IpcStream::pair().unwrap();
        let (studio, events) = spawn_studio(ours, "", "2.4.0");
        let _game = FakeGame::handshake(theirs, "2.5");

        let mut seen = Vec::new();
        while seen.len() < 2 {
            seen.push(next(&events));
        }
        assert!(matches!(seen[0], Event::Reset(_)));
        assert_eq!(
            seen[1],
            Event::Incompatible("3.40.0".to_string(), "2.5".to_string(), "2.4.0".to_string())
        );

        let err = studio.join().unwrap_err();
        assert!(matches!(err, EndpointError::VersionIncompatible { .. }));
        assert_eq!(studio.state(), ConnectionState::Uninitialized);
        assert_eq!(studio.sessions(), 0);
    }
}
