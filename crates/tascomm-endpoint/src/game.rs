//! The game side: publishes playback state and obeys studio commands.

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tascomm_frame::{FrameReader, FrameWriter, Origin};
use tascomm_transport::IpcStream;
use tracing::debug;

use crate::connector::Connector;
use crate::endpoint::{self, EndpointConfig, EndpointHandle, Role, Shared};
use crate::error::{EndpointError, Result};
use crate::handshake::{handshake_game, HandshakeConfig};
use crate::hotkey::BindingTable;
use crate::payload::{
    HotkeyPressed, LineUpdates, PlaybackSnapshot, QueryRequest, QueryResponse, SettingToggle,
};
use crate::protocol::Payload;
use crate::NoopHost;

/// Receives studio commands on the game's endpoint thread.
///
/// Callbacks must return quickly: the link does not advance while they run.
#[allow(unused_variables)]
pub trait GameHost: Send + 'static {
    /// A session is ready; `studio_path` is the file open in the studio.
    fn on_connected(&mut self, studio_path: &str) {}

    /// The studio switched files.
    fn on_path(&mut self, path: &str) {}

    fn on_hotkey(&mut self, pressed: HotkeyPressed) {}

    fn on_toggle_setting(&mut self, toggle: SettingToggle) {}

    fn on_convert_to_libtas(&mut self, path: &str) {}

    /// Answer `request` now or later through `responder`.
    fn on_query(&mut self, request: QueryRequest, responder: QueryResponder) {
        debug!(kind = %request.kind, "no query handler, answering empty");
        responder.respond(String::new());
    }

    fn on_reset(&mut self, reason: &EndpointError) {}
}

/// Sends the answer for one studio query, from any thread.
///
/// An answer produced after the session that asked has ended is dropped.
#[derive(Debug)]
pub struct QueryResponder {
    token: u64,
    session: u64,
    shared: Arc<Shared>,
}

impl QueryResponder {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn respond(self, result: impl Into<String>) {
        let response = QueryResponse {
            token: self.token,
            result: result.into(),
        };
        let message = match Payload::QueryResult(response).to_message() {
            Ok(message) => message,
            Err(err) => {
                debug!(token = self.token, error = %err, "could not encode answer");
                return;
            }
        };
        let queued = self.shared.state.when_ready(|session| {
            let current = session == self.session;
            if current {
                self.shared.commands.push(message);
            }
            current
        });
        if queued != Some(true) {
            debug!(token = self.token, "session ended before the answer, dropping it");
        }
    }
}

#[derive(Debug, Default)]
struct GameState {
    bindings: RwLock<BindingTable>,
    studio_path: Mutex<String>,
}

impl GameState {
    fn set_studio_path(&self, path: &str) {
        let mut current = self
            .studio_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        current.clear();
        current.push_str(path);
    }
}

/// Builder for a game endpoint.
pub struct GameEndpoint<C, H = NoopHost> {
    connector: C,
    host: H,
    config: EndpointConfig,
    bindings: BindingTable,
}

impl<C: Connector> GameEndpoint<C, NoopHost> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            host: NoopHost,
            config: EndpointConfig::default(),
            bindings: BindingTable::default(),
        }
    }
}

impl<C: Connector, H: GameHost> GameEndpoint<C, H> {
    pub fn with_host<H2: GameHost>(self, host: H2) -> GameEndpoint<C, H2> {
        GameEndpoint {
            connector: self.connector,
            host,
            config: self.config,
            bindings: self.bindings,
        }
    }

    pub fn with_config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Bindings announced in every handshake until replaced by
    /// [`GameHandle::send_bindings`].
    pub fn with_bindings(mut self, bindings: BindingTable) -> Self {
        self.bindings = bindings;
        self
    }

    /// Start the endpoint thread. It dials, handshakes and reconnects on its
    /// own until [`EndpointHandle::shutdown`].
    pub fn spawn(self) -> Result<GameHandle> {
        let shared = Arc::new(Shared::default());
        let game = Arc::new(GameState {
            bindings: RwLock::new(self.bindings),
            studio_path: Mutex::default(),
        });
        let role = GameRole {
            host: self.host,
            shared: Arc::clone(&shared),
            game: Arc::clone(&game),
            pending_path: String::new(),
        };
        let endpoint = endpoint::spawn(role, self.connector, shared, self.config)?;
        Ok(GameHandle { endpoint, game })
    }
}

/// Handle to a running game endpoint.
#[derive(Debug, Clone)]
pub struct GameHandle {
    endpoint: EndpointHandle,
    game: Arc<GameState>,
}

impl Deref for GameHandle {
    type Target = EndpointHandle;

    fn deref(&self) -> &EndpointHandle {
        &self.endpoint
    }
}

impl GameHandle {
    /// Publish the current playback state. Only the newest unsent snapshot
    /// reaches the studio.
    pub fn send_state(&self, snapshot: &PlaybackSnapshot) -> Result<()> {
        let message = Payload::State(snapshot.clone()).to_message()?;
        self.endpoint.shared().latest.put(message);
        Ok(())
    }

    /// Push edited lines to the studio. Dropped when no session is ready.
    pub fn update_lines(&self, lines: LineUpdates) -> Result<()> {
        self.send_command(Payload::UpdateLines(lines))
    }

    /// Replace the binding table, for this session and every later handshake.
    pub fn send_bindings(&self, bindings: BindingTable) -> Result<()> {
        *self
            .game
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = bindings.clone();
        self.send_command(Payload::Bindings(bindings))
    }

    /// Path of the file open in the studio, as last announced.
    pub fn studio_path(&self) -> String {
        self.game
            .studio_path
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send_command(&self, payload: Payload) -> Result<()> {
        let kind = payload.kind();
        if !self.endpoint.shared().push_command(payload.to_message()?) {
            debug!(%kind, "not connected, dropping command");
        }
        Ok(())
    }
}

struct GameRole<H> {
    host: H,
    shared: Arc<Shared>,
    game: Arc<GameState>,
    /// Studio path from the handshake, reported once the session is ready.
    pending_path: String,
}

impl<H: GameHost> Role for GameRole<H> {
    const NAME: &'static str = "game";
    const SENDS: Origin = Origin::Game;

    fn handshake(
        &mut self,
        reader: &mut FrameReader<IpcStream>,
        writer: &mut FrameWriter<IpcStream>,
        config: &HandshakeConfig,
    ) -> Result<()> {
        let bindings = self
            .game
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let result = handshake_game(reader, writer, &bindings, config)?;
        self.game.set_studio_path(&result.studio_path);
        self.pending_path = result.studio_path;
        Ok(())
    }

    fn writes_first(&self) -> bool {
        false
    }

    fn on_ready(&mut self) {
        let path = std::mem::take(&mut self.pending_path);
        self.host.on_connected(&path);
    }

    fn dispatch(&mut self, payload: Payload) -> Result<()> {
        match payload {
            Payload::Wait => {}
            Payload::Path(path) => {
                self.game.set_studio_path(&path);
                self.host.on_path(&path);
            }
            Payload::HotkeyPressed(pressed) => self.host.on_hotkey(pressed),
            Payload::ToggleSetting(toggle) => self.host.on_toggle_setting(toggle),
            Payload::ConvertToLibTas(path) => self.host.on_convert_to_libtas(&path),
            Payload::Query(request) => {
                let responder = QueryResponder {
                    token: request.token,
                    session: self.shared.state.sessions(),
                    shared: Arc::clone(&self.shared),
                };
                self.host.on_query(request, responder);
            }
            Payload::EstablishConnection | Payload::Reset => {
                return Err(EndpointError::ResetByPeer(payload.kind()));
            }
            // Own kinds never get here; see `Role::SENDS`.
            other => return Err(EndpointError::unexpected(other.kind(), Self::NAME)),
        }
        Ok(())
    }

    fn on_reset(&mut self, reason: &EndpointError) {
        self.host.on_reset(reason);
    }
}
