use std::thread;
use std::time::Duration;

use tascomm_endpoint::{
    BindingTable, EndpointConfig, EndpointError, GameEndpoint, GameHandle, GameHost,
    HandshakeConfig, HotkeyId, HotkeyPressed, KeyCode, PlaybackSnapshot, QueryRequest,
    QueryResponder, SettingToggle, SocketConnector, TasStates,
};
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, GameArgs};
use crate::exit::{endpoint_error, CliError, CliResult, SUCCESS, USAGE};

/// Logs studio commands and answers every query with `kind:argument`.
struct SimulatedGame;

impl GameHost for SimulatedGame {
    fn on_connected(&mut self, studio_path: &str) {
        info!(studio_path, "studio connected");
    }

    fn on_path(&mut self, path: &str) {
        info!(path, "studio opened a file");
    }

    fn on_hotkey(&mut self, pressed: HotkeyPressed) {
        info!(hotkey = ?pressed.hotkey, released = pressed.released, "hotkey");
    }

    fn on_toggle_setting(&mut self, toggle: SettingToggle) {
        info!(name = %toggle.name, value = %toggle.value, "toggle setting");
    }

    fn on_convert_to_libtas(&mut self, path: &str) {
        info!(path, "libTAS export requested");
    }

    fn on_query(&mut self, request: QueryRequest, responder: QueryResponder) {
        debug!(kind = %request.kind, token = request.token, "answering query");
        responder.respond(format!("{}:{}", request.kind, request.argument));
    }

    fn on_reset(&mut self, reason: &EndpointError) {
        warn!(%reason, "link reset, reconnecting");
    }
}

/// Key codes a default keyboard layout would bind.
fn default_bindings() -> BindingTable {
    BindingTable::new()
        .with(HotkeyId::Start, [KeyCode(0x70)])
        .with(HotkeyId::Restart, [KeyCode(0x7B)])
        .with(HotkeyId::FastForward, [KeyCode(0xDB)])
        .with(HotkeyId::FrameAdvance, [KeyCode(0xDD)])
        .with(HotkeyId::Pause, [KeyCode(0xDC)])
        .with(HotkeyId::Hitboxes, [KeyCode(0x11), KeyCode(0x42)])
}

pub fn run(args: GameArgs) -> CliResult<i32> {
    if args.fps == 0 {
        return Err(CliError::new(USAGE, "--fps must be greater than zero"));
    }
    let frame_time = Duration::from_secs(1) / args.fps;

    let config = EndpointConfig {
        handshake: HandshakeConfig {
            local_version: args.game_version.clone(),
            min_studio_version: args.min_studio_version.clone(),
            ..HandshakeConfig::default()
        },
        ..EndpointConfig::default()
    };
    let game = GameEndpoint::new(SocketConnector::new(&args.socket))
        .with_host(SimulatedGame)
        .with_bindings(default_bindings())
        .with_config(config)
        .spawn()
        .map_err(|err| endpoint_error("game failed to start", err))?;

    {
        let game = game.clone();
        install_ctrlc_handler(move || game.shutdown())?;
    }

    let mut published = 0u32;
    while !game.is_finished() {
        if game.is_ready() {
            published = published.saturating_add(1);
            let snapshot = simulated_snapshot(&args, published);
            game.send_state(&snapshot)
                .map_err(|err| endpoint_error("publish failed", err))?;

            if args.frames.is_some_and(|frames| published >= frames) {
                // Let the last snapshot go out before leaving.
                thread::sleep(frame_time.max(Duration::from_millis(50)));
                game.shutdown();
            }
        }
        thread::sleep(frame_time);
    }

    finish(&game)
}

fn finish(game: &GameHandle) -> CliResult<i32> {
    game.join()
        .map_err(|err| endpoint_error("game stopped", err))?;
    Ok(SUCCESS)
}

fn simulated_snapshot(args: &GameArgs, frame: u32) -> PlaybackSnapshot {
    let total = args.frames.unwrap_or(0).max(frame);
    let centiseconds = u64::from(frame) * 100 / u64::from(args.fps);
    PlaybackSnapshot {
        current_line: i32::try_from(frame / 10).unwrap_or(i32::MAX),
        current_line_suffix: (frame % 10).to_string(),
        current_frame_in_tas: frame,
        total_frames: total,
        save_state_line: -1,
        tas_states: TasStates::ENABLE,
        game_info: format!("Pos: {frame}.00, 0.00"),
        level_name: args.level.clone(),
        chapter_time: format!("{}.{:02}", centiseconds / 100, centiseconds % 100),
    }
}
