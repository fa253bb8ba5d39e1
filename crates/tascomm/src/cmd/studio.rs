use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use tascomm_endpoint::{
    EndpointConfig, EndpointError, GameDataType, PlaybackSnapshot, QueryError, SocketAcceptor,
    StudioEndpoint, StudioHandle, StudioHost, VersionInfo,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, StudioArgs};
use crate::exit::{
    endpoint_error, query_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_query_result, print_snapshot, OutputFormat};

const POLL: Duration = Duration::from_millis(50);
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards snapshots to the printing thread.
struct Printer {
    snapshots: mpsc::Sender<PlaybackSnapshot>,
}

impl StudioHost for Printer {
    fn on_ready(&mut self, peer: &VersionInfo) {
        info!(game_version = %peer.game_version, "game connected");
    }

    fn on_state(&mut self, snapshot: &PlaybackSnapshot) {
        let _ = self.snapshots.send(snapshot.clone());
    }

    fn on_reset(&mut self, reason: &EndpointError) {
        warn!(%reason, "link reset, waiting for the game");
    }
}

pub fn run(args: StudioArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let query = args.query.as_deref().map(parse_query).transpose()?;
    let config = EndpointConfig {
        idle_timeout: Some(parse_duration(&args.idle_timeout)?),
        ..EndpointConfig::default()
    };

    let acceptor =
        SocketAcceptor::bind(&args.socket).map_err(|err| transport_error("bind failed", err))?;
    let (snapshots, received) = mpsc::channel();
    let studio = StudioEndpoint::new(acceptor)
        .with_path(args.tas_path.unwrap_or_default())
        .with_host(Printer { snapshots })
        .with_config(config)
        .spawn()
        .map_err(|err| endpoint_error("studio failed to start", err))?;

    let cancel = CancellationToken::new();
    {
        let studio = studio.clone();
        let cancel = cancel.clone();
        install_ctrlc_handler(move || {
            cancel.cancel();
            studio.shutdown();
        })?;
    }

    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let mut pending_query = query;
    let mut printed = 0usize;

    loop {
        if studio.is_finished() {
            return finish(&studio);
        }

        if studio.is_ready() {
            if let Some((kind, argument)) = pending_query.take() {
                match studio.query(kind, argument.clone(), &cancel, Some(QUERY_TIMEOUT)) {
                    Ok(result) => print_query_result(kind, &argument, &result, format),
                    Err(QueryError::Cancelled) => return finish(&studio),
                    Err(err) => {
                        studio.shutdown();
                        let _ = studio.join();
                        return Err(query_error("query failed", err));
                    }
                }
            }
        }

        match received.recv_timeout(POLL) {
            Ok(snapshot) => {
                print_snapshot(&snapshot, format);
                printed = printed.saturating_add(1);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return finish(&studio),
        }

        let done = pending_query.is_none()
            && match args.count {
                Some(count) => printed >= count,
                None => args.query.is_some(),
            };
        if done {
            studio.shutdown();
            return finish(&studio);
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            studio.shutdown();
            finish(&studio)?;
            return Err(CliError::new(TIMEOUT, "studio timed out"));
        }
    }
}

fn finish(studio: &StudioHandle) -> CliResult<i32> {
    studio
        .join()
        .map_err(|err| endpoint_error("studio stopped", err))?;
    Ok(SUCCESS)
}

/// `KIND` or `KIND:ARG`; `ARG` is JSON when it parses, else a plain string.
fn parse_query(input: &str) -> CliResult<(GameDataType, serde_json::Value)> {
    let (kind, argument) = match input.split_once(':') {
        Some((kind, argument)) => (kind, Some(argument)),
        None => (input, None),
    };
    let kind: GameDataType = kind.parse().map_err(|err| CliError::new(USAGE, err))?;
    let argument = match argument {
        None => serde_json::Value::Null,
        Some(raw) => serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
    };
    Ok((kind, argument))
}
