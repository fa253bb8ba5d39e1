//! Session setup: the ordered handshake frames and the studio version gate.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use tascomm_frame::{FrameError, FrameReader, FrameWriter, Message, MessageKind};
use tracing::{debug, error};

use crate::error::{EndpointError, Result};
use crate::hotkey::BindingTable;
use crate::payload::VersionInfo;
use crate::protocol::Payload;

/// Configuration for the session handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Timeout for each blocking handshake read.
    pub timeout: Duration,
    /// This endpoint's own version: the studio version on the studio side,
    /// the game version on the game side.
    pub local_version: String,
    /// Oldest studio the game accepts. Only the game announces it.
    pub min_studio_version: String,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            local_version: env!("CARGO_PKG_VERSION").to_string(),
            min_studio_version: "0.1".to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

/// What the studio learns from a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct StudioHandshake {
    pub bindings: BindingTable,
    pub peer: VersionInfo,
}

/// What the game learns from a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameHandshake {
    /// File open in the studio; empty when none.
    pub studio_path: String,
}

/// Studio side: wait for the game's primer, open the session, announce the
/// path, then collect bindings and version info in that order.
pub fn handshake_studio<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    path: &str,
    config: &HandshakeConfig,
) -> Result<StudioHandshake> {
    let primer = recv_handshake_message(reader, config)?;
    debug!(kind = %primer.kind, "handshake primed");

    send(writer, &Payload::EstablishConnection)?;
    send(writer, &Payload::Path(path.to_string()))?;

    let bindings = match expect(reader, config, MessageKind::SendCurrentBindings)? {
        Payload::Bindings(table) => table,
        other => return Err(out_of_order(MessageKind::SendCurrentBindings, other.kind())),
    };
    let peer = match expect(reader, config, MessageKind::VersionInfo)? {
        Payload::VersionInfo(info) => info,
        other => return Err(out_of_order(MessageKind::VersionInfo, other.kind())),
    };

    if !is_version_compatible(&peer.min_studio_version, &config.local_version)? {
        error!(
            game = %peer.game_version,
            required = %peer.min_studio_version,
            local = %config.local_version,
            "studio is too old for this game"
        );
        return Err(EndpointError::VersionIncompatible {
            peer_version: peer.game_version,
            required: peer.min_studio_version,
            local: config.local_version.clone(),
        });
    }

    Ok(StudioHandshake { bindings, peer })
}

/// Game side: prime the pipe, accept the studio's session and path, then
/// announce bindings and versions.
pub fn handshake_game<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    bindings: &BindingTable,
    config: &HandshakeConfig,
) -> Result<GameHandshake> {
    send(writer, &Payload::Reset)?;

    expect(reader, config, MessageKind::EstablishConnection)?;
    let studio_path = match expect(reader, config, MessageKind::SendPath)? {
        Payload::Path(path) => path,
        other => return Err(out_of_order(MessageKind::SendPath, other.kind())),
    };

    send(writer, &Payload::Bindings(bindings.clone()))?;
    send(
        writer,
        &Payload::VersionInfo(VersionInfo::new(
            config.local_version.clone(),
            config.min_studio_version.clone(),
        )),
    )?;

    Ok(GameHandshake { studio_path })
}

/// Whether a studio at `local` satisfies a game that requires `required`.
///
/// Versions are `major.minor[.patch]`, optionally prefixed with `v`; missing
/// components count as zero.
pub fn is_version_compatible(required: &str, local: &str) -> Result<bool> {
    Ok(parse_version(local)? >= parse_version(required)?)
}

fn parse_version(version: &str) -> Result<semver::Version> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let padded = match trimmed.split('.').count() {
        1 => format!("{trimmed}.0.0"),
        2 => format!("{trimmed}.0"),
        _ => trimmed.to_string(),
    };
    semver::Version::parse(&padded).map_err(|err| {
        EndpointError::violation(format!("invalid version '{version}': {err}"))
    })
}

pub(crate) fn send<W: Write>(writer: &mut FrameWriter<W>, payload: &Payload) -> Result<()> {
    let message = payload.to_message()?;
    writer.write_message(&message)?;
    debug!(kind = %message.kind, len = message.payload.len(), "handshake frame sent");
    Ok(())
}

fn expect<R: Read>(
    reader: &mut FrameReader<R>,
    config: &HandshakeConfig,
    kind: MessageKind,
) -> Result<Payload> {
    let message = recv_handshake_message(reader, config)?;
    if message.kind != kind {
        return Err(out_of_order(kind, message.kind));
    }
    Payload::from_message(&message)
}

fn out_of_order(expected: MessageKind, got: MessageKind) -> EndpointError {
    EndpointError::violation(format!("handshake expected {expected}, got {got}"))
}

fn recv_handshake_message<R: Read>(
    reader: &mut FrameReader<R>,
    config: &HandshakeConfig,
) -> Result<Message> {
    let deadline = Instant::now() + config.timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(EndpointError::Timeout(config.timeout));
        }

        match reader.read_message() {
            Ok(message) => {
                if message.payload.len() > config.max_handshake_payload {
                    return Err(EndpointError::violation(format!(
                        "handshake payload too large: {} (max {})",
                        message.payload.len(),
                        config.max_handshake_payload
                    )));
                }
                debug!(kind = %message.kind, len = message.payload.len(), "handshake frame received");
                return Ok(message);
            }
            Err(FrameError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                return Err(EndpointError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(err) => return Err(EndpointError::Frame(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, ErrorKind, Read};
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::hotkey::{HotkeyId, KeyCode};

    fn game_config(version: &str, min_studio: &str) -> HandshakeConfig {
        HandshakeConfig {
            local_version: version.to_string(),
            min_studio_version: min_studio.to_string(),
            ..HandshakeConfig::default()
        }
    }

    fn studio_config(version: &str) -> HandshakeConfig {
        HandshakeConfig {
            local_version: version.to_string(),
            ..HandshakeConfig::default()
        }
    }

    #[test]
    fn successful_handshake() {
        let (left, right) = UnixStream::pair().unwrap();
        let bindings = BindingTable::new().with(HotkeyId::Pause, [KeyCode(80)]);

        let game = {
            let bindings = bindings.clone();
            thread::spawn(move || {
                let mut reader = FrameReader::new(left.try_clone().unwrap());
                let mut writer = FrameWriter::new(left);
                handshake_game(&mut reader, &mut writer, &bindings, &game_config("3.40.0", "2.5"))
                    .unwrap()
            })
        };

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let studio =
            handshake_studio(&mut reader, &mut writer, "/tas/1A.tas", &studio_config("2.5.1"))
                .unwrap();
        let game = game.join().unwrap();

        assert_eq!(game.studio_path, "/tas/1A.tas");
        assert_eq!(studio.bindings, bindings);
        assert_eq!(studio.peer, VersionInfo::new("3.40.0", "2.5"));
    }

    #[test]
    fn studio_accepts_any_primer() {
        let (left, right) = UnixStream::pair().unwrap();

        let game = thread::spawn(move || {
            let mut reader = FrameReader::new(left.try_clone().unwrap());
            let mut writer = FrameWriter::new(left);
            send(&mut writer, &Payload::Wait).unwrap();
            let establish = reader.read_message().unwrap();
            let path = reader.read_message().unwrap();
            send(&mut writer, &Payload::Bindings(BindingTable::new())).unwrap();
            send(&mut writer, &Payload::VersionInfo(VersionInfo::new("1.0", "0.1"))).unwrap();
            (establish.kind, path.payload)
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        handshake_studio(&mut reader, &mut writer, "", &studio_config("0.1.0")).unwrap();

        let (establish, path) = game.join().unwrap();
        assert_eq!(establish, MessageKind::EstablishConnection);
        assert!(path.is_empty());
    }

    #[test]
    fn version_before_bindings_is_a_violation() {
        let (left, right) = UnixStream::pair().unwrap();

        let game = thread::spawn(move || {
            let mut reader = FrameReader::new(left.try_clone().unwrap());
            let mut writer = FrameWriter::new(left);
            send(&mut writer, &Payload::Reset).unwrap();
            reader.read_message().unwrap();
            reader.read_message().unwrap();
            send(&mut writer, &Payload::VersionInfo(VersionInfo::new("1.0", "0.1"))).unwrap();
            send(&mut writer, &Payload::Bindings(BindingTable::new())).unwrap();
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let err = handshake_studio(&mut reader, &mut writer, "", &studio_config("1.0.0"))
            .unwrap_err();
        game.join().unwrap();

        assert!(matches!(err, EndpointError::ProtocolViolation(ref msg) if msg.contains("expected SendCurrentBindings, got VersionInfo")));
    }

    #[test]
    fn game_rejects_path_before_establish() {
        let mut wire = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut wire);
            send(&mut writer, &Payload::Path("x.tas".to_string())).unwrap();
        }
        let mut reader = FrameReader::new(Cursor::new(wire));
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        let err = handshake_game(
            &mut reader,
            &mut writer,
            &BindingTable::new(),
            &HandshakeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EndpointError::ProtocolViolation(_)));

        let primer = tascomm_frame::decode_message(&writer.into_inner().into_inner()).unwrap();
        assert_eq!(primer.kind, MessageKind::Reset);
    }

    #[test]
    fn old_studio_is_rejected() {
        let (left, right) = UnixStream::pair().unwrap();

        let game = thread::spawn(move || {
            let mut reader = FrameReader::new(left.try_clone().unwrap());
            let mut writer = FrameWriter::new(left);
            handshake_game(
                &mut reader,
                &mut writer,
                &BindingTable::new(),
                &game_config("3.1.0", "2.5"),
            )
        });

        let mut reader = FrameReader::new(right.try_clone().unwrap());
        let mut writer = FrameWriter::new(right);
        let err = handshake_studio(&mut reader, &mut writer, "", &studio_config("2.4.9"))
            .unwrap_err();

        assert!(game.join().unwrap().is_ok());
        match err {
            EndpointError::VersionIncompatible {
                peer_version,
                required,
                local,
            } => {
                assert_eq!(peer_version, "3.1.0");
                assert_eq!(required, "2.5");
                assert_eq!(local, "2.4.9");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn version_comparison_pads_and_strips() {
        assert!(is_version_compatible("2.5", "2.5.0").unwrap());
        assert!(is_version_compatible("2.5", "v2.5.3").unwrap());
        assert!(is_version_compatible("v2", "2.0.0").unwrap());
        assert!(is_version_compatible("2.5", "3.0.0").unwrap());
        assert!(!is_version_compatible("2.5", "2.4.99").unwrap());
        assert!(!is_version_compatible("3.0", "2.9").unwrap());
        assert!(is_version_compatible("not-a-version", "1.0.0").is_err());
    }

    #[test]
    fn handshake_timeout() {
        let mut reader = FrameReader::new(AlwaysTimedOutReader);
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = HandshakeConfig {
            timeout: Duration::from_millis(25),
            ..HandshakeConfig::default()
        };

        let result = handshake_studio(&mut reader, &mut writer, "", &cfg);
        assert!(matches!(result, Err(EndpointError::Timeout(_))));
    }

    #[test]
    fn peer_closing_is_a_disconnect() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let result = handshake_game(
            &mut reader,
            &mut writer,
            &BindingTable::new(),
            &HandshakeConfig::default(),
        );
        assert!(matches!(result, Err(EndpointError::Disconnected(_))));
    }

    #[test]
    fn rejects_oversized_handshake_payload() {
        let mut wire = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut wire);
            send(&mut writer, &Payload::Reset).unwrap();
        }
        {
            let mut writer = FrameWriter::new(&mut wire);
            writer
                .send(MessageKind::SendCurrentBindings, &vec![b' '; 256])
                .unwrap();
        }
        let mut reader = FrameReader::new(Cursor::new(wire));
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        let cfg = HandshakeConfig {
            max_handshake_payload: 64,
            ..HandshakeConfig::default()
        };

        let err = handshake_studio(&mut reader, &mut writer, "", &cfg).unwrap_err();
        assert!(matches!(err, EndpointError::ProtocolViolation(ref msg) if msg.contains("too large")));
    }

    struct AlwaysTimedOutReader;

    impl Read for AlwaysTimedOutReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }
    }
}
