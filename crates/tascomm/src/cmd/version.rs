use tascomm_endpoint::HandshakeConfig;
use tascomm_frame::{MessageKind, HEADER_SIZE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("tascomm {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let handshake = HandshakeConfig::default();
    println!("name: tascomm");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("TASCOMM_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("studio_version: {}", handshake.local_version);
    println!("min_studio_version: {}", handshake.min_studio_version);
    println!("frame_header_bytes: {HEADER_SIZE}");
    println!("message_kinds: {}", MessageKind::ALL.len());

    Ok(SUCCESS)
}
