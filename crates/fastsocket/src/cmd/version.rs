use fastsocket_message::DEFAULT_MAX_FRAME_SIZE;
use fastsocket_peer::DEFAULT_REQUEST_TIMEOUT;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    let version = env!("CARGO_PKG_VERSION");
    if !args.extended {
        println!("fastsocket {version}");
        return Ok(SUCCESS);
    }

    let build_target = option_env!("FASTSOCKET_BUILD_TARGET").unwrap_or("unknown");
    let build_profile = option_env!("FASTSOCKET_BUILD_PROFILE").unwrap_or("unknown");
    println!("name: fastsocket");
    println!("version: {version}");
    println!("build_target: {build_target}");
    println!("build_profile: {build_profile}");
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("features: peer={}, cli=true", cfg!(feature = "peer"));
    println!("wire: json text frames {{id, type, data}}");
    println!("max_frame_size: {DEFAULT_MAX_FRAME_SIZE}");
    println!("default_request_timeout: {}s", DEFAULT_REQUEST_TIMEOUT.as_secs());

    Ok(SUCCESS)
}
