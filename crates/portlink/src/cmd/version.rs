use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("portlink {}", env!("CARGO_PKG_VERSION"));
    if args.extended {
        println!("target: {}", option_env!("PORTLINK_BUILD_TARGET").unwrap_or("unknown"));
        println!("rust-version: {}", env!("CARGO_PKG_RUST_VERSION"));
    }
    Ok(SUCCESS)
}
