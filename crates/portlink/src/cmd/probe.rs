use std::time::Instant;

use portlink_host::{Bridge, PortName};
use portlink_transport::Endpoint;

use crate::cmd::ProbeArgs;
use crate::exit::{host_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_probe, OutputFormat};

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint: Endpoint = args
        .endpoint
        .parse()
        .map_err(|err| transport_error("invalid endpoint", err))?;
    let mut bridge =
        Bridge::connect(&endpoint).map_err(|err| host_error("connect failed", err))?;

    let start = Instant::now();
    bridge
        .ping(PortName::A)
        .map_err(|err| host_error("port A sync failed", err))?;
    let rtt_a = start.elapsed();

    let start = Instant::now();
    bridge
        .ping(PortName::B)
        .map_err(|err| host_error("port B sync failed", err))?;
    let rtt_b = start.elapsed();

    print_probe(&args.endpoint, rtt_a, rtt_b, format);

    bridge.close().map_err(|err| host_error("close failed", err))?;
    Ok(SUCCESS)
}
