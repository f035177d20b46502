use portlink_host::Bridge;
use portlink_transport::Endpoint;

use crate::cmd::{GpioAction, GpioArgs};
use crate::exit::{host_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_pin_level, OutputFormat};

pub fn run(args: GpioArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint: Endpoint = args
        .endpoint
        .parse()
        .map_err(|err| transport_error("invalid endpoint", err))?;
    let mut bridge =
        Bridge::connect(&endpoint).map_err(|err| host_error("connect failed", err))?;

    let port = args.port.name();
    match args.action {
        GpioAction::High => {
            bridge
                .set_high(port, args.pin)
                .map_err(|err| host_error("gpio high failed", err))?;
        }
        GpioAction::Low => {
            bridge
                .set_low(port, args.pin)
                .map_err(|err| host_error("gpio low failed", err))?;
        }
        GpioAction::Toggle => {
            bridge
                .toggle(port, args.pin)
                .map_err(|err| host_error("gpio toggle failed", err))?;
        }
        GpioAction::Read => {
            let level = bridge
                .read_pin(port, args.pin)
                .map_err(|err| host_error("gpio read failed", err))?;
            print_pin_level(args.port.as_str(), args.pin, level, format);
        }
    }

    bridge.close().map_err(|err| host_error("close failed", err))?;
    Ok(SUCCESS)
}
