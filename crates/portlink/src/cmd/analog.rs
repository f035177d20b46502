use portlink_host::{Bridge, ANALOG_RESOLUTION};
use portlink_transport::Endpoint;

use crate::cmd::{AnalogAction, AnalogArgs};
use crate::exit::{host_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_analog_value, OutputFormat};

pub fn run(args: AnalogArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint: Endpoint = args
        .endpoint
        .parse()
        .map_err(|err| transport_error("invalid endpoint", err))?;
    let mut bridge =
        Bridge::connect(&endpoint).map_err(|err| host_error("connect failed", err))?;

    let port = args.port.name();
    match args.action {
        AnalogAction::Read => {
            let value = bridge
                .analog_read(port, args.pin)
                .map_err(|err| host_error("analog read failed", err))?;
            print_analog_value(args.port.as_str(), args.pin, value, ANALOG_RESOLUTION, format);
        }
        AnalogAction::Write => {
            let value = args
                .value
                .ok_or_else(|| CliError::new(USAGE, "analog write requires --value"))?;
            bridge
                .analog_write(port, args.pin, value)
                .map_err(|err| host_error("analog write failed", err))?;
        }
    }

    bridge.close().map_err(|err| host_error("close failed", err))?;
    Ok(SUCCESS)
}
