use clap::{Args, Subcommand, ValueEnum};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod analog;
pub mod gpio;
pub mod probe;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulated board, serving the bridge protocol.
    Simulate(SimulateArgs),
    /// Drive or read a GPIO pin on a running board.
    Gpio(GpioArgs),
    /// Read or write an analog pin on a running board.
    Analog(AnalogArgs),
    /// Connect to a board and measure sync round-trips.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args),
        Command::Gpio(args) => gpio::run(args, format),
        Command::Analog(args) => analog::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Port selector shared by the client subcommands.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum PortArg {
    A,
    B,
}

impl PortArg {
    pub fn name(self) -> portlink_host::PortName {
        match self {
            PortArg::A => portlink_host::PortName::A,
            PortArg::B => portlink_host::PortName::B,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PortArg::A => "A",
            PortArg::B => "B",
        }
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Endpoint to listen on: a socket path or tcp://host:port.
    pub endpoint: String,
    /// Disable UART loopback (TX data echoed back as RX events).
    #[arg(long)]
    pub no_uart_loopback: bool,
    /// Exit after serving a single connection.
    #[arg(long)]
    pub once: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum GpioAction {
    High,
    Low,
    Toggle,
    Read,
}

#[derive(Args, Debug)]
pub struct GpioArgs {
    /// Endpoint of the board: a socket path or tcp://host:port.
    pub endpoint: String,
    /// Port to address.
    #[arg(long, short = 'p', value_enum, default_value = "a")]
    pub port: PortArg,
    /// Pin number (0-7).
    #[arg(long, short = 'n')]
    pub pin: u8,
    /// What to do with the pin.
    #[arg(value_enum)]
    pub action: GpioAction,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum AnalogAction {
    Read,
    Write,
}

#[derive(Args, Debug)]
pub struct AnalogArgs {
    /// Endpoint of the board: a socket path or tcp://host:port.
    pub endpoint: String,
    /// Port to address.
    #[arg(long, short = 'p', value_enum, default_value = "a")]
    pub port: PortArg,
    /// Pin number (0-7).
    #[arg(long, short = 'n')]
    pub pin: u8,
    /// Read the ADC or write the DAC.
    #[arg(value_enum)]
    pub action: AnalogAction,
    /// Output level for writes, 0.0-1.0.
    #[arg(long, required_if_eq("action", "write"))]
    pub value: Option<f64>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Endpoint of the board: a socket path or tcp://host:port.
    pub endpoint: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
