mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "portlink", version, about = "Coprocessor peripheral bridge CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gpio_subcommand() {
        let cli = Cli::try_parse_from([
            "portlink",
            "gpio",
            "/tmp/board.sock",
            "--port",
            "a",
            "--pin",
            "2",
            "high",
        ])
        .expect("gpio args should parse");

        assert!(matches!(cli.command, Command::Gpio(_)));
    }

    #[test]
    fn parses_simulate_subcommand() {
        let cli = Cli::try_parse_from(["portlink", "simulate", "tcp://127.0.0.1:0", "--once"])
            .expect("simulate args should parse");
        assert!(matches!(
            cli.command,
            Command::Simulate(cmd::SimulateArgs { once: true, .. })
        ));
    }

    #[test]
    fn rejects_unknown_gpio_action() {
        let err = Cli::try_parse_from([
            "portlink",
            "gpio",
            "/tmp/board.sock",
            "--pin",
            "2",
            "blink",
        ])
        .expect_err("unknown action should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn analog_write_requires_value() {
        let err = Cli::try_parse_from([
            "portlink",
            "analog",
            "/tmp/board.sock",
            "--pin",
            "7",
            "write",
        ])
        .expect_err("write without --value should fail");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }
}
