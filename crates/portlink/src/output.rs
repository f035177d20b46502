use std::io::IsTerminal;
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PinOutput<'a> {
    port: &'a str,
    pin: u8,
    level: &'a str,
}

pub fn print_pin_level(port: &str, pin: u8, level: bool, format: OutputFormat) {
    let level_name = if level { "high" } else { "low" };
    match format {
        OutputFormat::Json => {
            let out = PinOutput {
                port,
                pin,
                level: level_name,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "PIN", "LEVEL"])
                .add_row(vec![port.to_string(), pin.to_string(), level_name.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("port={port} pin={pin} level={level_name}");
        }
    }
}

#[derive(Serialize)]
struct AnalogOutput<'a> {
    port: &'a str,
    pin: u8,
    value: f64,
    raw: u16,
}

pub fn print_analog_value(port: &str, pin: u8, value: f64, resolution: u16, format: OutputFormat) {
    let raw = (value * f64::from(resolution)) as u16;
    match format {
        OutputFormat::Json => {
            let out = AnalogOutput {
                port,
                pin,
                value,
                raw,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "PIN", "VALUE", "RAW"])
                .add_row(vec![
                    port.to_string(),
                    pin.to_string(),
                    format!("{value:.4}"),
                    raw.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("port={port} pin={pin} value={value:.4} raw={raw}");
        }
    }
}

#[derive(Serialize)]
struct ProbeOutput<'a> {
    endpoint: &'a str,
    port_a_rtt_us: u128,
    port_b_rtt_us: u128,
}

pub fn print_probe(endpoint: &str, rtt_a: Duration, rtt_b: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ProbeOutput {
                endpoint,
                port_a_rtt_us: rtt_a.as_micros(),
                port_b_rtt_us: rtt_b.as_micros(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "SYNC RTT"])
                .add_row(vec!["A".to_string(), format!("{rtt_a:?}")])
                .add_row(vec!["B".to_string(), format!("{rtt_b:?}")]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("endpoint={endpoint} port_a_rtt={rtt_a:?} port_b_rtt={rtt_b:?}");
        }
    }
}
