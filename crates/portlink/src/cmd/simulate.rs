use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portlink_board::{BoardSession, ChannelMux, SimPeripherals};
use portlink_transport::{Endpoint, LinkListener};
use tracing::{info, warn};

use crate::cmd::SimulateArgs;
use crate::exit::{board_error, transport_error, CliError, CliResult, SUCCESS};

pub fn run(args: SimulateArgs) -> CliResult<i32> {
    let endpoint: Endpoint = args
        .endpoint
        .parse()
        .map_err(|err| transport_error("invalid endpoint", err))?;
    let listener =
        LinkListener::bind(&endpoint).map_err(|err| transport_error("bind failed", err))?;
    if let Some(addr) = listener.local_tcp_addr() {
        info!(%addr, "simulator listening");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(err) => return Err(transport_error("accept failed", err)),
        };

        let mut port_a = SimPeripherals::new();
        let mut port_b = SimPeripherals::new();
        if args.no_uart_loopback {
            port_a.set_uart_loopback(false);
            port_b.set_uart_loopback(false);
        }
        let mux = ChannelMux::new(port_a, port_b);

        let mut session = BoardSession::with_mux(stream, mux);
        match session.run() {
            Ok(()) => info!("session ended"),
            Err(err) if args.once => return Err(board_error("session failed", err)),
            // A protocol fault poisons only this connection; keep serving.
            Err(err) => warn!(%err, "session failed"),
        }

        if args.once {
            return Ok(SUCCESS);
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
