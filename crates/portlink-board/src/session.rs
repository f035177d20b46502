use std::io::{ErrorKind, Read, Write};

use bytes::BytesMut;
use portlink_transport::LinkStream;
use tracing::{debug, info};

use crate::error::Result;
use crate::machine::PortMachine;
use crate::mux::ChannelMux;
use crate::peripherals::SimPeripherals;

const READ_CHUNK_SIZE: usize = 1024;

/// One board connection: reads request frames from the transport, feeds the
/// channel multiplexer, writes the produced responses back, and delivers
/// simulated asynchronous events (UART loopback data) between exchanges.
pub struct BoardSession {
    stream: LinkStream,
    mux: ChannelMux<SimPeripherals>,
}

impl BoardSession {
    pub fn new(stream: LinkStream) -> Self {
        Self::with_mux(stream, ChannelMux::new(SimPeripherals::new(), SimPeripherals::new()))
    }

    pub fn with_mux(stream: LinkStream, mux: ChannelMux<SimPeripherals>) -> Self {
        Self { stream, mux }
    }

    pub fn mux_mut(&mut self) -> &mut ChannelMux<SimPeripherals> {
        &mut self.mux
    }

    /// Serve the connection until the peer disconnects.
    pub fn run(&mut self) -> Result<()> {
        info!("board session started");
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut out = BytesMut::new();

        loop {
            let read = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    info!("peer disconnected");
                    return Ok(());
                }
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };

            self.mux.feed(&chunk[..read], &mut out)?;
            self.pump_async_events()?;

            if !out.is_empty() {
                debug!(len = out.len(), "writing response");
                self.stream.write_all(&out)?;
                self.stream.flush()?;
                out.clear();
            }
        }
    }

    /// Move simulated hardware events into the reply streams: UART data the
    /// backend looped back becomes ASYNC_UART_RX frames once the owning
    /// port is in a state that permits async events.
    fn pump_async_events(&mut self) -> Result<()> {
        Self::pump_port(self.mux.port_a_mut())?;
        Self::pump_port(self.mux.port_b_mut())?;
        Ok(())
    }

    fn pump_port(machine: &mut PortMachine<SimPeripherals>) -> Result<()> {
        while machine.async_events_allowed() {
            let Some(data) = machine.peripherals_mut().pop_uart_rx() else {
                break;
            };
            if !machine.inject_uart_rx(&data)? {
                machine.peripherals_mut().requeue_uart_rx(data);
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use portlink_transport::stream_pair;
    use portlink_wire::{opcode, reply, Channel, Header, HEADER_SIZE};

    #[test]
    fn serves_one_exchange_over_a_socketpair() {
        let (host, board) = stream_pair().unwrap();
        let server = std::thread::spawn(move || {
            let mut session = BoardSession::new(board);
            session.run().unwrap();
        });

        let mut host = host;
        let header = Header::request(0, 0, [0, 2, 0]).encode();
        host.write_all(&header).unwrap();
        host.write_all(&[opcode::GPIO_HIGH, 2]).unwrap();

        // First response acknowledges the header with no replies.
        let mut buf = [0u8; HEADER_SIZE];
        host.read_exact(&mut buf).unwrap();
        let resp = Header::decode(&buf).unwrap();
        assert_eq!(resp.total_len(), 0);

        // Poll exchange: GPIO_HIGH produces no reply bytes either.
        host.write_all(&Header::request(0, 0, [0, 0, 0]).encode())
            .unwrap();
        host.read_exact(&mut buf).unwrap();
        let resp = Header::decode(&buf).unwrap();
        assert_eq!(resp.len(Channel::PortA), 0);

        drop(host);
        server.join().unwrap();
    }

    #[test]
    fn uart_loopback_arrives_as_async_event() {
        let mut mux = ChannelMux::new(SimPeripherals::new(), SimPeripherals::new());
        let mut out = BytesMut::new();

        // Enable UART then TX two bytes on port A.
        let cmds = [opcode::ENABLE_UART, 0xF0, 0x0B, opcode::TX, 2, 0x61, 0x62];
        mux.feed(&Header::request(0, 0, [0, cmds.len() as u8, 0]).encode(), &mut out)
            .unwrap();
        mux.feed(&cmds, &mut out).unwrap();

        // The loopback data is pending in the backend; pump it the way the
        // session does between exchanges.
        BoardSession::pump_port(mux.port_a_mut()).unwrap();

        out.clear();
        mux.feed(&Header::request(0, 0, [0, 0, 0]).encode(), &mut out)
            .unwrap();
        let resp = Header::decode(&out[..HEADER_SIZE]).unwrap();
        assert_eq!(resp.len(Channel::PortA), 4);
        assert_eq!(&out[HEADER_SIZE..], &[reply::ASYNC_UART_RX, 2, 0x61, 0x62]);
    }
}
