use bytes::{Buf, BytesMut};
use portlink_wire::{Channel, Header, WireError, HEADER_SIZE, REQUEST_MARKER};
use tracing::{debug, trace};

use crate::error::Result;
use crate::machine::{PortMachine, PortState};
use crate::peripherals::Peripherals;

/// Channel multiplexer: owns the two port command machines, routes inbound
/// frame payloads to the right machine's command buffer, and assembles each
/// response frame from the ports' pending replies.
///
/// Receive protocol: a request header (marker 0x53) announces per-channel
/// payload lengths; the multiplexer answers immediately with a response
/// header (marker 0xCA) carrying both ports' buffered reply lengths followed
/// by the reply bytes (Port A first), then accumulates the announced request
/// payload — across as many transport reads as it takes — before splitting
/// it by the declared lengths and stepping each machine.
pub struct ChannelMux<P> {
    port_a: PortMachine<P>,
    port_b: PortMachine<P>,
    recv: RecvState,
    in_buf: BytesMut,
}

#[derive(Clone, Copy)]
enum RecvState {
    Header,
    Data(Header),
}

impl<P: Peripherals> ChannelMux<P> {
    pub fn new(port_a: P, port_b: P) -> Self {
        Self {
            port_a: PortMachine::new(Channel::PortA, port_a),
            port_b: PortMachine::new(Channel::PortB, port_b),
            recv: RecvState::Header,
            in_buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn port_a(&self) -> &PortMachine<P> {
        &self.port_a
    }

    pub fn port_a_mut(&mut self) -> &mut PortMachine<P> {
        &mut self.port_a
    }

    pub fn port_b(&self) -> &PortMachine<P> {
        &self.port_b
    }

    pub fn port_b_mut(&mut self) -> &mut PortMachine<P> {
        &mut self.port_b
    }

    /// Feed transport bytes into the multiplexer. Response bytes produced by
    /// complete request headers are appended to `out`.
    pub fn feed(&mut self, data: &[u8], out: &mut BytesMut) -> Result<()> {
        self.in_buf.extend_from_slice(data);

        loop {
            match self.recv {
                RecvState::Header => {
                    if self.in_buf.len() < HEADER_SIZE {
                        return Ok(());
                    }
                    let header = Header::decode(&self.in_buf[..HEADER_SIZE])?;
                    if header.marker != REQUEST_MARKER {
                        return Err(WireError::Marker(header.marker).into());
                    }
                    self.in_buf.advance(HEADER_SIZE);
                    debug!(
                        len_a = header.len(Channel::PortA),
                        len_b = header.len(Channel::PortB),
                        "request header"
                    );

                    self.respond(out);

                    if header.len(Channel::PortA) + header.len(Channel::PortB) > 0 {
                        self.recv = RecvState::Data(header);
                    }
                }

                RecvState::Data(header) => {
                    let len_a = header.len(Channel::PortA);
                    let len_b = header.len(Channel::PortB);
                    if self.in_buf.len() < len_a + len_b {
                        // Wait for the rest of the announced payload.
                        return Ok(());
                    }
                    let payload = self.in_buf.split_to(len_a + len_b);
                    let (slice_a, slice_b) = payload.split_at(len_a);

                    if !slice_a.is_empty() {
                        self.port_a.load_input(slice_a)?;
                        Self::pump(&mut self.port_a)?;
                    }
                    if !slice_b.is_empty() {
                        self.port_b.load_input(slice_b)?;
                        Self::pump(&mut self.port_b)?;
                    }
                    self.recv = RecvState::Header;
                }
            }
        }
    }

    /// Assemble one response frame: snapshot both ports' reply lengths into
    /// the header, append Port A's then Port B's reply bytes, and only then
    /// reset the machines. The snapshot must complete before any reset so a
    /// port's bytes are never written at a stale offset.
    fn respond(&mut self, out: &mut BytesMut) {
        let len_a = self.port_a.reply_len();
        let len_b = self.port_b.reply_len();

        let mut header = Header::response(0, 0, [0, len_a as u8, len_b as u8]);
        for (channel, machine) in [
            (Channel::PortA, &self.port_a),
            (Channel::PortB, &self.port_b),
        ] {
            header.set_opened(channel, true);
            header.set_writable(channel, machine.needs_input());
        }
        header.encode_into(out);

        out.extend_from_slice(self.port_a.replies());
        out.extend_from_slice(self.port_b.replies());
        self.port_a.reset_replies();
        self.port_b.reset_replies();

        if len_a + len_b > 0 {
            trace!(len_a, len_b, "response payload flushed");
        }
    }

    /// Run a machine until it quiesces, applying simulated peripheral
    /// completions as the transfers finish.
    fn pump(machine: &mut PortMachine<P>) -> Result<()> {
        machine.step()?;
        while machine.state() == PortState::ExecAsync {
            machine.complete_async();
            machine.step()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoardError;
    use crate::peripherals::SimPeripherals;
    use portlink_wire::{opcode, reply, RESPONSE_MARKER};

    fn mux() -> ChannelMux<SimPeripherals> {
        ChannelMux::new(SimPeripherals::new(), SimPeripherals::new())
    }

    fn request(len_a: usize, len_b: usize) -> [u8; HEADER_SIZE] {
        Header::request(0, 0, [0, len_a as u8, len_b as u8]).encode()
    }

    /// One full exchange: header + payload in, response out. Replies to the
    /// payload's commands surface in the *next* exchange's response.
    fn exchange(
        mux: &mut ChannelMux<SimPeripherals>,
        cmds_a: &[u8],
        cmds_b: &[u8],
    ) -> (Header, Vec<u8>) {
        let mut out = BytesMut::new();
        mux.feed(&request(cmds_a.len(), cmds_b.len()), &mut out)
            .unwrap();
        mux.feed(cmds_a, &mut out).unwrap();
        mux.feed(cmds_b, &mut out).unwrap();

        let header = Header::decode(&out[..HEADER_SIZE]).unwrap();
        let payload = out[HEADER_SIZE..].to_vec();
        (header, payload)
    }

    #[test]
    fn routes_payload_to_each_port() {
        let mut m = mux();
        let (first, payload) = exchange(
            &mut m,
            &[opcode::GPIO_HIGH, 2],
            &[opcode::GPIO_HIGH, 5, opcode::GPIO_LOW, 1],
        );
        assert_eq!(first.marker, RESPONSE_MARKER);
        assert_eq!(first.total_len(), 0);
        assert!(payload.is_empty());

        assert!(m.port_a().peripherals().level(2));
        assert!(m.port_b().peripherals().level(5));
        assert!(!m.port_b().peripherals().level(1));
    }

    #[test]
    fn replies_surface_in_next_response() {
        let mut m = mux();
        m.port_a_mut().peripherals_mut().set_adc(4, 0x1234);

        let (_, _) = exchange(&mut m, &[opcode::ANALOG_READ, 4], &[]);

        // Empty poll exchange picks up the buffered reply.
        let (header, payload) = exchange(&mut m, &[], &[]);
        assert_eq!(header.len(Channel::PortA), 3);
        assert_eq!(header.len(Channel::PortB), 0);
        assert_eq!(payload, vec![reply::DATA, 0x34, 0x12]);
    }

    #[test]
    fn response_lengths_match_payload_exactly() {
        let mut m = mux();
        m.port_a_mut().peripherals_mut().set_level(1, true);
        m.port_b_mut().peripherals_mut().set_adc(7, 0xBEEF);

        exchange(&mut m, &[opcode::GPIO_IN, 1], &[opcode::ANALOG_READ, 7]);
        let (header, payload) = exchange(&mut m, &[], &[]);

        let len_a = header.len(Channel::PortA);
        let len_b = header.len(Channel::PortB);
        assert_eq!(len_a, 1);
        assert_eq!(len_b, 3);
        assert_eq!(payload.len(), len_a + len_b);
        assert_eq!(&payload[..len_a], &[reply::HIGH]);
        assert_eq!(&payload[len_a..], &[reply::DATA, 0xEF, 0xBE]);
    }

    #[test]
    fn waits_for_full_payload_before_dispatch() {
        let mut m = mux();
        let mut out = BytesMut::new();

        // Announce 10 bytes for port B, deliver only 7.
        m.feed(&request(0, 10), &mut out).unwrap();
        let partial = [opcode::ECHO, 8, 1, 2, 3, 4, 5];
        m.feed(&partial, &mut out).unwrap();
        assert_eq!(m.port_b().reply_len(), 0, "must not dispatch a short read");

        // The remaining 3 bytes complete the frame.
        m.feed(&[6, 7, 8], &mut out).unwrap();

        let (header, payload) = exchange(&mut m, &[], &[]);
        assert_eq!(header.len(Channel::PortB), 9);
        assert_eq!(payload, vec![reply::DATA, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn header_split_across_reads() {
        let mut m = mux();
        let mut out = BytesMut::new();
        let header = request(2, 0);
        m.feed(&header[..2], &mut out).unwrap();
        assert!(out.is_empty());
        m.feed(&header[2..], &mut out).unwrap();
        assert_eq!(out.len(), HEADER_SIZE);
        m.feed(&[opcode::GPIO_HIGH, 3], &mut out).unwrap();
        assert!(m.port_a().peripherals().level(3));
    }

    #[test]
    fn back_to_back_requests_in_one_read() {
        let mut m = mux();
        let mut out = BytesMut::new();

        let mut wire = Vec::new();
        wire.extend_from_slice(&request(2, 0));
        wire.extend_from_slice(&[opcode::GPIO_HIGH, 0]);
        wire.extend_from_slice(&request(2, 0));
        wire.extend_from_slice(&[opcode::GPIO_HIGH, 1]);
        m.feed(&wire, &mut out).unwrap();

        assert!(m.port_a().peripherals().level(0));
        assert!(m.port_a().peripherals().level(1));
        // Two response headers were produced.
        assert_eq!(out.len(), 2 * HEADER_SIZE);
    }

    #[test]
    fn rejects_response_marker_inbound() {
        let mut m = mux();
        let mut out = BytesMut::new();
        let bogus = Header::response(0, 0, [0, 0, 0]).encode();
        let err = m.feed(&bogus, &mut out).unwrap_err();
        assert!(matches!(err, BoardError::Wire(WireError::Marker(_))));
    }

    #[test]
    fn rejects_garbage_marker_inbound() {
        let mut m = mux();
        let mut out = BytesMut::new();
        let err = m.feed(&[0x00, 0, 0, 0, 0], &mut out).unwrap_err();
        assert!(matches!(err, BoardError::Wire(WireError::Marker(0x00))));
    }

    #[test]
    fn opened_and_writable_flags_reported() {
        let mut m = mux();
        let (header, _) = exchange(&mut m, &[], &[]);
        assert!(header.is_opened(Channel::PortA));
        assert!(header.is_opened(Channel::PortB));
        assert!(!header.is_opened(Channel::Usb));
        assert!(header.is_writable(Channel::PortA));
        assert!(header.is_writable(Channel::PortB));
    }

    #[test]
    fn streaming_command_spans_frames() {
        let mut m = mux();

        // ECHO announces 6 payload bytes; the first frame carries 3.
        exchange(&mut m, &[opcode::ECHO, 6, 0xA1, 0xA2, 0xA3], &[]);
        let (header, payload) = exchange(&mut m, &[0xA4, 0xA5, 0xA6], &[]);
        assert_eq!(header.len(Channel::PortA), 4);
        assert_eq!(payload, vec![reply::DATA, 0xA1, 0xA2, 0xA3]);

        let (header, payload) = exchange(&mut m, &[], &[]);
        assert_eq!(header.len(Channel::PortA), 3);
        assert_eq!(payload, vec![0xA4, 0xA5, 0xA6]);
    }
}
