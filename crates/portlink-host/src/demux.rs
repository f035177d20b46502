use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::error::{HostError, Result};
use crate::pin::{Pin, PinEvent};
use portlink_wire::reply;

/// Decoded value delivered to a pending command's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    High,
    Low,
    Data(Bytes),
}

/// Callback invoked exactly once when the matching reply (or a fault)
/// arrives. Entries abandoned by a port close are dropped uninvoked.
pub type ReplyCallback = Box<dyn FnOnce(Result<Reply>)>;

/// One in-flight command awaiting its reply.
pub struct PendingReply {
    /// Number of payload bytes expected after a DATA marker. Zero for
    /// single-byte (HIGH/LOW/ACK) replies.
    pub size: usize,
    pub callback: ReplyCallback,
}

/// Event the demultiplexer asks the port to dispatch to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    Pin {
        pin: u8,
        event: PinEvent,
        level: bool,
    },
    UartRx(Bytes),
    /// An async byte outside the pin-change and UART ranges.
    Async(u8),
}

/// Host-side reply-stream demultiplexer for one port.
///
/// Classifies every leading byte of the buffered stream as a queued-command
/// reply, an async pin-change notification, or an async UART-RX chunk, and
/// matches command replies strictly FIFO against the pending queue.
/// Incomplete frames stay buffered until more data arrives; nothing is
/// discarded.
#[derive(Default)]
pub struct ReplyDemux {
    buf: BytesMut,
    queue: VecDeque<PendingReply>,
}

impl ReplyDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the expectation for a just-submitted command.
    pub fn enqueue(&mut self, size: usize, callback: ReplyCallback) {
        self.queue.push_back(PendingReply { size, callback });
    }

    /// Number of commands still awaiting replies.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drop all pending entries without invoking their callbacks. Callers
    /// treat port closure as an implicit abort of outstanding operations.
    pub fn abandon(&mut self) {
        self.queue.clear();
        self.buf.clear();
    }

    /// Consume newly received reply bytes.
    ///
    /// Command callbacks are invoked inline; pin/UART/async events are
    /// returned for the port to dispatch through its subscription
    /// registries (the armed interrupt mode of each pin decides how a
    /// pin-change byte fans out, and one-shot modes disarm here).
    pub fn feed(&mut self, data: &[u8], pins: &mut [Pin]) -> Result<Vec<PortEvent>> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();

        while !self.buf.is_empty() {
            let byte = self.buf[0];

            if byte == reply::ASYNC_UART_RX {
                // Need the length byte, then the full chunk.
                if self.buf.len() < 2 {
                    break;
                }
                let len = self.buf[1] as usize;
                if self.buf.len() < 2 + len {
                    break;
                }
                self.buf.advance(2);
                let chunk = self.buf.split_to(len).freeze();
                trace!(len, "uart rx");
                events.push(PortEvent::UartRx(chunk));
            } else if reply::is_async(byte) {
                if let Some((index, level)) = reply::pin_change(byte) {
                    let pin = &mut pins[index as usize];
                    match pin.interrupt_mode() {
                        // Level interrupts fire once, then disarm so the
                        // line cannot retrigger a stream of events.
                        Some(armed @ (PinEvent::High | PinEvent::Low)) => {
                            pin.disarm();
                            events.push(PortEvent::Pin {
                                pin: index,
                                event: armed,
                                level,
                            });
                        }
                        _ => {
                            events.push(PortEvent::Pin {
                                pin: index,
                                event: PinEvent::Change,
                                level,
                            });
                            events.push(PortEvent::Pin {
                                pin: index,
                                event: if level { PinEvent::Rise } else { PinEvent::Fall },
                                level,
                            });
                        }
                    }
                } else {
                    events.push(PortEvent::Async(byte));
                }
                self.buf.advance(1);
            } else {
                // A genuine command reply requires a pending expectation.
                let Some(front) = self.queue.front() else {
                    return Err(HostError::UnexpectedReply { byte });
                };

                match byte {
                    reply::DATA => {
                        let size = front.size;
                        if size == 0 {
                            return Err(HostError::UnexpectedReply { byte });
                        }
                        if self.buf.len() < 1 + size {
                            break;
                        }
                        self.buf.advance(1);
                        let data = self.buf.split_to(size).freeze();
                        let entry = self.queue.pop_front().expect("checked front");
                        (entry.callback)(Ok(Reply::Data(data)));
                    }
                    reply::HIGH | reply::LOW => {
                        self.buf.advance(1);
                        let entry = self.queue.pop_front().expect("checked front");
                        let value = if byte == reply::HIGH {
                            Reply::High
                        } else {
                            Reply::Low
                        };
                        (entry.callback)(Ok(value));
                    }
                    reply::ACK => {
                        self.buf.advance(1);
                        let entry = self.queue.pop_front().expect("checked front");
                        (entry.callback)(Ok(Reply::Ack));
                    }
                    reply::NACK => {
                        self.buf.advance(1);
                        let entry = self.queue.pop_front().expect("checked front");
                        (entry.callback)(Err(HostError::unsupported(
                            "command rejected by the coprocessor (NACK)",
                        )));
                    }
                    other => return Err(HostError::UnexpectedReply { byte: other }),
                }
            }
        }

        Ok(events)
    }
}
