use std::collections::HashMap;

use crate::error::{HostError, Result};

/// Pins that support external interrupts, on either port.
pub const INT_PINS: [u8; 4] = [2, 5, 6, 7];
/// Pins that support ADC sampling on port A. Every port B pin samples.
pub const ADC_PINS: [u8; 2] = [4, 7];
/// Pins with internal pull resistors.
pub const PULL_PINS: [u8; 6] = [2, 3, 4, 5, 6, 7];
/// Pins that support PWM output.
pub const PWM_PINS: [u8; 2] = [5, 6];

/// Number of pins per port.
pub const PINS_PER_PORT: u8 = 8;

/// Pin event kinds a subscriber can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinEvent {
    Rise,
    Fall,
    Change,
    High,
    Low,
}

impl PinEvent {
    /// Interrupt mode encoding used in the GPIO_INT argument's high nibble.
    pub fn wire_mode(self) -> u8 {
        match self {
            PinEvent::Rise => 1,
            PinEvent::Fall => 2,
            PinEvent::Change => 3,
            PinEvent::High => 4,
            PinEvent::Low => 5,
        }
    }

    /// Level-triggered modes fire once and disarm.
    pub fn is_one_shot(self) -> bool {
        matches!(self, PinEvent::High | PinEvent::Low)
    }
}

/// Pull resistor modes selectable from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    PullDown,
    PullUp,
    Float,
}

impl PullMode {
    /// Encoding used in the GPIO_PULL argument's high nibble.
    pub fn wire_mode(self) -> u8 {
        match self {
            PullMode::PullDown => 0,
            PullMode::PullUp => 1,
            PullMode::Float => 2,
        }
    }
}

/// Capability flags of one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinCaps {
    pub interrupt: bool,
    pub adc: bool,
    pub pwm: bool,
    pub pull: bool,
}

impl PinCaps {
    /// Capabilities of pin `index` on the given port. Port B pins all
    /// support ADC; everything else is identical across ports.
    pub fn for_pin(index: u8, port_has_full_adc: bool) -> Self {
        Self {
            interrupt: INT_PINS.contains(&index),
            adc: ADC_PINS.contains(&index) || port_has_full_adc,
            pwm: PWM_PINS.contains(&index),
            pull: PULL_PINS.contains(&index),
        }
    }
}

/// Handler invoked with the pin level that accompanied the event.
pub type PinHandler = Box<dyn FnMut(bool)>;

/// One pin of a port: capability flags, the armed interrupt mode, and an
/// ordered subscription registry per event kind.
pub struct Pin {
    index: u8,
    caps: PinCaps,
    interrupt_mode: Option<PinEvent>,
    handlers: HashMap<PinEvent, Vec<PinHandler>>,
}

impl Pin {
    pub fn new(index: u8, caps: PinCaps) -> Self {
        Self {
            index,
            caps,
            interrupt_mode: None,
            handlers: HashMap::new(),
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn caps(&self) -> PinCaps {
        self.caps
    }

    /// The armed interrupt mode. Rise/fall arm as Change: the wire carries
    /// the specific edge, but level events for either edge must dispatch.
    pub fn interrupt_mode(&self) -> Option<PinEvent> {
        self.interrupt_mode
    }

    /// Record an armed interrupt mode after validation.
    ///
    /// Fails when the pin lacks interrupt support, or when mixing a
    /// level-triggered mode with an already armed one (level modes fire
    /// once; edge modes may stack).
    pub fn arm(&mut self, event: PinEvent) -> Result<()> {
        if !self.caps.interrupt {
            return Err(HostError::unsupported(format!(
                "interrupts are not supported on pin {}; pins 2, 5, 6 and 7 support interrupts",
                self.index
            )));
        }

        if let Some(current) = self.interrupt_mode {
            if current.is_one_shot() || event.is_one_shot() {
                return Err(HostError::unsupported(format!(
                    "cannot arm pin {} for {:?}; already listening for {:?} \
                     (only change/rise/fall stack)",
                    self.index, event, current
                )));
            }
        }

        self.interrupt_mode = Some(match event {
            PinEvent::Rise | PinEvent::Fall => PinEvent::Change,
            other => other,
        });
        Ok(())
    }

    /// Clear the armed interrupt state (after a one-shot event fires, or on
    /// explicit disarm).
    pub fn disarm(&mut self) {
        self.interrupt_mode = None;
    }

    /// Append a handler to the event's subscription list.
    pub fn subscribe(&mut self, event: PinEvent, handler: PinHandler) {
        self.handlers.entry(event).or_default().push(handler);
    }

    /// Dispatch an event to its subscribers in registration order.
    /// One-shot (high/low) subscriber lists are drained by the dispatch.
    pub fn dispatch(&mut self, event: PinEvent, level: bool) {
        if event.is_one_shot() {
            if let Some(mut handlers) = self.handlers.remove(&event) {
                for handler in handlers.iter_mut() {
                    handler(level);
                }
            }
            return;
        }
        if let Some(handlers) = self.handlers.get_mut(&event) {
            for handler in handlers.iter_mut() {
                handler(level);
            }
        }
    }

    /// Drop all subscriptions for an event.
    pub fn unsubscribe_all(&mut self, event: PinEvent) {
        self.handlers.remove(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn int_pin() -> Pin {
        Pin::new(2, PinCaps::for_pin(2, false))
    }

    #[test]
    fn capability_tables() {
        let caps = PinCaps::for_pin(4, false);
        assert!(caps.adc);
        assert!(!caps.interrupt);
        assert!(!caps.pwm);
        assert!(caps.pull);

        // Port B: every pin samples.
        let caps = PinCaps::for_pin(0, true);
        assert!(caps.adc);
        assert!(!caps.pull);

        let caps = PinCaps::for_pin(5, false);
        assert!(caps.interrupt);
        assert!(caps.pwm);
    }

    #[test]
    fn arming_requires_interrupt_support() {
        let mut pin = Pin::new(3, PinCaps::for_pin(3, false));
        let err = pin.arm(PinEvent::Rise).unwrap_err();
        assert!(matches!(err, HostError::UnsupportedOperation(_)));
    }

    #[test]
    fn rise_and_fall_arm_as_change() {
        let mut pin = int_pin();
        pin.arm(PinEvent::Rise).unwrap();
        assert_eq!(pin.interrupt_mode(), Some(PinEvent::Change));
    }

    #[test]
    fn level_modes_do_not_stack() {
        let mut pin = int_pin();
        pin.arm(PinEvent::High).unwrap();
        assert!(pin.arm(PinEvent::Change).is_err());
        assert!(pin.arm(PinEvent::Low).is_err());

        let mut pin = int_pin();
        pin.arm(PinEvent::Change).unwrap();
        assert!(pin.arm(PinEvent::Low).is_err());
        // Edge modes stack freely.
        pin.arm(PinEvent::Fall).unwrap();
    }

    #[test]
    fn dispatch_runs_handlers_in_order() {
        let mut pin = int_pin();
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = Rc::clone(&log);
            pin.subscribe(
                PinEvent::Change,
                Box::new(move |level| log.borrow_mut().push((tag, level))),
            );
        }
        pin.dispatch(PinEvent::Change, true);
        assert_eq!(*log.borrow(), vec![("first", true), ("second", true)]);
    }

    #[test]
    fn one_shot_handlers_fire_once() {
        let mut pin = int_pin();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        pin.subscribe(PinEvent::High, Box::new(move |_| c.set(c.get() + 1)));

        pin.dispatch(PinEvent::High, true);
        pin.dispatch(PinEvent::High, true);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn wire_modes_match_protocol() {
        assert_eq!(PinEvent::Rise.wire_mode(), 1);
        assert_eq!(PinEvent::Fall.wire_mode(), 2);
        assert_eq!(PinEvent::Change.wire_mode(), 3);
        assert_eq!(PinEvent::High.wire_mode(), 4);
        assert_eq!(PinEvent::Low.wire_mode(), 5);
        assert_eq!(PullMode::PullDown.wire_mode(), 0);
        assert_eq!(PullMode::PullUp.wire_mode(), 1);
        assert_eq!(PullMode::Float.wire_mode(), 2);
    }
}
