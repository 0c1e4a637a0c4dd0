//! The platform facade the engine requires: UART transmit, monotonic clocks,
//! timer arming, and RS-485 direction control.
//!
//! Modeled after `kernel::hil::*` in the teacher codebase, where every
//! peripheral dependency of a capsule is an abstract trait rather than a
//! concrete hardware type. Unlike the teacher's HIL traits (which are
//! callback-based and asynchronous), this facade is blocking end to end,
//! matching `modbus_port.h` in the original source.

/// Serial framing parameters, wire-level only — they do not affect PDU
/// semantics, only how the UART peripheral clocks bits onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialConfig {
    pub const fn new(baud_rate: u32, parity: Parity, stop_bits: StopBits) -> Self {
        SerialConfig {
            baud_rate,
            parity,
            stop_bits,
        }
    }
}

/// Platform collaborator required by [`crate::context::Context`]. Out of
/// scope for this crate: UART hardware init, the microsecond clock source
/// itself, the direction-enable GPIO, and the timer peripheral — only their
/// contract is specified here.
pub trait Port {
    /// Error type surfaced by a failed `send`.
    type Error;

    /// Blocking transmit of a full frame. Must not return until the last bit
    /// has clocked out — the caller toggles the RS-485 direction pin back to
    /// receive immediately after this returns.
    fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Monotonic milliseconds; 32-bit wraparound is tolerated by the caller
    /// (subtraction is done in wrapping unsigned arithmetic).
    fn now_ms(&self) -> u32;

    /// Monotonic microseconds; same wraparound tolerance as [`Port::now_ms`].
    fn now_us(&self) -> u32;

    /// Best-effort busy wait.
    fn delay_us(&mut self, us: u32);

    /// Arms a periodic interrupt at `period_us` (the T3.5 period). The timer
    /// ISR must call [`crate::context::Context::on_timer_tick`].
    fn timer_init(&mut self, period_us: u32);

    /// Starts or stops the periodic timer armed by [`Port::timer_init`].
    fn timer_enable(&mut self, enable: bool);

    /// Drives the RS-485 direction pin to transmit. Default is a no-op so a
    /// full-duplex or loopback harness need not implement direction control
    /// at all — this realizes the "optional direction-control callbacks" of
    /// the engine context.
    fn rs485_tx_enable(&mut self) {}

    /// Drives the RS-485 direction pin to receive. See
    /// [`Port::rs485_tx_enable`].
    fn rs485_rx_enable(&mut self) {}

    /// Non-blocking poll for one received byte, consumed only by the
    /// master's wait loop (`crate::master`) to drive the shared receive
    /// pipeline when no concurrent ISR is available to call
    /// [`crate::context::Context::on_byte`] directly. The slave side never
    /// calls this — it is always fed by the platform invoking `on_byte`
    /// from the real UART RX interrupt. Default `None`, matching a target
    /// where the UART ISR alone feeds bytes even while the master blocks.
    fn try_read(&mut self) -> Option<u8> {
        None
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::vec::Vec;

    /// Deterministic [`Port`] for tests: records sent frames, exposes a
    /// settable virtual clock instead of a real one, and never fails to
    /// send.
    pub struct MockPort {
        pub sent: RefCell<Vec<Vec<u8>>>,
        pub now_us: RefCell<u32>,
        pub now_ms: RefCell<u32>,
        pub tx_enabled: RefCell<bool>,
    }

    impl MockPort {
        pub fn new() -> Self {
            MockPort {
                sent: RefCell::new(Vec::new()),
                now_us: RefCell::new(0),
                now_ms: RefCell::new(0),
                tx_enabled: RefCell::new(false),
            }
        }

        pub fn advance_us(&self, us: u32) {
            *self.now_us.borrow_mut() += us;
            *self.now_ms.borrow_mut() += us / 1000;
        }
    }

    impl Port for MockPort {
        type Error = ();

        fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            self.sent.borrow_mut().push(bytes.to_vec());
            Ok(())
        }

        fn now_ms(&self) -> u32 {
            *self.now_ms.borrow()
        }

        fn now_us(&self) -> u32 {
            *self.now_us.borrow()
        }

        fn delay_us(&mut self, us: u32) {
            self.advance_us(us);
        }

        fn timer_init(&mut self, _period_us: u32) {}

        fn timer_enable(&mut self, _enable: bool) {}

        fn rs485_tx_enable(&mut self) {
            *self.tx_enabled.borrow_mut() = true;
        }

        fn rs485_rx_enable(&mut self) {
            *self.tx_enabled.borrow_mut() = false;
        }
    }
}
