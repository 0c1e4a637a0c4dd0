//! Engine context: state enum, timing derivation, frame buffers, and the two
//! ISR entry points (`on_byte`, `on_timer_tick`).

use crate::error::ExceptionCode;
use crate::port::SerialConfig;

pub const MAX_ADU_LENGTH: usize = 256;
const FRAME_MIN_SIZE: usize = 4;

/// Role the context was constructed for. A master-only call on a slave
/// context (or vice versa) is refused rather than silently misbehaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Slave,
    Master,
}

/// Receive/transmit lifecycle state. `Error` is reserved for future use and
/// is never entered by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    Receiving,
    Processing,
    Transmitting,
    Waiting,
    Error,
}

/// A parsed view of the frame currently being processed (slave) or awaited
/// (master). `exception_code` is populated only when a master call observes
/// an exception response, for post-hoc introspection by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameView {
    pub slave_id: u8,
    pub function_code: u8,
    pub start_addr: u16,
    pub quantity: u16,
    pub exception_code: Option<ExceptionCode>,
}

/// Computes T1.5 in microseconds, rounding up.
pub const fn t15_us(baud_rate: u32) -> u32 {
    (15_000_000 + baud_rate - 1) / baud_rate
}

/// Computes T3.5 in microseconds, rounding up.
pub const fn t35_us(baud_rate: u32) -> u32 {
    (35_000_000 + baud_rate - 1) / baud_rate
}

/// One per-bus engine: frame buffers, timing state, and the current-frame
/// view. Owns no register storage and no port — those are passed into
/// [`crate::slave::poll`] / the master driver by the caller, since both are
/// process-wide singletons distinct from this per-bus object.
pub struct Context {
    pub(crate) slave_id: u8,
    pub(crate) role: Role,
    pub(crate) config: SerialConfig,
    pub(crate) t15_us: u32,
    pub(crate) t35_us: u32,

    pub(crate) state: State,
    pub(crate) timeout_ms: u32,

    pub(crate) rx_buffer: [u8; MAX_ADU_LENGTH],
    pub(crate) rx_length: usize,
    pub(crate) rx_timestamp_us: u32,

    pub(crate) tx_buffer: [u8; MAX_ADU_LENGTH],
    pub(crate) tx_length: usize,

    pub(crate) current_frame: FrameView,
}

impl Context {
    /// `slave_id` must be in `1..=247`; `0` is reserved for broadcast
    /// addressing and is never a legal *identity*, only a destination.
    pub fn new(slave_id: u8, role: Role, config: SerialConfig) -> Self {
        debug_assert!((1..=247).contains(&slave_id));
        Context {
            slave_id,
            role,
            config,
            t15_us: t15_us(config.baud_rate),
            t35_us: t35_us(config.baud_rate),
            state: State::Idle,
            timeout_ms: 1_000,
            rx_buffer: [0u8; MAX_ADU_LENGTH],
            rx_length: 0,
            rx_timestamp_us: 0,
            tx_buffer: [0u8; MAX_ADU_LENGTH],
            tx_length: 0,
            current_frame: FrameView::default(),
        }
    }

    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn t35_us(&self) -> u32 {
        self.t35_us
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    pub fn current_frame(&self) -> &FrameView {
        &self.current_frame
    }

    /// Byte-arrival ISR entry point. `now_us` is the timestamp the caller
    /// observed at arrival (typically read directly off a free-running
    /// counter in the ISR, cheaper than routing through the port facade).
    ///
    /// Idle or Receiving: appends the byte (if room remains) and moves to
    /// Receiving. Processing or Transmitting: the byte is dropped — the
    /// dispatcher has exclusive ownership of the buffer during that window.
    /// Waiting (master): treated as Receiving, per §4.3.
    pub fn on_byte(&mut self, byte: u8, now_us: u32) {
        match self.state {
            State::Idle | State::Receiving | State::Waiting => {
                if self.rx_length < MAX_ADU_LENGTH {
                    self.rx_buffer[self.rx_length] = byte;
                    self.rx_length += 1;
                    self.rx_timestamp_us = now_us;
                    self.state = State::Receiving;
                }
            }
            State::Processing | State::Transmitting | State::Error => {}
        }
    }

    /// Timer-tick ISR entry point. Promotes Receiving to Processing once
    /// `now_us - last_rx_us >= T3.5`; a no-op in every other state. The
    /// timer is free-running at the T3.5 period and is never re-armed per
    /// frame.
    pub fn on_timer_tick(&mut self, now_us: u32) {
        if self.state == State::Receiving {
            let elapsed = now_us.wrapping_sub(self.rx_timestamp_us);
            if elapsed >= self.t35_us {
                self.state = State::Processing;
            }
        }
    }

    pub(crate) fn rx(&self) -> &[u8] {
        &self.rx_buffer[..self.rx_length]
    }

    pub(crate) fn reset_to_idle(&mut self) {
        self.state = State::Idle;
        self.rx_length = 0;
    }

    pub(crate) fn frame_min_size() -> usize {
        FRAME_MIN_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Parity, StopBits};

    fn ctx() -> Context {
        Context::new(0x11, Role::Slave, SerialConfig::new(9_600, Parity::Even, StopBits::One))
    }

    #[test]
    fn timing_constants_match_baud_derivation() {
        assert_eq!(t35_us(9_600), 3646);
        assert_eq!(t15_us(9_600), 1563);
    }

    #[test]
    fn on_byte_transitions_idle_to_receiving() {
        let mut c = ctx();
        assert_eq!(c.state(), State::Idle);
        c.on_byte(0x11, 100);
        assert_eq!(c.state(), State::Receiving);
        assert_eq!(c.rx_length, 1);
    }

    #[test]
    fn bytes_dropped_while_processing() {
        let mut c = ctx();
        c.on_byte(0x11, 100);
        c.state = State::Processing;
        c.on_byte(0x03, 200);
        assert_eq!(c.rx_length, 1, "byte arriving during Processing must be dropped");
    }

    #[test]
    fn timer_tick_promotes_only_after_t35_elapsed() {
        let mut c = ctx();
        c.on_byte(0x11, 0);
        c.on_timer_tick(100);
        assert_eq!(c.state(), State::Receiving, "T3.5 has not elapsed yet");
        c.on_timer_tick(c.t35_us());
        assert_eq!(c.state(), State::Processing);
    }

    #[test]
    fn timer_tick_is_noop_outside_receiving() {
        let mut c = ctx();
        c.on_timer_tick(10_000);
        assert_eq!(c.state(), State::Idle);
    }

    #[test]
    fn buffer_overflow_silently_drops_further_bytes() {
        let mut c = ctx();
        for i in 0..MAX_ADU_LENGTH {
            c.on_byte(i as u8, i as u32);
        }
        assert_eq!(c.rx_length, MAX_ADU_LENGTH);
        c.on_byte(0xFF, MAX_ADU_LENGTH as u32);
        assert_eq!(c.rx_length, MAX_ADU_LENGTH, "rx_length must never exceed 256");
    }
}
