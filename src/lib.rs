//! A Modbus RTU slave/master protocol engine for bare-metal and
//! RTOS-hosted RS-485 targets.
//!
//! The engine owns framing, timing (T1.5/T3.5 derived from baud rate), CRC,
//! function-code dispatch, and register storage. It owns no UART, no clock,
//! and no RS-485 direction GPIO — those are supplied by the platform through
//! the [`port::Port`] trait, the same separation the teacher codebase draws
//! between a capsule and the `kernel::hil` traits it depends on.
//!
//! Two ISR entry points, [`context::Context::on_byte`] and
//! [`context::Context::on_timer_tick`], are the only calls a platform's
//! interrupt handlers need to make; everything else runs from
//! [`slave::poll`] (slave role) or the functions in [`master`] (master
//! role), called from ordinary task context.

#![cfg_attr(not(test), no_std)]

mod context;
mod crc;
mod error;
mod function;
pub mod master;
mod port;
mod registers;
pub mod slave;

#[cfg(feature = "global-instance")]
pub mod global;

pub use context::{Context, FrameView, Role, State, MAX_ADU_LENGTH};
pub use error::{ExceptionCode, FrameError, MasterError, RegisterError};
pub use function::FunctionCode;
pub use port::{Parity, Port, SerialConfig, StopBits};
pub use registers::{
    AddressResolver, BitBank, DenseBitMap, DenseMap, DenseRegisterStore, RegisterStore, Registers, SparseMap,
    WordBank,
};
pub use slave::PollOutcome;
