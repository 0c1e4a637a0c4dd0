//! Slave dispatcher: entered once the context reports `State::Processing`,
//! runs to completion synchronously, and always restores `State::Idle`.

use crate::context::{Context, State};
use crate::crc;
use crate::error::{ExceptionCode, FrameError};
use crate::function::FunctionCode;
use crate::port::Port;
use crate::registers::Registers;

#[cfg(feature = "defmt")]
use defmt::{debug, trace};

const MAX_READ_COILS: u16 = 2000;
const MAX_READ_REGISTERS: u16 = 125;
const MAX_WRITE_COILS: u16 = 1968;
const MAX_WRITE_REGISTERS: u16 = 123;

/// What a poll did, for callers that want to observe outcomes beyond the
/// side effects on `ctx`/`store` (e.g. for metrics or tests). Not part of
/// the protocol contract — discarding it is always correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The context was not in `State::Processing`; nothing happened.
    Idle,
    /// The frame was malformed or not addressed to us; nothing was sent.
    Discarded,
    /// A broadcast write was applied; no response was sent.
    BroadcastApplied,
    /// A normal or exception response was written to `port`.
    Responded,
}

/// Drives one dispatch cycle. A no-op unless `ctx.state() == Processing`.
///
/// On any exit path the context returns to `Idle` with `rx_length` reset to
/// zero, per §4.4 — callers do not need to do this themselves.
pub fn poll<P, S>(ctx: &mut Context, port: &mut P, store: &mut S) -> PollOutcome
where
    P: Port,
    S: Registers,
{
    if ctx.state != State::Processing {
        return PollOutcome::Idle;
    }

    let outcome = match dispatch(ctx, port, store) {
        Ok(outcome) => outcome,
        Err(err) => {
            #[cfg(feature = "defmt")]
            trace!("modbus: discarding frame: {}", err);
            #[cfg(not(feature = "defmt"))]
            let _ = err;
            PollOutcome::Discarded
        }
    };
    ctx.reset_to_idle();
    outcome
}

fn dispatch<P, S>(ctx: &mut Context, port: &mut P, store: &mut S) -> Result<PollOutcome, FrameError>
where
    P: Port,
    S: Registers,
{
    if ctx.rx_length < Context::frame_min_size() {
        return Err(FrameError::TooShort);
    }
    if !crc::check(ctx.rx()) {
        return Err(FrameError::CrcMismatch);
    }

    let incoming_id = ctx.rx_buffer[0];
    if incoming_id != ctx.slave_id && incoming_id != 0 {
        return Err(FrameError::SlaveIdMismatch);
    }
    let broadcast = incoming_id == 0;

    let fc_byte = ctx.rx_buffer[1];
    let start_addr = u16::from_be_bytes([ctx.rx_buffer[2], ctx.rx_buffer[3]]);
    let quantity = u16::from_be_bytes([ctx.rx_buffer[4], ctx.rx_buffer[5]]);

    ctx.current_frame.slave_id = incoming_id;
    ctx.current_frame.function_code = fc_byte;
    ctx.current_frame.start_addr = start_addr;
    ctx.current_frame.quantity = quantity;

    ctx.tx_buffer[0] = ctx.slave_id;
    ctx.tx_buffer[1] = fc_byte;
    ctx.tx_length = 2;

    let result = match FunctionCode::from_u8(fc_byte) {
        Some(FunctionCode::ReadCoils) => read_bits(ctx, store, start_addr, quantity, true),
        Some(FunctionCode::ReadDiscreteInputs) => read_bits(ctx, store, start_addr, quantity, false),
        Some(FunctionCode::ReadHoldingRegisters) => read_words(ctx, store, start_addr, quantity, true),
        Some(FunctionCode::ReadInputRegisters) => read_words(ctx, store, start_addr, quantity, false),
        Some(FunctionCode::WriteSingleCoil) => write_single_coil(ctx, store, start_addr),
        Some(FunctionCode::WriteSingleRegister) => write_single_register(ctx, store, start_addr),
        Some(FunctionCode::WriteMultipleCoils) => write_multiple_coils(ctx, store, start_addr, quantity),
        Some(FunctionCode::WriteMultipleRegisters) => {
            write_multiple_registers(ctx, store, start_addr, quantity)
        }
        None => Err(ExceptionCode::IllegalFunction),
    };

    if let Err(exception) = result {
        build_exception_response(ctx, exception);
    }

    #[cfg(feature = "defmt")]
    debug!("modbus: fc={} addr={} qty={} -> tx_len={}", fc_byte, start_addr, quantity, ctx.tx_length);

    if broadcast {
        return Ok(PollOutcome::BroadcastApplied);
    }

    send_response(ctx, port);
    Ok(PollOutcome::Responded)
}

fn read_bits<S: Registers>(
    ctx: &mut Context,
    store: &S,
    addr: u16,
    quantity: u16,
    coils: bool,
) -> Result<(), ExceptionCode> {
    if quantity == 0 || quantity > MAX_READ_COILS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    for i in 0..quantity {
        let a = addr.wrapping_add(i);
        let valid = if coils { store.coil_valid(a) } else { store.discrete_input_valid(a) };
        if !valid {
            return Err(ExceptionCode::IllegalDataAddress);
        }
    }

    let byte_count = ((quantity + 7) / 8) as usize;
    ctx.tx_buffer[2] = byte_count as u8;
    ctx.tx_length = 3;
    for b in &mut ctx.tx_buffer[3..3 + byte_count] {
        *b = 0;
    }
    for i in 0..quantity {
        let a = addr.wrapping_add(i);
        let value = if coils {
            store.coil_read(a).unwrap_or(false)
        } else {
            store.discrete_input_read(a).unwrap_or(false)
        };
        if value {
            let i = i as usize;
            ctx.tx_buffer[3 + (i >> 3)] |= 1 << (i & 0x07);
        }
    }
    ctx.tx_length += byte_count;
    Ok(())
}

fn read_words<S: Registers>(
    ctx: &mut Context,
    store: &S,
    addr: u16,
    quantity: u16,
    holding: bool,
) -> Result<(), ExceptionCode> {
    if quantity == 0 || quantity > MAX_READ_REGISTERS {
        return Err(ExceptionCode::IllegalDataValue);
    }
    for i in 0..quantity {
        let a = addr.wrapping_add(i);
        let valid = if holding { store.holding_register_valid(a) } else { store.input_register_valid(a) };
        if !valid {
            return Err(ExceptionCode::IllegalDataAddress);
        }
    }

    ctx.tx_buffer[2] = (quantity * 2) as u8;
    ctx.tx_length = 3;
    for i in 0..quantity {
        let a = addr.wrapping_add(i);
        let value = if holding {
            store.holding_register_read(a).unwrap_or(0)
        } else {
            store.input_register_read(a).unwrap_or(0)
        };
        let bytes = value.to_be_bytes();
        ctx.tx_buffer[ctx.tx_length] = bytes[0];
        ctx.tx_buffer[ctx.tx_length + 1] = bytes[1];
        ctx.tx_length += 2;
    }
    Ok(())
}

fn write_single_coil<S: Registers>(
    ctx: &mut Context,
    store: &mut S,
    addr: u16,
) -> Result<(), ExceptionCode> {
    if !store.coil_valid(addr) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    let value = u16::from_be_bytes([ctx.rx_buffer[4], ctx.rx_buffer[5]]);
    if value != 0x0000 && value != 0xFF00 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    store.coil_write(addr, value == 0xFF00).map_err(|_| ExceptionCode::SlaveDeviceFailure)?;

    ctx.tx_buffer[2..6].copy_from_slice(&ctx.rx_buffer[2..6]);
    ctx.tx_length = 6;
    Ok(())
}

fn write_single_register<S: Registers>(
    ctx: &mut Context,
    store: &mut S,
    addr: u16,
) -> Result<(), ExceptionCode> {
    if !store.holding_register_valid(addr) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    let value = u16::from_be_bytes([ctx.rx_buffer[4], ctx.rx_buffer[5]]);
    store.holding_register_write(addr, value).map_err(|_| ExceptionCode::SlaveDeviceFailure)?;

    ctx.tx_buffer[2..6].copy_from_slice(&ctx.rx_buffer[2..6]);
    ctx.tx_length = 6;
    Ok(())
}

fn write_multiple_coils<S: Registers>(
    ctx: &mut Context,
    store: &mut S,
    addr: u16,
    quantity: u16,
) -> Result<(), ExceptionCode> {
    let byte_count = ctx.rx_buffer[6] as u16;
    if quantity == 0 || quantity > MAX_WRITE_COILS || byte_count != (quantity + 7) / 8 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    for i in 0..quantity {
        if !store.coil_valid(addr.wrapping_add(i)) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
    }
    for i in 0..quantity {
        let idx = i as usize;
        let value = (ctx.rx_buffer[7 + (idx >> 3)] & (1 << (idx & 0x07))) != 0;
        store
            .coil_write(addr.wrapping_add(i), value)
            .map_err(|_| ExceptionCode::SlaveDeviceFailure)?;
    }

    ctx.tx_buffer[2..6].copy_from_slice(&ctx.rx_buffer[2..6]);
    ctx.tx_length = 6;
    Ok(())
}

fn write_multiple_registers<S: Registers>(
    ctx: &mut Context,
    store: &mut S,
    addr: u16,
    quantity: u16,
) -> Result<(), ExceptionCode> {
    let byte_count = ctx.rx_buffer[6] as u16;
    if quantity == 0 || quantity > MAX_WRITE_REGISTERS || byte_count != quantity * 2 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    for i in 0..quantity {
        if !store.holding_register_valid(addr.wrapping_add(i)) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
    }
    for i in 0..quantity {
        let idx = i as usize;
        let value = u16::from_be_bytes([ctx.rx_buffer[7 + idx * 2], ctx.rx_buffer[8 + idx * 2]]);
        store
            .holding_register_write(addr.wrapping_add(i), value)
            .map_err(|_| ExceptionCode::SlaveDeviceFailure)?;
    }

    ctx.tx_buffer[2..6].copy_from_slice(&ctx.rx_buffer[2..6]);
    ctx.tx_length = 6;
    Ok(())
}

fn build_exception_response(ctx: &mut Context, exception: ExceptionCode) {
    ctx.tx_buffer[0] = ctx.slave_id;
    ctx.tx_buffer[1] = ctx.current_frame.function_code | 0x80;
    ctx.tx_buffer[2] = exception.code();
    ctx.tx_length = 3;
}

fn send_response<P: Port>(ctx: &mut Context, port: &mut P) {
    ctx.tx_length = crc::append(&mut ctx.tx_buffer, ctx.tx_length);
    port.rs485_tx_enable();
    let _ = port.send(&ctx.tx_buffer[..ctx.tx_length]);
    port.rs485_rx_enable();
}
