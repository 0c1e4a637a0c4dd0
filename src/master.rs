//! Master driver: one function per supported function code, each a
//! blocking request/response transaction that reuses the same
//! `Context`/[`Port`] plumbing as the slave dispatcher.
//!
//! Unlike the slave side — whose receive pipeline is fed exclusively by a
//! real UART RX interrupt calling [`Context::on_byte`] — the master spins in
//! this module's own wait loop after transmitting, since there is no other
//! work for it to yield to. That loop pumps [`Port::try_read`] itself so the
//! shared state machine still sees every byte through `on_byte`, and checks
//! elapsed time through `on_timer_tick` exactly as the slave's timer ISR
//! would, matching `modbus_rtu_master.c`'s inline wait loop in the original
//! source this driver is descended from.

use crate::context::{Context, Role, State};
use crate::crc;
use crate::error::{ExceptionCode, MasterError};
use crate::function::FunctionCode;
use crate::port::Port;

#[cfg(feature = "defmt")]
use defmt::{debug, trace};

const MAX_READ_COILS: u16 = 2000;
const MAX_READ_REGISTERS: u16 = 125;
const MAX_WRITE_COILS: u16 = 1968;
const MAX_WRITE_REGISTERS: u16 = 123;

/// Reads up to 2000 coils into `out`, one `bool` per coil starting at
/// `addr`. `out` must be at least `quantity` long.
pub fn read_coils<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    quantity: u16,
    out: &mut [bool],
) -> Result<(), MasterError> {
    read_bits(ctx, port, slave_id, FunctionCode::ReadCoils, addr, quantity, out, MAX_READ_COILS)
}

/// Reads up to 2000 discrete inputs into `out`. See [`read_coils`].
pub fn read_discrete_inputs<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    quantity: u16,
    out: &mut [bool],
) -> Result<(), MasterError> {
    read_bits(
        ctx,
        port,
        slave_id,
        FunctionCode::ReadDiscreteInputs,
        addr,
        quantity,
        out,
        MAX_READ_COILS,
    )
}

/// Reads up to 125 holding registers into `out`.
pub fn read_holding_registers<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    quantity: u16,
    out: &mut [u16],
) -> Result<(), MasterError> {
    read_words(
        ctx,
        port,
        slave_id,
        FunctionCode::ReadHoldingRegisters,
        addr,
        quantity,
        out,
        MAX_READ_REGISTERS,
    )
}

/// Reads up to 125 input registers into `out`.
pub fn read_input_registers<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    quantity: u16,
    out: &mut [u16],
) -> Result<(), MasterError> {
    read_words(
        ctx,
        port,
        slave_id,
        FunctionCode::ReadInputRegisters,
        addr,
        quantity,
        out,
        MAX_READ_REGISTERS,
    )
}

/// Writes a single coil and confirms the slave echoed the request exactly.
pub fn write_single_coil<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    value: bool,
) -> Result<(), MasterError> {
    if ctx.role() != Role::Master {
        return Err(MasterError::NotMaster);
    }
    build_header(ctx, slave_id, FunctionCode::WriteSingleCoil.code(), addr, 0);
    let wire_value: u16 = if value { 0xFF00 } else { 0x0000 };
    write_be(ctx, 4, wire_value);
    ctx.tx_length = 6;

    send_and_await(ctx, port)?;
    let result = check_header(ctx, slave_id, FunctionCode::WriteSingleCoil.code()).and_then(|()| {
        if ctx.rx_length < 6 {
            return Err(MasterError::ResponseTooShort);
        }
        if ctx.tx_buffer[2..6] != ctx.rx_buffer[2..6] {
            return Err(MasterError::EchoMismatch);
        }
        Ok(())
    });
    ctx.reset_to_idle();
    result
}

/// Writes a single holding register and confirms the echo.
pub fn write_single_register<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    value: u16,
) -> Result<(), MasterError> {
    if ctx.role() != Role::Master {
        return Err(MasterError::NotMaster);
    }
    build_header(ctx, slave_id, FunctionCode::WriteSingleRegister.code(), addr, 0);
    write_be(ctx, 4, value);
    ctx.tx_length = 6;

    send_and_await(ctx, port)?;
    let result = check_header(ctx, slave_id, FunctionCode::WriteSingleRegister.code()).and_then(|()| {
        if ctx.rx_length < 6 {
            return Err(MasterError::ResponseTooShort);
        }
        if ctx.tx_buffer[2..6] != ctx.rx_buffer[2..6] {
            return Err(MasterError::EchoMismatch);
        }
        Ok(())
    });
    ctx.reset_to_idle();
    result
}

/// Writes `values.len()` coils starting at `addr` (up to 1968).
pub fn write_multiple_coils<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    values: &[bool],
) -> Result<(), MasterError> {
    if ctx.role() != Role::Master {
        return Err(MasterError::NotMaster);
    }
    let quantity = values.len() as u16;
    if values.is_empty() || quantity > MAX_WRITE_COILS {
        return Err(MasterError::QuantityOutOfRange);
    }

    build_header(ctx, slave_id, FunctionCode::WriteMultipleCoils.code(), addr, quantity);
    let byte_count = ((quantity + 7) / 8) as usize;
    ctx.tx_buffer[6] = byte_count as u8;
    for b in &mut ctx.tx_buffer[7..7 + byte_count] {
        *b = 0;
    }
    for (i, &v) in values.iter().enumerate() {
        if v {
            ctx.tx_buffer[7 + (i >> 3)] |= 1 << (i & 0x07);
        }
    }
    ctx.tx_length = 7 + byte_count;

    send_and_await(ctx, port)?;
    let result = check_header(ctx, slave_id, FunctionCode::WriteMultipleCoils.code()).and_then(|()| {
        if ctx.rx_length < 6 {
            return Err(MasterError::ResponseTooShort);
        }
        if ctx.tx_buffer[2..6] != ctx.rx_buffer[2..6] {
            return Err(MasterError::EchoMismatch);
        }
        Ok(())
    });
    ctx.reset_to_idle();
    result
}

/// Writes `values.len()` holding registers starting at `addr` (up to 123).
pub fn write_multiple_registers<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    addr: u16,
    values: &[u16],
) -> Result<(), MasterError> {
    if ctx.role() != Role::Master {
        return Err(MasterError::NotMaster);
    }
    let quantity = values.len() as u16;
    if values.is_empty() || quantity > MAX_WRITE_REGISTERS {
        return Err(MasterError::QuantityOutOfRange);
    }

    build_header(ctx, slave_id, FunctionCode::WriteMultipleRegisters.code(), addr, quantity);
    let byte_count = (quantity as usize) * 2;
    ctx.tx_buffer[6] = byte_count as u8;
    for (i, &v) in values.iter().enumerate() {
        let bytes = v.to_be_bytes();
        ctx.tx_buffer[7 + i * 2] = bytes[0];
        ctx.tx_buffer[7 + i * 2 + 1] = bytes[1];
    }
    ctx.tx_length = 7 + byte_count;

    send_and_await(ctx, port)?;
    let result = check_header(ctx, slave_id, FunctionCode::WriteMultipleRegisters.code()).and_then(|()| {
        if ctx.rx_length < 6 {
            return Err(MasterError::ResponseTooShort);
        }
        if ctx.tx_buffer[2..6] != ctx.rx_buffer[2..6] {
            return Err(MasterError::EchoMismatch);
        }
        Ok(())
    });
    ctx.reset_to_idle();
    result
}

fn read_bits<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    fc: FunctionCode,
    addr: u16,
    quantity: u16,
    out: &mut [bool],
    max_quantity: u16,
) -> Result<(), MasterError> {
    if ctx.role() != Role::Master {
        return Err(MasterError::NotMaster);
    }
    if quantity == 0 || quantity > max_quantity || (out.len() as u16) < quantity {
        return Err(MasterError::QuantityOutOfRange);
    }

    build_header(ctx, slave_id, fc.code(), addr, quantity);
    ctx.tx_length = 6;

    send_and_await(ctx, port)?;
    let result = check_header(ctx, slave_id, fc.code()).and_then(|()| {
        let byte_count = ((quantity + 7) / 8) as usize;
        if ctx.rx_length < 3 + byte_count + 2 || ctx.rx_buffer[2] as usize != byte_count {
            return Err(MasterError::ByteCountMismatch);
        }
        for i in 0..quantity as usize {
            out[i] = (ctx.rx_buffer[3 + (i >> 3)] & (1 << (i & 0x07))) != 0;
        }
        Ok(())
    });
    ctx.reset_to_idle();
    result
}

fn read_words<P: Port>(
    ctx: &mut Context,
    port: &mut P,
    slave_id: u8,
    fc: FunctionCode,
    addr: u16,
    quantity: u16,
    out: &mut [u16],
    max_quantity: u16,
) -> Result<(), MasterError> {
    if ctx.role() != Role::Master {
        return Err(MasterError::NotMaster);
    }
    if quantity == 0 || quantity > max_quantity || (out.len() as u16) < quantity {
        return Err(MasterError::QuantityOutOfRange);
    }

    build_header(ctx, slave_id, fc.code(), addr, quantity);
    ctx.tx_length = 6;

    send_and_await(ctx, port)?;
    let result = check_header(ctx, slave_id, fc.code()).and_then(|()| {
        let byte_count = (quantity as usize) * 2;
        if ctx.rx_length < 3 + byte_count + 2 || ctx.rx_buffer[2] as usize != byte_count {
            return Err(MasterError::ByteCountMismatch);
        }
        for i in 0..quantity as usize {
            out[i] = u16::from_be_bytes([ctx.rx_buffer[3 + i * 2], ctx.rx_buffer[4 + i * 2]]);
        }
        Ok(())
    });
    ctx.reset_to_idle();
    result
}

fn build_header(ctx: &mut Context, slave_id: u8, fc: u8, addr: u16, quantity: u16) {
    ctx.tx_buffer[0] = slave_id;
    ctx.tx_buffer[1] = fc;
    write_be(ctx, 2, addr);
    write_be(ctx, 4, quantity);
}

fn write_be(ctx: &mut Context, offset: usize, value: u16) {
    let bytes = value.to_be_bytes();
    ctx.tx_buffer[offset] = bytes[0];
    ctx.tx_buffer[offset + 1] = bytes[1];
}

/// Appends the CRC, transmits, and busy-waits for a full response ADU to
/// land in `ctx`'s receive buffer (`State::Processing`) or for
/// `ctx.timeout_ms()` to elapse.
fn send_and_await<P: Port>(ctx: &mut Context, port: &mut P) -> Result<(), MasterError> {
    ctx.tx_length = crc::append(&mut ctx.tx_buffer, ctx.tx_length);
    ctx.rx_length = 0;
    ctx.state = State::Transmitting;
    port.rs485_tx_enable();
    let _ = port.send(&ctx.tx_buffer[..ctx.tx_length]);
    port.rs485_rx_enable();
    ctx.state = State::Waiting;

    let start_ms = port.now_ms();
    loop {
        if let Some(byte) = port.try_read() {
            ctx.on_byte(byte, port.now_us());
        }
        ctx.on_timer_tick(port.now_us());
        if ctx.state == State::Processing {
            return Ok(());
        }
        if port.now_ms().wrapping_sub(start_ms) > ctx.timeout_ms() {
            #[cfg(feature = "defmt")]
            trace!("modbus: master timed out waiting for response after {}ms", ctx.timeout_ms());
            ctx.reset_to_idle();
            return Err(MasterError::Timeout);
        }
        port.delay_us(100);
    }
}

/// Validates CRC, slave-id echo, and exception/function-code agreement.
/// Leaves `ctx`'s receive buffer untouched so callers can extract a payload
/// afterwards; the caller is responsible for calling
/// [`Context::reset_to_idle`] once it is done reading.
fn check_header(ctx: &mut Context, slave_id: u8, expected_fc: u8) -> Result<(), MasterError> {
    if ctx.rx_length < 5 {
        return Err(MasterError::ResponseTooShort);
    }
    if !crc::check(ctx.rx()) {
        return Err(MasterError::CrcMismatch);
    }
    if ctx.rx_buffer[0] != slave_id {
        return Err(MasterError::SlaveIdMismatch);
    }
    let fc = ctx.rx_buffer[1];
    if fc & 0x80 != 0 {
        let exception = ExceptionCode::from_u8(ctx.rx_buffer[2]);
        ctx.current_frame.exception_code = Some(exception);
        #[cfg(feature = "defmt")]
        debug!("modbus: master got exception response fc={} code={}", expected_fc, exception);
        return Err(MasterError::Exception(exception));
    }
    if fc != expected_fc {
        return Err(MasterError::FunctionCodeMismatch);
    }
    #[cfg(feature = "defmt")]
    trace!("modbus: master got fc={} response, rx_len={}", fc, ctx.rx_length);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Parity, SerialConfig, StopBits};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// A [`Port`] that queues canned response bytes, releasing one per
    /// `try_read` call so the wait loop in [`send_and_await`] exercises the
    /// same `on_byte`/`on_timer_tick` pipeline a real ISR would drive.
    struct ScriptedPort {
        sent: RefCell<Vec<Vec<u8>>>,
        rx_queue: RefCell<VecDeque<u8>>,
        now_us: RefCell<u32>,
        now_ms: RefCell<u32>,
    }

    impl ScriptedPort {
        fn new(response: &[u8]) -> Self {
            ScriptedPort {
                sent: RefCell::new(Vec::new()),
                rx_queue: RefCell::new(response.iter().copied().collect()),
                now_us: RefCell::new(0),
                now_ms: RefCell::new(0),
            }
        }

        fn advance(&self, us: u32) {
            *self.now_us.borrow_mut() += us;
            *self.now_ms.borrow_mut() += us / 1000;
        }
    }

    impl Port for ScriptedPort {
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
            self.advance(us);
        }

        fn timer_init(&mut self, _period_us: u32) {}
        fn timer_enable(&mut self, _enable: bool) {}

        fn try_read(&mut self) -> Option<u8> {
            self.advance(100);
            let byte = self.rx_queue.borrow_mut().pop_front();
            if byte.is_none() {
                // Response exhausted: let enough silence elapse for T3.5 to
                // promote Receiving -> Processing on the next on_timer_tick.
                self.advance(4_000);
            }
            byte
        }
    }

    fn ctx() -> Context {
        Context::new(0x01, Role::Master, SerialConfig::new(19_200, Parity::Even, StopBits::One))
    }

    #[test]
    fn read_holding_registers_round_trips() {
        let mut ctx = ctx();
        let response = [0x11u8, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40];
        let crc = crc::calculate(&response).to_le_bytes();
        let mut framed = std::vec::Vec::from(response);
        framed.extend_from_slice(&crc);
        let mut port = ScriptedPort::new(&framed);

        let mut out = [0u16; 3];
        read_holding_registers(&mut ctx, &mut port, 0x11, 0x6B, 3, &mut out).unwrap();
        assert_eq!(out, [0xAE41, 0x5652, 0x4340]);

        let sent = port.sent.borrow();
        assert_eq!(sent[0], std::vec![0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
        assert_eq!(ctx.state(), State::Idle);
    }

    #[test]
    fn write_single_register_confirms_echo() {
        let mut ctx = ctx();
        let response = [0x11u8, 0x06, 0x00, 0x01, 0x00, 0x03];
        let crc = crc::calculate(&response).to_le_bytes();
        let mut framed = std::vec::Vec::from(response);
        framed.extend_from_slice(&crc);
        let mut port = ScriptedPort::new(&framed);

        write_single_register(&mut ctx, &mut port, 0x11, 0x0001, 3).unwrap();
        assert_eq!(ctx.state(), State::Idle);
    }

    #[test]
    fn mismatched_echo_is_reported() {
        let mut ctx = ctx();
        // Slave echoes the wrong value for a write-single-register request.
        let response = [0x11u8, 0x06, 0x00, 0x01, 0x00, 0x99];
        let crc = crc::calculate(&response).to_le_bytes();
        let mut framed = std::vec::Vec::from(response);
        framed.extend_from_slice(&crc);
        let mut port = ScriptedPort::new(&framed);

        let err = write_single_register(&mut ctx, &mut port, 0x11, 0x0001, 3).unwrap_err();
        assert_eq!(err, MasterError::EchoMismatch);
    }

    #[test]
    fn slave_exception_is_surfaced() {
        let mut ctx = ctx();
        let response = [0x11u8, 0x83, 0x02];
        let crc = crc::calculate(&response).to_le_bytes();
        let mut framed = std::vec::Vec::from(response);
        framed.extend_from_slice(&crc);
        let mut port = ScriptedPort::new(&framed);

        let mut out = [0u16; 3];
        let err = read_holding_registers(&mut ctx, &mut port, 0x11, 0x6B, 3, &mut out).unwrap_err();
        assert_eq!(err, MasterError::Exception(ExceptionCode::IllegalDataAddress));
        assert_eq!(ctx.current_frame().exception_code, Some(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn no_response_times_out() {
        let mut ctx = ctx();
        ctx.set_timeout_ms(5);
        let mut port = ScriptedPort::new(&[]);

        let mut out = [0u16; 1];
        let err = read_holding_registers(&mut ctx, &mut port, 0x11, 0x00, 1, &mut out).unwrap_err();
        assert_eq!(err, MasterError::Timeout);
    }

    #[test]
    fn slave_role_refuses_master_calls() {
        let mut ctx = Context::new(0x11, Role::Slave, SerialConfig::new(19_200, Parity::Even, StopBits::One));
        let mut port = ScriptedPort::new(&[]);
        let mut out = [0u16; 1];
        let err = read_holding_registers(&mut ctx, &mut port, 0x11, 0x00, 1, &mut out).unwrap_err();
        assert_eq!(err, MasterError::NotMaster);
    }

    #[test]
    fn quantity_out_of_range_is_refused_before_any_send() {
        let mut ctx = ctx();
        let mut port = ScriptedPort::new(&[]);
        let mut out = [0u16; 200];
        let err = read_holding_registers(&mut ctx, &mut port, 0x11, 0x00, 126, &mut out).unwrap_err();
        assert_eq!(err, MasterError::QuantityOutOfRange);
        assert!(port.sent.borrow().is_empty());
    }

    #[test]
    fn write_multiple_coils_builds_correct_byte_count() {
        let mut ctx = ctx();
        let response = [0x11u8, 0x0F, 0x00, 0x00, 0x00, 0x0A];
        let crc = crc::calculate(&response).to_le_bytes();
        let mut framed = std::vec::Vec::from(response);
        framed.extend_from_slice(&crc);
        let mut port = ScriptedPort::new(&framed);

        let values = [true, false, true, true, false, false, false, false, true, true];
        write_multiple_coils(&mut ctx, &mut port, 0x11, 0, &values).unwrap();

        let sent = port.sent.borrow();
        assert_eq!(sent[0][6], 2, "10 coils need 2 bytes");
        assert_eq!(sent[0][7], 0b0000_1101);
        assert_eq!(sent[0][8], 0b0000_0011);
    }
}
