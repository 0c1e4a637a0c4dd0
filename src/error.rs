//! Error taxonomy for the framing, dispatch, register-store and master layers.

/// Single-octet Modbus exception code, also the wire byte sent after `fc | 0x80`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
}

impl ExceptionCode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decodes the exception byte a slave sends after `fc | 0x80`. Any value
    /// outside the four defined codes is folded into `SlaveDeviceFailure`
    /// rather than rejected — a master must still surface *some* exception to
    /// the caller for a response it already recognized as an exception frame.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            _ => ExceptionCode::SlaveDeviceFailure,
        }
    }
}

/// Why a received ADU never reached the dispatcher.
///
/// All of these are silently discarded per §7 of the protocol design: no
/// response is built, no log beyond a trace-level breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    TooShort,
    CrcMismatch,
    SlaveIdMismatch,
}

/// Register-store accessor failure: the address did not resolve in the
/// active backing (dense capacity or sparse table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterError;

/// Failure outcome of a master-mode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MasterError {
    /// The context was not constructed in the master role.
    NotMaster,
    /// The requested quantity falls outside the function code's limit.
    QuantityOutOfRange,
    /// No valid response arrived within `timeout_ms`.
    Timeout,
    /// The response was shorter than the 5-byte floor.
    ResponseTooShort,
    /// The response's CRC did not match.
    CrcMismatch,
    /// The response's slave id did not echo the request's.
    SlaveIdMismatch,
    /// The responding slave raised an exception; the code is carried in the
    /// context's current-frame view.
    Exception(ExceptionCode),
    /// The response function code did not echo the request's.
    FunctionCodeMismatch,
    /// A read response's byte-count field did not match the requested
    /// quantity's expected coding.
    ByteCountMismatch,
    /// A write response's address/value or address/quantity echo mismatched.
    EchoMismatch,
}
