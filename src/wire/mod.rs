//! Wire-level types for the MODBUS Application Protocol: function codes,
//! exception codes, framing constants, and the byte-order selector used by
//! the response accessor.

mod adu;
mod accessor;
pub mod pdu;

pub use adu::{Adu, Direction};
pub use accessor::ByteOrder;

/// Maximum size, in bytes, of a full MODBUS TCP Application Protocol Unit
/// (MBAP header + PDU).
pub const MAX_APU_SIZE: usize = 256;

/// Size, in bytes, of the MBAP header up to and including the length field
/// (transaction id + protocol id + length). The unit id that follows brings
/// the full ADU prefix to 7 bytes.
pub const TCP_HEADER_SIZE: usize = 6;

/// Minimum legal PDU size including the unit id.
pub const MIN_PDU_SIZE: usize = 4;

/// Size of an exception PDU (function code + exception code), excluding the
/// unit id.
pub const EXCEPTION_PDU_SIZE: usize = 3;

/// The protocol id field is always zero on MODBUS/TCP.
pub const PROTOCOL_ID: u16 = 0x0000;

/// Standard MODBUS function codes. The high bit (0x80) of the wire byte
/// flags an exception response and is handled separately from this enum;
/// values here are always the unset-high-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
    MaskWriteRegister = 0x16,
    ReadWriteMultipleRegisters = 0x17,
    ReadFifoQueue = 0x18,
}

impl From<FunctionCode> for u8 {
    fn from(code: FunctionCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = crate::error::ModbusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FunctionCode::ReadCoils),
            0x02 => Ok(FunctionCode::ReadDiscreteInputs),
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            0x0F => Ok(FunctionCode::WriteMultipleCoils),
            0x10 => Ok(FunctionCode::WriteMultipleRegisters),
            0x16 => Ok(FunctionCode::MaskWriteRegister),
            0x17 => Ok(FunctionCode::ReadWriteMultipleRegisters),
            0x18 => Ok(FunctionCode::ReadFifoQueue),
            other => Err(crate::error::ModbusError::MalformedMessage(format!(
                "unrecognized function code 0x{other:02X}"
            ))),
        }
    }
}

/// Standard MODBUS exception codes, carried as the second byte of an
/// exception PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl From<ExceptionCode> for u8 {
    fn from(code: ExceptionCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for ExceptionCode {
    type Error = crate::error::ModbusError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ExceptionCode::IllegalFunction),
            0x02 => Ok(ExceptionCode::IllegalDataAddress),
            0x03 => Ok(ExceptionCode::IllegalDataValue),
            0x04 => Ok(ExceptionCode::ServerDeviceFailure),
            0x05 => Ok(ExceptionCode::Acknowledge),
            0x06 => Ok(ExceptionCode::ServerDeviceBusy),
            0x07 => Ok(ExceptionCode::NegativeAcknowledge),
            0x08 => Ok(ExceptionCode::MemoryParityError),
            0x0A => Ok(ExceptionCode::GatewayPathUnavailable),
            0x0B => Ok(ExceptionCode::GatewayTargetDeviceFailedToRespond),
            other => Err(crate::error::ModbusError::MalformedMessage(format!(
                "unrecognized exception code 0x{other:02X}"
            ))),
        }
    }
}

/// Coil value as it appears on the wire in single-coil requests/responses.
pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;
