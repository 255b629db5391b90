//! MODBUS Protocol Data Units: one type per request/response pair plus the
//! exception PDU, each carrying a fixed function code and direction, a
//! serializer, a parser, and value equality.
//!
//! Tagged variants replace the request/response class hierarchy the
//! original C++ library uses: every PDU kind here is its own record type
//! implementing [`PduMessage`], and the direction (request vs response) is
//! encoded once as an associated constant rather than as a runtime tag.

use crate::error::{ModbusError, Result};
use crate::wire::{Direction, ExceptionCode, FunctionCode, COIL_OFF, COIL_ON};

/// A single MODBUS PDU variant: a fixed function code, a fixed direction,
/// and a serialize/parse pair operating on the PDU body (everything after
/// the function code byte).
pub trait PduMessage: Sized + Clone + PartialEq {
    /// The function code this variant always carries.
    const FUNCTION_CODE: FunctionCode;
    /// Whether this variant is a request or a response.
    const DIRECTION: Direction;

    /// Size in bytes of the encoded body, not including the function code
    /// byte itself.
    fn encoded_len(&self) -> usize;

    /// Appends the encoded body (not the function code) to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Parses the body (not the function code) from `body`. Must not read
    /// beyond `body`'s bounds; any inconsistency is a [`ModbusError::MalformedMessage`].
    fn decode(body: &[u8]) -> Result<Self>;
}

fn require_len(body: &[u8], minimum: usize, what: &str) -> Result<()> {
    if body.len() < minimum {
        return Err(ModbusError::MalformedMessage(format!(
            "{what}: need at least {minimum} bytes, got {}",
            body.len()
        )));
    }
    Ok(())
}

fn read_u16(body: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([body[offset], body[offset + 1]])
}

/// Packs booleans into bytes, little-endian within each byte: bit `i` of
/// `values` becomes bit `i % 8` of byte `i / 8`.
pub(crate) fn pack_bits(values: &[bool]) -> Vec<u8> {
    let byte_count = values.len().div_ceil(8);
    let mut data = vec![0u8; byte_count];
    for (i, &on) in values.iter().enumerate() {
        if on {
            data[i / 8] |= 1 << (i % 8);
        }
    }
    data
}

/// Unpacks up to `quantity` booleans from `bytes`, mirroring [`pack_bits`].
/// Padding bits beyond `quantity` in the final byte are ignored.
pub(crate) fn unpack_bits(bytes: &[u8], quantity: usize) -> Vec<bool> {
    let mut values = Vec::with_capacity(quantity);
    for (byte_idx, &byte) in bytes.iter().enumerate() {
        for bit_idx in 0..8 {
            if byte_idx * 8 + bit_idx >= quantity {
                break;
            }
            values.push((byte >> bit_idx) & 1 != 0);
        }
    }
    values
}

fn words_to_bytes(values: &[u16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * 2);
    for &v in values {
        data.extend_from_slice(&v.to_be_bytes());
    }
    data
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}

macro_rules! read_request {
    ($name:ident, $fc:ident) => {
        #[doc = concat!("Request body for `", stringify!($fc), "`: a starting address and a quantity.")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub start_address: u16,
            pub quantity: u16,
        }

        impl PduMessage for $name {
            const FUNCTION_CODE: FunctionCode = FunctionCode::$fc;
            const DIRECTION: Direction = Direction::Request;

            fn encoded_len(&self) -> usize {
                4
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.start_address.to_be_bytes());
                buf.extend_from_slice(&self.quantity.to_be_bytes());
            }

            fn decode(body: &[u8]) -> Result<Self> {
                require_len(body, 4, stringify!($name))?;
                Ok(Self {
                    start_address: read_u16(body, 0),
                    quantity: read_u16(body, 2),
                })
            }
        }
    };
}

read_request!(ReadCoilsRequest, ReadCoils);
read_request!(ReadDiscreteInputsRequest, ReadDiscreteInputs);
read_request!(ReadHoldingRegistersRequest, ReadHoldingRegisters);
read_request!(ReadInputRegistersRequest, ReadInputRegisters);

macro_rules! bit_response {
    ($name:ident, $fc:ident) => {
        #[doc = concat!("Response body for `", stringify!($fc), "`: a packed bit array.")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub values: Vec<bool>,
        }

        impl PduMessage for $name {
            const FUNCTION_CODE: FunctionCode = FunctionCode::$fc;
            const DIRECTION: Direction = Direction::Response;

            fn encoded_len(&self) -> usize {
                1 + pack_bits(&self.values).len()
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                let packed = pack_bits(&self.values);
                buf.push(packed.len() as u8);
                buf.extend_from_slice(&packed);
            }

            fn decode(body: &[u8]) -> Result<Self> {
                require_len(body, 1, stringify!($name))?;
                let byte_count = body[0] as usize;
                require_len(body, 1 + byte_count, stringify!($name))?;
                // The byte count alone doesn't say how many of the trailing
                // bits are real; without an accompanying quantity field we
                // treat every bit in the advertised bytes as significant.
                let values = unpack_bits(&body[1..1 + byte_count], byte_count * 8);
                Ok(Self { values })
            }
        }
    };
}

bit_response!(ReadCoilsResponse, ReadCoils);
bit_response!(ReadDiscreteInputsResponse, ReadDiscreteInputs);

macro_rules! register_response {
    ($name:ident, $fc:ident) => {
        #[doc = concat!("Response body for `", stringify!($fc), "`: an array of 16-bit registers.")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub values: Vec<u16>,
        }

        impl PduMessage for $name {
            const FUNCTION_CODE: FunctionCode = FunctionCode::$fc;
            const DIRECTION: Direction = Direction::Response;

            fn encoded_len(&self) -> usize {
                1 + self.values.len() * 2
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                buf.push((self.values.len() * 2) as u8);
                buf.extend_from_slice(&words_to_bytes(&self.values));
            }

            fn decode(body: &[u8]) -> Result<Self> {
                require_len(body, 1, stringify!($name))?;
                let byte_count = body[0] as usize;
                require_len(body, 1 + byte_count, stringify!($name))?;
                Ok(Self {
                    values: bytes_to_words(&body[1..1 + byte_count]),
                })
            }
        }
    };
}

register_response!(ReadHoldingRegistersResponse, ReadHoldingRegisters);
register_response!(ReadInputRegistersResponse, ReadInputRegisters);

/// Request to set or clear a single coil. The standard allows only
/// `0xFF00` (on) and `0x0000` (off) as the wire value; this port preserves
/// the source's lenient decode of any nonzero high byte as "on" (see the
/// open question in the design notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSingleCoilRequest {
    pub address: u16,
    pub value: bool,
}

/// Response to [`WriteSingleCoilRequest`]; a well-formed server echoes the
/// request byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSingleCoilResponse {
    pub address: u16,
    pub value: bool,
}

fn encode_single_coil(address: u16, value: bool, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&address.to_be_bytes());
    let wire_value = if value { COIL_ON } else { COIL_OFF };
    buf.extend_from_slice(&wire_value.to_be_bytes());
}

fn decode_single_coil(body: &[u8], what: &str) -> Result<(u16, bool)> {
    require_len(body, 4, what)?;
    let address = read_u16(body, 0);
    let value = body[2] == 0xFF;
    Ok((address, value))
}

impl PduMessage for WriteSingleCoilRequest {
    const FUNCTION_CODE: FunctionCode = FunctionCode::WriteSingleCoil;
    const DIRECTION: Direction = Direction::Request;

    fn encoded_len(&self) -> usize {
        4
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        encode_single_coil(self.address, self.value, buf);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let (address, value) = decode_single_coil(body, "WriteSingleCoilRequest")?;
        Ok(Self { address, value })
    }
}

impl PduMessage for WriteSingleCoilResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::WriteSingleCoil;
    const DIRECTION: Direction = Direction::Response;

    fn encoded_len(&self) -> usize {
        4
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        encode_single_coil(self.address, self.value, buf);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let (address, value) = decode_single_coil(body, "WriteSingleCoilResponse")?;
        Ok(Self { address, value })
    }
}

macro_rules! single_register {
    ($name:ident, $direction:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub address: u16,
            pub value: u16,
        }

        impl PduMessage for $name {
            const FUNCTION_CODE: FunctionCode = FunctionCode::WriteSingleRegister;
            const DIRECTION: Direction = $direction;

            fn encoded_len(&self) -> usize {
                4
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.address.to_be_bytes());
                buf.extend_from_slice(&self.value.to_be_bytes());
            }

            fn decode(body: &[u8]) -> Result<Self> {
                require_len(body, 4, stringify!($name))?;
                Ok(Self {
                    address: read_u16(body, 0),
                    value: read_u16(body, 2),
                })
            }
        }
    };
}

single_register!(WriteSingleRegisterRequest, Direction::Request);
single_register!(WriteSingleRegisterResponse, Direction::Response);

/// Request to write a contiguous span of coils.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleCoilsRequest {
    pub start_address: u16,
    pub values: Vec<bool>,
}

impl PduMessage for WriteMultipleCoilsRequest {
    const FUNCTION_CODE: FunctionCode = FunctionCode::WriteMultipleCoils;
    const DIRECTION: Direction = Direction::Request;

    fn encoded_len(&self) -> usize {
        5 + pack_bits(&self.values).len()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.start_address.to_be_bytes());
        buf.extend_from_slice(&(self.values.len() as u16).to_be_bytes());
        let packed = pack_bits(&self.values);
        buf.push(packed.len() as u8);
        buf.extend_from_slice(&packed);
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require_len(body, 5, "WriteMultipleCoilsRequest")?;
        let start_address = read_u16(body, 0);
        let quantity = read_u16(body, 2) as usize;
        let byte_count = body[4] as usize;
        require_len(body, 5 + byte_count, "WriteMultipleCoilsRequest")?;
        let values = unpack_bits(&body[5..5 + byte_count], quantity);
        Ok(Self {
            start_address,
            values,
        })
    }
}

/// Request to write a contiguous span of holding registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequest {
    pub start_address: u16,
    pub values: Vec<u16>,
}

impl PduMessage for WriteMultipleRegistersRequest {
    const FUNCTION_CODE: FunctionCode = FunctionCode::WriteMultipleRegisters;
    const DIRECTION: Direction = Direction::Request;

    fn encoded_len(&self) -> usize {
        5 + self.values.len() * 2
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.start_address.to_be_bytes());
        buf.extend_from_slice(&(self.values.len() as u16).to_be_bytes());
        buf.push((self.values.len() * 2) as u8);
        buf.extend_from_slice(&words_to_bytes(&self.values));
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require_len(body, 5, "WriteMultipleRegistersRequest")?;
        let start_address = read_u16(body, 0);
        let byte_count = body[4] as usize;
        require_len(body, 5 + byte_count, "WriteMultipleRegistersRequest")?;
        Ok(Self {
            start_address,
            values: bytes_to_words(&body[5..5 + byte_count]),
        })
    }
}

macro_rules! write_multiple_response {
    ($name:ident, $fc:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub start_address: u16,
            pub quantity: u16,
        }

        impl PduMessage for $name {
            const FUNCTION_CODE: FunctionCode = FunctionCode::$fc;
            const DIRECTION: Direction = Direction::Response;

            fn encoded_len(&self) -> usize {
                4
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.start_address.to_be_bytes());
                buf.extend_from_slice(&self.quantity.to_be_bytes());
            }

            fn decode(body: &[u8]) -> Result<Self> {
                require_len(body, 4, stringify!($name))?;
                Ok(Self {
                    start_address: read_u16(body, 0),
                    quantity: read_u16(body, 2),
                })
            }
        }
    };
}

write_multiple_response!(WriteMultipleCoilsResponse, WriteMultipleCoils);
write_multiple_response!(WriteMultipleRegistersResponse, WriteMultipleRegisters);

macro_rules! mask_write_register {
    ($name:ident, $direction:expr) => {
        /// `and_mask`/`or_mask` combine with the current register value as
        /// `(current AND and_mask) OR (or_mask AND NOT and_mask)`; the
        /// response mirrors the request exactly.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub address: u16,
            pub and_mask: u16,
            pub or_mask: u16,
        }

        impl PduMessage for $name {
            const FUNCTION_CODE: FunctionCode = FunctionCode::MaskWriteRegister;
            const DIRECTION: Direction = $direction;

            fn encoded_len(&self) -> usize {
                6
            }

            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.address.to_be_bytes());
                buf.extend_from_slice(&self.and_mask.to_be_bytes());
                buf.extend_from_slice(&self.or_mask.to_be_bytes());
            }

            fn decode(body: &[u8]) -> Result<Self> {
                require_len(body, 6, stringify!($name))?;
                Ok(Self {
                    address: read_u16(body, 0),
                    and_mask: read_u16(body, 2),
                    or_mask: read_u16(body, 4),
                })
            }
        }
    };
}

mask_write_register!(MaskWriteRegisterRequest, Direction::Request);
mask_write_register!(MaskWriteRegisterResponse, Direction::Response);

/// Request to atomically read one register span and write another in a
/// single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteMultipleRegistersRequest {
    pub read_start_address: u16,
    pub read_quantity: u16,
    pub write_start_address: u16,
    pub values: Vec<u16>,
}

impl PduMessage for ReadWriteMultipleRegistersRequest {
    const FUNCTION_CODE: FunctionCode = FunctionCode::ReadWriteMultipleRegisters;
    const DIRECTION: Direction = Direction::Request;

    fn encoded_len(&self) -> usize {
        9 + self.values.len() * 2
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.read_start_address.to_be_bytes());
        buf.extend_from_slice(&self.read_quantity.to_be_bytes());
        buf.extend_from_slice(&self.write_start_address.to_be_bytes());
        buf.extend_from_slice(&(self.values.len() as u16).to_be_bytes());
        buf.push((self.values.len() * 2) as u8);
        buf.extend_from_slice(&words_to_bytes(&self.values));
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require_len(body, 9, "ReadWriteMultipleRegistersRequest")?;
        let read_start_address = read_u16(body, 0);
        let read_quantity = read_u16(body, 2);
        let write_start_address = read_u16(body, 4);
        // `write_quantity` at bytes [6..8] is intentionally not trusted:
        // the source derives the real count from `byte_count` and
        // discards the field that arrived on the wire. Preserved here for
        // bug-for-bug compatibility (see design notes).
        let byte_count = body[8] as usize;
        require_len(body, 9 + byte_count, "ReadWriteMultipleRegistersRequest")?;
        Ok(Self {
            read_start_address,
            read_quantity,
            write_start_address,
            values: bytes_to_words(&body[9..9 + byte_count]),
        })
    }
}

/// Response to [`ReadWriteMultipleRegistersRequest`]: the registers read
/// back after the write half of the transaction was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteMultipleRegistersResponse {
    pub values: Vec<u16>,
}

impl PduMessage for ReadWriteMultipleRegistersResponse {
    const FUNCTION_CODE: FunctionCode = FunctionCode::ReadWriteMultipleRegisters;
    const DIRECTION: Direction = Direction::Response;

    fn encoded_len(&self) -> usize {
        1 + self.values.len() * 2
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.push((self.values.len() * 2) as u8);
        buf.extend_from_slice(&words_to_bytes(&self.values));
    }

    fn decode(body: &[u8]) -> Result<Self> {
        require_len(body, 1, "ReadWriteMultipleRegistersResponse")?;
        let byte_count = body[0] as usize;
        require_len(body, 1 + byte_count, "ReadWriteMultipleRegistersResponse")?;
        Ok(Self {
            values: bytes_to_words(&body[1..1 + byte_count]),
        })
    }
}

/// An exception response: the original function code (low seven bits) plus
/// a one-byte exception code. Exceptions aren't addressed through
/// [`PduMessage`] since their function code varies with the request being
/// refused; [`crate::wire::Adu::extract_exception`] handles them as a
/// distinct branch, matching the high-bit check on the wire function code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function_code: FunctionCode,
    pub exception_code: ExceptionCode,
}

impl ExceptionResponse {
    pub(crate) fn encoded_len(&self) -> usize {
        2
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(u8::from(self.function_code) | 0x80);
        buf.push(self.exception_code.into());
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self> {
        require_len(body, 2, "ExceptionResponse")?;
        let function_code = FunctionCode::try_from(body[0] & 0x7F)?;
        let exception_code = ExceptionCode::try_from(body[1])?;
        Ok(Self {
            function_code,
            exception_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_coils_request_round_trip() {
        let req = ReadCoilsRequest {
            start_address: 19,
            quantity: 37,
        };
        let mut buf = Vec::new();
        req.encode(&mut buf);
        assert_eq!(buf, vec![0x00, 0x13, 0x00, 0x25]);
        assert_eq!(ReadCoilsRequest::decode(&buf).unwrap(), req);
    }

    #[test]
    fn read_coils_response_parses_known_bytes() {
        // S2 body, after the unit id and function code: byte_count=5 then
        // the packed coil bytes.
        let body = [0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B];
        let resp = ReadCoilsResponse::decode(&body).unwrap();
        assert_eq!(resp.values.len(), 40);
        assert!(resp.values[0]);
        assert!(!resp.values[1]);
    }

    #[test]
    fn coil_bit_packing_matches_standard_example() {
        let values = [true, false, true, true, false, false, true, false, true];
        assert_eq!(pack_bits(&values), vec![0xCD, 0x01]);
        assert_eq!(unpack_bits(&[0xCD, 0x01], 9), values);
    }

    #[test]
    fn register_response_round_trip() {
        let resp = ReadHoldingRegistersResponse {
            values: vec![0x1234, 0x5678],
        };
        let mut buf = Vec::new();
        resp.encode(&mut buf);
        assert_eq!(buf, vec![0x04, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(ReadHoldingRegistersResponse::decode(&buf).unwrap(), resp);
    }

    #[test]
    fn write_single_coil_echo_bytes() {
        let req = WriteSingleCoilRequest {
            address: 172,
            value: true,
        };
        let mut buf = Vec::new();
        req.encode(&mut buf);
        assert_eq!(buf, vec![0x00, 0xAC, 0xFF, 0x00]);
    }

    #[test]
    fn write_single_coil_lenient_decode() {
        // Any nonzero high byte decodes as "on", mirroring the source.
        let (_, value) = decode_single_coil(&[0x00, 0xAC, 0x01, 0x00], "test").unwrap();
        assert!(!value);
        let (_, value) = decode_single_coil(&[0x00, 0xAC, 0xFF, 0x00], "test").unwrap();
        assert!(value);
    }

    #[test]
    fn write_multiple_coils_request_trims_padding_bits() {
        let req = WriteMultipleCoilsRequest {
            start_address: 19,
            values: vec![true; 10],
        };
        let mut buf = Vec::new();
        req.encode(&mut buf);
        // byte_count = ceil(10/8) = 2
        assert_eq!(buf[4], 2);
        let decoded = WriteMultipleCoilsRequest::decode(&buf).unwrap();
        assert_eq!(decoded.values.len(), 10);
    }

    #[test]
    fn mask_write_register_round_trip() {
        let req = MaskWriteRegisterRequest {
            address: 4,
            and_mask: 0xFF02,
            or_mask: 0x0025,
        };
        let mut buf = Vec::new();
        req.encode(&mut buf);
        assert_eq!(MaskWriteRegisterRequest::decode(&buf).unwrap(), req);
    }

    #[test]
    fn read_write_multiple_registers_byte_count_wins_over_write_quantity() {
        // write_quantity field says 5, but byte_count says only 2 bytes (1 word) follow.
        let mut body = vec![0x00, 0x03, 0x00, 0x06, 0x00, 0x0E, 0x00, 0x05, 0x02];
        body.extend_from_slice(&0x00FFu16.to_be_bytes());
        let req = ReadWriteMultipleRegistersRequest::decode(&body).unwrap();
        assert_eq!(req.values, vec![0x00FF]);
    }

    #[test]
    fn exception_response_round_trip() {
        let exc = ExceptionResponse {
            function_code: FunctionCode::ReadCoils,
            exception_code: ExceptionCode::IllegalDataAddress,
        };
        let mut buf = Vec::new();
        exc.encode(&mut buf);
        assert_eq!(buf, vec![0x81, 0x02]);
        assert_eq!(ExceptionResponse::decode(&buf).unwrap(), exc);
    }
}
