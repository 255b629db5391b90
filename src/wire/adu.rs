//! The MODBUS/TCP Application Data Unit: an MBAP header (transaction id,
//! protocol id, length, unit id) followed by a PDU, backed by a single
//! reference-counted buffer so cloning an ADU is O(1).

use bytes::Bytes;

use crate::error::{ModbusError, Result};
use crate::wire::accessor;
use crate::wire::pdu::{ExceptionResponse, PduMessage};
use crate::wire::{ByteOrder, ExceptionCode, FunctionCode, MIN_PDU_SIZE, PROTOCOL_ID, TCP_HEADER_SIZE};

/// Whether an ADU (or a [`PduMessage`]) represents a request sent to a
/// device or a response sent back from one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// A shared, immutable MODBUS/TCP frame: the 7-byte MBAP prefix
/// (transaction id, protocol id, length, unit id) plus the PDU bytes that
/// follow it.
///
/// An `Adu` is always either a fully-formed frame or the well-defined empty
/// sentinel produced by [`Adu::invalid`]; every accessor is total over both
/// cases rather than panicking on the latter.
#[derive(Debug, Clone)]
pub struct Adu {
    buf: Bytes,
    direction: Direction,
}

impl Adu {
    /// The empty, invalid sentinel. All accessors on it report failure
    /// (errors for the header fields, `None` for typed extraction) rather
    /// than panicking.
    pub fn invalid(direction: Direction) -> Self {
        Self {
            buf: Bytes::new(),
            direction,
        }
    }

    /// Builds a request ADU from a typed PDU and a transaction id: the
    /// buffer is sized exactly to the MBAP prefix plus the PDU body.
    pub fn from_request<P: PduMessage>(transaction_id: u16, unit_id: u8, pdu: &P) -> Self {
        debug_assert_eq!(P::DIRECTION, Direction::Request);
        let body_len = 1 + pdu.encoded_len(); // unit id's companion, function code
        let mut buf = Vec::with_capacity(TCP_HEADER_SIZE + 1 + body_len);
        buf.extend_from_slice(&transaction_id.to_be_bytes());
        buf.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        buf.extend_from_slice(&(body_len as u16).to_be_bytes());
        buf.push(unit_id);
        buf.push(u8::from(P::FUNCTION_CODE));
        pdu.encode(&mut buf);
        Self {
            buf: Bytes::from(buf),
            direction: Direction::Request,
        }
    }

    /// Builds a response ADU from a typed PDU, echoing the request's
    /// transaction id.
    pub fn from_response<P: PduMessage>(transaction_id: u16, unit_id: u8, pdu: &P) -> Self {
        debug_assert_eq!(P::DIRECTION, Direction::Response);
        let body_len = 1 + pdu.encoded_len();
        let mut buf = Vec::with_capacity(TCP_HEADER_SIZE + 1 + body_len);
        buf.extend_from_slice(&transaction_id.to_be_bytes());
        buf.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        buf.extend_from_slice(&(body_len as u16).to_be_bytes());
        buf.push(unit_id);
        buf.push(u8::from(P::FUNCTION_CODE));
        pdu.encode(&mut buf);
        Self {
            buf: Bytes::from(buf),
            direction: Direction::Response,
        }
    }

    /// Builds an exception response ADU, echoing the request's transaction id.
    pub fn from_exception(transaction_id: u16, unit_id: u8, exception: &ExceptionResponse) -> Self {
        let body_len = 1 + exception.encoded_len();
        let mut buf = Vec::with_capacity(TCP_HEADER_SIZE + 1 + body_len);
        buf.extend_from_slice(&transaction_id.to_be_bytes());
        buf.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        buf.extend_from_slice(&(body_len as u16).to_be_bytes());
        buf.push(unit_id);
        exception.encode(&mut buf);
        Self {
            buf: Bytes::from(buf),
            direction: Direction::Response,
        }
    }

    /// Builds an ADU from a single contiguous buffer of `bytes_read` valid
    /// bytes, validating the MBAP header in the process.
    pub fn from_buffer(buf: Bytes, bytes_read: usize, direction: Direction) -> Result<Self> {
        if bytes_read < TCP_HEADER_SIZE {
            return Err(ModbusError::MalformedMessage(format!(
                "frame shorter than the MBAP header: {bytes_read} bytes"
            )));
        }
        let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if length < 1 {
            return Err(ModbusError::MalformedMessage(
                "MBAP length field must be at least 1 (unit id)".to_string(),
            ));
        }
        if bytes_read < TCP_HEADER_SIZE + length {
            return Err(ModbusError::MalformedMessage(format!(
                "frame declares {length} bytes after the header but only {} are present",
                bytes_read - TCP_HEADER_SIZE
            )));
        }
        if buf[2] != 0 || buf[3] != 0 {
            return Err(ModbusError::MalformedMessage(
                "protocol id must be zero".to_string(),
            ));
        }
        Ok(Self {
            buf: buf.slice(0..TCP_HEADER_SIZE + length),
            direction,
        })
    }

    /// Builds an ADU from a separately-received header and payload,
    /// applying the same invariants as [`Adu::from_buffer`].
    pub fn from_parts(header: &[u8], payload: &[u8], direction: Direction) -> Result<Self> {
        let mut buf = Vec::with_capacity(header.len() + payload.len());
        buf.extend_from_slice(header);
        buf.extend_from_slice(payload);
        let len = buf.len();
        Self::from_buffer(Bytes::from(buf), len, direction)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_valid(&self) -> bool {
        self.buf.len() >= TCP_HEADER_SIZE + MIN_PDU_SIZE
    }

    /// Raw frame bytes, MBAP header and all.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn transaction_id(&self) -> Result<u16> {
        self.require_header()?;
        Ok(u16::from_be_bytes([self.buf[0], self.buf[1]]))
    }

    pub fn message_length(&self) -> Result<u16> {
        self.require_header()?;
        Ok(u16::from_be_bytes([self.buf[4], self.buf[5]]))
    }

    pub fn unit_id(&self) -> Result<u8> {
        self.require_header()?;
        Ok(self.buf[6])
    }

    pub fn function_code(&self) -> Result<FunctionCode> {
        self.require_pdu()?;
        FunctionCode::try_from(self.buf[7] & 0x7F)
    }

    pub fn is_exception(&self) -> Result<bool> {
        self.require_pdu()?;
        Ok(self.buf[7] & 0x80 != 0)
    }

    /// The exception code carried by this frame, if it's an exception
    /// response. `Ok(None)` (a synthetic "no exception") for any frame that
    /// isn't one.
    pub fn exception_code(&self) -> Result<Option<ExceptionCode>> {
        if !self.is_exception()? {
            return Ok(None);
        }
        if self.buf.len() < TCP_HEADER_SIZE + 1 + 2 {
            return Err(ModbusError::MalformedMessage(
                "exception PDU shorter than 2 bytes".to_string(),
            ));
        }
        Ok(Some(ExceptionCode::try_from(self.buf[8])?))
    }

    /// The PDU body, i.e. everything after the function code byte.
    fn body(&self) -> Result<&[u8]> {
        self.require_pdu()?;
        Ok(&self.buf[8..])
    }

    /// Attempts to parse this ADU's body as `P`. Returns `None` unless the
    /// function code, direction, and exception flag all match `P` and
    /// parsing succeeds — never propagates an error, matching the typed
    /// extraction contract in the design notes.
    pub fn extract<P: PduMessage>(&self) -> Option<P> {
        if self.direction != P::DIRECTION {
            return None;
        }
        if self.is_exception().unwrap_or(true) {
            return None;
        }
        match self.function_code() {
            Ok(fc) if fc == P::FUNCTION_CODE => {}
            _ => return None,
        }
        let body = self.body().ok()?;
        P::decode(body).ok()
    }

    /// Attempts to parse this ADU as an exception response.
    pub fn extract_exception(&self) -> Option<ExceptionResponse> {
        if !self.is_exception().unwrap_or(false) {
            return None;
        }
        let body = self.body().ok()?;
        ExceptionResponse::decode(body).ok()
    }

    /// Reads bit `index` out of this ADU's PDU body (the bytes after the
    /// function code, e.g. a read-registers response's byte-count-prefixed
    /// data). `false` for an invalid or too-short ADU rather than an error,
    /// matching [`accessor`]'s "malformed reads as zero" contract for raw
    /// response data, as distinct from the header accessors above.
    pub fn read_bool(&self, index: usize) -> bool {
        accessor::read_bool(self.body().unwrap_or(&[]), index)
    }

    pub fn read_u8(&self, index: usize) -> u8 {
        accessor::read_u8(self.body().unwrap_or(&[]), index)
    }

    pub fn read_i8(&self, index: usize) -> i8 {
        accessor::read_i8(self.body().unwrap_or(&[]), index)
    }

    pub fn read_u16(&self, index: usize, order: ByteOrder) -> u16 {
        accessor::read_u16(self.body().unwrap_or(&[]), index, order)
    }

    pub fn read_i16(&self, index: usize, order: ByteOrder) -> i16 {
        accessor::read_i16(self.body().unwrap_or(&[]), index, order)
    }

    pub fn read_u32(&self, index: usize, order: ByteOrder) -> u32 {
        accessor::read_u32(self.body().unwrap_or(&[]), index, order)
    }

    pub fn read_i32(&self, index: usize, order: ByteOrder) -> i32 {
        accessor::read_i32(self.body().unwrap_or(&[]), index, order)
    }

    fn require_header(&self) -> Result<()> {
        if self.buf.len() < TCP_HEADER_SIZE + 1 {
            return Err(ModbusError::MalformedMessage(
                "empty or truncated ADU".to_string(),
            ));
        }
        Ok(())
    }

    /// Only the unit id and function code byte need to be present for
    /// [`Adu::function_code`], [`Adu::is_exception`], and [`Adu::body`] to
    /// read safely — an exception ADU (S4) is 9 bytes total, 2 short of
    /// [`MIN_PDU_SIZE`]'s 4-byte request-PDU floor, so gating on that would
    /// reject every exception response.
    fn require_pdu(&self) -> Result<()> {
        if self.buf.len() < TCP_HEADER_SIZE + 2 {
            return Err(ModbusError::MalformedMessage(
                "empty or truncated ADU".to_string(),
            ));
        }
        Ok(())
    }
}

impl PartialEq for Adu {
    fn eq(&self, other: &Self) -> bool {
        self.buf == other.buf && self.direction == other.direction
    }
}
impl Eq for Adu {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::pdu::{ReadCoilsRequest, ReadCoilsResponse};

    #[test]
    fn request_round_trips_through_a_buffer() {
        let pdu = ReadCoilsRequest {
            start_address: 19,
            quantity: 19,
        };
        let adu = Adu::from_request(7, 0x11, &pdu);
        let bytes = Bytes::copy_from_slice(adu.as_bytes());
        let len = bytes.len();
        let parsed = Adu::from_buffer(bytes, len, Direction::Request).unwrap();
        assert_eq!(parsed.transaction_id().unwrap(), 7);
        assert_eq!(parsed.unit_id().unwrap(), 0x11);
        assert_eq!(parsed.function_code().unwrap(), FunctionCode::ReadCoils);
        assert!(!parsed.is_exception().unwrap());
        assert_eq!(parsed.extract::<ReadCoilsRequest>().unwrap(), pdu);
    }

    #[test]
    fn extract_rejects_wrong_direction() {
        let pdu = ReadCoilsRequest {
            start_address: 0,
            quantity: 1,
        };
        let adu = Adu::from_request(1, 0, &pdu);
        assert!(adu.extract::<ReadCoilsResponse>().is_none());
    }

    #[test]
    fn invalid_adu_reports_errors_without_panicking() {
        let adu = Adu::invalid(Direction::Response);
        assert!(adu.transaction_id().is_err());
        assert!(adu.function_code().is_err());
        assert!(adu.extract::<ReadCoilsResponse>().is_none());
    }

    #[test]
    fn exception_adu_is_recognized_despite_being_shorter_than_a_request_pdu() {
        // unit_id=17, read_coils (0x01) refused with illegal_data_address.
        let bytes: &[u8] = &[0x00, 0x17, 0x00, 0x00, 0x00, 0x03, 0x11, 0x81, 0x02];
        let adu = Adu::from_buffer(
            Bytes::copy_from_slice(bytes),
            bytes.len(),
            Direction::Response,
        )
        .unwrap();

        assert!(adu.is_exception().unwrap());
        assert_eq!(
            adu.exception_code().unwrap(),
            Some(ExceptionCode::IllegalDataAddress)
        );
        let exception = adu.extract_exception().unwrap();
        assert_eq!(exception.function_code, FunctionCode::ReadCoils);
        assert_eq!(exception.exception_code, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn byte_order_accessors_read_the_response_body() {
        let pdu = ReadCoilsResponse {
            values: vec![true, false, true],
        };
        let adu = Adu::from_response(1, 0x11, &pdu);
        // byte_count (0x01) then the packed coil byte (0b0000_0101).
        assert_eq!(adu.read_u8(0), 1);
        assert!(adu.read_bool(8)); // bit 0 of the coil byte at index 1
        assert!(!adu.read_bool(9));
        assert!(adu.read_bool(10));
    }

    #[test]
    fn byte_order_accessors_are_zero_on_an_invalid_adu() {
        let adu = Adu::invalid(Direction::Response);
        assert_eq!(adu.read_u8(0), 0);
        assert_eq!(adu.read_u16(0, ByteOrder::Normal), 0);
        assert!(!adu.read_bool(0));
    }

    #[test]
    fn rejects_nonzero_protocol_id() {
        let mut buf = vec![0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x11, 0x01];
        let len = buf.len();
        buf.truncate(len);
        let err = Adu::from_buffer(Bytes::from(buf), len, Direction::Request).unwrap_err();
        assert!(matches!(err, ModbusError::MalformedMessage(_)));
    }
}
