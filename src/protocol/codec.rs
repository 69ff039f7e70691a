//! Request encoding and response decoding.
//!
//! A request is a batch of sub-operations `(tag, flag, register, [data])`
//! packed into one report payload. The device answers with one report that
//! echoes `[tag, opcode]` per sub-operation, followed by the read data, in
//! the order the sub-operations were issued.
//!
//! [`RequestBuilder`] hands out typed field handles whose response offsets
//! are derived from the sub-operations actually added to that request, and
//! [`Response`] checks the tag/opcode echo before decoding a value. A handle
//! applied to the wrong response fails instead of silently reading whatever
//! byte happens to sit at the borrowed offset.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{LinkError, Result};
use crate::protocol::commands::{
    channel_flag, OP_READ_BLOCK, OP_READ_BYTE, OP_READ_WORD, OP_WRITE_BLOCK, OP_WRITE_BYTE,
    OP_WRITE_WORD,
};

/// Bytes of the outbound report taken by the report id and the length byte.
const REQUEST_HEADER_LEN: usize = 2;

/// Bytes of the response report taken by the leading pad byte.
const RESPONSE_PAD_LEN: usize = 1;

/// Echo bytes (`tag`, `opcode`) prefixed to every response segment.
const SEGMENT_ECHO_LEN: usize = 2;

// =============================================================================
// Field handles
// =============================================================================

/// Handle to a byte read within one request's response.
#[derive(Debug, Clone, Copy)]
pub struct ByteField {
    tag: u8,
    offset: usize,
}

/// Handle to a little-endian word read within one request's response.
#[derive(Debug, Clone, Copy)]
pub struct WordField {
    tag: u8,
    offset: usize,
}

/// Handle to a block read within one request's response.
#[derive(Debug, Clone, Copy)]
pub struct BlockField {
    tag: u8,
    offset: usize,
    len: usize,
}

/// Handle to a write acknowledgement within one request's response.
#[derive(Debug, Clone, Copy)]
pub struct WriteAck {
    tag: u8,
    opcode: u8,
    offset: usize,
}

// =============================================================================
// Request builder
// =============================================================================

/// Encoded request ready for the transport.
#[derive(Debug, Clone)]
pub struct Request {
    payload: Vec<u8>,
}

impl Request {
    /// Sub-operation bytes, excluding the report id and length byte.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Builds one batched request addressed to a single link channel.
#[derive(Debug)]
pub struct RequestBuilder {
    channel: u8,
    report_len: usize,
    payload: Vec<u8>,
    next_tag: u8,
    response_len: usize,
}

impl RequestBuilder {
    /// Start a request for `channel`, bounded by the unit's report length.
    pub fn new(channel: u8, report_len: usize) -> Self {
        RequestBuilder {
            channel,
            report_len,
            payload: Vec::new(),
            next_tag: 1,
            response_len: RESPONSE_PAD_LEN,
        }
    }

    fn push_op(&mut self, opcode: u8, register: u8, data: &[u8], response_data: usize) -> (u8, usize) {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);

        self.payload.push(tag);
        self.payload.push(channel_flag(opcode, self.channel));
        self.payload.push(register);
        self.payload.extend_from_slice(data);

        let offset = self.response_len;
        self.response_len += SEGMENT_ECHO_LEN + response_data;
        (tag, offset)
    }

    /// Queue a register byte write.
    pub fn write_byte(&mut self, register: u8, value: u8) -> WriteAck {
        let (tag, offset) = self.push_op(OP_WRITE_BYTE, register, &[value], 0);
        WriteAck { tag, opcode: OP_WRITE_BYTE, offset }
    }

    /// Queue a little-endian register word write.
    pub fn write_word(&mut self, register: u8, value: u16) -> WriteAck {
        let mut word = [0u8; 2];
        LittleEndian::write_u16(&mut word, value);
        let (tag, offset) = self.push_op(OP_WRITE_WORD, register, &word, 0);
        WriteAck { tag, opcode: OP_WRITE_WORD, offset }
    }

    /// Queue a register block write.
    pub fn write_block(&mut self, register: u8, data: &[u8]) -> WriteAck {
        let mut body = Vec::with_capacity(data.len() + 1);
        body.push(data.len() as u8);
        body.extend_from_slice(data);
        let (tag, offset) = self.push_op(OP_WRITE_BLOCK, register, &body, 0);
        WriteAck { tag, opcode: OP_WRITE_BLOCK, offset }
    }

    /// Queue a register byte read.
    pub fn read_byte(&mut self, register: u8) -> ByteField {
        let (tag, offset) = self.push_op(OP_READ_BYTE, register, &[], 1);
        ByteField { tag, offset }
    }

    /// Queue a little-endian register word read.
    pub fn read_word(&mut self, register: u8) -> WordField {
        let (tag, offset) = self.push_op(OP_READ_WORD, register, &[], 2);
        WordField { tag, offset }
    }

    /// Queue a register block read of `len` bytes.
    pub fn read_block(&mut self, register: u8, len: u8) -> BlockField {
        let (tag, offset) = self.push_op(OP_READ_BLOCK, register, &[len], len as usize);
        BlockField { tag, offset, len: len as usize }
    }

    /// Seal the request, checking that both directions fit one report.
    pub fn finish(self) -> Result<Request> {
        let max_payload = self.report_len - REQUEST_HEADER_LEN;
        if self.payload.len() > max_payload {
            return Err(LinkError::PayloadTooLarge {
                len: self.payload.len(),
                max: max_payload,
            });
        }
        if self.response_len > self.report_len {
            return Err(LinkError::PayloadTooLarge {
                len: self.response_len,
                max: self.report_len,
            });
        }
        Ok(Request { payload: self.payload })
    }
}

// =============================================================================
// Response reader
// =============================================================================

/// One response report, validated segment by segment as fields are read.
#[derive(Debug)]
pub struct Response {
    data: Vec<u8>,
}

impl Response {
    /// Wrap a raw response report. The leading pad byte must be zero;
    /// anything else is a stale or foreign report.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(LinkError::InvalidResponse {
                message: "Empty response report".into(),
            });
        }
        if data[0] != 0 {
            return Err(LinkError::InvalidResponse {
                message: format!("Response pad byte is {:#04x}, expected 0x00", data[0]),
            });
        }
        Ok(Response { data })
    }

    fn check_echo(&self, offset: usize, tag: u8, opcode: u8, data_len: usize) -> Result<()> {
        let end = offset + SEGMENT_ECHO_LEN + data_len;
        if end > self.data.len() {
            return Err(LinkError::InvalidResponse {
                message: format!(
                    "Segment at offset {} runs past the {}-byte report",
                    offset,
                    self.data.len()
                ),
            });
        }
        if self.data[offset] != tag || self.data[offset + 1] != opcode {
            return Err(LinkError::InvalidResponse {
                message: format!(
                    "Echo mismatch at offset {}: got [{:#04x}, {:#04x}], expected [{:#04x}, {:#04x}]",
                    offset,
                    self.data[offset],
                    self.data[offset + 1],
                    tag,
                    opcode
                ),
            });
        }
        Ok(())
    }

    /// Decode a byte read.
    pub fn byte(&self, field: ByteField) -> Result<u8> {
        self.check_echo(field.offset, field.tag, OP_READ_BYTE, 1)?;
        Ok(self.data[field.offset + SEGMENT_ECHO_LEN])
    }

    /// Decode a little-endian word read.
    pub fn word(&self, field: WordField) -> Result<u16> {
        self.check_echo(field.offset, field.tag, OP_READ_WORD, 2)?;
        let start = field.offset + SEGMENT_ECHO_LEN;
        Ok(LittleEndian::read_u16(&self.data[start..start + 2]))
    }

    /// Decode a block read.
    pub fn block(&self, field: BlockField) -> Result<&[u8]> {
        self.check_echo(field.offset, field.tag, OP_READ_BLOCK, field.len)?;
        let start = field.offset + SEGMENT_ECHO_LEN;
        Ok(&self.data[start..start + field.len])
    }

    /// Verify a write acknowledgement.
    pub fn ack(&self, ack: WriteAck) -> Result<()> {
        self.check_echo(ack.offset, ack.tag, ack.opcode, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::{
        CHANNEL_POPULATED, NODE_STATUS_LEN, REG_FAN_MODE, REG_FAN_RPM, REG_FAN_SELECT,
        REG_NODE_STATUS,
    };
    use crate::protocol::values::decode_temp;

    #[test]
    fn test_subop_encoding() {
        let mut builder = RequestBuilder::new(2, 64);
        let mode = builder.read_byte(REG_FAN_MODE);
        let request = builder.finish().unwrap();

        // tag 1, opcode 0x07 with channel 2 in the high nibble, register.
        assert_eq!(request.payload(), &[0x01, 0x27, 0x12]);

        let response = Response::parse(vec![0x00, 0x01, 0x07, 0x86]).unwrap();
        assert_eq!(response.byte(mode).unwrap(), 0x86);
    }

    #[test]
    fn test_mixed_batch_offsets() {
        let mut builder = RequestBuilder::new(0, 64);
        let select = builder.write_byte(REG_FAN_SELECT, 1);
        let mode = builder.read_byte(REG_FAN_MODE);
        let rpm = builder.read_word(REG_FAN_RPM);
        let request = builder.finish().unwrap();

        assert_eq!(
            request.payload(),
            &[
                0x01, 0x06, 0x10, 0x01, // write fan select = 1
                0x02, 0x07, 0x12, // read mode
                0x03, 0x09, 0x16, // read rpm
            ]
        );

        // Segments: pad, [1,0x06], [2,0x07,mode], [3,0x09,lo,hi].
        let mut data = vec![0u8; 64];
        data[1] = 0x01;
        data[2] = 0x06;
        data[3] = 0x02;
        data[4] = 0x07;
        data[5] = 0x82;
        data[6] = 0x03;
        data[7] = 0x09;
        data[8] = 0xB0;
        data[9] = 0x04;
        let response = Response::parse(data).unwrap();

        response.ack(select).unwrap();
        assert_eq!(response.byte(mode).unwrap(), 0x82);
        assert_eq!(response.word(rpm).unwrap(), 1200);
    }

    #[test]
    fn test_node_status_block_offsets() {
        let mut builder = RequestBuilder::new(0, 64);
        let status = builder.read_block(REG_NODE_STATUS, NODE_STATUS_LEN);
        let request = builder.finish().unwrap();
        assert_eq!(request.payload(), &[0x01, 0x0B, 0x03, 0x08]);

        // Marker byte for channel i sits at response offset 3 + i.
        let mut data = vec![0u8; 64];
        data[1] = 0x01;
        data[2] = 0x0B;
        data[3] = CHANNEL_POPULATED;
        data[3 + 2] = CHANNEL_POPULATED;
        let response = Response::parse(data).unwrap();

        let markers = response.block(status).unwrap();
        assert_eq!(markers.len(), 8);
        assert_eq!(markers[0], CHANNEL_POPULATED);
        assert_eq!(markers[2], CHANNEL_POPULATED);
        assert_eq!(markers[1], 0);
    }

    #[test]
    fn test_word_decodes_temperature() {
        let mut builder = RequestBuilder::new(0, 64);
        let temp = builder.read_word(0x10);
        builder.finish().unwrap();

        let response = Response::parse(vec![0x00, 0x01, 0x09, 0x00, 0x0A]).unwrap();
        assert_eq!(decode_temp(response.word(temp).unwrap()), 10.0);
    }

    #[test]
    fn test_echo_mismatch_rejected() {
        let mut builder = RequestBuilder::new(0, 64);
        let mode = builder.read_byte(REG_FAN_MODE);
        builder.finish().unwrap();

        // Opcode echoed as a word read instead of a byte read.
        let response = Response::parse(vec![0x00, 0x01, 0x09, 0x55, 0x00]).unwrap();
        assert!(matches!(
            response.byte(mode),
            Err(LinkError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_field_from_other_request_rejected() {
        let mut first = RequestBuilder::new(0, 64);
        first.write_byte(REG_FAN_SELECT, 0);
        let rpm = first.read_word(REG_FAN_RPM);
        first.finish().unwrap();

        // A different request whose response has a byte read where the
        // first request expected its word segment.
        let mut second = RequestBuilder::new(0, 64);
        second.read_byte(REG_FAN_MODE);
        second.finish().unwrap();
        let response = Response::parse(vec![0x00, 0x01, 0x07, 0x86, 0x00, 0x00, 0x00]).unwrap();

        assert!(response.word(rpm).is_err());
    }

    #[test]
    fn test_payload_capacity_enforced() {
        let mut builder = RequestBuilder::new(0, 64);
        for _ in 0..21 {
            builder.read_byte(0x00);
        }
        // 21 reads encode to 63 bytes, one over the 62-byte payload room.
        assert!(matches!(
            builder.finish(),
            Err(LinkError::PayloadTooLarge { len: 63, max: 62 })
        ));
    }

    #[test]
    fn test_response_capacity_enforced() {
        let mut builder = RequestBuilder::new(0, 64);
        builder.read_block(0x00, 40);
        builder.read_block(0x00, 40);
        assert!(matches!(
            builder.finish(),
            Err(LinkError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_nonzero_pad_rejected() {
        assert!(Response::parse(vec![0x07, 0x01, 0x07, 0x00]).is_err());
    }
}
