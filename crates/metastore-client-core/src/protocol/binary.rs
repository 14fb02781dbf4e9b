//! Strict binary encoding: big-endian fixed-width integers, 4-byte length prefixes.

use bytes::{Buf, BufMut, BytesMut};

use super::{checked_len, FieldHeader, MessageHeader, MessageType, ProtocolReader, ProtocolWriter, TType};
use crate::error::{ProtocolError, ProtocolResult};

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolWriter for BinaryWriter {
    fn write_message_begin(&mut self, name: &str, message_type: MessageType, seq_id: i32) {
        self.buf.put_u32(VERSION_1 | u32::from(message_type.to_u8()));
        self.write_string(name);
        self.buf.put_i32(seq_id);
    }

    fn write_struct_begin(&mut self) {}

    fn write_struct_end(&mut self) {}

    fn write_field_begin(&mut self, field_type: TType, id: i16) {
        self.buf.put_u8(field_type.to_u8());
        self.buf.put_i16(id);
    }

    fn write_field_stop(&mut self) {
        self.buf.put_u8(TType::Stop.to_u8());
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) {
        self.buf.put_u8(element_type.to_u8());
        self.buf.put_i32(size as i32);
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) {
        self.buf.put_u8(key_type.to_u8());
        self.buf.put_u8(value_type.to_u8());
        self.buf.put_i32(size as i32);
    }

    fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    fn write_byte(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    fn write_double(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    fn write_binary(&mut self, value: &[u8]) {
        self.buf.put_i32(value.len() as i32);
        self.buf.put_slice(value);
    }

    fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}

#[derive(Debug)]
pub struct BinaryReader<'a> {
    buf: &'a [u8],
    start: usize,
}

impl<'a> BinaryReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            start: buf.len(),
        }
    }

    fn need(&self, n: usize) -> ProtocolResult<()> {
        if self.buf.remaining() < n {
            Err(ProtocolError::Incomplete)
        } else {
            Ok(())
        }
    }

    fn read_bytes(&mut self, n: usize) -> ProtocolResult<Vec<u8>> {
        self.need(n)?;
        let bytes = self.buf[..n].to_vec();
        self.buf.advance(n);
        Ok(bytes)
    }
}

impl ProtocolReader for BinaryReader<'_> {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageHeader> {
        let first = self.read_i32()?;
        if first < 0 {
            let version = first as u32 & VERSION_MASK;
            if version != VERSION_1 {
                return Err(ProtocolError::BadVersion(format!("{version:#x}")));
            }
            let message_type = MessageType::from_u8((first & 0xff) as u8)?;
            let name = self.read_string()?;
            let seq_id = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        } else {
            // Old non-strict header: name length first, then type byte.
            let len = checked_len(i64::from(first))?;
            let name = String::from_utf8(self.read_bytes(len)?)
                .map_err(|_| ProtocolError::InvalidUtf8)?;
            let message_type = MessageType::from_u8(self.read_byte()? as u8)?;
            let seq_id = self.read_i32()?;
            Ok(MessageHeader {
                name,
                message_type,
                seq_id,
            })
        }
    }

    fn read_struct_begin(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_struct_end(&mut self) -> ProtocolResult<()> {
        Ok(())
    }

    fn read_field_begin(&mut self) -> ProtocolResult<FieldHeader> {
        let field_type = TType::from_u8(self.read_byte()? as u8)?;
        if field_type == TType::Stop {
            return Ok(FieldHeader { field_type, id: 0 });
        }
        let id = self.read_i16()?;
        Ok(FieldHeader { field_type, id })
    }

    fn read_list_begin(&mut self) -> ProtocolResult<(TType, usize)> {
        let element_type = TType::from_u8(self.read_byte()? as u8)?;
        let size = checked_len(i64::from(self.read_i32()?))?;
        Ok((element_type, size))
    }

    fn read_map_begin(&mut self) -> ProtocolResult<(TType, TType, usize)> {
        let key_type = TType::from_u8(self.read_byte()? as u8)?;
        let value_type = TType::from_u8(self.read_byte()? as u8)?;
        let size = checked_len(i64::from(self.read_i32()?))?;
        Ok((key_type, value_type, size))
    }

    fn read_bool(&mut self) -> ProtocolResult<bool> {
        Ok(self.read_byte()? != 0)
    }

    fn read_byte(&mut self) -> ProtocolResult<i8> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    fn read_i16(&mut self) -> ProtocolResult<i16> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    fn read_i32(&mut self) -> ProtocolResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn read_i64(&mut self) -> ProtocolResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    fn read_double(&mut self) -> ProtocolResult<f64> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    fn read_binary(&mut self) -> ProtocolResult<Vec<u8>> {
        let len = checked_len(i64::from(self.read_i32()?))?;
        self.read_bytes(len)
    }

    fn position(&self) -> usize {
        self.start - self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_message_header_layout() {
        let mut w = BinaryWriter::new();
        w.write_message_begin("set_ugi", MessageType::Call, 1);
        let bytes = w.take();
        assert_eq!(&bytes[..4], &[0x80, 0x01, 0x00, 0x01]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 7]);
        assert_eq!(&bytes[8..15], b"set_ugi");
        assert_eq!(&bytes[15..], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_non_strict_header_accepted() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&4i32.to_be_bytes());
        raw.extend_from_slice(b"ping");
        raw.push(2);
        raw.extend_from_slice(&9i32.to_be_bytes());
        let header = BinaryReader::new(&raw).read_message_begin().unwrap();
        assert_eq!(header.name, "ping");
        assert_eq!(header.message_type, MessageType::Reply);
        assert_eq!(header.seq_id, 9);
    }

    #[test]
    fn test_bad_version_rejected() {
        let raw = 0x8002_0001u32.to_be_bytes();
        let err = BinaryReader::new(&raw).read_message_begin().unwrap_err();
        assert!(matches!(err, ProtocolError::BadVersion(_)));
    }

    #[test]
    fn test_negative_length_rejected() {
        let raw = (-5i32).to_be_bytes();
        let err = BinaryReader::new(&raw).read_binary().unwrap_err();
        assert_eq!(err, ProtocolError::InvalidLength(-5));
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        let raw = [0u8, 0, 0, 10, b'a'];
        assert_eq!(
            BinaryReader::new(&raw).read_binary().unwrap_err(),
            ProtocolError::Incomplete
        );
    }
}
