//! Compact encoding: zigzag varints, delta-encoded field ids, bools folded into field headers.

use bytes::{Buf, BufMut, BytesMut};

use super::{checked_len, FieldHeader, MessageHeader, MessageType, ProtocolReader, ProtocolWriter, TType};
use crate::error::{ProtocolError, ProtocolResult};

const PROTOCOL_ID: u8 = 0x82;
const VERSION: u8 = 1;
const VERSION_MASK: u8 = 0x1f;
const TYPE_SHIFT: u8 = 5;

const BOOLEAN_TRUE: u8 = 1;
const BOOLEAN_FALSE: u8 = 2;

fn compact_type(field_type: TType) -> u8 {
    match field_type {
        TType::Stop => 0,
        TType::Bool => BOOLEAN_TRUE,
        TType::Byte => 3,
        TType::I16 => 4,
        TType::I32 => 5,
        TType::I64 => 6,
        TType::Double => 7,
        TType::String => 8,
        TType::List => 9,
        TType::Set => 10,
        TType::Map => 11,
        TType::Struct => 12,
    }
}

fn from_compact_type(value: u8) -> ProtocolResult<TType> {
    Ok(match value {
        0 => TType::Stop,
        BOOLEAN_TRUE | BOOLEAN_FALSE => TType::Bool,
        3 => TType::Byte,
        4 => TType::I16,
        5 => TType::I32,
        6 => TType::I64,
        7 => TType::Double,
        8 => TType::String,
        9 => TType::List,
        10 => TType::Set,
        11 => TType::Map,
        12 => TType::Struct,
        other => return Err(ProtocolError::UnknownType(other)),
    })
}

fn zigzag_32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

fn zigzag_64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag_32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

fn unzigzag_64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[derive(Debug, Default)]
pub struct CompactWriter {
    buf: BytesMut,
    last_field_id: i16,
    field_stack: Vec<i16>,
    pending_bool_field: Option<i16>,
}

impl CompactWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn put_varint(&mut self, mut n: u64) {
        while n >= 0x80 {
            self.buf.put_u8((n as u8 & 0x7f) | 0x80);
            n >>= 7;
        }
        self.buf.put_u8(n as u8);
    }

    fn put_field_header(&mut self, type_id: u8, id: i16) {
        let delta = i32::from(id) - i32::from(self.last_field_id);
        if delta > 0 && delta <= 15 {
            self.buf.put_u8(((delta as u8) << 4) | type_id);
        } else {
            self.buf.put_u8(type_id);
            self.put_varint(u64::from(zigzag_32(i32::from(id))));
        }
        self.last_field_id = id;
    }

    fn put_collection_header(&mut self, element_type: TType, size: usize) {
        let type_id = compact_type(element_type);
        if size <= 14 {
            self.buf.put_u8(((size as u8) << 4) | type_id);
        } else {
            self.buf.put_u8(0xf0 | type_id);
            self.put_varint(size as u64);
        }
    }
}

impl ProtocolWriter for CompactWriter {
    fn write_message_begin(&mut self, name: &str, message_type: MessageType, seq_id: i32) {
        self.buf.put_u8(PROTOCOL_ID);
        self.buf
            .put_u8((VERSION & VERSION_MASK) | (message_type.to_u8() << TYPE_SHIFT));
        self.put_varint(u64::from(seq_id as u32));
        self.write_string(name);
    }

    fn write_struct_begin(&mut self) {
        self.field_stack.push(self.last_field_id);
        self.last_field_id = 0;
    }

    fn write_struct_end(&mut self) {
        self.last_field_id = self.field_stack.pop().unwrap_or(0);
    }

    fn write_field_begin(&mut self, field_type: TType, id: i16) {
        if field_type == TType::Bool {
            self.pending_bool_field = Some(id);
        } else {
            self.put_field_header(compact_type(field_type), id);
        }
    }

    fn write_field_stop(&mut self) {
        self.buf.put_u8(0);
    }

    fn write_list_begin(&mut self, element_type: TType, size: usize) {
        self.put_collection_header(element_type, size);
    }

    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize) {
        if size == 0 {
            self.buf.put_u8(0);
        } else {
            self.put_varint(size as u64);
            self.buf
                .put_u8((compact_type(key_type) << 4) | compact_type(value_type));
        }
    }

    fn write_bool(&mut self, value: bool) {
        let type_id = if value { BOOLEAN_TRUE } else { BOOLEAN_FALSE };
        match self.pending_bool_field.take() {
            Some(id) => self.put_field_header(type_id, id),
            None => self.buf.put_u8(type_id),
        }
    }

    fn write_byte(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    fn write_i16(&mut self, value: i16) {
        self.put_varint(u64::from(zigzag_32(i32::from(value))));
    }

    fn write_i32(&mut self, value: i32) {
        self.put_varint(u64::from(zigzag_32(value)));
    }

    fn write_i64(&mut self, value: i64) {
        self.put_varint(zigzag_64(value));
    }

    fn write_double(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    fn write_binary(&mut self, value: &[u8]) {
        self.put_varint(value.len() as u64);
        self.buf.put_slice(value);
    }

    fn take(&mut self) -> BytesMut {
        self.last_field_id = 0;
        self.field_stack.clear();
        self.pending_bool_field = None;
        self.buf.split()
    }
}

#[derive(Debug)]
pub struct CompactReader<'a> {
    buf: &'a [u8],
    start: usize,
    last_field_id: i16,
    field_stack: Vec<i16>,
    pending_bool: Option<bool>,
}

impl<'a> CompactReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            start: buf.len(),
            last_field_id: 0,
            field_stack: Vec::new(),
            pending_bool: None,
        }
    }

    fn get_u8(&mut self) -> ProtocolResult<u8> {
        if !self.buf.has_remaining() {
            return Err(ProtocolError::Incomplete);
        }
        Ok(self.buf.get_u8())
    }

    fn get_varint(&mut self) -> ProtocolResult<u64> {
        let mut result = 0u64;
        for shift in (0..70).step_by(7) {
            let byte = self.get_u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(ProtocolError::VarintOverflow)
    }

    fn get_varint32(&mut self) -> ProtocolResult<u32> {
        u32::try_from(self.get_varint()?).map_err(|_| ProtocolError::VarintOverflow)
    }
}

impl ProtocolReader for CompactReader<'_> {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageHeader> {
        let protocol_id = self.get_u8()?;
        if protocol_id != PROTOCOL_ID {
            return Err(ProtocolError::BadVersion(format!(
                "protocol id {protocol_id:#x}"
            )));
        }
        let version_and_type = self.get_u8()?;
        let version = version_and_type & VERSION_MASK;
        if version != VERSION {
            return Err(ProtocolError::BadVersion(format!("compact version {version}")));
        }
        let message_type = MessageType::from_u8((version_and_type >> TYPE_SHIFT) & 0x07)?;
        let seq_id = self.get_varint32()? as i32;
        let name = self.read_string()?;
        Ok(MessageHeader {
            name,
            message_type,
            seq_id,
        })
    }

    fn read_struct_begin(&mut self) -> ProtocolResult<()> {
        self.field_stack.push(self.last_field_id);
        self.last_field_id = 0;
        Ok(())
    }

    fn read_struct_end(&mut self) -> ProtocolResult<()> {
        self.last_field_id = self.field_stack.pop().unwrap_or(0);
        Ok(())
    }

    fn read_field_begin(&mut self) -> ProtocolResult<FieldHeader> {
        let header = self.get_u8()?;
        let type_id = header & 0x0f;
        if type_id == 0 {
            return Ok(FieldHeader {
                field_type: TType::Stop,
                id: 0,
            });
        }
        let delta = (header & 0xf0) >> 4;
        let id = if delta == 0 {
            self.read_i16()?
        } else {
            self.last_field_id.wrapping_add(i16::from(delta))
        };
        let field_type = from_compact_type(type_id)?;
        if field_type == TType::Bool {
            self.pending_bool = Some(type_id == BOOLEAN_TRUE);
        }
        self.last_field_id = id;
        Ok(FieldHeader { field_type, id })
    }

    fn read_list_begin(&mut self) -> ProtocolResult<(TType, usize)> {
        let header = self.get_u8()?;
        let short_size = (header >> 4) & 0x0f;
        let size = if short_size == 15 {
            checked_len(i64::from(self.get_varint32()?))?
        } else {
            usize::from(short_size)
        };
        Ok((from_compact_type(header & 0x0f)?, size))
    }

    fn read_map_begin(&mut self) -> ProtocolResult<(TType, TType, usize)> {
        let size = checked_len(i64::from(self.get_varint32()?))?;
        if size == 0 {
            return Ok((TType::Stop, TType::Stop, 0));
        }
        let types = self.get_u8()?;
        Ok((
            from_compact_type(types >> 4)?,
            from_compact_type(types & 0x0f)?,
            size,
        ))
    }

    fn read_bool(&mut self) -> ProtocolResult<bool> {
        match self.pending_bool.take() {
            Some(value) => Ok(value),
            None => Ok(self.get_u8()? == BOOLEAN_TRUE),
        }
    }

    fn read_byte(&mut self) -> ProtocolResult<i8> {
        Ok(self.get_u8()? as i8)
    }

    fn read_i16(&mut self) -> ProtocolResult<i16> {
        Ok(unzigzag_32(self.get_varint32()?) as i16)
    }

    fn read_i32(&mut self) -> ProtocolResult<i32> {
        Ok(unzigzag_32(self.get_varint32()?))
    }

    fn read_i64(&mut self) -> ProtocolResult<i64> {
        Ok(unzigzag_64(self.get_varint()?))
    }

    fn read_double(&mut self) -> ProtocolResult<f64> {
        if self.buf.remaining() < 8 {
            return Err(ProtocolError::Incomplete);
        }
        Ok(self.buf.get_f64_le())
    }

    fn read_binary(&mut self) -> ProtocolResult<Vec<u8>> {
        let len = checked_len(i64::from(self.get_varint32()?))?;
        if self.buf.remaining() < len {
            return Err(ProtocolError::Incomplete);
        }
        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(bytes)
    }

    fn position(&self) -> usize {
        self.start - self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_32(0), 0);
        assert_eq!(zigzag_32(-1), 1);
        assert_eq!(zigzag_32(1), 2);
        assert_eq!(zigzag_64(-2), 3);
        assert_eq!(unzigzag_32(3), -2);
        assert_eq!(unzigzag_64(zigzag_64(i64::MIN)), i64::MIN);
    }

    #[test]
    fn test_message_header_layout() {
        let mut w = CompactWriter::new();
        w.write_message_begin("ping", MessageType::Call, 300);
        let bytes = w.take();
        assert_eq!(bytes[0], 0x82);
        assert_eq!(bytes[1], 0x21);
        assert_eq!(&bytes[2..4], &[0xac, 0x02]);
        assert_eq!(bytes[4], 4);
        assert_eq!(&bytes[5..], b"ping");
    }

    #[test]
    fn test_field_delta_and_long_form() {
        let mut w = CompactWriter::new();
        w.write_struct_begin();
        w.write_field_begin(TType::I64, 1);
        w.write_i64(11);
        w.write_field_begin(TType::I32, 20);
        w.write_i32(-3);
        w.write_field_stop();
        w.write_struct_end();
        let bytes = w.take();
        assert_eq!(bytes[0], 0x16);
        assert_eq!(bytes[1], 22);
        assert_eq!(&bytes[2..5], &[0x05, 40, 5]);

        let mut r = CompactReader::new(&bytes);
        r.read_struct_begin().unwrap();
        let f = r.read_field_begin().unwrap();
        assert_eq!((f.field_type, f.id), (TType::I64, 1));
        assert_eq!(r.read_i64().unwrap(), 11);
        let f = r.read_field_begin().unwrap();
        assert_eq!((f.field_type, f.id), (TType::I32, 20));
        assert_eq!(r.read_i32().unwrap(), -3);
        assert_eq!(r.read_field_begin().unwrap().field_type, TType::Stop);
    }

    #[test]
    fn test_bool_folded_into_field_header() {
        let mut w = CompactWriter::new();
        w.write_struct_begin();
        w.write_field_begin(TType::Bool, 2);
        w.write_bool(false);
        w.write_field_stop();
        let bytes = w.take();
        assert_eq!(&bytes[..], &[0x22, 0x00]);
    }

    #[test]
    fn test_long_list_header() {
        let names: Vec<String> = (0..20).map(|i| format!("db{i}")).collect();
        let mut w = CompactWriter::new();
        w.write_string_list(&names);
        let bytes = w.take();
        assert_eq!(bytes[0], 0xf8);
        assert_eq!(bytes[1], 20);
        let decoded = CompactReader::new(&bytes).read_string_list().unwrap();
        assert_eq!(decoded, names);
    }

    #[test]
    fn test_wrong_protocol_id() {
        let err = CompactReader::new(&[0x80, 0x01]).read_message_begin().unwrap_err();
        assert!(matches!(err, ProtocolError::BadVersion(_)));
    }
}
