//! Thrift wire encodings.
//!
//! Two encodings are supported, [`binary`] (strict binary) and [`compact`].
//! Writers append to an owned `BytesMut`; readers borrow a complete buffer
//! and report [`ProtocolError::Incomplete`] when it runs short, which the
//! unframed transport uses to decide it must read more bytes.

pub mod binary;
pub mod compact;

use bytes::BytesMut;

use crate::error::{ProtocolError, ProtocolResult};

/// Longest string, binary or container accepted from the wire.
pub const MAX_LENGTH: usize = 100 * 1024 * 1024;

/// Deepest structure nesting `skip` will follow.
const MAX_SKIP_DEPTH: usize = 64;

/// Wire type ids, as used by the binary encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TType {
    Stop,
    Bool,
    Byte,
    Double,
    I16,
    I32,
    I64,
    String,
    Struct,
    Map,
    Set,
    List,
}

impl TType {
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Stop => 0,
            Self::Bool => 2,
            Self::Byte => 3,
            Self::Double => 4,
            Self::I16 => 6,
            Self::I32 => 8,
            Self::I64 => 10,
            Self::String => 11,
            Self::Struct => 12,
            Self::Map => 13,
            Self::Set => 14,
            Self::List => 15,
        }
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownType`] for unassigned ids.
    pub fn from_u8(value: u8) -> ProtocolResult<Self> {
        Ok(match value {
            0 => Self::Stop,
            2 => Self::Bool,
            3 => Self::Byte,
            4 => Self::Double,
            6 => Self::I16,
            8 => Self::I32,
            10 => Self::I64,
            11 => Self::String,
            12 => Self::Struct,
            13 => Self::Map,
            14 => Self::Set,
            15 => Self::List,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl MessageType {
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Call => 1,
            Self::Reply => 2,
            Self::Exception => 3,
            Self::Oneway => 4,
        }
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::BadVersion`] for unknown message types.
    pub fn from_u8(value: u8) -> ProtocolResult<Self> {
        match value {
            1 => Ok(Self::Call),
            2 => Ok(Self::Reply),
            3 => Ok(Self::Exception),
            4 => Ok(Self::Oneway),
            other => Err(ProtocolError::BadVersion(format!("message type {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub message_type: MessageType,
    pub seq_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    pub field_type: TType,
    pub id: i16,
}

/// Which encoding a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireEncoding {
    #[default]
    Binary,
    Compact,
}

impl WireEncoding {
    #[must_use]
    pub fn from_config(use_compact: bool) -> Self {
        if use_compact {
            Self::Compact
        } else {
            Self::Binary
        }
    }

    #[must_use]
    pub fn writer(self) -> Box<dyn ProtocolWriter + Send> {
        match self {
            Self::Binary => Box::new(binary::BinaryWriter::new()),
            Self::Compact => Box::new(compact::CompactWriter::new()),
        }
    }

    #[must_use]
    pub fn reader(self, buf: &[u8]) -> Box<dyn ProtocolReader + Send + '_> {
        match self {
            Self::Binary => Box::new(binary::BinaryReader::new(buf)),
            Self::Compact => Box::new(compact::CompactReader::new(buf)),
        }
    }

    /// Length of the first complete message in `buf`, or `None` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Propagates any decoding error other than running out of bytes.
    pub fn message_len(self, buf: &[u8]) -> ProtocolResult<Option<usize>> {
        let mut reader = self.reader(buf);
        match measure_message(reader.as_mut()) {
            Ok(len) => Ok(Some(len)),
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Encodes Thrift values into a buffer.
pub trait ProtocolWriter {
    fn write_message_begin(&mut self, name: &str, message_type: MessageType, seq_id: i32);
    fn write_struct_begin(&mut self);
    fn write_struct_end(&mut self);
    fn write_field_begin(&mut self, field_type: TType, id: i16);
    fn write_field_stop(&mut self);
    fn write_list_begin(&mut self, element_type: TType, size: usize);
    fn write_map_begin(&mut self, key_type: TType, value_type: TType, size: usize);
    fn write_bool(&mut self, value: bool);
    fn write_byte(&mut self, value: i8);
    fn write_i16(&mut self, value: i16);
    fn write_i32(&mut self, value: i32);
    fn write_i64(&mut self, value: i64);
    fn write_double(&mut self, value: f64);
    fn write_binary(&mut self, value: &[u8]);

    fn write_string(&mut self, value: &str) {
        self.write_binary(value.as_bytes());
    }

    fn write_string_list(&mut self, values: &[String]) {
        self.write_list_begin(TType::String, values.len());
        for value in values {
            self.write_string(value);
        }
    }

    /// Take the encoded bytes, leaving the writer empty.
    fn take(&mut self) -> BytesMut;
}

/// Decodes Thrift values from a borrowed buffer.
pub trait ProtocolReader {
    fn read_message_begin(&mut self) -> ProtocolResult<MessageHeader>;
    fn read_struct_begin(&mut self) -> ProtocolResult<()>;
    fn read_struct_end(&mut self) -> ProtocolResult<()>;
    fn read_field_begin(&mut self) -> ProtocolResult<FieldHeader>;
    fn read_list_begin(&mut self) -> ProtocolResult<(TType, usize)>;
    fn read_map_begin(&mut self) -> ProtocolResult<(TType, TType, usize)>;
    fn read_bool(&mut self) -> ProtocolResult<bool>;
    fn read_byte(&mut self) -> ProtocolResult<i8>;
    fn read_i16(&mut self) -> ProtocolResult<i16>;
    fn read_i32(&mut self) -> ProtocolResult<i32>;
    fn read_i64(&mut self) -> ProtocolResult<i64>;
    fn read_double(&mut self) -> ProtocolResult<f64>;
    fn read_binary(&mut self) -> ProtocolResult<Vec<u8>>;

    /// Bytes consumed so far.
    fn position(&self) -> usize;

    fn read_string(&mut self) -> ProtocolResult<String> {
        String::from_utf8(self.read_binary()?).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn read_string_list(&mut self) -> ProtocolResult<Vec<String>> {
        let (element_type, size) = self.read_list_begin()?;
        let mut values = Vec::with_capacity(size.min(1024));
        for _ in 0..size {
            if element_type == TType::String {
                values.push(self.read_string()?);
            } else {
                self.skip(element_type)?;
            }
        }
        Ok(values)
    }

    /// Consume one value of the given type without decoding it.
    fn skip(&mut self, field_type: TType) -> ProtocolResult<()> {
        skip_depth(self, field_type, 0)
    }
}

fn measure_message(reader: &mut (dyn ProtocolReader + Send + '_)) -> ProtocolResult<usize> {
    reader.read_message_begin()?;
    reader.skip(TType::Struct)?;
    Ok(reader.position())
}

fn skip_depth<R: ProtocolReader + ?Sized>(
    reader: &mut R,
    field_type: TType,
    depth: usize,
) -> ProtocolResult<()> {
    if depth > MAX_SKIP_DEPTH {
        return Err(ProtocolError::DepthExceeded);
    }
    match field_type {
        TType::Stop => Ok(()),
        TType::Bool => reader.read_bool().map(drop),
        TType::Byte => reader.read_byte().map(drop),
        TType::Double => reader.read_double().map(drop),
        TType::I16 => reader.read_i16().map(drop),
        TType::I32 => reader.read_i32().map(drop),
        TType::I64 => reader.read_i64().map(drop),
        TType::String => reader.read_binary().map(drop),
        TType::Struct => {
            reader.read_struct_begin()?;
            loop {
                let field = reader.read_field_begin()?;
                if field.field_type == TType::Stop {
                    break;
                }
                skip_depth(reader, field.field_type, depth + 1)?;
            }
            reader.read_struct_end()
        }
        TType::Map => {
            let (key_type, value_type, size) = reader.read_map_begin()?;
            for _ in 0..size {
                skip_depth(reader, key_type, depth + 1)?;
                skip_depth(reader, value_type, depth + 1)?;
            }
            Ok(())
        }
        TType::Set | TType::List => {
            let (element_type, size) = reader.read_list_begin()?;
            for _ in 0..size {
                skip_depth(reader, element_type, depth + 1)?;
            }
            Ok(())
        }
    }
}

pub(crate) fn checked_len(len: i64) -> ProtocolResult<usize> {
    if len < 0 || len as u64 > MAX_LENGTH as u64 {
        return Err(ProtocolError::InvalidLength(len));
    }
    Ok(len as usize)
}
