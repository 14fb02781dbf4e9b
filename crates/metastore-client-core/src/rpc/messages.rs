//! Thrift structs exchanged with the metastore service.
//!
//! Only the structs used by the connector's calls are modelled. Unknown
//! fields are skipped on read so newer servers stay compatible.

use crate::capabilities::{ClientCapabilities, ClientCapability};
use crate::error::ProtocolResult;
use crate::notification::{
    NotificationEvent, NotificationEventRequest, NotificationEventResponse,
    NotificationEventsCountRequest,
};
use crate::protocol::{ProtocolReader, ProtocolWriter, TType};

/// A value that can be written as a Thrift struct.
pub trait ThriftWrite {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W);
}

/// A value that can be read from a Thrift struct.
pub trait ThriftRead: Sized {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self>;
}

fn write_opt_string<W: ProtocolWriter + ?Sized>(w: &mut W, id: i16, value: Option<&str>) {
    if let Some(value) = value {
        w.write_field_begin(TType::String, id);
        w.write_string(value);
    }
}

/// Request for a table, carrying the caller's capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetTableRequest {
    pub db_name: String,
    pub tbl_name: String,
    pub capabilities: Option<ClientCapabilities>,
}

/// Identifying fields of a table; the rest of the table struct is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableRef {
    pub table_name: String,
    pub db_name: String,
}

/// Reply of `get_table_req`: the table in field 1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetTableResult {
    pub table: TableRef,
}

/// `TApplicationException`: a protocol-level failure raised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationException {
    pub message: String,
    pub kind: i32,
}

/// A declared service exception; all of them carry a message in field 1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceException {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentNotificationEventId {
    pub event_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationEventsCountResponse {
    pub events_count: i64,
}

impl ThriftWrite for NotificationEventRequest {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::I64, 1);
        w.write_i64(self.last_event);
        if let Some(max) = self.max_events {
            w.write_field_begin(TType::I32, 2);
            w.write_i32(max);
        }
        if !self.event_type_skip_list.is_empty() {
            w.write_field_begin(TType::List, 3);
            w.write_string_list(&self.event_type_skip_list);
        }
        write_opt_string(w, 5, self.db_name.as_deref());
        if !self.table_names.is_empty() {
            w.write_field_begin(TType::List, 6);
            w.write_string_list(&self.table_names);
        }
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for NotificationEventRequest {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut request = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::I64) => request.last_event = r.read_i64()?,
                (2, TType::I32) => request.max_events = Some(r.read_i32()?),
                (3, TType::List) => request.event_type_skip_list = r.read_string_list()?,
                (5, TType::String) => request.db_name = Some(r.read_string()?),
                (6, TType::List) => request.table_names = r.read_string_list()?,
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(request)
    }
}

impl ThriftWrite for NotificationEvent {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::I64, 1);
        w.write_i64(self.event_id);
        w.write_field_begin(TType::I32, 2);
        w.write_i32(self.event_time);
        w.write_field_begin(TType::String, 3);
        w.write_string(&self.event_type);
        write_opt_string(w, 4, self.db_name.as_deref());
        write_opt_string(w, 5, self.table_name.as_deref());
        w.write_field_begin(TType::String, 6);
        w.write_string(&self.message);
        write_opt_string(w, 7, self.message_format.as_deref());
        write_opt_string(w, 8, self.cat_name.as_deref());
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for NotificationEvent {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut event = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::I64) => event.event_id = r.read_i64()?,
                (2, TType::I32) => event.event_time = r.read_i32()?,
                (3, TType::String) => event.event_type = r.read_string()?,
                (4, TType::String) => event.db_name = Some(r.read_string()?),
                (5, TType::String) => event.table_name = Some(r.read_string()?),
                (6, TType::String) => event.message = r.read_string()?,
                (7, TType::String) => event.message_format = Some(r.read_string()?),
                (8, TType::String) => event.cat_name = Some(r.read_string()?),
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(event)
    }
}

impl ThriftWrite for NotificationEventResponse {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::List, 1);
        w.write_list_begin(TType::Struct, self.events.len());
        for event in &self.events {
            event.write(w);
        }
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for NotificationEventResponse {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut response = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::List) => {
                    let (element_type, size) = r.read_list_begin()?;
                    response.events.reserve(size.min(1024));
                    for _ in 0..size {
                        if element_type == TType::Struct {
                            response.events.push(NotificationEvent::read(r)?);
                        } else {
                            r.skip(element_type)?;
                        }
                    }
                }
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(response)
    }
}

impl ThriftWrite for NotificationEventsCountRequest {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::I64, 1);
        w.write_i64(self.from_event_id);
        w.write_field_begin(TType::String, 2);
        w.write_string(&self.db_name);
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for NotificationEventsCountRequest {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut request = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::I64) => request.from_event_id = r.read_i64()?,
                (2, TType::String) => request.db_name = r.read_string()?,
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(request)
    }
}

/// Read a struct whose only field of interest is the i64 in field 1.
fn read_single_i64<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<i64> {
    let mut value = 0;
    r.read_struct_begin()?;
    loop {
        let field = r.read_field_begin()?;
        match (field.id, field.field_type) {
            (_, TType::Stop) => break,
            (1, TType::I64) => value = r.read_i64()?,
            (_, other) => r.skip(other)?,
        }
    }
    r.read_struct_end()?;
    Ok(value)
}

fn write_single_i64<W: ProtocolWriter + ?Sized>(w: &mut W, value: i64) {
    w.write_struct_begin();
    w.write_field_begin(TType::I64, 1);
    w.write_i64(value);
    w.write_field_stop();
    w.write_struct_end();
}

impl ThriftWrite for CurrentNotificationEventId {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        write_single_i64(w, self.event_id);
    }
}

impl ThriftRead for CurrentNotificationEventId {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        read_single_i64(r).map(|event_id| Self { event_id })
    }
}

impl ThriftWrite for NotificationEventsCountResponse {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        write_single_i64(w, self.events_count);
    }
}

impl ThriftRead for NotificationEventsCountResponse {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        read_single_i64(r).map(|events_count| Self { events_count })
    }
}

impl ThriftWrite for GetTableRequest {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::String, 1);
        w.write_string(&self.db_name);
        w.write_field_begin(TType::String, 2);
        w.write_string(&self.tbl_name);
        if let Some(capabilities) = &self.capabilities {
            w.write_field_begin(TType::Struct, 3);
            w.write_struct_begin();
            w.write_field_begin(TType::List, 1);
            w.write_list_begin(TType::I32, capabilities.values().len());
            for capability in capabilities.values() {
                w.write_i32(capability.wire_value());
            }
            w.write_field_stop();
            w.write_struct_end();
        }
        w.write_field_stop();
        w.write_struct_end();
    }
}

fn read_capabilities<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<ClientCapabilities> {
    let mut values = Vec::new();
    r.read_struct_begin()?;
    loop {
        let field = r.read_field_begin()?;
        match (field.id, field.field_type) {
            (_, TType::Stop) => break,
            (1, TType::List) => {
                let (element_type, size) = r.read_list_begin()?;
                for _ in 0..size {
                    if element_type == TType::I32 {
                        // Unknown capabilities from a newer peer are dropped.
                        values.extend(ClientCapability::from_wire(r.read_i32()?));
                    } else {
                        r.skip(element_type)?;
                    }
                }
            }
            (_, other) => r.skip(other)?,
        }
    }
    r.read_struct_end()?;
    Ok(ClientCapabilities::from_values(values))
}

impl ThriftRead for GetTableRequest {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut request = Self {
            db_name: String::new(),
            tbl_name: String::new(),
            capabilities: None,
        };
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::String) => request.db_name = r.read_string()?,
                (2, TType::String) => request.tbl_name = r.read_string()?,
                (3, TType::Struct) => request.capabilities = Some(read_capabilities(r)?),
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(request)
    }
}

impl ThriftWrite for TableRef {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::String, 1);
        w.write_string(&self.table_name);
        w.write_field_begin(TType::String, 2);
        w.write_string(&self.db_name);
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for TableRef {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut table = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::String) => table.table_name = r.read_string()?,
                (2, TType::String) => table.db_name = r.read_string()?,
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(table)
    }
}

impl ThriftWrite for GetTableResult {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::Struct, 1);
        self.table.write(w);
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for GetTableResult {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut result = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::Struct) => result.table = TableRef::read(r)?,
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(result)
    }
}

impl ThriftWrite for ApplicationException {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::String, 1);
        w.write_string(&self.message);
        w.write_field_begin(TType::I32, 2);
        w.write_i32(self.kind);
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for ApplicationException {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut exception = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::String) => exception.message = r.read_string()?,
                (2, TType::I32) => exception.kind = r.read_i32()?,
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(exception)
    }
}

impl ThriftWrite for ServiceException {
    fn write<W: ProtocolWriter + ?Sized>(&self, w: &mut W) {
        w.write_struct_begin();
        w.write_field_begin(TType::String, 1);
        w.write_string(&self.message);
        w.write_field_stop();
        w.write_struct_end();
    }
}

impl ThriftRead for ServiceException {
    fn read<R: ProtocolReader + ?Sized>(r: &mut R) -> ProtocolResult<Self> {
        let mut exception = Self::default();
        r.read_struct_begin()?;
        loop {
            let field = r.read_field_begin()?;
            match (field.id, field.field_type) {
                (_, TType::Stop) => break,
                (1, TType::String) => exception.message = r.read_string()?,
                (_, other) => r.skip(other)?,
            }
        }
        r.read_struct_end()?;
        Ok(exception)
    }
}
