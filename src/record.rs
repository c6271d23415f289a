//! Record codec: serializes/deserializes a typed tuple to/from a leaf cell
//! payload. Header is a single length byte followed by one type-code byte
//! per column; the column payload bytes follow, concatenated in order.
//!
//! This format deliberately has no overflow-page story and no BLOB/real
//! serial types: only `{null, int8, int16, int32, text}` are supported, and
//! the cell formats here never spill past a single page.

use crate::error::{Error, Result};

const TYPE_NULL: u8 = 0;
const TYPE_INT8: u8 = 1;
const TYPE_INT16: u8 = 2;
const TYPE_INT32: u8 = 4;
const TYPE_TEXT_BASE: u8 = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Text(String),
}

impl Value {
    fn serial_type(&self) -> Result<u8> {
        Ok(match self {
            Value::Null => TYPE_NULL,
            Value::Int8(_) => TYPE_INT8,
            Value::Int16(_) => TYPE_INT16,
            Value::Int32(_) => TYPE_INT32,
            Value::Text(s) => {
                let len = s.len();
                let code = TYPE_TEXT_BASE as usize + 2 * len;
                if code > u8::MAX as usize {
                    return Err(Error::Misuse("text column too long for a single-byte serial type"));
                }
                code as u8
            }
        })
    }

    fn content_len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Int8(_) => 1,
            Value::Int16(_) => 2,
            Value::Int32(_) => 4,
            Value::Text(s) => s.len(),
        }
    }

    fn write_content(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => {}
            Value::Int8(v) => out.push(*v as u8),
            Value::Int16(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Value::Text(s) => out.extend_from_slice(s.as_bytes()),
        }
    }

    fn read_content(serial_type: u8, body: &[u8]) -> Result<(Self, usize)> {
        match serial_type {
            TYPE_NULL => Ok((Value::Null, 0)),
            TYPE_INT8 => {
                let b = *body.first().ok_or(Error::Misuse("truncated int8 column"))?;
                Ok((Value::Int8(b as i8), 1))
            }
            TYPE_INT16 => {
                let bytes = body
                    .get(0..2)
                    .ok_or(Error::Misuse("truncated int16 column"))?;
                Ok((Value::Int16(i16::from_be_bytes(bytes.try_into().unwrap())), 2))
            }
            TYPE_INT32 => {
                let bytes = body
                    .get(0..4)
                    .ok_or(Error::Misuse("truncated int32 column"))?;
                Ok((Value::Int32(i32::from_be_bytes(bytes.try_into().unwrap())), 4))
            }
            n if n >= TYPE_TEXT_BASE && n % 2 == 1 => {
                let len = ((n - TYPE_TEXT_BASE) / 2) as usize;
                let bytes = body.get(0..len).ok_or(Error::Misuse("truncated text column"))?;
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| Error::Misuse("text column is not valid utf-8"))?;
                Ok((Value::Text(text), len))
            }
            _ => Err(Error::Misuse("unrecognized serial type code")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let header_len = 1 + self.values.len();
        if header_len > u8::MAX as usize {
            return Err(Error::Misuse("too many columns for a single-byte header length"));
        }
        let mut out = Vec::with_capacity(header_len + self.values.len() * 4);
        out.push(header_len as u8);
        for value in &self.values {
            out.push(value.serial_type()?);
        }
        for value in &self.values {
            value.write_content(&mut out);
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header_len = *bytes.first().ok_or(Error::Misuse("empty record"))? as usize;
        let n_columns = header_len
            .checked_sub(1)
            .ok_or(Error::Misuse("record header length underflows"))?;
        let serial_types = bytes
            .get(1..header_len)
            .ok_or(Error::Misuse("record header length exceeds payload"))?;
        if serial_types.len() != n_columns {
            return Err(Error::Misuse("record header length mismatch"));
        }
        let mut body = &bytes[header_len..];
        let mut values = Vec::with_capacity(n_columns);
        for &serial_type in serial_types {
            let (value, consumed) = Value::read_content(serial_type, body)?;
            body = &body[consumed..];
            values.push(value);
        }
        Ok(Record { values })
    }
}
