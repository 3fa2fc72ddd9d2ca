//! Binary codec for the document model.
//!
//! Documents use the BSON wire format:
//!
//! ```text
//! [total length: i32 LE]   // includes itself and the terminator
//! [element]*
//! [0x00]                   // terminator
//! ```
//!
//! Each element is `[type tag: u8][field name: cstring][payload]`. Arrays
//! are encoded as documents whose field names are the stringified element
//! indices ("0", "1", ...). Multi-byte integers and doubles are
//! little-endian; strings carry an i32 byte length (terminator included)
//! and a trailing NUL.
//!
//! Decoding validates the declared total length against the bytes actually
//! consumed and never panics on corrupt input. Int32 elements (tag 0x10)
//! are accepted and widened to Int64; the encoder always emits Int64.
//!
//! The [`Serializer`] impl at the bottom is a separate, self-contained
//! format for using a [`Bson`] value as an index key; it does not need the
//! document framing above.

use bytes::{BufMut, BytesMut};

use crate::document::{Bson, Document, Entity, ID_FIELD};
use crate::error::{Error, Result};
use crate::serializer::{ByteReader, Serializer};

const TAG_DOUBLE: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_DOCUMENT: u8 = 0x03;
const TAG_ARRAY: u8 = 0x04;
const TAG_BINARY: u8 = 0x05;
const TAG_BOOLEAN: u8 = 0x08;
const TAG_DATETIME: u8 = 0x09;
const TAG_NULL: u8 = 0x0A;
const TAG_INT32: u8 = 0x10;
const TAG_INT64: u8 = 0x12;

const BINARY_SUBTYPE_GENERIC: u8 = 0x00;

/// Encodes a document to its wire representation.
///
/// # Errors
///
/// [`Error::InvalidArgument`] when a field name contains a NUL byte or a
/// value exceeds the format's i32 length limits.
pub fn serialize(document: &Document) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    write_document(&mut buf, document)?;
    Ok(buf.to_vec())
}

/// Decodes a document from its wire representation.
///
/// # Errors
///
/// [`Error::InvalidArgument`] on empty input, [`Error::InvalidFormat`] on
/// anything corrupt: bad tags, truncation, length mismatches, invalid
/// UTF-8.
pub fn deserialize(data: &[u8]) -> Result<Document> {
    if data.is_empty() {
        return Err(Error::invalid_argument("cannot decode a document from empty input"));
    }
    let mut reader = ByteReader::new(data);
    let doc = read_document(&mut reader)?;
    if reader.remaining() != 0 {
        return Err(Error::invalid_format(format!(
            "{} trailing bytes after document",
            reader.remaining()
        )));
    }
    Ok(doc)
}

/// Encodes an entity, re-inserting its identity as the first `Id` element.
pub fn serialize_entity(entity: &Entity) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    let frame = begin_frame(&mut buf);
    write_element(&mut buf, ID_FIELD, entity.id())?;
    for (key, value) in entity.body().iter() {
        write_element(&mut buf, key, value)?;
    }
    end_frame(&mut buf, frame)?;
    Ok(buf.to_vec())
}

/// Decodes an entity, extracting the mandatory `Id` element.
pub fn deserialize_entity(data: &[u8]) -> Result<Entity> {
    Entity::new(deserialize(data)?)
}

fn begin_frame(buf: &mut BytesMut) -> usize {
    let start = buf.len();
    buf.put_i32_le(0); // patched by end_frame
    start
}

fn end_frame(buf: &mut BytesMut, start: usize) -> Result<()> {
    buf.put_u8(0);
    let total = buf.len() - start;
    let total = i32::try_from(total)
        .map_err(|_| Error::invalid_argument("document exceeds the 2GiB format limit"))?;
    buf[start..start + 4].copy_from_slice(&total.to_le_bytes());
    Ok(())
}

fn write_document(buf: &mut BytesMut, document: &Document) -> Result<()> {
    let frame = begin_frame(buf);
    for (key, value) in document.iter() {
        write_element(buf, key, value)?;
    }
    end_frame(buf, frame)
}

fn write_array(buf: &mut BytesMut, items: &[Bson]) -> Result<()> {
    let frame = begin_frame(buf);
    for (index, item) in items.iter().enumerate() {
        write_element(buf, &index.to_string(), item)?;
    }
    end_frame(buf, frame)
}

fn write_element(buf: &mut BytesMut, key: &str, value: &Bson) -> Result<()> {
    if key.as_bytes().contains(&0) {
        return Err(Error::invalid_argument(format!(
            "field name {:?} contains a NUL byte",
            key
        )));
    }

    buf.put_u8(tag_of(value));
    buf.put_slice(key.as_bytes());
    buf.put_u8(0);

    match value {
        Bson::Null => {}
        Bson::Boolean(b) => buf.put_u8(*b as u8),
        Bson::Int64(i) => buf.put_i64_le(*i),
        Bson::Double(d) => buf.put_f64_le(*d),
        Bson::DateTime(ms) => buf.put_i64_le(*ms),
        Bson::String(s) => {
            let len = i32::try_from(s.len() + 1)
                .map_err(|_| Error::invalid_argument("string value exceeds the format limit"))?;
            buf.put_i32_le(len);
            buf.put_slice(s.as_bytes());
            buf.put_u8(0);
        }
        Bson::Binary(bytes) => {
            let len = i32::try_from(bytes.len())
                .map_err(|_| Error::invalid_argument("binary value exceeds the format limit"))?;
            buf.put_i32_le(len);
            buf.put_u8(BINARY_SUBTYPE_GENERIC);
            buf.put_slice(bytes);
        }
        Bson::Array(items) => write_array(buf, items)?,
        Bson::Document(doc) => write_document(buf, doc)?,
    }
    Ok(())
}

fn tag_of(value: &Bson) -> u8 {
    match value {
        Bson::Null => TAG_NULL,
        Bson::Boolean(_) => TAG_BOOLEAN,
        Bson::Int64(_) => TAG_INT64,
        Bson::Double(_) => TAG_DOUBLE,
        Bson::String(_) => TAG_STRING,
        Bson::Binary(_) => TAG_BINARY,
        Bson::DateTime(_) => TAG_DATETIME,
        Bson::Array(_) => TAG_ARRAY,
        Bson::Document(_) => TAG_DOCUMENT,
    }
}

fn read_document(reader: &mut ByteReader<'_>) -> Result<Document> {
    let start = reader.position();
    let declared = reader.read_i32()?;
    if declared < 5 {
        return Err(Error::invalid_format(format!(
            "document length {} below the 5-byte minimum",
            declared
        )));
    }

    let mut doc = Document::new();
    loop {
        let tag = reader.read_u8()?;
        if tag == 0 {
            break;
        }
        let key = reader.read_cstr()?.to_string();
        let value = read_value(reader, tag)?;
        doc.set(key, value);
    }

    let consumed = reader.position() - start;
    if consumed != declared as usize {
        return Err(Error::invalid_format(format!(
            "document length mismatch: declared {}, consumed {}",
            declared, consumed
        )));
    }
    Ok(doc)
}

fn read_value(reader: &mut ByteReader<'_>, tag: u8) -> Result<Bson> {
    match tag {
        TAG_DOUBLE => Ok(Bson::Double(reader.read_f64()?)),
        TAG_STRING => {
            let len = reader.read_i32()?;
            if len < 1 {
                return Err(Error::invalid_format(format!("string length {} too small", len)));
            }
            let bytes = reader.take(len as usize)?;
            let (body, terminator) = bytes.split_at(len as usize - 1);
            if terminator != [0] {
                return Err(Error::invalid_format("string missing its NUL terminator"));
            }
            let s = std::str::from_utf8(body)
                .map_err(|e| Error::invalid_format(format!("invalid UTF-8 string: {}", e)))?;
            Ok(Bson::String(s.to_string()))
        }
        TAG_DOCUMENT => Ok(Bson::Document(read_document(reader)?)),
        TAG_ARRAY => {
            let doc = read_document(reader)?;
            Ok(Bson::Array(doc.into_iter().map(|(_, v)| v).collect()))
        }
        TAG_BINARY => {
            let len = reader.read_i32()?;
            if len < 0 {
                return Err(Error::invalid_format(format!("binary length {} negative", len)));
            }
            let subtype = reader.read_u8()?;
            if subtype != BINARY_SUBTYPE_GENERIC {
                return Err(Error::invalid_format(format!(
                    "unsupported binary subtype {:#x}",
                    subtype
                )));
            }
            Ok(Bson::Binary(reader.take(len as usize)?.to_vec()))
        }
        TAG_BOOLEAN => match reader.read_u8()? {
            0 => Ok(Bson::Boolean(false)),
            1 => Ok(Bson::Boolean(true)),
            other => Err(Error::invalid_format(format!("bad boolean byte {:#x}", other))),
        },
        TAG_DATETIME => Ok(Bson::DateTime(reader.read_i64()?)),
        TAG_NULL => Ok(Bson::Null),
        TAG_INT32 => Ok(Bson::Int64(reader.read_i32()? as i64)),
        TAG_INT64 => Ok(Bson::Int64(reader.read_i64()?)),
        other => Err(Error::invalid_format(format!("bad element tag {:#x}", other))),
    }
}

/// Index-key codec: `[tag: u8][payload]` with container payloads framed by
/// explicit counts and lengths, so any value can serve as a tree key.
impl Serializer for Bson {
    const FIXED_SIZE: Option<usize> = None;

    fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(tag_of(self));
        match self {
            Bson::Null => {}
            Bson::Boolean(b) => buf.put_u8(*b as u8),
            Bson::Int64(i) => buf.put_i64_le(*i),
            Bson::Double(d) => buf.put_f64_le(*d),
            Bson::DateTime(ms) => buf.put_i64_le(*ms),
            Bson::String(s) => buf.put_slice(s.as_bytes()),
            Bson::Binary(bytes) => buf.put_slice(bytes),
            Bson::Array(items) => {
                buf.put_u32_le(items.len() as u32);
                for item in items {
                    let bytes = item.serialize();
                    buf.put_u32_le(bytes.len() as u32);
                    buf.put_slice(&bytes);
                }
            }
            Bson::Document(doc) => {
                buf.put_u32_le(doc.len() as u32);
                for (key, value) in doc.iter() {
                    let value_bytes = value.serialize();
                    buf.put_u32_le(key.len() as u32);
                    buf.put_slice(key.as_bytes());
                    buf.put_u32_le(value_bytes.len() as u32);
                    buf.put_slice(&value_bytes);
                }
            }
        }
        buf.to_vec()
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let tag = reader
            .read_u8()
            .map_err(|_| Error::invalid_argument("cannot decode a key from empty input"))?;

        fn fixed_payload<'a>(reader: &mut ByteReader<'a>, n: usize) -> Result<&'a [u8]> {
            let payload = reader.take(n)?;
            if reader.remaining() != 0 {
                return Err(Error::invalid_format("trailing bytes after key payload"));
            }
            Ok(payload)
        }

        match tag {
            TAG_NULL => {
                if reader.remaining() != 0 {
                    return Err(Error::invalid_format("trailing bytes after null key"));
                }
                Ok(Bson::Null)
            }
            TAG_BOOLEAN => match fixed_payload(&mut reader, 1)?[0] {
                0 => Ok(Bson::Boolean(false)),
                1 => Ok(Bson::Boolean(true)),
                other => Err(Error::invalid_format(format!("bad boolean byte {:#x}", other))),
            },
            TAG_INT64 => {
                let bytes = fixed_payload(&mut reader, 8)?;
                Ok(Bson::Int64(i64::from_le_bytes(bytes.try_into().unwrap())))
            }
            TAG_DOUBLE => {
                let bytes = fixed_payload(&mut reader, 8)?;
                Ok(Bson::Double(f64::from_le_bytes(bytes.try_into().unwrap())))
            }
            TAG_DATETIME => {
                let bytes = fixed_payload(&mut reader, 8)?;
                Ok(Bson::DateTime(i64::from_le_bytes(bytes.try_into().unwrap())))
            }
            TAG_STRING => Ok(Bson::String(String::deserialize(reader.take(reader.remaining())?)?)),
            TAG_BINARY => Ok(Bson::Binary(reader.take(reader.remaining())?.to_vec())),
            TAG_ARRAY => {
                let count = reader.read_u32()?;
                let mut items = Vec::with_capacity(count.min(4096) as usize);
                for _ in 0..count {
                    let len = reader.read_u32()? as usize;
                    items.push(Bson::deserialize(reader.take(len)?)?);
                }
                if reader.remaining() != 0 {
                    return Err(Error::invalid_format("trailing bytes after array key"));
                }
                Ok(Bson::Array(items))
            }
            TAG_DOCUMENT => {
                let count = reader.read_u32()?;
                let mut doc = Document::new();
                for _ in 0..count {
                    let key_len = reader.read_u32()? as usize;
                    let key = String::deserialize(reader.take(key_len)?)?;
                    let value_len = reader.read_u32()? as usize;
                    doc.set(key, Bson::deserialize(reader.take(value_len)?)?);
                }
                if reader.remaining() != 0 {
                    return Err(Error::invalid_format("trailing bytes after document key"));
                }
                Ok(Bson::Document(doc))
            }
            other => Err(Error::invalid_format(format!("bad key tag {:#x}", other))),
        }
    }
}
