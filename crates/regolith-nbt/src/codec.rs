//! Binary reader/writer for the tag format.
//!
//! The reader charges an estimated in-memory cost for every value it builds
//! against a caller-supplied [`SizeTracker`] budget, and refuses structures
//! nested past [`DEPTH_CEILING`]. Both checks run before the corresponding
//! allocation is committed, so hostile length fields cannot force an
//! oversized buffer into existence.

use crate::{list_element_type, Tag};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use regolith_common::{RegolithError, Result};
use std::collections::HashMap;
use std::io::{Read, Write};

/// Maximum nesting of lists/compounds the reader will follow.
pub const DEPTH_CEILING: usize = 512;

// Approximate heap cost of each decoded value. The exact numbers only need
// to scale with real memory use; they are charged up front so a corrupt
// length field trips the budget instead of the allocator.
const COST_BYTE: u64 = 9;
const COST_SHORT: u64 = 10;
const COST_INT: u64 = 12;
const COST_LONG: u64 = 16;
const COST_FLOAT: u64 = 12;
const COST_DOUBLE: u64 = 16;
const COST_ARRAY: u64 = 24;
const COST_STRING: u64 = 8;
const COST_STRING_BASE: u64 = 28;
const COST_STRING_CHAR: u64 = 2;
const COST_LIST: u64 = 37;
const COST_LIST_SLOT: u64 = 48;
const COST_COMPOUND: u64 = 48;
const COST_COMPOUND_ENTRY: u64 = 36;

/// Cumulative allocation budget for one decode.
#[derive(Debug)]
pub struct SizeTracker {
    limit: u64,
    used: u64,
}

impl SizeTracker {
    pub fn new(limit: u64) -> Self {
        SizeTracker { limit, used: 0 }
    }

    /// No ceiling. For trusted input only.
    pub fn unlimited() -> Self {
        SizeTracker {
            limit: u64::MAX,
            used: 0,
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn account(&mut self, bytes: u64) -> Result<()> {
        self.used = self.used.saturating_add(bytes);
        if self.used > self.limit {
            Err(RegolithError::BudgetExceeded {
                used: self.used,
                limit: self.limit,
            })
        } else {
            Ok(())
        }
    }
}

fn read_len<R: Read>(reader: &mut R) -> Result<i32> {
    let len = reader.read_i32::<BigEndian>()?;
    if len < 0 {
        return Err(RegolithError::CorruptData(format!(
            "negative length: {}",
            len
        )));
    }
    Ok(len)
}

fn read_string<R: Read>(reader: &mut R, tracker: &mut SizeTracker) -> Result<String> {
    let length = reader.read_u16::<BigEndian>()? as usize;
    tracker.account(COST_STRING_BASE + COST_STRING_CHAR * length as u64)?;
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| RegolithError::CorruptData(format!("invalid UTF-8 in string: {}", e)))
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(RegolithError::CorruptData(format!(
            "string of {} bytes does not fit a length prefix",
            value.len()
        )));
    }
    writer.write_u16::<BigEndian>(value.len() as u16)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

impl Tag {
    /// Reads one named tag: discriminant, name, payload.
    pub fn read<R: Read>(reader: &mut R, tracker: &mut SizeTracker) -> Result<(String, Tag)> {
        let type_id = reader.read_u8()?;
        if type_id == 0 {
            return Ok((String::new(), Tag::End));
        }

        let name = read_string(reader, tracker)?;
        let tag = Tag::read_payload(reader, type_id, 0, tracker)?;
        Ok((name, tag))
    }

    fn read_payload<R: Read>(
        reader: &mut R,
        type_id: u8,
        depth: usize,
        tracker: &mut SizeTracker,
    ) -> Result<Tag> {
        match type_id {
            0 => Ok(Tag::End),
            1 => {
                tracker.account(COST_BYTE)?;
                Ok(Tag::Byte(reader.read_i8()?))
            }
            2 => {
                tracker.account(COST_SHORT)?;
                Ok(Tag::Short(reader.read_i16::<BigEndian>()?))
            }
            3 => {
                tracker.account(COST_INT)?;
                Ok(Tag::Int(reader.read_i32::<BigEndian>()?))
            }
            4 => {
                tracker.account(COST_LONG)?;
                Ok(Tag::Long(reader.read_i64::<BigEndian>()?))
            }
            5 => {
                tracker.account(COST_FLOAT)?;
                Ok(Tag::Float(reader.read_f32::<BigEndian>()?))
            }
            6 => {
                tracker.account(COST_DOUBLE)?;
                Ok(Tag::Double(reader.read_f64::<BigEndian>()?))
            }
            7 => {
                tracker.account(COST_ARRAY)?;
                let length = read_len(reader)? as usize;
                tracker.account(length as u64)?;
                let mut bytes = vec![0u8; length];
                reader.read_exact(&mut bytes)?;
                Ok(Tag::ByteArray(bytes.into_iter().map(|b| b as i8).collect()))
            }
            8 => {
                tracker.account(COST_STRING)?;
                read_string(reader, tracker).map(Tag::String)
            }
            9 => {
                if depth >= DEPTH_CEILING {
                    return Err(RegolithError::TooDeep);
                }
                tracker.account(COST_LIST)?;
                let elem_type = reader.read_u8()?;
                let length = read_len(reader)? as usize;
                if elem_type == 0 && length > 0 {
                    return Err(RegolithError::CorruptData(
                        "non-empty list declared with End element type".to_string(),
                    ));
                }
                tracker.account(COST_LIST_SLOT * length as u64)?;
                let mut list = Vec::with_capacity(length);
                for _ in 0..length {
                    list.push(Tag::read_payload(reader, elem_type, depth + 1, tracker)?);
                }
                Ok(Tag::List(list))
            }
            10 => {
                if depth >= DEPTH_CEILING {
                    return Err(RegolithError::TooDeep);
                }
                tracker.account(COST_COMPOUND)?;
                let mut compound = HashMap::new();
                loop {
                    let entry_type = reader.read_u8()?;
                    if entry_type == 0 {
                        break;
                    }
                    tracker.account(COST_COMPOUND_ENTRY)?;
                    let key = read_string(reader, tracker)?;
                    let value = Tag::read_payload(reader, entry_type, depth + 1, tracker)?;
                    compound.insert(key, value);
                }
                Ok(Tag::Compound(compound))
            }
            11 => {
                tracker.account(COST_ARRAY)?;
                let length = read_len(reader)? as usize;
                tracker.account(4 * length as u64)?;
                let mut ints = Vec::with_capacity(length);
                for _ in 0..length {
                    ints.push(reader.read_i32::<BigEndian>()?);
                }
                Ok(Tag::IntArray(ints))
            }
            12 => {
                tracker.account(COST_ARRAY)?;
                let length = read_len(reader)? as usize;
                tracker.account(8 * length as u64)?;
                let mut longs = Vec::with_capacity(length);
                for _ in 0..length {
                    longs.push(reader.read_i64::<BigEndian>()?);
                }
                Ok(Tag::LongArray(longs))
            }
            _ => Err(RegolithError::CorruptData(format!(
                "invalid tag type: {}",
                type_id
            ))),
        }
    }

    /// Writes one named tag: discriminant, name, payload.
    pub fn write<W: Write>(&self, writer: &mut W, name: &str) -> Result<()> {
        writer.write_u8(self.get_type_id())?;

        if !matches!(self, Tag::End) {
            write_string(writer, name)?;
        }

        self.write_payload(writer)
    }

    fn write_payload<W: Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Tag::End => Ok(()),
            Tag::Byte(v) => Ok(writer.write_i8(*v)?),
            Tag::Short(v) => Ok(writer.write_i16::<BigEndian>(*v)?),
            Tag::Int(v) => Ok(writer.write_i32::<BigEndian>(*v)?),
            Tag::Long(v) => Ok(writer.write_i64::<BigEndian>(*v)?),
            Tag::Float(v) => Ok(writer.write_f32::<BigEndian>(*v)?),
            Tag::Double(v) => Ok(writer.write_f64::<BigEndian>(*v)?),
            Tag::ByteArray(v) => {
                writer.write_i32::<BigEndian>(v.len() as i32)?;
                for &b in v {
                    writer.write_i8(b)?;
                }
                Ok(())
            }
            Tag::String(v) => write_string(writer, v),
            Tag::List(v) => {
                let elem_type = list_element_type(v).ok_or_else(|| {
                    RegolithError::CorruptData(
                        "list elements must all share one tag type".to_string(),
                    )
                })?;
                if elem_type == 0 && !v.is_empty() {
                    return Err(RegolithError::CorruptData(
                        "list may not contain End values".to_string(),
                    ));
                }
                writer.write_u8(elem_type)?;
                writer.write_i32::<BigEndian>(v.len() as i32)?;
                for tag in v {
                    tag.write_payload(writer)?;
                }
                Ok(())
            }
            Tag::Compound(v) => {
                for (name, tag) in v {
                    tag.write(writer, name)?;
                }
                writer.write_u8(0)?;
                Ok(())
            }
            Tag::IntArray(v) => {
                writer.write_i32::<BigEndian>(v.len() as i32)?;
                for &i in v {
                    writer.write_i32::<BigEndian>(i)?;
                }
                Ok(())
            }
            Tag::LongArray(v) => {
                writer.write_i32::<BigEndian>(v.len() as i32)?;
                for &l in v {
                    writer.write_i64::<BigEndian>(l)?;
                }
                Ok(())
            }
        }
    }
}
