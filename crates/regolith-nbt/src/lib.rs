pub mod codec;

pub use codec::SizeTracker;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use regolith_common::{RegolithError, Result};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

/// A single value in the self-describing binary format.
///
/// Every variant carries the numeric wire discriminant returned by
/// [`Tag::get_type_id`]. `End` doubles as "no value": it terminates a
/// compound's key stream and is the element type of an empty list.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    End,
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<Tag>),
    Compound(HashMap<String, Tag>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

/// Wire type shared by every element of a list, or `None` for a mixed list.
/// An empty list reports `End`.
pub(crate) fn list_element_type(items: &[Tag]) -> Option<u8> {
    let first = match items.first() {
        Some(tag) => tag.get_type_id(),
        None => return Some(0),
    };
    if items.iter().all(|tag| tag.get_type_id() == first) {
        Some(first)
    } else {
        None
    }
}

impl Tag {
    pub fn get_type_id(&self) -> u8 {
        match self {
            Tag::End => 0,
            Tag::Byte(_) => 1,
            Tag::Short(_) => 2,
            Tag::Int(_) => 3,
            Tag::Long(_) => 4,
            Tag::Float(_) => 5,
            Tag::Double(_) => 6,
            Tag::ByteArray(_) => 7,
            Tag::String(_) => 8,
            Tag::List(_) => 9,
            Tag::Compound(_) => 10,
            Tag::IntArray(_) => 11,
            Tag::LongArray(_) => 12,
        }
    }

    /// Builds a list tag, rejecting mixed element types up front.
    pub fn list(items: Vec<Tag>) -> Result<Tag> {
        match list_element_type(&items) {
            Some(0) if !items.is_empty() => Err(RegolithError::CorruptData(
                "list may not contain End values".to_string(),
            )),
            Some(_) => Ok(Tag::List(items)),
            None => Err(RegolithError::CorruptData(
                "list elements must all share one tag type".to_string(),
            )),
        }
    }

    pub fn as_compound(&self) -> Option<&HashMap<String, Tag>> {
        match self {
            Tag::Compound(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Tag>> {
        match self {
            Tag::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Tag::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Tag::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Tag::Short(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<i8> {
        match self {
            Tag::Byte(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Tag::Double(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Tag::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_byte_array(&self) -> Option<&[i8]> {
        match self {
            Tag::ByteArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            Tag::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_long_array(&self) -> Option<&[i64]> {
        match self {
            Tag::LongArray(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a key on a compound tag. `None` for other variants.
    pub fn get(&self, key: &str) -> Option<&Tag> {
        match self {
            Tag::Compound(map) => map.get(key),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts into a compound tag, replacing any prior value under the key.
    /// `None` (and no effect) for other variants.
    pub fn insert(&mut self, key: impl Into<String>, value: Tag) -> Option<Tag> {
        match self {
            Tag::Compound(map) => map.insert(key.into(), value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Tag> {
        match self {
            Tag::Compound(map) => map.get_mut(key),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Tag> {
        match self {
            Tag::Compound(map) => map.remove(key),
            _ => None,
        }
    }

    pub fn get_byte(&self, key: &str) -> Option<i8> {
        self.get(key).and_then(Tag::as_i8)
    }

    pub fn get_short(&self, key: &str) -> Option<i16> {
        self.get(key).and_then(Tag::as_i16)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Tag::as_i32)
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Tag::as_i64)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Tag::as_f64)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Tag::as_string)
    }

    pub fn get_list(&self, key: &str) -> Option<&[Tag]> {
        self.get(key).and_then(|tag| tag.as_list()).map(Vec::as_slice)
    }

    /// The compound stored under `key`, as a `Tag` so lookups chain.
    pub fn get_compound(&self, key: &str) -> Option<&Tag> {
        self.get(key).filter(|tag| matches!(tag, Tag::Compound(_)))
    }

    pub fn get_byte_array(&self, key: &str) -> Option<&[i8]> {
        self.get(key).and_then(Tag::as_byte_array)
    }

    pub fn get_int_array(&self, key: &str) -> Option<&[i32]> {
        self.get(key).and_then(Tag::as_int_array)
    }

    pub fn get_long_array(&self, key: &str) -> Option<&[i64]> {
        self.get(key).and_then(Tag::as_long_array)
    }

    /// Nonzero byte under `key`; absence reads as false.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get_byte(key).map(|b| b != 0).unwrap_or(false)
    }
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn is_simple_key(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
}

/// Text rendering of a tag tree. Compound keys come out in lexicographic
/// order so the output is deterministic.
impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::End => write!(f, "END"),
            Tag::Byte(v) => write!(f, "{}b", v),
            Tag::Short(v) => write!(f, "{}s", v),
            Tag::Int(v) => write!(f, "{}", v),
            Tag::Long(v) => write!(f, "{}L", v),
            Tag::Float(v) => write!(f, "{}f", v),
            Tag::Double(v) => write!(f, "{}d", v),
            Tag::ByteArray(v) => {
                write!(f, "[B;")?;
                for (i, b) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}b", b)?;
                }
                write!(f, "]")
            }
            Tag::String(s) => write!(f, "{}", quoted(s)),
            Tag::List(v) => {
                write!(f, "[")?;
                for (i, tag) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", tag)?;
                }
                write!(f, "]")
            }
            Tag::Compound(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if is_simple_key(key) {
                        write!(f, "{}:{}", key, map[*key])?;
                    } else {
                        write!(f, "{}:{}", quoted(key), map[*key])?;
                    }
                }
                write!(f, "}}")
            }
            Tag::IntArray(v) => {
                write!(f, "[I;")?;
                for (i, n) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", n)?;
                }
                write!(f, "]")
            }
            Tag::LongArray(v) => {
                write!(f, "[L;")?;
                for (i, n) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}L", n)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A complete named-root tag tree with compression support.
pub struct NbtFile {
    pub root: Tag,
    pub name: String,
}

impl NbtFile {
    pub fn new(name: String, root: Tag) -> Self {
        NbtFile { root, name }
    }

    pub fn read<R: Read>(reader: &mut R, tracker: &mut SizeTracker) -> Result<Self> {
        let (name, root) = Tag::read(reader, tracker)?;
        Ok(NbtFile { root, name })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.root.write(writer, &self.name)
    }

    pub fn read_gzip<R: Read>(reader: &mut R, tracker: &mut SizeTracker) -> Result<Self> {
        let mut decoder = GzDecoder::new(reader);
        Self::read(&mut decoder, tracker)
    }

    pub fn write_gzip<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        self.write(&mut encoder)?;
        encoder.finish()?;
        Ok(())
    }
}
