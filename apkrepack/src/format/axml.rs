// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Android binary XML (AXML). Two levels of editing are supported: rewriting
//! the string pool while keeping every other chunk verbatim, and a structural
//! model of the element tree for attribute and element edits.

use std::{collections::HashMap, fmt, mem};

use bitflags::bitflags;
use memchr::memmem;
use thiserror::Error;
use tracing::{trace, warn};
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::format::padding;

/// Magic value at the start of every document: chunk type `0x0003` with a
/// header size of 8.
pub const DOCUMENT_MAGIC: u32 = 0x0008_0003;

pub const CHUNK_TYPE_STRING_POOL: u16 = 0x0001;
pub const CHUNK_TYPE_XML: u16 = 0x0003;
pub const CHUNK_TYPE_START_NAMESPACE: u16 = 0x0100;
pub const CHUNK_TYPE_END_NAMESPACE: u16 = 0x0101;
pub const CHUNK_TYPE_START_ELEMENT: u16 = 0x0102;
pub const CHUNK_TYPE_END_ELEMENT: u16 = 0x0103;
pub const CHUNK_TYPE_CDATA: u16 = 0x0104;
pub const CHUNK_TYPE_RESOURCE_MAP: u16 = 0x0180;

/// Reference to no string.
pub const NO_INDEX: u32 = u32::MAX;

pub const TYPE_REFERENCE: u8 = 0x01;
pub const TYPE_STRING: u8 = 0x03;
pub const TYPE_INT_DEC: u8 = 0x10;
pub const TYPE_INT_HEX: u8 = 0x11;
pub const TYPE_INT_BOOLEAN: u8 = 0x12;

const CHUNK_HEADER_SIZE: usize = mem::size_of::<RawChunkHeader>();
const POOL_HEADER_SIZE: usize = mem::size_of::<RawStringPoolHeader>();
const NODE_HEADER_SIZE: usize = mem::size_of::<RawNodeHeader>();
const ATTR_EXT_SIZE: usize = mem::size_of::<RawAttrExt>();
const ATTRIBUTE_SIZE: usize = mem::size_of::<RawAttribute>();

/// Largest length representable by the UTF-8 length prefix.
const MAX_UTF8_LEN: usize = 0x7fff;
/// Largest length representable by the UTF-16 length prefix.
const MAX_UTF16_LEN: usize = 0x7fff_ffff;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid document magic: {0:#010x}")]
    InvalidMagic(u32),
    #[error("Document is truncated: header says {expected} bytes, but have {actual}")]
    TruncatedDocument { expected: usize, actual: usize },
    #[error("Truncated {0} at offset {1:#x}")]
    Truncated(&'static str, usize),
    #[error(
        "Chunk at {offset:#x}: Invalid header: type={chunk_type:#06x}, header_size={header_size}, size={size}"
    )]
    InvalidChunk {
        offset: usize,
        chunk_type: u16,
        header_size: u16,
        size: u32,
    },
    #[error("Document has no string pool")]
    MissingStringPool,
    #[error("String pool: {0} out of bounds")]
    PoolOutOfBounds(&'static str),
    #[error("String #{index}: Offset {offset} out of bounds")]
    StringOutOfBounds { index: usize, offset: usize },
    #[error("String is too long to encode: {0:?}")]
    StringTooLong(String),
    #[error("String index out of bounds: {0}")]
    InvalidStringIndex(u32),
    #[error("Chunk #{0}: Element has no matching end element")]
    UnbalancedElement(usize),
    #[error("Chunk #{0}: Not a start element")]
    NotAnElement(usize),
    #[error("Element has too many attributes: {0}")]
    TooManyAttributes(usize),
    #[error("Document exceeds 4 GiB")]
    DocumentTooLarge,
}

type Result<T> = std::result::Result<T, Error>;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StringPoolFlags: u32 {
        const SORTED = 1 << 0;
        const UTF8 = 1 << 8;

        const _ = !0;
    }
}

/// Raw on-disk layout for the header shared by every chunk.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawChunkHeader {
    chunk_type: little_endian::U16,
    header_size: little_endian::U16,
    /// Size of the whole chunk, including this header.
    size: little_endian::U32,
}

/// Raw on-disk layout for the string pool header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawStringPoolHeader {
    chunk_type: little_endian::U16,
    header_size: little_endian::U16,
    size: little_endian::U32,
    string_count: little_endian::U32,
    style_count: little_endian::U32,
    flags: little_endian::U32,
    /// Offset from the chunk start to the string data.
    strings_start: little_endian::U32,
    /// Offset from the chunk start to the style data, or 0 if there are none.
    styles_start: little_endian::U32,
}

/// Raw on-disk layout for the header of tree node chunks.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawNodeHeader {
    chunk_type: little_endian::U16,
    header_size: little_endian::U16,
    size: little_endian::U32,
    line_number: little_endian::U32,
    comment: little_endian::U32,
}

#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawNamespaceExt {
    prefix: little_endian::U32,
    uri: little_endian::U32,
}

#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawEndElementExt {
    ns: little_endian::U32,
    name: little_endian::U32,
}

#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawAttrExt {
    ns: little_endian::U32,
    name: little_endian::U32,
    /// Offset from the start of this structure to the first attribute.
    attribute_start: little_endian::U16,
    attribute_size: little_endian::U16,
    attribute_count: little_endian::U16,
    /// 1-based attribute indices, or 0 if absent.
    id_index: little_endian::U16,
    class_index: little_endian::U16,
    style_index: little_endian::U16,
}

#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawResValue {
    size: little_endian::U16,
    res0: u8,
    data_type: u8,
    data: little_endian::U32,
}

#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawAttribute {
    ns: little_endian::U32,
    name: little_endian::U32,
    raw_value: little_endian::U32,
    typed_value: RawResValue,
}

#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawCdataExt {
    data: little_endian::U32,
    typed_value: RawResValue,
}

fn read_struct<T: FromBytes>(data: &[u8], offset: usize, what: &'static str) -> Result<T> {
    data.get(offset..)
        .and_then(|d| d.get(..mem::size_of::<T>()))
        .and_then(|d| T::read_from_bytes(d).ok())
        .ok_or(Error::Truncated(what, offset))
}

fn to_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::DocumentTooLarge)
}

/// Parse the document header and return the document size.
fn document_size(data: &[u8]) -> Result<usize> {
    let header = read_struct::<RawChunkHeader>(data, 0, "document header")?;
    let magic = u32::from(header.chunk_type.get()) | (u32::from(header.header_size.get()) << 16);
    if magic != DOCUMENT_MAGIC {
        return Err(Error::InvalidMagic(magic));
    }

    let size = header.size.get() as usize;
    if size > data.len() {
        return Err(Error::TruncatedDocument {
            expected: size,
            actual: data.len(),
        });
    } else if size < CHUNK_HEADER_SIZE {
        return Err(Error::Truncated("document", 0));
    }

    Ok(size)
}

/// Split a document into `(offset, chunk type, header size, chunk bytes)` for
/// each top-level chunk.
fn split_chunks(data: &[u8]) -> Result<Vec<(usize, u16, usize, &[u8])>> {
    let doc_size = document_size(data)?;
    let mut chunks = vec![];
    let mut offset = CHUNK_HEADER_SIZE;

    while offset < doc_size {
        let header = read_struct::<RawChunkHeader>(&data[..doc_size], offset, "chunk header")?;
        let header_size = usize::from(header.header_size.get());
        let size = header.size.get() as usize;

        if header_size < CHUNK_HEADER_SIZE
            || size < header_size
            || offset + size > doc_size
        {
            return Err(Error::InvalidChunk {
                offset,
                chunk_type: header.chunk_type.get(),
                header_size: header.header_size.get(),
                size: header.size.get(),
            });
        }

        chunks.push((
            offset,
            header.chunk_type.get(),
            header_size,
            &data[offset..offset + size],
        ));
        offset += size;
    }

    Ok(chunks)
}

fn read_len_utf8(data: &[u8], pos: &mut usize) -> Option<usize> {
    let b0 = *data.get(*pos)?;
    *pos += 1;

    if b0 & 0x80 != 0 {
        let b1 = *data.get(*pos)?;
        *pos += 1;
        Some((usize::from(b0 & 0x7f) << 8) | usize::from(b1))
    } else {
        Some(usize::from(b0))
    }
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let bytes = data.get(pos..pos + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_len_utf16(data: &[u8], pos: &mut usize) -> Option<usize> {
    let u0 = read_u16(data, *pos)?;
    *pos += 2;

    if u0 & 0x8000 != 0 {
        let u1 = read_u16(data, *pos)?;
        *pos += 2;
        Some((usize::from(u0 & 0x7fff) << 16) | usize::from(u1))
    } else {
        Some(usize::from(u0))
    }
}

fn write_len_utf8(buf: &mut Vec<u8>, len: usize) {
    if len > 0x7f {
        buf.push(0x80 | (len >> 8) as u8);
        buf.push(len as u8);
    } else {
        buf.push(len as u8);
    }
}

fn write_len_utf16(buf: &mut Vec<u8>, len: usize) {
    if len > 0x7fff {
        buf.extend_from_slice(&((len >> 16) as u16 | 0x8000).to_le_bytes());
        buf.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        buf.extend_from_slice(&(len as u16).to_le_bytes());
    }
}

/// Decode the string at `offset`. Strings that are not valid in the pool's
/// encoding (eg. modified UTF-8 or unpaired surrogates) are decoded lossily and
/// their encoded bytes, length prefixes included, are returned too.
fn decode_string(
    data: &[u8],
    offset: usize,
    utf8: bool,
    index: usize,
) -> Result<(String, Option<Vec<u8>>)> {
    let out_of_bounds = || Error::StringOutOfBounds { index, offset };
    let mut pos = offset;

    if utf8 {
        // UTF-16 length first, then the UTF-8 byte length.
        read_len_utf8(data, &mut pos).ok_or_else(out_of_bounds)?;
        let len = read_len_utf8(data, &mut pos).ok_or_else(out_of_bounds)?;
        let end = pos.checked_add(len).ok_or_else(out_of_bounds)?;
        let bytes = data.get(pos..end).ok_or_else(out_of_bounds)?;

        match std::str::from_utf8(bytes) {
            Ok(s) => Ok((s.to_owned(), None)),
            Err(e) => {
                warn!("String #{index}: Invalid UTF-8 data: {e}");
                let lossy = String::from_utf8_lossy(bytes).into_owned();
                Ok((lossy, Some(data[offset..end].to_vec())))
            }
        }
    } else {
        let len = read_len_utf16(data, &mut pos).ok_or_else(out_of_bounds)?;
        let end = len
            .checked_mul(2)
            .and_then(|n| n.checked_add(pos))
            .ok_or_else(out_of_bounds)?;
        let bytes = data.get(pos..end).ok_or_else(out_of_bounds)?;
        let units = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect::<Vec<_>>();

        match String::from_utf16(&units) {
            Ok(s) => Ok((s, None)),
            Err(e) => {
                warn!("String #{index}: Invalid UTF-16 data: {e}");
                let lossy = String::from_utf16_lossy(&units);
                Ok((lossy, Some(data[offset..end].to_vec())))
            }
        }
    }
}

fn encode_string(buf: &mut Vec<u8>, s: &str, utf8: bool) -> Result<()> {
    if utf8 {
        let utf16_len = s.encode_utf16().count();
        if utf16_len > MAX_UTF8_LEN || s.len() > MAX_UTF8_LEN {
            return Err(Error::StringTooLong(s.to_owned()));
        }

        write_len_utf8(buf, utf16_len);
        write_len_utf8(buf, s.len());
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    } else {
        let units = s.encode_utf16().collect::<Vec<_>>();
        if units.len() > MAX_UTF16_LEN {
            return Err(Error::StringTooLong(s.to_owned()));
        }

        write_len_utf16(buf, units.len());
        for unit in units {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        buf.extend_from_slice(&[0, 0]);
    }

    Ok(())
}

/// The document's string table. Style spans are kept as opaque bytes since
/// their offsets are relative to the style data and never change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringPool {
    strings: Vec<String>,
    /// Original encoding of strings that could only be decoded lossily. These
    /// are written back verbatim and never substituted.
    raw: Vec<Option<Vec<u8>>>,
    flags: StringPoolFlags,
    style_offsets: Vec<u32>,
    style_data: Vec<u8>,
}

impl StringPool {
    pub fn new(utf8: bool) -> Self {
        let flags = if utf8 {
            StringPoolFlags::UTF8
        } else {
            StringPoolFlags::empty()
        };

        Self {
            strings: vec![],
            raw: vec![],
            flags,
            style_offsets: vec![],
            style_data: vec![],
        }
    }

    /// Parse a complete string pool chunk.
    pub fn parse(chunk: &[u8]) -> Result<Self> {
        let header = read_struct::<RawStringPoolHeader>(chunk, 0, "string pool header")?;
        let header_size = usize::from(header.header_size.get());
        let size = header.size.get() as usize;

        if header.chunk_type.get() != CHUNK_TYPE_STRING_POOL
            || header_size < POOL_HEADER_SIZE
            || size < header_size
            || size > chunk.len()
        {
            return Err(Error::InvalidChunk {
                offset: 0,
                chunk_type: header.chunk_type.get(),
                header_size: header.header_size.get(),
                size: header.size.get(),
            });
        }

        let chunk = &chunk[..size];
        let flags = StringPoolFlags::from_bits_retain(header.flags.get());
        let utf8 = flags.contains(StringPoolFlags::UTF8);
        let string_count = header.string_count.get() as usize;
        let style_count = header.style_count.get() as usize;

        let read_offsets = |start: usize, count: usize, what: &'static str| {
            let end = count
                .checked_mul(4)
                .and_then(|n| n.checked_add(start))
                .filter(|end| *end <= size)
                .ok_or(Error::PoolOutOfBounds(what))?;

            Ok::<_, Error>(
                chunk[start..end]
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect::<Vec<_>>(),
            )
        };

        let string_offsets = read_offsets(header_size, string_count, "string offsets")?;
        let style_offsets = read_offsets(
            header_size + string_count * 4,
            style_count,
            "style offsets",
        )?;

        let strings_start = header.strings_start.get() as usize;
        let styles_start = header.styles_start.get() as usize;
        let strings_end = if style_count > 0 && styles_start != 0 {
            styles_start
        } else {
            size
        };

        let mut strings = Vec::with_capacity(string_count);
        let mut raw = Vec::with_capacity(string_count);

        if string_count > 0 {
            let string_data = chunk
                .get(strings_start..strings_end)
                .ok_or(Error::PoolOutOfBounds("string data"))?;

            for (index, offset) in string_offsets.into_iter().enumerate() {
                let (s, encoded) = decode_string(string_data, offset as usize, utf8, index)?;
                strings.push(s);
                raw.push(encoded);
            }
        }

        let style_data = if style_count > 0 {
            chunk
                .get(styles_start..)
                .ok_or(Error::PoolOutOfBounds("style data"))?
                .to_vec()
        } else {
            vec![]
        };

        Ok(Self {
            strings,
            raw,
            flags,
            style_offsets,
            style_data,
        })
    }

    /// Serialize into a complete string pool chunk. The string data is padded
    /// to a multiple of 4 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let utf8 = self.is_utf8();
        let mut offsets = Vec::with_capacity(self.strings.len());
        let mut string_data = vec![];

        for (s, raw) in self.strings.iter().zip(&self.raw) {
            offsets.push(to_u32(string_data.len())?);

            match raw {
                Some(encoded) => {
                    let terminator: &[u8] = if utf8 { &[0] } else { &[0, 0] };
                    string_data.extend_from_slice(encoded);
                    string_data.extend_from_slice(terminator);
                }
                None => encode_string(&mut string_data, s, utf8)?,
            }
        }

        string_data.resize(padding::round(string_data.len(), 4).ok_or(Error::DocumentTooLarge)?, 0);

        let tables_size = (self.strings.len() + self.style_offsets.len()) * 4;
        let strings_start = if self.strings.is_empty() {
            0
        } else {
            POOL_HEADER_SIZE + tables_size
        };
        let styles_start = if self.style_offsets.is_empty() {
            0
        } else {
            POOL_HEADER_SIZE + tables_size + string_data.len()
        };
        let size = POOL_HEADER_SIZE + tables_size + string_data.len() + self.style_data.len();

        let header = RawStringPoolHeader {
            chunk_type: CHUNK_TYPE_STRING_POOL.into(),
            header_size: (POOL_HEADER_SIZE as u16).into(),
            size: to_u32(size)?.into(),
            string_count: to_u32(self.strings.len())?.into(),
            style_count: to_u32(self.style_offsets.len())?.into(),
            flags: self.flags.bits().into(),
            strings_start: to_u32(strings_start)?.into(),
            styles_start: to_u32(styles_start)?.into(),
        };

        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(header.as_bytes());
        for offset in offsets.iter().chain(&self.style_offsets) {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        buf.extend_from_slice(&string_data);
        buf.extend_from_slice(&self.style_data);

        Ok(buf)
    }

    pub fn is_utf8(&self) -> bool {
        self.flags.contains(StringPoolFlags::UTF8)
    }

    pub fn flags(&self) -> StringPoolFlags {
        self.flags
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    pub fn find(&self, s: &str) -> Option<u32> {
        self.strings.iter().position(|p| p == s).map(|i| i as u32)
    }

    /// Append a string. Existing indices are never changed.
    pub fn add(&mut self, s: &str) -> u32 {
        self.strings.push(s.to_owned());
        self.raw.push(None);
        self.flags.remove(StringPoolFlags::SORTED);
        (self.strings.len() - 1) as u32
    }

    pub fn find_or_add(&mut self, s: &str) -> u32 {
        match self.find(s) {
            Some(index) => index,
            None => self.add(s),
        }
    }

    /// Replace every string that exactly matches a key in `mapping`. Returns
    /// the number of strings that changed.
    pub fn apply_mapping(&mut self, mapping: &HashMap<String, String>) -> usize {
        let mut count = 0;

        for (s, raw) in self.strings.iter_mut().zip(&self.raw) {
            if raw.is_some() {
                continue;
            }

            if let Some(replacement) = mapping.get(s.as_str()) {
                if *replacement != *s {
                    trace!("Replacing string {s:?} with {replacement:?}");
                    replacement.clone_into(s);
                    count += 1;
                }
            }
        }

        if count > 0 {
            self.flags.remove(StringPoolFlags::SORTED);
        }

        count
    }
}

/// Decode the string pool of a document without parsing anything else.
pub fn read_string_pool(data: &[u8]) -> Result<StringPool> {
    let (_, _, _, chunk) = split_chunks(data)?
        .into_iter()
        .find(|(_, t, _, _)| *t == CHUNK_TYPE_STRING_POOL)
        .ok_or(Error::MissingStringPool)?;

    StringPool::parse(chunk)
}

/// Rewrite the document's string pool, substituting strings that exactly
/// match a key in `mapping`. Every chunk other than the string pool is kept
/// byte-for-byte and the document size is updated. Returns the new document
/// and the number of substitutions. If nothing is substituted, the document
/// is returned unchanged.
pub fn rewrite_string_pool(
    data: &[u8],
    mapping: &HashMap<String, String>,
) -> Result<(Vec<u8>, usize)> {
    let doc_size = document_size(data)?;
    let (offset, _, _, chunk) = split_chunks(data)?
        .into_iter()
        .find(|(_, t, _, _)| *t == CHUNK_TYPE_STRING_POOL)
        .ok_or(Error::MissingStringPool)?;

    let mut pool = StringPool::parse(chunk)?;
    let count = pool.apply_mapping(mapping);
    if count == 0 {
        return Ok((data.to_vec(), 0));
    }

    let new_pool = pool.to_bytes()?;
    let old_end = offset + chunk.len();

    let mut result = Vec::with_capacity(data.len() - chunk.len() + new_pool.len());
    result.extend_from_slice(&data[..offset]);
    result.extend_from_slice(&new_pool);
    result.extend_from_slice(&data[old_end..]);

    let new_doc_size = to_u32(doc_size - chunk.len() + new_pool.len())?;
    result[4..8].copy_from_slice(&new_doc_size.to_le_bytes());

    Ok((result, count))
}

/// Zero every occurrence of the little-endian encoding of `pattern` in place.
/// No other bytes are modified. Returns the number of occurrences.
pub fn zero_pattern(data: &mut [u8], pattern: u32) -> usize {
    let needle = pattern.to_le_bytes();
    let positions = memmem::find_iter(data, &needle).collect::<Vec<_>>();

    for &pos in &positions {
        data[pos..pos + needle.len()].fill(0);
    }

    positions.len()
}

/// A typed attribute or CDATA value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResValue {
    pub data_type: u8,
    pub data: u32,
}

impl ResValue {
    pub fn string(index: u32) -> Self {
        Self {
            data_type: TYPE_STRING,
            data: index,
        }
    }

    pub fn int_dec(value: u32) -> Self {
        Self {
            data_type: TYPE_INT_DEC,
            data: value,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            data_type: TYPE_INT_BOOLEAN,
            data: if value { u32::MAX } else { 0 },
        }
    }

    fn from_raw(raw: &RawResValue) -> Self {
        Self {
            data_type: raw.data_type,
            data: raw.data.get(),
        }
    }

    fn to_raw(self) -> RawResValue {
        RawResValue {
            size: 8.into(),
            res0: 0,
            data_type: self.data_type,
            data: self.data.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub ns: u32,
    pub name: u32,
    /// Original string value, or [`NO_INDEX`].
    pub raw_value: u32,
    pub value: ResValue,
}

impl Attribute {
    /// Create a string-typed attribute.
    pub fn string(ns: u32, name: u32, value: u32) -> Self {
        Self {
            ns,
            name,
            raw_value: value,
            value: ResValue::string(value),
        }
    }

    /// Create an attribute with a non-string typed value.
    pub fn typed(ns: u32, name: u32, value: ResValue) -> Self {
        Self {
            ns,
            name,
            raw_value: NO_INDEX,
            value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub line: u32,
    pub comment: u32,
    pub prefix: u32,
    pub uri: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartElement {
    pub line: u32,
    pub comment: u32,
    pub ns: u32,
    pub name: u32,
    pub id_index: u16,
    pub class_index: u16,
    pub style_index: u16,
    pub attributes: Vec<Attribute>,
}

impl StartElement {
    pub fn new(ns: u32, name: u32, attributes: Vec<Attribute>) -> Self {
        Self {
            line: 0,
            comment: NO_INDEX,
            ns,
            name,
            id_index: 0,
            class_index: 0,
            style_index: 0,
            attributes,
        }
    }

    /// Insert an attribute at `index`, keeping the special attribute indices
    /// pointing at the same attributes.
    pub fn insert_attribute(&mut self, index: usize, attr: Attribute) {
        self.attributes.insert(index, attr);

        for special in [
            &mut self.id_index,
            &mut self.class_index,
            &mut self.style_index,
        ] {
            if *special != 0 && usize::from(*special) > index {
                *special += 1;
            }
        }
    }

    /// Remove the attribute at `index`, clearing or shifting the special
    /// attribute indices.
    pub fn remove_attribute(&mut self, index: usize) -> Attribute {
        let attr = self.attributes.remove(index);

        for special in [
            &mut self.id_index,
            &mut self.class_index,
            &mut self.style_index,
        ] {
            let position = usize::from(*special);
            if position == index + 1 {
                *special = 0;
            } else if position > index + 1 {
                *special -= 1;
            }
        }

        attr
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndElement {
    pub line: u32,
    pub comment: u32,
    pub ns: u32,
    pub name: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cdata {
    pub line: u32,
    pub comment: u32,
    pub data: u32,
    pub value: ResValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    ResourceMap(Vec<u32>),
    StartNamespace(Namespace),
    EndNamespace(Namespace),
    StartElement(StartElement),
    EndElement(EndElement),
    Cdata(Cdata),
    /// Any other chunk, kept verbatim including its header.
    Unknown(Vec<u8>),
}

impl Chunk {
    fn parse(chunk_type: u16, header_size: usize, data: &[u8], offset: usize) -> Result<Self> {
        let node_header = || {
            if header_size < NODE_HEADER_SIZE {
                return Err(Error::InvalidChunk {
                    offset,
                    chunk_type,
                    header_size: header_size as u16,
                    size: data.len() as u32,
                });
            }
            read_struct::<RawNodeHeader>(data, 0, "node header")
        };

        let chunk = match chunk_type {
            CHUNK_TYPE_RESOURCE_MAP => Self::ResourceMap(
                data[header_size..]
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            CHUNK_TYPE_START_NAMESPACE | CHUNK_TYPE_END_NAMESPACE => {
                let header = node_header()?;
                let ext = read_struct::<RawNamespaceExt>(data, header_size, "namespace")?;
                let ns = Namespace {
                    line: header.line_number.get(),
                    comment: header.comment.get(),
                    prefix: ext.prefix.get(),
                    uri: ext.uri.get(),
                };

                if chunk_type == CHUNK_TYPE_START_NAMESPACE {
                    Self::StartNamespace(ns)
                } else {
                    Self::EndNamespace(ns)
                }
            }
            CHUNK_TYPE_START_ELEMENT => {
                let header = node_header()?;
                let ext = read_struct::<RawAttrExt>(data, header_size, "element")?;
                let start = header_size + usize::from(ext.attribute_start.get());
                let stride = usize::from(ext.attribute_size.get());
                if stride < ATTRIBUTE_SIZE {
                    return Err(Error::Truncated("attribute", offset + start));
                }

                let attributes = (0..usize::from(ext.attribute_count.get()))
                    .map(|i| {
                        let raw = read_struct::<RawAttribute>(data, start + i * stride, "attribute")?;
                        Ok(Attribute {
                            ns: raw.ns.get(),
                            name: raw.name.get(),
                            raw_value: raw.raw_value.get(),
                            value: ResValue::from_raw(&raw.typed_value),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Self::StartElement(StartElement {
                    line: header.line_number.get(),
                    comment: header.comment.get(),
                    ns: ext.ns.get(),
                    name: ext.name.get(),
                    id_index: ext.id_index.get(),
                    class_index: ext.class_index.get(),
                    style_index: ext.style_index.get(),
                    attributes,
                })
            }
            CHUNK_TYPE_END_ELEMENT => {
                let header = node_header()?;
                let ext = read_struct::<RawEndElementExt>(data, header_size, "end element")?;

                Self::EndElement(EndElement {
                    line: header.line_number.get(),
                    comment: header.comment.get(),
                    ns: ext.ns.get(),
                    name: ext.name.get(),
                })
            }
            CHUNK_TYPE_CDATA => {
                let header = node_header()?;
                let ext = read_struct::<RawCdataExt>(data, header_size, "cdata")?;

                Self::Cdata(Cdata {
                    line: header.line_number.get(),
                    comment: header.comment.get(),
                    data: ext.data.get(),
                    value: ResValue::from_raw(&ext.typed_value),
                })
            }
            _ => Self::Unknown(data.to_vec()),
        };

        Ok(chunk)
    }

    fn write_node(
        buf: &mut Vec<u8>,
        chunk_type: u16,
        line: u32,
        comment: u32,
        body: &[u8],
    ) -> Result<()> {
        let header = RawNodeHeader {
            chunk_type: chunk_type.into(),
            header_size: (NODE_HEADER_SIZE as u16).into(),
            size: to_u32(NODE_HEADER_SIZE + body.len())?.into(),
            line_number: line.into(),
            comment: comment.into(),
        };

        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(body);

        Ok(())
    }

    fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::ResourceMap(ids) => {
                let header = RawChunkHeader {
                    chunk_type: CHUNK_TYPE_RESOURCE_MAP.into(),
                    header_size: (CHUNK_HEADER_SIZE as u16).into(),
                    size: to_u32(CHUNK_HEADER_SIZE + ids.len() * 4)?.into(),
                };

                buf.extend_from_slice(header.as_bytes());
                for id in ids {
                    buf.extend_from_slice(&id.to_le_bytes());
                }
            }
            Self::StartNamespace(ns) | Self::EndNamespace(ns) => {
                let chunk_type = if matches!(self, Self::StartNamespace(_)) {
                    CHUNK_TYPE_START_NAMESPACE
                } else {
                    CHUNK_TYPE_END_NAMESPACE
                };
                let ext = RawNamespaceExt {
                    prefix: ns.prefix.into(),
                    uri: ns.uri.into(),
                };

                Self::write_node(buf, chunk_type, ns.line, ns.comment, ext.as_bytes())?;
            }
            Self::StartElement(element) => {
                let count = u16::try_from(element.attributes.len())
                    .map_err(|_| Error::TooManyAttributes(element.attributes.len()))?;
                let ext = RawAttrExt {
                    ns: element.ns.into(),
                    name: element.name.into(),
                    attribute_start: (ATTR_EXT_SIZE as u16).into(),
                    attribute_size: (ATTRIBUTE_SIZE as u16).into(),
                    attribute_count: count.into(),
                    id_index: element.id_index.into(),
                    class_index: element.class_index.into(),
                    style_index: element.style_index.into(),
                };

                let mut body = ext.as_bytes().to_vec();
                for attr in &element.attributes {
                    let raw = RawAttribute {
                        ns: attr.ns.into(),
                        name: attr.name.into(),
                        raw_value: attr.raw_value.into(),
                        typed_value: attr.value.to_raw(),
                    };
                    body.extend_from_slice(raw.as_bytes());
                }

                Self::write_node(
                    buf,
                    CHUNK_TYPE_START_ELEMENT,
                    element.line,
                    element.comment,
                    &body,
                )?;
            }
            Self::EndElement(element) => {
                let ext = RawEndElementExt {
                    ns: element.ns.into(),
                    name: element.name.into(),
                };

                Self::write_node(
                    buf,
                    CHUNK_TYPE_END_ELEMENT,
                    element.line,
                    element.comment,
                    ext.as_bytes(),
                )?;
            }
            Self::Cdata(cdata) => {
                let ext = RawCdataExt {
                    data: cdata.data.into(),
                    typed_value: cdata.value.to_raw(),
                };

                Self::write_node(buf, CHUNK_TYPE_CDATA, cdata.line, cdata.comment, ext.as_bytes())?;
            }
            Self::Unknown(data) => buf.extend_from_slice(data),
        }

        Ok(())
    }
}

/// Structural model of a binary XML document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AxmlDocument {
    pub pool: StringPool,
    pub chunks: Vec<Chunk>,
}

impl AxmlDocument {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut pool = None;
        let mut chunks = vec![];

        for (offset, chunk_type, header_size, chunk) in split_chunks(data)? {
            if chunk_type == CHUNK_TYPE_STRING_POOL && pool.is_none() {
                pool = Some(StringPool::parse(chunk)?);
            } else {
                chunks.push(Chunk::parse(chunk_type, header_size, chunk, offset)?);
            }
        }

        let pool = pool.ok_or(Error::MissingStringPool)?;

        Ok(Self { pool, chunks })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; CHUNK_HEADER_SIZE];
        buf.extend_from_slice(&self.pool.to_bytes()?);

        for chunk in &self.chunks {
            chunk.write(&mut buf)?;
        }

        let header = RawChunkHeader {
            chunk_type: CHUNK_TYPE_XML.into(),
            header_size: (CHUNK_HEADER_SIZE as u16).into(),
            size: to_u32(buf.len())?.into(),
        };
        buf[..CHUNK_HEADER_SIZE].copy_from_slice(header.as_bytes());

        Ok(buf)
    }

    pub fn string(&self, index: u32) -> Result<&str> {
        self.pool.get(index).ok_or(Error::InvalidStringIndex(index))
    }

    pub fn resource_map(&self) -> &[u32] {
        self.chunks
            .iter()
            .find_map(|c| match c {
                Chunk::ResourceMap(ids) => Some(ids.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn resource_map_mut(&mut self) -> &mut Vec<u32> {
        let position = match self
            .chunks
            .iter()
            .position(|c| matches!(c, Chunk::ResourceMap(_)))
        {
            Some(p) => p,
            None => {
                self.chunks.insert(0, Chunk::ResourceMap(vec![]));
                0
            }
        };

        match &mut self.chunks[position] {
            Chunk::ResourceMap(ids) => ids,
            _ => unreachable!(),
        }
    }

    /// Get the resource ID associated with an attribute name string.
    pub fn resource_id(&self, name: u32) -> Option<u32> {
        self.resource_map()
            .get(name as usize)
            .copied()
            .filter(|id| *id != 0)
    }

    /// Find or create the string index of an attribute name that is bound to
    /// `res_id`. New names are appended to the pool and the resource map is
    /// extended to cover them.
    pub fn attribute_name(&mut self, name: &str, res_id: u32) -> u32 {
        let existing = self
            .resource_map()
            .iter()
            .enumerate()
            .find(|(i, id)| **id == res_id && self.pool.get(*i as u32) == Some(name))
            .map(|(i, _)| i as u32);
        if let Some(index) = existing {
            return index;
        }

        let index = self.pool.add(name);
        let map = self.resource_map_mut();
        map.resize(index as usize, 0);
        map.push(res_id);

        index
    }

    /// Find the string index of a namespace URI declared in the document.
    pub fn namespace(&self, uri: &str) -> Option<u32> {
        self.chunks.iter().find_map(|c| match c {
            Chunk::StartNamespace(ns) if self.pool.get(ns.uri) == Some(uri) => Some(ns.uri),
            _ => None,
        })
    }

    pub fn element_name(&self, element: &StartElement) -> Option<&str> {
        self.pool.get(element.name)
    }

    /// Chunk indices of all start elements with the given name.
    pub fn find_elements(&self, name: &str) -> Vec<usize> {
        self.chunks
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                Chunk::StartElement(e) if self.pool.get(e.name) == Some(name) => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn find_element(&self, name: &str) -> Option<usize> {
        self.find_elements(name).into_iter().next()
    }

    pub fn element(&self, index: usize) -> Option<&StartElement> {
        match self.chunks.get(index) {
            Some(Chunk::StartElement(e)) => Some(e),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, index: usize) -> Option<&mut StartElement> {
        match self.chunks.get_mut(index) {
            Some(Chunk::StartElement(e)) => Some(e),
            _ => None,
        }
    }

    /// Position of the attribute bound to `res_id`.
    pub fn attribute_by_id(&self, element: &StartElement, res_id: u32) -> Option<usize> {
        element
            .attributes
            .iter()
            .position(|a| self.resource_id(a.name) == Some(res_id))
    }

    /// Position of the attribute with no namespace and the given name.
    pub fn attribute_by_name(&self, element: &StartElement, name: &str) -> Option<usize> {
        element
            .attributes
            .iter()
            .position(|a| a.ns == NO_INDEX && self.pool.get(a.name) == Some(name))
    }

    /// String value of an attribute, if it is string-typed.
    pub fn attribute_string(&self, attr: &Attribute) -> Option<&str> {
        if attr.value.data_type == TYPE_STRING {
            self.pool.get(attr.value.data)
        } else if attr.raw_value != NO_INDEX {
            self.pool.get(attr.raw_value)
        } else {
            None
        }
    }

    /// Replace the attribute with the same name, or insert it. Attributes
    /// bound to resource IDs are kept sorted by ID ahead of the rest.
    pub fn set_attribute(&mut self, element_index: usize, attr: Attribute) -> Result<()> {
        let new_id = self.resource_id(attr.name);
        let map = self.resource_map().to_vec();
        let id_of = |a: &Attribute| map.get(a.name as usize).copied().filter(|id| *id != 0);

        let element = self
            .element_mut(element_index)
            .ok_or(Error::NotAnElement(element_index))?;

        if let Some(existing) = element
            .attributes
            .iter_mut()
            .find(|a| a.name == attr.name && a.ns == attr.ns)
        {
            *existing = attr;
            return Ok(());
        }

        let position = match new_id {
            Some(new_id) => element
                .attributes
                .iter()
                .position(|a| id_of(a).is_none_or(|id| id > new_id))
                .unwrap_or(element.attributes.len()),
            None => element.attributes.len(),
        };

        element.insert_attribute(position, attr);

        Ok(())
    }

    /// Remove every attribute bound to `res_id` from every element. Returns
    /// the number of attributes removed.
    pub fn remove_attributes_by_id(&mut self, res_id: u32) -> usize {
        let map = self.resource_map().to_vec();
        let mut count = 0;

        for chunk in &mut self.chunks {
            let Chunk::StartElement(element) = chunk else {
                continue;
            };

            while let Some(position) = element
                .attributes
                .iter()
                .position(|a| map.get(a.name as usize) == Some(&res_id))
            {
                element.remove_attribute(position);
                count += 1;
            }
        }

        count
    }

    /// Find the end element matching the start element at `start`.
    pub fn subtree_end(&self, start: usize) -> Result<usize> {
        let mut depth = 0usize;

        for (i, chunk) in self.chunks.iter().enumerate().skip(start) {
            match chunk {
                Chunk::StartElement(_) => depth += 1,
                Chunk::EndElement(_) => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or(Error::UnbalancedElement(start))?;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }

        Err(Error::UnbalancedElement(start))
    }

    /// Remove the element at `start` along with all of its children.
    pub fn remove_subtree(&mut self, start: usize) -> Result<()> {
        let end = self.subtree_end(start)?;
        self.chunks.drain(start..=end);
        Ok(())
    }

    /// Insert a childless element before chunk `index`.
    pub fn insert_element(&mut self, index: usize, element: StartElement) {
        let end = EndElement {
            line: element.line,
            comment: NO_INDEX,
            ns: element.ns,
            name: element.name,
        };

        self.chunks.insert(index, Chunk::EndElement(end));
        self.chunks.insert(index, Chunk::StartElement(element));
    }

    fn prefix_for(&self, uri: u32) -> Option<&str> {
        self.chunks.iter().find_map(|c| match c {
            Chunk::StartNamespace(ns) if ns.uri == uri => self.pool.get(ns.prefix),
            _ => None,
        })
    }

    fn format_value(&self, attr: &Attribute) -> String {
        match attr.value.data_type {
            TYPE_STRING => format!("{:?}", self.pool.get(attr.value.data).unwrap_or_default()),
            TYPE_INT_DEC => format!("{}", attr.value.data as i32),
            TYPE_INT_HEX => format!("{:#x}", attr.value.data),
            TYPE_INT_BOOLEAN => format!("{}", attr.value.data != 0),
            TYPE_REFERENCE => format!("@{:#010x}", attr.value.data),
            t => format!("({t:#04x}){:#010x}", attr.value.data),
        }
    }
}

/// Indented XML-like rendering of the element tree for debugging.
impl fmt::Display for AxmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;

        for chunk in &self.chunks {
            match chunk {
                Chunk::StartElement(e) => {
                    write!(
                        f,
                        "{:indent$}<{}",
                        "",
                        self.pool.get(e.name).unwrap_or("?"),
                        indent = depth * 2,
                    )?;

                    for attr in &e.attributes {
                        write!(f, " ")?;
                        if let Some(prefix) = self.prefix_for(attr.ns) {
                            write!(f, "{prefix}:")?;
                        }
                        write!(
                            f,
                            "{}={}",
                            self.pool.get(attr.name).unwrap_or("?"),
                            self.format_value(attr),
                        )?;
                    }

                    writeln!(f, ">")?;
                    depth += 1;
                }
                Chunk::EndElement(e) => {
                    depth = depth.saturating_sub(1);
                    writeln!(
                        f,
                        "{:indent$}</{}>",
                        "",
                        self.pool.get(e.name).unwrap_or("?"),
                        indent = depth * 2,
                    )?;
                }
                Chunk::Cdata(c) => {
                    writeln!(
                        f,
                        "{:indent$}{:?}",
                        "",
                        self.pool.get(c.data).unwrap_or_default(),
                        indent = depth * 2,
                    )?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}
