// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Minimal non-zip64 ZIP container support. Entries are kept as the exact
//! bytes stored in the container so that they can be moved between archives
//! without being recompressed.

use std::{
    borrow::Cow,
    fmt,
    io::{self, Read, Seek, SeekFrom, Write},
    mem,
};

use bitflags::bitflags;
use flate2::{Compression, read::DeflateDecoder, write::DeflateEncoder};
use memchr::memmem;
use thiserror::Error;
use tracing::trace;
use zerocopy::{FromBytes, IntoBytes, byteorder::little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::stream::{CountingWriter, ReadFixedSizeExt};

/// Magic value for [`RawLocalHeader::magic`].
pub const LOCAL_HEADER_MAGIC: u32 = 0x04034b50;
/// Magic value for [`RawCentralHeader::magic`].
pub const CENTRAL_HEADER_MAGIC: u32 = 0x02014b50;
/// Magic value for [`RawEocd::magic`].
pub const EOCD_MAGIC: u32 = 0x06054b50;
/// Magic value of the zip64 EOCD locator that precedes the EOCD.
pub const ZIP64_EOCD_LOCATOR_MAGIC: u32 = 0x07064b50;

pub const LOCAL_HEADER_SIZE: usize = mem::size_of::<RawLocalHeader>();
pub const CENTRAL_HEADER_SIZE: usize = mem::size_of::<RawCentralHeader>();
pub const EOCD_SIZE: usize = mem::size_of::<RawEocd>();
const ZIP64_EOCD_LOCATOR_SIZE: usize = 20;

/// Offset of [`RawEocd::cd_offset`] within the EOCD record.
pub const EOCD_CD_OFFSET_FIELD: usize = 16;

/// 1980-01-01, the earliest date representable in DOS format.
const DOS_DATE: u16 = (1 << 5) | 1;
const DOS_TIME: u16 = 0;

const VERSION_STORED: u16 = 10;
const VERSION_DEFLATED: u16 = 20;

const MAX_COMMENT_SIZE: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Archive is too small to contain EOCD: {0} bytes")]
    ArchiveTooSmall(u64),
    #[error("Cannot find EOCD magic")]
    EocdNotFound,
    #[error("Zip64 archives are not supported")]
    Zip64Unsupported,
    #[error("Multi-disk archives are not supported")]
    MultiDiskUnsupported,
    #[error("Central directory ({offset}, {size}) overlaps EOCD at {eocd_offset}")]
    CentralDirectoryOutOfBounds {
        offset: u64,
        size: u64,
        eocd_offset: u64,
    },
    #[error("Entry #{index}: Invalid central header magic: {magic:#010x}")]
    InvalidCentralMagic { index: usize, magic: u32 },
    #[error("Entry {name:?}: Invalid local header magic: {magic:#010x}")]
    InvalidLocalMagic { name: String, magic: u32 },
    #[error("Entry #{index}: Name is not valid UTF-8")]
    InvalidName {
        index: usize,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("Entry {name:?}: Encrypted entries are not supported")]
    EncryptedEntry { name: String },
    #[error("Entry {name:?}: Unsupported compression method: {method}")]
    UnsupportedMethod { name: String, method: u16 },
    #[error("Entry {name:?}: Expected CRC32 {expected:08x}, but have {actual:08x}")]
    MismatchedCrc32 {
        name: String,
        expected: u32,
        actual: u32,
    },
    #[error("Entry {name:?}: Expected {expected} uncompressed bytes, but have {actual}")]
    MismatchedSize {
        name: String,
        expected: u64,
        actual: u64,
    },
    #[error("Entry {0:?}: Name or extra field exceeds 65535 bytes")]
    FieldTooLong(String),
    #[error("Entry {0:?}: Too large for a non-zip64 archive")]
    EntryTooLarge(String),
    #[error("Too many entries for a non-zip64 archive: {0}")]
    TooManyEntries(usize),
    #[error("Archive exceeds the non-zip64 size limit")]
    ArchiveTooLarge,
    #[error("Failed to read zip data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write zip data: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

bitflags! {
    /// General purpose bit flags shared by the local and central headers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GeneralPurposeFlags: u16 {
        const ENCRYPTED = 1 << 0;
        const UTF8 = 1 << 11;

        const _ = !0;
    }
}

/// Raw on-disk layout for the local file header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawLocalHeader {
    /// Magic value. This should be equal to [`LOCAL_HEADER_MAGIC`].
    magic: little_endian::U32,
    version_needed: little_endian::U16,
    flags: little_endian::U16,
    method: little_endian::U16,
    mod_time: little_endian::U16,
    mod_date: little_endian::U16,
    crc32: little_endian::U32,
    compressed_size: little_endian::U32,
    uncompressed_size: little_endian::U32,
    name_len: little_endian::U16,
    extra_len: little_endian::U16,
}

/// Raw on-disk layout for the central directory file header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawCentralHeader {
    /// Magic value. This should be equal to [`CENTRAL_HEADER_MAGIC`].
    magic: little_endian::U32,
    version_made_by: little_endian::U16,
    version_needed: little_endian::U16,
    flags: little_endian::U16,
    method: little_endian::U16,
    mod_time: little_endian::U16,
    mod_date: little_endian::U16,
    crc32: little_endian::U32,
    compressed_size: little_endian::U32,
    uncompressed_size: little_endian::U32,
    name_len: little_endian::U16,
    extra_len: little_endian::U16,
    comment_len: little_endian::U16,
    disk_start: little_endian::U16,
    internal_attrs: little_endian::U16,
    external_attrs: little_endian::U32,
    local_header_offset: little_endian::U32,
}

/// Raw on-disk layout for the end of central directory record.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawEocd {
    /// Magic value. This should be equal to [`EOCD_MAGIC`].
    magic: little_endian::U32,
    disk_number: little_endian::U16,
    cd_disk: little_endian::U16,
    disk_entries: little_endian::U16,
    total_entries: little_endian::U16,
    cd_size: little_endian::U32,
    cd_offset: little_endian::U32,
    comment_len: little_endian::U16,
}

impl fmt::Debug for RawEocd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawEocd")
            .field("magic", &format_args!("{:#010x}", self.magic.get()))
            .field("disk_number", &self.disk_number.get())
            .field("cd_disk", &self.cd_disk.get())
            .field("disk_entries", &self.disk_entries.get())
            .field("total_entries", &self.total_entries.get())
            .field("cd_size", &self.cd_size.get())
            .field("cd_offset", &self.cd_offset.get())
            .field("comment_len", &self.comment_len.get())
            .finish()
    }
}

impl RawEocd {
    fn validate(&self) -> Result<()> {
        if self.disk_number.get() != 0
            || self.cd_disk.get() != 0
            || self.disk_entries.get() != self.total_entries.get()
        {
            return Err(Error::MultiDiskUnsupported);
        }

        if self.total_entries.get() == u16::MAX
            || self.cd_size.get() == u32::MAX
            || self.cd_offset.get() == u32::MAX
        {
            return Err(Error::Zip64Unsupported);
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    pub fn from_raw(method: u16) -> Option<Self> {
        match method {
            0 => Some(Self::Stored),
            8 => Some(Self::Deflated),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflated => 8,
        }
    }

    fn version_needed(self) -> u16 {
        match self {
            Self::Stored => VERSION_STORED,
            Self::Deflated => VERSION_DEFLATED,
        }
    }
}

/// An entry with its payload exactly as stored in the container. For
/// [`CompressionMethod::Deflated`] entries, `data` is raw deflate data.
#[derive(Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub method: CompressionMethod,
    pub crc32: u32,
    pub uncompressed_size: u64,
    pub extra: Vec<u8>,
    pub data: Vec<u8>,
}

impl fmt::Debug for ZipEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipEntry")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("crc32", &format_args!("{:08x}", self.crc32))
            .field("uncompressed_size", &self.uncompressed_size)
            .field("extra", &hex::encode(&self.extra))
            .field("data", &crate::util::NumBytes(self.data.len()))
            .finish()
    }
}

impl ZipEntry {
    /// Create an uncompressed entry. The CRC32 is computed from `data`.
    pub fn stored(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            method: CompressionMethod::Stored,
            crc32: crc32fast::hash(&data),
            uncompressed_size: data.len() as u64,
            extra: vec![],
            data,
        }
    }

    /// Create a deflate-compressed entry.
    pub fn deflated(name: impl Into<String>, data: &[u8]) -> io::Result<Self> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;

        Ok(Self {
            name: name.into(),
            method: CompressionMethod::Deflated,
            crc32: crc32fast::hash(data),
            uncompressed_size: data.len() as u64,
            extra: vec![],
            data: compressed,
        })
    }

    /// Create a deflate-compressed entry, falling back to storing the data
    /// as-is if compression does not make it smaller.
    pub fn compressed(name: impl Into<String>, data: Vec<u8>) -> io::Result<Self> {
        let name = name.into();
        let entry = Self::deflated(name.clone(), &data)?;

        if entry.data.len() < data.len() {
            Ok(entry)
        } else {
            Ok(Self::stored(name, data))
        }
    }

    pub fn compressed_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Number of bytes this entry occupies in the local section of the
    /// archive.
    pub fn local_size(&self) -> u64 {
        (LOCAL_HEADER_SIZE + self.name.len() + self.extra.len()) as u64 + self.compressed_size()
    }

    /// Get the uncompressed contents, verifying the size and CRC32.
    pub fn uncompressed_data(&self) -> Result<Cow<'_, [u8]>> {
        let data = match self.method {
            CompressionMethod::Stored => Cow::Borrowed(self.data.as_slice()),
            CompressionMethod::Deflated => {
                let mut decoder = DeflateDecoder::new(self.data.as_slice());
                let mut buf = Vec::with_capacity(self.uncompressed_size.min(1 << 26) as usize);
                decoder
                    .read_to_end(&mut buf)
                    .map_err(|e| Error::DataRead("inflate", e))?;
                Cow::Owned(buf)
            }
        };

        if data.len() as u64 != self.uncompressed_size {
            return Err(Error::MismatchedSize {
                name: self.name.clone(),
                expected: self.uncompressed_size,
                actual: data.len() as u64,
            });
        }

        let actual = crc32fast::hash(&data);
        if actual != self.crc32 {
            return Err(Error::MismatchedCrc32 {
                name: self.name.clone(),
                expected: self.crc32,
                actual,
            });
        }

        Ok(data)
    }

    /// Convert to a stored entry, inflating the data if needed. The extra
    /// field is dropped.
    pub fn into_stored(self) -> Result<Self> {
        match self.method {
            CompressionMethod::Stored => Ok(Self {
                extra: vec![],
                ..self
            }),
            CompressionMethod::Deflated => {
                let data = self.uncompressed_data()?.into_owned();
                Ok(Self::stored(self.name, data))
            }
        }
    }
}

/// An entry record from the central directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralEntry {
    pub name: String,
    pub method: CompressionMethod,
    pub flags: GeneralPurposeFlags,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub extra: Vec<u8>,
}

impl CentralEntry {
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Location of the archive's trailing structures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipLayout {
    pub cd_offset: u64,
    pub cd_size: u64,
    pub eocd_offset: u64,
    pub entry_count: usize,
}

/// Reader for a non-zip64 archive. Only the central directory is loaded
/// upfront. Entry payloads are read on demand.
#[derive(Debug)]
pub struct ZipReader<R> {
    reader: R,
    entries: Vec<CentralEntry>,
    layout: ZipLayout,
}

impl<R: Read + Seek> ZipReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let file_size = reader
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::DataRead("file_size", e))?;
        if file_size < EOCD_SIZE as u64 {
            return Err(Error::ArchiveTooSmall(file_size));
        }

        let tail_size = file_size.min((EOCD_SIZE + MAX_COMMENT_SIZE) as u64);
        let tail_offset = file_size - tail_size;
        reader
            .seek(SeekFrom::Start(tail_offset))
            .map_err(|e| Error::DataRead("eocd_search", e))?;
        let tail = reader
            .read_vec_exact(tail_size as usize)
            .map_err(|e| Error::DataRead("eocd_search", e))?;

        // The comment length must account for every byte after the record,
        // which rejects magic bytes that happen to appear inside a comment.
        let (eocd_pos, eocd) = memmem::rfind_iter(&tail, &EOCD_MAGIC.to_le_bytes())
            .filter_map(|pos| {
                let raw = RawEocd::read_from_bytes(tail.get(pos..pos + EOCD_SIZE)?).ok()?;
                let end = pos + EOCD_SIZE + usize::from(raw.comment_len.get());
                (end == tail.len()).then_some((pos, raw))
            })
            .next()
            .ok_or(Error::EocdNotFound)?;

        trace!("Found EOCD: {eocd:?}");

        eocd.validate()?;

        let eocd_offset = tail_offset + eocd_pos as u64;

        if eocd_offset >= ZIP64_EOCD_LOCATOR_SIZE as u64 {
            reader
                .seek(SeekFrom::Start(eocd_offset - ZIP64_EOCD_LOCATOR_SIZE as u64))
                .map_err(|e| Error::DataRead("zip64_locator", e))?;
            let magic = reader
                .read_array_exact::<4>()
                .map_err(|e| Error::DataRead("zip64_locator", e))?;
            if u32::from_le_bytes(magic) == ZIP64_EOCD_LOCATOR_MAGIC {
                return Err(Error::Zip64Unsupported);
            }
        }

        let cd_offset = u64::from(eocd.cd_offset.get());
        let cd_size = u64::from(eocd.cd_size.get());
        if cd_offset + cd_size > eocd_offset {
            return Err(Error::CentralDirectoryOutOfBounds {
                offset: cd_offset,
                size: cd_size,
                eocd_offset,
            });
        }

        reader
            .seek(SeekFrom::Start(cd_offset))
            .map_err(|e| Error::DataRead("central_directory", e))?;
        let cd = reader
            .read_vec_exact(cd_size as usize)
            .map_err(|e| Error::DataRead("central_directory", e))?;

        let entry_count = usize::from(eocd.total_entries.get());
        let entries = parse_central_directory(&cd, entry_count)?;

        let layout = ZipLayout {
            cd_offset,
            cd_size,
            eocd_offset,
            entry_count,
        };

        Ok(Self {
            reader,
            entries,
            layout,
        })
    }

    pub fn entries(&self) -> &[CentralEntry] {
        &self.entries
    }

    pub fn layout(&self) -> &ZipLayout {
        &self.layout
    }

    pub fn find(&self, name: &str) -> Option<&CentralEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_local_header(&mut self, entry: &CentralEntry) -> Result<(RawLocalHeader, Vec<u8>)> {
        self.reader
            .seek(SeekFrom::Start(entry.local_header_offset))
            .map_err(|e| Error::DataRead("local_header", e))?;

        let header = RawLocalHeader::read_from_io(&mut self.reader)
            .map_err(|e| Error::DataRead("local_header", e))?;
        if header.magic.get() != LOCAL_HEADER_MAGIC {
            return Err(Error::InvalidLocalMagic {
                name: entry.name.clone(),
                magic: header.magic.get(),
            });
        }

        // The local name is not trusted. Only its length matters.
        self.reader
            .seek(SeekFrom::Current(i64::from(header.name_len.get())))
            .map_err(|e| Error::DataRead("local_name", e))?;
        let extra = self
            .reader
            .read_vec_exact(header.extra_len.get().into())
            .map_err(|e| Error::DataRead("local_extra", e))?;

        Ok((header, extra))
    }

    /// Get the offset of the entry's payload, as determined by its local
    /// header.
    pub fn data_offset(&mut self, entry: &CentralEntry) -> Result<u64> {
        let (header, _) = self.read_local_header(entry)?;

        Ok(entry.local_header_offset
            + LOCAL_HEADER_SIZE as u64
            + u64::from(header.name_len.get())
            + u64::from(header.extra_len.get()))
    }

    /// Read an entry with its raw payload. The extra field comes from the
    /// local header since that is what determines the payload offset.
    pub fn read_entry(&mut self, entry: &CentralEntry) -> Result<ZipEntry> {
        let (_, extra) = self.read_local_header(entry)?;
        let data = self
            .reader
            .read_vec_exact(entry.compressed_size as usize)
            .map_err(|e| Error::DataRead("entry_data", e))?;

        Ok(ZipEntry {
            name: entry.name.clone(),
            method: entry.method,
            crc32: entry.crc32,
            uncompressed_size: entry.uncompressed_size,
            extra,
            data,
        })
    }

    /// Read and decompress an entry's contents, verifying the CRC32.
    pub fn read_data(&mut self, entry: &CentralEntry) -> Result<Vec<u8>> {
        let entry = self.read_entry(entry)?;
        let data = entry.uncompressed_data()?.into_owned();

        Ok(data)
    }
}

fn parse_central_directory(cd: &[u8], entry_count: usize) -> Result<Vec<CentralEntry>> {
    let mut entries = Vec::with_capacity(entry_count);
    let mut remain = cd;

    for index in 0..entry_count {
        let (header, rest) = RawCentralHeader::read_from_prefix(remain).map_err(|_| {
            Error::DataRead(
                "central_header",
                io::Error::from(io::ErrorKind::UnexpectedEof),
            )
        })?;

        if header.magic.get() != CENTRAL_HEADER_MAGIC {
            return Err(Error::InvalidCentralMagic {
                index,
                magic: header.magic.get(),
            });
        }

        let name_len = usize::from(header.name_len.get());
        let extra_len = usize::from(header.extra_len.get());
        let comment_len = usize::from(header.comment_len.get());
        let var_len = name_len + extra_len + comment_len;

        if rest.len() < var_len {
            return Err(Error::DataRead(
                "central_fields",
                io::Error::from(io::ErrorKind::UnexpectedEof),
            ));
        }

        let name = String::from_utf8(rest[..name_len].to_vec())
            .map_err(|source| Error::InvalidName { index, source })?;
        let extra = rest[name_len..name_len + extra_len].to_vec();
        let flags = GeneralPurposeFlags::from_bits_retain(header.flags.get());

        if flags.contains(GeneralPurposeFlags::ENCRYPTED) {
            return Err(Error::EncryptedEntry { name });
        }

        let method = CompressionMethod::from_raw(header.method.get()).ok_or_else(|| {
            Error::UnsupportedMethod {
                name: name.clone(),
                method: header.method.get(),
            }
        })?;

        if header.compressed_size.get() == u32::MAX
            || header.uncompressed_size.get() == u32::MAX
            || header.local_header_offset.get() == u32::MAX
        {
            return Err(Error::Zip64Unsupported);
        }

        entries.push(CentralEntry {
            name,
            method,
            flags,
            crc32: header.crc32.get(),
            compressed_size: header.compressed_size.get().into(),
            uncompressed_size: header.uncompressed_size.get().into(),
            local_header_offset: header.local_header_offset.get().into(),
            extra,
        });

        remain = &rest[var_len..];
    }

    Ok(entries)
}

/// Record kept for each written entry until the central directory is
/// emitted.
struct WrittenEntry {
    name: String,
    method: CompressionMethod,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    offset: u32,
    flags: GeneralPurposeFlags,
}

/// Writer for a non-zip64 archive. Entries are written in order with fixed
/// timestamps so that identical inputs produce identical archives.
pub struct ZipWriter<W: Write> {
    writer: CountingWriter<W>,
    entries: Vec<WrittenEntry>,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: CountingWriter::new(writer),
            entries: vec![],
        }
    }

    /// Offset where the next local header will be written.
    pub fn offset(&self) -> u64 {
        self.writer.offset()
    }

    /// Write an entry's local header and payload. The payload is written
    /// verbatim. Returns the local header offset.
    pub fn write_entry(&mut self, entry: &ZipEntry) -> Result<u64> {
        let offset = self.writer.offset();

        let name_len =
            u16::try_from(entry.name.len()).map_err(|_| Error::FieldTooLong(entry.name.clone()))?;
        let extra_len = u16::try_from(entry.extra.len())
            .map_err(|_| Error::FieldTooLong(entry.name.clone()))?;
        let compressed_size = u32::try_from(entry.compressed_size())
            .ok()
            .filter(|s| *s != u32::MAX)
            .ok_or_else(|| Error::EntryTooLarge(entry.name.clone()))?;
        let uncompressed_size = u32::try_from(entry.uncompressed_size)
            .ok()
            .filter(|s| *s != u32::MAX)
            .ok_or_else(|| Error::EntryTooLarge(entry.name.clone()))?;
        let offset_u32 = u32::try_from(offset)
            .ok()
            .filter(|o| *o != u32::MAX)
            .ok_or(Error::ArchiveTooLarge)?;

        let flags = if entry.name.is_ascii() {
            GeneralPurposeFlags::empty()
        } else {
            GeneralPurposeFlags::UTF8
        };

        let header = RawLocalHeader {
            magic: LOCAL_HEADER_MAGIC.into(),
            version_needed: entry.method.version_needed().into(),
            flags: flags.bits().into(),
            method: entry.method.to_raw().into(),
            mod_time: DOS_TIME.into(),
            mod_date: DOS_DATE.into(),
            crc32: entry.crc32.into(),
            compressed_size: compressed_size.into(),
            uncompressed_size: uncompressed_size.into(),
            name_len: name_len.into(),
            extra_len: extra_len.into(),
        };

        header
            .write_to_io(&mut self.writer)
            .map_err(|e| Error::DataWrite("local_header", e))?;
        self.writer
            .write_all(entry.name.as_bytes())
            .map_err(|e| Error::DataWrite("local_name", e))?;
        self.writer
            .write_all(&entry.extra)
            .map_err(|e| Error::DataWrite("local_extra", e))?;
        self.writer
            .write_all(&entry.data)
            .map_err(|e| Error::DataWrite("entry_data", e))?;

        trace!("Wrote {:?} at {offset}", entry.name);

        self.entries.push(WrittenEntry {
            name: entry.name.clone(),
            method: entry.method,
            crc32: entry.crc32,
            compressed_size,
            uncompressed_size,
            offset: offset_u32,
            flags,
        });

        Ok(offset)
    }

    /// Write the central directory and EOCD. The archive has no comment.
    pub fn finish(mut self) -> Result<(W, ZipLayout)> {
        let entry_count = self.entries.len();
        let total_entries =
            u16::try_from(entry_count)
                .ok()
                .filter(|n| *n != u16::MAX)
                .ok_or(Error::TooManyEntries(entry_count))?;

        let cd_offset = self.writer.offset();

        for entry in &self.entries {
            let header = RawCentralHeader {
                magic: CENTRAL_HEADER_MAGIC.into(),
                version_made_by: entry.method.version_needed().into(),
                version_needed: entry.method.version_needed().into(),
                flags: entry.flags.bits().into(),
                method: entry.method.to_raw().into(),
                mod_time: DOS_TIME.into(),
                mod_date: DOS_DATE.into(),
                crc32: entry.crc32.into(),
                compressed_size: entry.compressed_size.into(),
                uncompressed_size: entry.uncompressed_size.into(),
                // Checked when the local header was written.
                name_len: (entry.name.len() as u16).into(),
                extra_len: 0.into(),
                comment_len: 0.into(),
                disk_start: 0.into(),
                internal_attrs: 0.into(),
                external_attrs: 0.into(),
                local_header_offset: entry.offset.into(),
            };

            header
                .write_to_io(&mut self.writer)
                .map_err(|e| Error::DataWrite("central_header", e))?;
            self.writer
                .write_all(entry.name.as_bytes())
                .map_err(|e| Error::DataWrite("central_name", e))?;
        }

        let eocd_offset = self.writer.offset();
        let cd_size = eocd_offset - cd_offset;

        let eocd = RawEocd {
            magic: EOCD_MAGIC.into(),
            disk_number: 0.into(),
            cd_disk: 0.into(),
            disk_entries: total_entries.into(),
            total_entries: total_entries.into(),
            cd_size: u32::try_from(cd_size)
                .map_err(|_| Error::ArchiveTooLarge)?
                .into(),
            cd_offset: u32::try_from(cd_offset)
                .map_err(|_| Error::ArchiveTooLarge)?
                .into(),
            comment_len: 0.into(),
        };

        eocd.write_to_io(&mut self.writer)
            .map_err(|e| Error::DataWrite("eocd", e))?;

        let (writer, _) = self.writer.finish();

        let layout = ZipLayout {
            cd_offset,
            cd_size,
            eocd_offset,
            entry_count,
        };

        Ok((writer, layout))
    }
}

/// Overwrite the central directory offset in a raw EOCD record.
pub fn patch_eocd_cd_offset(eocd: &mut [u8], cd_offset: u64) -> Result<()> {
    let cd_offset = u32::try_from(cd_offset).map_err(|_| Error::ArchiveTooLarge)?;
    let field = eocd
        .get_mut(EOCD_CD_OFFSET_FIELD..EOCD_CD_OFFSET_FIELD + 4)
        .ok_or(Error::EocdNotFound)?;
    field.copy_from_slice(&cd_offset.to_le_bytes());

    Ok(())
}
