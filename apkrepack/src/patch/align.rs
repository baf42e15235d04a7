// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! 4-byte alignment of stored entries, compatible with `zipalign -p 4`-style
//! padding via a dedicated extra field.

use std::{
    io::{self, Read, Seek, Write},
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    format::{
        padding,
        zip::{self, CompressionMethod, LOCAL_HEADER_SIZE, ZipEntry, ZipLayout, ZipReader, ZipWriter},
    },
    stream,
};

pub const ALIGNMENT: u64 = 4;

/// Extra field tag used for alignment padding.
pub const PADDING_EXTRA_TAG: u16 = 0xd935;

/// Size of the padding extra field's tag and length.
const PADDING_EXTRA_HEADER_SIZE: u64 = 4;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Entry {name:?}: Stored data at offset {offset} is not {ALIGNMENT}-byte aligned")]
    Misaligned { name: String, offset: u64 },
    #[error("Zip error")]
    Zip(#[from] zip::Error),
    #[error("Failed to read entries: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Build the padding extra field for a stored entry whose local header starts
/// at `header_offset`. The padding is never empty so that the field is
/// always present.
pub fn padding_extra(header_offset: u64, name_len: usize) -> Vec<u8> {
    let predicted = header_offset + LOCAL_HEADER_SIZE as u64 + name_len as u64 + PADDING_EXTRA_HEADER_SIZE;
    let mut padding_len = padding::calc(predicted, ALIGNMENT);
    if padding_len == 0 {
        padding_len = ALIGNMENT;
    }

    let mut extra = Vec::with_capacity((PADDING_EXTRA_HEADER_SIZE + padding_len) as usize);
    extra.extend_from_slice(&PADDING_EXTRA_TAG.to_le_bytes());
    extra.extend_from_slice(&(padding_len as u16).to_le_bytes());
    extra.resize(extra.len() + padding_len as usize, 0);

    extra
}

/// Lay out entries so that every stored entry's data is aligned when the
/// entries are written in order starting at offset 0. The resource table is
/// always stored. Compressed entries keep their payload, but lose their extra
/// field.
pub fn align_entries(
    entries: Vec<ZipEntry>,
    resource_table: &str,
    cancel_signal: &AtomicBool,
) -> Result<Vec<ZipEntry>> {
    let mut result = Vec::with_capacity(entries.len());
    let mut cursor = 0u64;

    for entry in entries {
        stream::check_cancel(cancel_signal).map_err(|e| Error::DataRead("entry", e))?;

        let mut entry = if entry.name == resource_table {
            entry.into_stored()?
        } else {
            entry
        };

        match entry.method {
            CompressionMethod::Stored => {
                entry.extra = padding_extra(cursor, entry.name.len());
                trace!(
                    "Padding {:?} at {cursor} with {} bytes",
                    entry.name,
                    entry.extra.len() as u64 - PADDING_EXTRA_HEADER_SIZE,
                );
            }
            CompressionMethod::Deflated => entry.extra.clear(),
        }

        cursor += entry.local_size();
        result.push(entry);
    }

    Ok(result)
}

/// Rewrite an archive so that every stored entry is aligned.
pub fn align_archive(
    reader: impl Read + Seek,
    writer: impl Write,
    resource_table: &str,
    cancel_signal: &AtomicBool,
) -> Result<ZipLayout> {
    let mut zip_reader = ZipReader::new(reader)?;
    let central_entries = zip_reader.entries().to_vec();
    let mut entries = Vec::with_capacity(central_entries.len());

    for central in &central_entries {
        stream::check_cancel(cancel_signal).map_err(|e| Error::DataRead("entry", e))?;
        entries.push(zip_reader.read_entry(central)?);
    }

    let entries = align_entries(entries, resource_table, cancel_signal)?;

    let mut zip_writer = ZipWriter::new(writer);
    for entry in &entries {
        zip_writer.write_entry(entry)?;
    }
    let (_, layout) = zip_writer.finish()?;

    debug!("Aligned {} entries", layout.entry_count);

    Ok(layout)
}

/// Check that the data of every stored entry starts on an aligned offset.
/// Returns the number of stored entries checked.
pub fn verify_alignment(reader: impl Read + Seek) -> Result<usize> {
    let mut zip_reader = ZipReader::new(reader)?;
    let central_entries = zip_reader.entries().to_vec();
    let mut checked = 0;

    for central in central_entries
        .iter()
        .filter(|e| e.method == CompressionMethod::Stored)
    {
        let offset = zip_reader.data_offset(central)?;
        if offset % ALIGNMENT != 0 {
            return Err(Error::Misaligned {
                name: central.name.clone(),
                offset,
            });
        }

        checked += 1;
    }

    Ok(checked)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn padding_is_never_empty() {
        // 0 + 30 + 2 + 4 = 36, already aligned.
        let extra = padding_extra(0, 2);
        assert_eq!(extra, [0x35, 0xd9, 4, 0, 0, 0, 0, 0]);

        // 0 + 30 + 1 + 4 = 35, needs 1 byte.
        let extra = padding_extra(0, 1);
        assert_eq!(extra, [0x35, 0xd9, 1, 0, 0]);
    }

    #[test]
    fn aligned_offsets() {
        let cancel_signal = AtomicBool::new(false);
        let entries = vec![
            ZipEntry::deflated("resources.arsc", &[7u8; 100]).unwrap(),
            ZipEntry::stored("a", vec![1; 3]),
            ZipEntry::deflated("bb", &[2u8; 50]).unwrap(),
            ZipEntry::stored("ccc", vec![3; 5]),
            ZipEntry::stored("dddd/", vec![]),
        ];

        let aligned = align_entries(entries, "resources.arsc", &cancel_signal).unwrap();
        assert_eq!(aligned[0].method, CompressionMethod::Stored);
        assert_eq!(aligned[0].data, [7u8; 100]);
        assert!(aligned[2].extra.is_empty());

        let mut writer = ZipWriter::new(Vec::new());
        for entry in &aligned {
            writer.write_entry(entry).unwrap();
        }
        let (archive, _) = writer.finish().unwrap();

        assert_eq!(verify_alignment(Cursor::new(&archive)).unwrap(), 4);
    }

    #[test]
    fn detect_misaligned() {
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .write_entry(&ZipEntry::stored("a", b"data".to_vec()))
            .unwrap();
        let (archive, _) = writer.finish().unwrap();

        assert_matches!(
            verify_alignment(Cursor::new(&archive)),
            Err(Error::Misaligned { offset: 31, .. })
        );

        let cancel_signal = AtomicBool::new(false);
        let mut output = vec![];
        align_archive(
            Cursor::new(&archive),
            &mut output,
            "resources.arsc",
            &cancel_signal,
        )
        .unwrap();

        assert_eq!(verify_alignment(Cursor::new(&output)).unwrap(), 1);
    }
}
