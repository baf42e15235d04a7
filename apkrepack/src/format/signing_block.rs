// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! The APK signing block, which sits between the last local entry and the
//! central directory.
//!
//! Layout:
//!
//! ```text
//! u64 size (excluding this field)
//! repeated: u64 pair length, u32 ID, value
//! u64 size (same as above)
//! "APK Sig Block 42"
//! ```

use thiserror::Error;

pub const MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// ID of the APK Signature Scheme v2 pair.
pub const V2_SCHEME_ID: u32 = 0x7109871a;

/// Size of the trailing size field and magic.
pub const FOOTER_SIZE: usize = 8 + MAGIC.len();

#[derive(Debug, Error)]
pub enum Error {
    #[error("Signing block is truncated")]
    Truncated,
    #[error("Invalid signing block magic")]
    InvalidMagic,
    #[error("Leading size {leading} does not match trailing size {trailing}")]
    MismatchedSize { leading: u64, trailing: u64 },
    #[error("Pair #{index}: Invalid length: {length}")]
    InvalidPairLength { index: usize, length: u64 },
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SigningBlock {
    pub pairs: Vec<(u32, Vec<u8>)>,
}

impl SigningBlock {
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, v)| v.as_slice())
    }

    /// Size of the block when serialized.
    pub fn size(&self) -> usize {
        8 + self.pairs.iter().map(|(_, v)| 12 + v.len()).sum::<usize>() + FOOTER_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let total = self.size();
        let inner_size = (total - 8) as u64;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&inner_size.to_le_bytes());

        for (id, value) in &self.pairs {
            buf.extend_from_slice(&(4 + value.len() as u64).to_le_bytes());
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(value);
        }

        buf.extend_from_slice(&inner_size.to_le_bytes());
        buf.extend_from_slice(MAGIC);

        buf
    }

    /// Parse a signing block that ends exactly at the end of `data`. Returns
    /// the block and its starting offset within `data`.
    pub fn parse_trailing(data: &[u8]) -> Result<(usize, Self)> {
        if data.len() < FOOTER_SIZE {
            return Err(Error::Truncated);
        }

        let footer = &data[data.len() - FOOTER_SIZE..];
        if &footer[8..] != MAGIC {
            return Err(Error::InvalidMagic);
        }

        let trailing = read_u64(footer, 0).ok_or(Error::Truncated)?;
        let start = usize::try_from(trailing)
            .ok()
            .and_then(|s| data.len().checked_sub(s))
            .and_then(|s| s.checked_sub(8))
            .ok_or(Error::Truncated)?;

        let leading = read_u64(data, start).ok_or(Error::Truncated)?;
        if leading != trailing {
            return Err(Error::MismatchedSize { leading, trailing });
        }

        let pairs_data = &data[start + 8..data.len() - FOOTER_SIZE];
        let mut pairs = vec![];
        let mut offset = 0;

        while offset < pairs_data.len() {
            let index = pairs.len();
            let length = read_u64(pairs_data, offset).ok_or(Error::Truncated)?;
            let value_end = usize::try_from(length)
                .ok()
                .filter(|l| *l >= 4)
                .and_then(|l| (offset + 8).checked_add(l))
                .filter(|e| *e <= pairs_data.len())
                .ok_or(Error::InvalidPairLength { index, length })?;

            let id_bytes = &pairs_data[offset + 8..offset + 12];
            let id = u32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);
            pairs.push((id, pairs_data[offset + 12..value_end].to_vec()));

            offset = value_end;
        }

        Ok((start, Self { pairs }))
    }
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn layout() {
        let block = SigningBlock {
            pairs: vec![(V2_SCHEME_ID, b"signer".to_vec()), (0x1234, vec![])],
        };
        let data = block.to_bytes();

        assert_eq!(data.len(), block.size());
        assert_eq!(data.len(), 8 + (12 + 6) + 12 + 8 + 16);
        assert_eq!(&data[data.len() - 16..], MAGIC);

        let size = u64::from_le_bytes(data[..8].try_into().unwrap());
        assert_eq!(size as usize, data.len() - 8);
        assert_eq!(&data[8..16], &10u64.to_le_bytes());
        assert_eq!(&data[16..20], &V2_SCHEME_ID.to_le_bytes());

        let mut prefixed = b"entries".to_vec();
        prefixed.extend_from_slice(&data);
        let (start, parsed) = SigningBlock::parse_trailing(&prefixed).unwrap();
        assert_eq!(start, 7);
        assert_eq!(parsed, block);
        assert_eq!(parsed.get(V2_SCHEME_ID), Some(&b"signer"[..]));
    }

    #[test]
    fn reject_corrupt_blocks() {
        let mut data = SigningBlock::default().to_bytes();

        assert_matches!(
            SigningBlock::parse_trailing(&data[1..]),
            Err(Error::Truncated)
        );

        data[0] ^= 1;
        assert_matches!(
            SigningBlock::parse_trailing(&data),
            Err(Error::MismatchedSize { .. })
        );

        let last = data.len() - 1;
        data[last] = b'!';
        assert_matches!(
            SigningBlock::parse_trailing(&data),
            Err(Error::InvalidMagic)
        );
    }
}
