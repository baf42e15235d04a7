// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Chunked content digest used by APK Signature Scheme v2.

use std::{
    io,
    sync::atomic::AtomicBool,
};

use rayon::{
    iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator},
    slice::ParallelSliceMut,
};
use ring::digest::{Context, SHA256, SHA256_OUTPUT_LEN};

use crate::stream;

pub const CHUNK_SIZE: usize = 1 << 20;

const CHUNK_PREFIX: u8 = 0xa5;
const TOP_LEVEL_PREFIX: u8 = 0x5a;

fn split_chunks<'a>(regions: &[&'a [u8]]) -> Vec<&'a [u8]> {
    regions
        .iter()
        .flat_map(|r| r.chunks(CHUNK_SIZE))
        .collect()
}

/// Digest every 1 MiB chunk of each region. Chunks never span regions. The
/// digests are returned concatenated in chunk order.
pub fn chunk_digests(regions: &[&[u8]], cancel_signal: &AtomicBool) -> io::Result<Vec<u8>> {
    let chunks = split_chunks(regions);
    let mut digests = vec![0u8; chunks.len() * SHA256_OUTPUT_LEN];

    digests
        .par_chunks_exact_mut(SHA256_OUTPUT_LEN)
        .zip(chunks.par_iter())
        .map(|(out, chunk)| -> io::Result<()> {
            stream::check_cancel(cancel_signal)?;

            let mut context = Context::new(&SHA256);
            context.update(&[CHUNK_PREFIX]);
            context.update(&(chunk.len() as u32).to_le_bytes());
            context.update(chunk);
            out.copy_from_slice(context.finish().as_ref());

            Ok(())
        })
        .collect::<io::Result<()>>()?;

    Ok(digests)
}

/// Compute the top-level v2 content digest over the given regions.
pub fn content_digest(regions: &[&[u8]], cancel_signal: &AtomicBool) -> io::Result<[u8; 32]> {
    let digests = chunk_digests(regions, cancel_signal)?;
    let count = digests.len() / SHA256_OUTPUT_LEN;

    let mut context = Context::new(&SHA256);
    context.update(&[TOP_LEVEL_PREFIX]);
    context.update(&(count as u32).to_le_bytes());
    context.update(&digests);

    let mut result = [0u8; 32];
    result.copy_from_slice(context.finish().as_ref());

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use ring::digest;

    use super::*;

    #[test]
    fn chunks_follow_region_boundaries() {
        let a = vec![1u8; CHUNK_SIZE + 10];
        let b = vec![2u8; 5];
        let c: Vec<u8> = vec![];

        let chunks = split_chunks(&[&a, &b, &c]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), 10);
        assert_eq!(chunks[2], &b[..]);
    }

    #[test]
    fn matches_sequential_digest() {
        let data = b"hello".as_slice();
        let cancel_signal = AtomicBool::new(false);

        let mut chunk = vec![CHUNK_PREFIX];
        chunk.extend_from_slice(&5u32.to_le_bytes());
        chunk.extend_from_slice(data);
        let chunk_digest = digest::digest(&SHA256, &chunk);

        let mut top = vec![TOP_LEVEL_PREFIX];
        top.extend_from_slice(&1u32.to_le_bytes());
        top.extend_from_slice(chunk_digest.as_ref());
        let expected = digest::digest(&SHA256, &top);

        let actual = content_digest(&[data], &cancel_signal).unwrap();
        assert_eq!(&actual[..], expected.as_ref());
    }

    #[test]
    fn cancelled() {
        let cancel_signal = AtomicBool::new(false);
        cancel_signal.store(true, Ordering::SeqCst);

        let err = chunk_digests(&[b"data"], &cancel_signal).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
