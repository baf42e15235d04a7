// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! APK Signature Scheme v2. The signing block is inserted between the last
//! local entry and the central directory.

use std::{io::Write, sync::atomic::AtomicBool};

use ring::digest::{self, SHA256};
use tracing::debug;

use crate::{
    crypto,
    format::{
        signing_block::{SigningBlock, V2_SCHEME_ID},
        zip::{self, ZipLayout},
    },
};

use super::{Credential, Error, Result, digest as chunk_digest};

/// RSASSA-PKCS1-v1_5 with SHA-256.
pub const RSA_PKCS1V15_SHA256: u32 = 0x0103;

/// Append `data` with a u32 length prefix.
fn push_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

fn encode_signed_data(content_digest: &[u8], cert_der: &[u8]) -> Vec<u8> {
    let mut digest = RSA_PKCS1V15_SHA256.to_le_bytes().to_vec();
    push_prefixed(&mut digest, content_digest);

    let mut digests = vec![];
    push_prefixed(&mut digests, &digest);

    let mut certs = vec![];
    push_prefixed(&mut certs, cert_der);

    let mut signed_data = vec![];
    push_prefixed(&mut signed_data, &digests);
    push_prefixed(&mut signed_data, &certs);
    // No additional attributes.
    push_prefixed(&mut signed_data, &[]);

    signed_data
}

/// Encode the value of the v2 pair: a sequence containing a single signer.
fn encode_signers(content_digest: &[u8], credential: &Credential) -> Result<Vec<u8>> {
    let cert_der = crypto::cert_to_der(&credential.cert)?;
    let public_key = crypto::public_key_info_der(&credential.cert)?;

    let signed_data = encode_signed_data(content_digest, &cert_der);
    let signed_data_digest = digest::digest(&SHA256, &signed_data);
    let signature_value = crypto::sign_sha256(&credential.key, signed_data_digest.as_ref())?;

    let mut signature = RSA_PKCS1V15_SHA256.to_le_bytes().to_vec();
    push_prefixed(&mut signature, &signature_value);

    let mut signatures = vec![];
    push_prefixed(&mut signatures, &signature);

    let mut signer = vec![];
    push_prefixed(&mut signer, &signed_data);
    push_prefixed(&mut signer, &signatures);
    push_prefixed(&mut signer, &public_key);

    let mut signers = vec![];
    push_prefixed(&mut signers, &signer);

    Ok(signers)
}

/// Write `archive` to `writer` with a v2 signing block inserted before the
/// central directory. `layout` must describe `archive`, which must have no
/// existing signing block. Returns the top-level content digest.
pub fn write_signed(
    archive: &[u8],
    layout: &ZipLayout,
    credential: &Credential,
    mut writer: impl Write,
    cancel_signal: &AtomicBool,
) -> Result<[u8; 32]> {
    let cd_offset = usize::try_from(layout.cd_offset).map_err(|_| Error::InvalidLayout)?;
    let eocd_offset = usize::try_from(layout.eocd_offset).map_err(|_| Error::InvalidLayout)?;
    if cd_offset > eocd_offset || eocd_offset > archive.len() {
        return Err(Error::InvalidLayout);
    }

    let entries = &archive[..cd_offset];
    let cd = &archive[cd_offset..eocd_offset];
    let mut eocd = archive[eocd_offset..].to_vec();

    // The block starts where the central directory currently is, so the EOCD
    // digested here already points at the block's offset.
    let content_digest = chunk_digest::content_digest(&[entries, cd, &eocd[..]], cancel_signal)
        .map_err(|e| Error::DataRead("content_digest", e))?;

    let block = SigningBlock {
        pairs: vec![(V2_SCHEME_ID, encode_signers(&content_digest, credential)?)],
    };
    let block_bytes = block.to_bytes();

    zip::patch_eocd_cd_offset(&mut eocd, (cd_offset + block_bytes.len()) as u64)?;

    debug!(
        "Inserting {} byte signing block at {cd_offset}",
        block_bytes.len(),
    );

    for (name, data) in [
        ("entries", entries),
        ("signing_block", &block_bytes[..]),
        ("central_directory", cd),
        ("eocd", &eocd[..]),
    ] {
        writer
            .write_all(data)
            .map_err(|e| Error::DataWrite(name, e))?;
    }

    Ok(content_digest)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::format::zip::{ZipEntry, ZipReader, ZipWriter};

    use super::*;

    fn read_prefixed(data: &[u8]) -> (&[u8], &[u8]) {
        let len = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
        (&data[4..4 + len], &data[4 + len..])
    }

    #[test]
    fn insert_block() {
        let credential = Credential::debug().unwrap();
        let cancel_signal = AtomicBool::new(false);

        let mut writer = ZipWriter::new(Vec::new());
        writer
            .write_entry(&ZipEntry::stored("a.txt", b"hello".to_vec()))
            .unwrap();
        let (archive, layout) = writer.finish().unwrap();

        let mut output = vec![];
        let content_digest =
            write_signed(&archive, &layout, &credential, &mut output, &cancel_signal).unwrap();

        let cd_offset = layout.cd_offset as usize;
        assert_eq!(&output[..cd_offset], &archive[..cd_offset]);

        // The archive still opens and the EOCD points past the block.
        let reader = ZipReader::new(Cursor::new(&output)).unwrap();
        let new_cd_offset = reader.layout().cd_offset as usize;
        assert!(new_cd_offset > cd_offset);
        assert_eq!(reader.entries()[0].name, "a.txt");

        let (start, block) = SigningBlock::parse_trailing(&output[..new_cd_offset]).unwrap();
        assert_eq!(start, cd_offset);

        // signers -> signer -> signed data -> digests -> digest
        let signers = block.get(V2_SCHEME_ID).unwrap();
        let (signer, _) = read_prefixed(signers);
        let (signed_data, _) = read_prefixed(signer);
        let (digests, _) = read_prefixed(signed_data);
        let (digest, _) = read_prefixed(digests);
        assert_eq!(&digest[..4], &RSA_PKCS1V15_SHA256.to_le_bytes());
        let (value, _) = read_prefixed(&digest[4..]);
        assert_eq!(value, &content_digest);
    }

    #[test]
    fn reject_bad_layout() {
        let credential = Credential::debug().unwrap();
        let cancel_signal = AtomicBool::new(false);
        let layout = ZipLayout {
            cd_offset: 10,
            cd_size: 0,
            eocd_offset: 5,
            entry_count: 0,
        };

        assert!(matches!(
            write_signed(&[0; 32], &layout, &credential, Vec::new(), &cancel_signal),
            Err(Error::InvalidLayout),
        ));
    }
}
