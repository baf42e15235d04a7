// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! JAR signing (APK Signature Scheme v1).

use std::sync::atomic::AtomicBool;

use base64::{Engine, engine::general_purpose::STANDARD};
use ring::digest::{self, SHA256};
use tracing::debug;

use crate::{
    crypto,
    format::{
        jar::{Manifest, Section},
        zip::ZipEntry,
    },
    stream,
};

use super::{Credential, Result};

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

const CREATED_BY: &str = concat!("1.0 (", env!("CARGO_PKG_NAME"), ")");

fn b64_digest(data: &[u8]) -> String {
    STANDARD.encode(digest::digest(&SHA256, data))
}

/// The generated signature entries, in the order they are appended.
#[derive(Clone, Debug)]
pub struct SignatureFiles {
    pub manifest: ZipEntry,
    pub signature_file: ZipEntry,
    pub signature_block: ZipEntry,
}

impl SignatureFiles {
    pub fn into_entries(self) -> [ZipEntry; 3] {
        [self.manifest, self.signature_file, self.signature_block]
    }
}

/// Build the manifest, signature file, and signature block for the given
/// entries. Directory entries and existing signature files are skipped. The
/// entries' contents are verified against their CRC32 while digesting.
pub fn sign(
    entries: &[ZipEntry],
    credential: &Credential,
    v2_enabled: bool,
    cancel_signal: &AtomicBool,
) -> Result<SignatureFiles> {
    let mut sorted = entries
        .iter()
        .filter(|e| !e.is_dir() && !super::is_signature_entry(&e.name))
        .collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut manifest = Manifest::default();
    manifest.main.push("Manifest-Version", "1.0")?;
    manifest.main.push("Created-By", CREATED_BY)?;

    for entry in &sorted {
        stream::check_cancel(cancel_signal).map_err(|e| super::Error::DataRead("entry", e))?;

        let data = entry.uncompressed_data()?;

        let mut section = Section::named(&entry.name)?;
        section.push("SHA-256-Digest", &b64_digest(&data))?;
        manifest.sections.push(section);
    }

    let manifest_bytes = manifest.to_bytes();

    let mut sf = Manifest::default();
    sf.main.push("Signature-Version", "1.0")?;
    sf.main.push("Created-By", CREATED_BY)?;
    sf.main
        .push("SHA-256-Digest-Manifest", &b64_digest(&manifest_bytes))?;
    sf.main.push(
        "SHA-256-Digest-Manifest-Main-Attributes",
        &b64_digest(&manifest.main.to_bytes()),
    )?;
    if v2_enabled {
        sf.main.push("X-Android-APK-Signed", "2")?;
    }

    for (entry, section) in sorted.iter().zip(&manifest.sections) {
        let mut sf_section = Section::named(&entry.name)?;
        sf_section.push("SHA-256-Digest", &b64_digest(&section.to_bytes()))?;
        sf.sections.push(sf_section);
    }

    let sf_bytes = sf.to_bytes();
    let block = crypto::cms_sign_detached(&credential.key, &credential.cert, &sf_bytes)?;

    debug!(
        "Signed {} entries as {}",
        sorted.len(),
        credential.alias(),
    );

    let base = format!("META-INF/{}", credential.alias());

    Ok(SignatureFiles {
        manifest: ZipEntry::deflated(MANIFEST_NAME, &manifest_bytes)
            .map_err(|e| super::Error::DataWrite("manifest", e))?,
        signature_file: ZipEntry::deflated(format!("{base}.SF"), &sf_bytes)
            .map_err(|e| super::Error::DataWrite("signature_file", e))?,
        signature_block: ZipEntry::deflated(format!("{base}.RSA"), &block)
            .map_err(|e| super::Error::DataWrite("signature_block", e))?,
    })
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    fn text(entry: &ZipEntry) -> String {
        let data: Cow<[u8]> = entry.uncompressed_data().unwrap();
        String::from_utf8(data.into_owned()).unwrap()
    }

    #[test]
    fn manifest_and_signature_file() {
        let credential = Credential::debug().unwrap();
        let cancel_signal = AtomicBool::new(false);
        let entries = [
            ZipEntry::stored("b.txt", b"bbb".to_vec()),
            ZipEntry::deflated("a.txt", b"aaa").unwrap(),
            ZipEntry::stored("assets/", vec![]),
            ZipEntry::stored("META-INF/OLD.SF", b"stale".to_vec()),
        ];

        let files = sign(&entries, &credential, true, &cancel_signal).unwrap();

        let manifest = text(&files.manifest);
        let a = manifest.find("Name: a.txt").unwrap();
        let b = manifest.find("Name: b.txt").unwrap();
        assert!(a < b);
        assert!(!manifest.contains("assets/"));
        assert!(!manifest.contains("OLD.SF"));
        assert!(manifest.contains(&format!("SHA-256-Digest: {}\r\n", b64_digest(b"aaa"))));

        let sf = text(&files.signature_file);
        assert!(sf.starts_with("Signature-Version: 1.0\r\n"));
        assert!(sf.contains("X-Android-APK-Signed: 2\r\n"));
        assert!(sf.contains(&format!(
            "SHA-256-Digest-Manifest: {}\r\n",
            b64_digest(manifest.as_bytes()),
        )));

        assert_eq!(files.signature_file.name, "META-INF/CERT.SF");
        assert_eq!(files.signature_block.name, "META-INF/CERT.RSA");
    }

    #[test]
    fn v1_only_omits_v2_marker() {
        let credential = Credential::debug().unwrap();
        let cancel_signal = AtomicBool::new(false);
        let entries = [ZipEntry::stored("a", b"a".to_vec())];

        let files = sign(&entries, &credential, false, &cancel_signal).unwrap();

        assert!(!text(&files.signature_file).contains("X-Android-APK-Signed"));
    }
}
