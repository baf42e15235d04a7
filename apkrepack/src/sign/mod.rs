// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Seek, Write},
    path::Path,
    sync::atomic::AtomicBool,
};

use rsa::RsaPrivateKey;
use thiserror::Error;
use tracing::{debug, info};
use x509_cert::Certificate;

use crate::{
    crypto::{self, PassphraseSource},
    format::{
        jar,
        zip::{self, CompressionMethod, LOCAL_HEADER_SIZE, ZipEntry, ZipReader, ZipWriter},
    },
    stream,
};

pub mod digest;
pub mod v1;
pub mod v2;

pub const DEFAULT_ALIAS: &str = "CERT";

const MAX_ALIAS_LEN: usize = 8;

/// Debug credential used when no keystore is configured.
const DEBUG_KEYSTORE: &str = include_str!("../../assets/debug.pem");

#[derive(Debug, Error)]
pub enum Error {
    #[error("No signature schemes are enabled")]
    NoSchemes,
    #[error("Certificate does not match the private key")]
    KeyCertMismatch,
    #[error("Entry {name:?}: Stored data at offset {offset} is not 4-byte aligned")]
    Misaligned { name: String, offset: u64 },
    #[error("Archive layout does not match its data")]
    InvalidLayout,
    #[error("Zip error")]
    Zip(#[from] zip::Error),
    #[error("JAR manifest error")]
    Jar(#[from] jar::Error),
    #[error("Crypto error")]
    Crypto(#[from] crypto::Error),
    #[error("Failed to read signing data: {0}")]
    DataRead(&'static str, #[source] io::Error),
    #[error("Failed to write signed archive: {0}")]
    DataWrite(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Whether an entry is part of a JAR signature and must be replaced when
/// re-signing.
pub fn is_signature_entry(name: &str) -> bool {
    let Some(file_name) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file_name.contains('/') {
        return false;
    }

    let upper = file_name.to_ascii_uppercase();

    upper == "MANIFEST.MF"
        || upper.starts_with("SIG-")
        || [".SF", ".RSA", ".DSA", ".EC"]
            .iter()
            .any(|ext| upper.ends_with(ext))
}

/// Turn a keystore alias into a signature file base name: uppercase ASCII
/// alphanumerics, `-`, and `_`, truncated to 8 characters.
fn sanitize_alias(alias: &str) -> String {
    let name = alias
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_ALIAS_LEN)
        .map(|c| c.to_ascii_uppercase())
        .collect::<String>();

    if name.is_empty() {
        DEFAULT_ALIAS.to_owned()
    } else {
        name
    }
}

/// A certificate and its matching private key.
pub struct Credential {
    pub cert: Certificate,
    pub key: RsaPrivateKey,
    alias: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.cert.tbs_certificate.subject.to_string())
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn new(cert: Certificate, key: RsaPrivateKey, alias: &str) -> Result<Self> {
        if !crypto::cert_matches_key(&cert, &key)? {
            return Err(Error::KeyCertMismatch);
        }

        Ok(Self {
            cert,
            key,
            alias: sanitize_alias(alias),
        })
    }

    /// Load a credential from a PEM keystore file.
    pub fn load(path: &Path, source: &PassphraseSource, alias: &str) -> Result<Self> {
        let (cert, key) = crypto::read_pem_keystore_file(path, source)?;

        Self::new(cert, key, alias)
    }

    /// The embedded debug credential. Archives signed with it are only
    /// suitable for local testing.
    pub fn debug() -> Result<Self> {
        let (cert, key) = crypto::read_pem_keystore(
            Path::new("<debug>"),
            DEBUG_KEYSTORE.as_bytes(),
            // The embedded key is unencrypted.
            &PassphraseSource::Prompt(String::new()),
        )?;

        Self::new(cert, key, DEFAULT_ALIAS)
    }

    /// Base name of the signature files under `META-INF/`.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignOptions {
    pub v1: bool,
    pub v2: bool,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self { v1: true, v2: true }
    }
}

/// Check that every stored entry's data would land on a 4-byte boundary when
/// the entries are written back to back starting at offset 0.
fn check_alignment(entries: &[ZipEntry]) -> Result<()> {
    let mut offset = 0u64;

    for entry in entries {
        let data_offset = offset + (LOCAL_HEADER_SIZE + entry.name.len() + entry.extra.len()) as u64;

        if entry.method == CompressionMethod::Stored && data_offset % 4 != 0 {
            return Err(Error::Misaligned {
                name: entry.name.clone(),
                offset: data_offset,
            });
        }

        offset += entry.local_size();
    }

    Ok(())
}

/// Sign an aligned archive. Existing JAR signature entries are dropped. The
/// v1 signature entries are appended after all other entries so that the
/// existing entries keep their offsets. Returns the v2 content digest if v2
/// signing is enabled.
pub fn sign_archive(
    reader: impl Read + Seek,
    writer: impl Write,
    credential: &Credential,
    options: SignOptions,
    cancel_signal: &AtomicBool,
) -> Result<Option<[u8; 32]>> {
    if !options.v1 && !options.v2 {
        return Err(Error::NoSchemes);
    }

    let mut zip_reader = ZipReader::new(reader)?;
    let central_entries = zip_reader.entries().to_vec();
    let mut entries = Vec::with_capacity(central_entries.len() + 3);

    for central in &central_entries {
        stream::check_cancel(cancel_signal).map_err(|e| Error::DataRead("entry", e))?;

        if is_signature_entry(&central.name) {
            debug!("Dropping existing signature entry: {:?}", central.name);
            continue;
        }

        entries.push(zip_reader.read_entry(central)?);
    }

    check_alignment(&entries)?;

    if options.v1 {
        let files = v1::sign(&entries, credential, options.v2, cancel_signal)?;
        entries.extend(files.into_entries());
    }

    let mut zip_writer = ZipWriter::new(Vec::new());
    for entry in &entries {
        zip_writer.write_entry(entry)?;
    }
    let (archive, layout) = zip_writer.finish()?;

    let content_digest = if options.v2 {
        Some(v2::write_signed(
            &archive,
            &layout,
            credential,
            writer,
            cancel_signal,
        )?)
    } else {
        let mut writer = writer;
        writer
            .write_all(&archive)
            .map_err(|e| Error::DataWrite("archive", e))?;
        None
    };

    info!(
        "Signed {} entries (v1: {}, v2: {})",
        layout.entry_count, options.v1, options.v2,
    );

    Ok(content_digest)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn signature_entries() {
        assert!(is_signature_entry("META-INF/MANIFEST.MF"));
        assert!(is_signature_entry("META-INF/CERT.SF"));
        assert!(is_signature_entry("META-INF/cert.rsa"));
        assert!(is_signature_entry("META-INF/KEY.EC"));
        assert!(is_signature_entry("META-INF/SIG-FOO"));
        assert!(!is_signature_entry("META-INF/services/foo.SF"));
        assert!(!is_signature_entry("META-INF/LICENSE"));
        assert!(!is_signature_entry("assets/CERT.SF"));
    }

    #[test]
    fn alias_names() {
        assert_eq!(sanitize_alias("release"), "RELEASE");
        assert_eq!(sanitize_alias("my.long alias name"), "MYLONGAL");
        assert_eq!(sanitize_alias("..."), DEFAULT_ALIAS);
    }

    #[test]
    fn reject_mismatched_key() {
        let debug = Credential::debug().unwrap();
        let other = crypto::generate_rsa_key_pair(2048).unwrap();

        assert_matches!(
            Credential::new(debug.cert, other, "x"),
            Err(Error::KeyCertMismatch)
        );
    }

    #[test]
    fn reject_misaligned() {
        let credential = Credential::debug().unwrap();
        let cancel_signal = AtomicBool::new(false);

        // Data offset is 30 + 1 = 31.
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .write_entry(&ZipEntry::stored("a", b"data".to_vec()))
            .unwrap();
        let (archive, _) = writer.finish().unwrap();

        assert_matches!(
            sign_archive(
                Cursor::new(archive),
                Vec::new(),
                &credential,
                SignOptions::default(),
                &cancel_signal,
            ),
            Err(Error::Misaligned { offset: 31, .. })
        );
    }

    #[test]
    fn resign_replaces_signature() {
        let credential = Credential::debug().unwrap();
        let cancel_signal = AtomicBool::new(false);

        let mut writer = ZipWriter::new(Vec::new());
        writer
            .write_entry(&ZipEntry::deflated("classes.dex", b"dex").unwrap())
            .unwrap();
        let (archive, _) = writer.finish().unwrap();

        let mut first = vec![];
        sign_archive(
            Cursor::new(archive),
            &mut first,
            &credential,
            SignOptions::default(),
            &cancel_signal,
        )
        .unwrap();

        let mut second = vec![];
        sign_archive(
            Cursor::new(&first),
            &mut second,
            &credential,
            SignOptions::default(),
            &cancel_signal,
        )
        .unwrap();

        assert_eq!(first, second);

        let reader = ZipReader::new(Cursor::new(&second)).unwrap();
        let names = reader
            .entries()
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "classes.dex",
                "META-INF/MANIFEST.MF",
                "META-INF/CERT.SF",
                "META-INF/CERT.RSA",
            ],
        );
    }

    #[test]
    fn no_schemes() {
        let credential = Credential::debug().unwrap();
        let cancel_signal = AtomicBool::new(false);

        assert_matches!(
            sign_archive(
                Cursor::new(vec![]),
                Vec::new(),
                &credential,
                SignOptions {
                    v1: false,
                    v2: false,
                },
                &cancel_signal,
            ),
            Err(Error::NoSchemes)
        );
    }
}
