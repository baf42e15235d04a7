// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{io::Cursor, sync::atomic::AtomicBool};

use apkrepack::{
    crypto::{self, PassphraseSource},
    format::{
        signing_block::{SigningBlock, V2_SCHEME_ID},
        zip::{ZipEntry, ZipReader, ZipWriter},
    },
    patch::align,
    pipeline::SigningConfig,
    sign::{self, Credential, SignOptions},
};
use assert_matches::assert_matches;

fn aligned_archive() -> Vec<u8> {
    let cancel_signal = AtomicBool::new(false);
    let entries = align::align_entries(
        vec![
            ZipEntry::stored("resources.arsc", vec![0x55; 33]),
            ZipEntry::deflated("AndroidManifest.xml", &[0x01; 128]).unwrap(),
            ZipEntry::stored("classes.dex", b"dex\n035\0".to_vec()),
            ZipEntry::compressed("assets/www/index.html", b"<html></html>".to_vec()).unwrap(),
        ],
        "resources.arsc",
        &cancel_signal,
    )
    .unwrap();

    let mut writer = ZipWriter::new(Vec::new());
    for entry in &entries {
        writer.write_entry(entry).unwrap();
    }
    writer.finish().unwrap().0
}

fn sign(archive: &[u8], credential: &Credential, options: SignOptions) -> (Vec<u8>, Option<[u8; 32]>) {
    let cancel_signal = AtomicBool::new(false);
    let mut output = vec![];
    let digest = sign::sign_archive(
        Cursor::new(archive),
        &mut output,
        credential,
        options,
        &cancel_signal,
    )
    .unwrap();

    (output, digest)
}

fn read_entry(archive: &[u8], name: &str) -> Vec<u8> {
    let mut reader = ZipReader::new(Cursor::new(archive)).unwrap();
    let entry = reader.find(name).unwrap().clone();
    reader.read_data(&entry).unwrap()
}

#[test]
fn signing_is_deterministic() {
    let credential = Credential::debug().unwrap();
    let archive = aligned_archive();

    let (first, first_digest) = sign(&archive, &credential, SignOptions::default());
    let (second, second_digest) = sign(&archive, &credential, SignOptions::default());

    assert_eq!(first, second);
    assert!(first_digest.is_some());
    assert_eq!(first_digest, second_digest);

    for name in ["META-INF/MANIFEST.MF", "META-INF/CERT.SF", "META-INF/CERT.RSA"] {
        assert_eq!(read_entry(&first, name), read_entry(&second, name));
    }

    align::verify_alignment(Cursor::new(&first)).unwrap();
}

#[test]
fn signature_files() {
    let credential = Credential::debug().unwrap();
    let archive = aligned_archive();

    let (signed, _) = sign(&archive, &credential, SignOptions::default());

    let manifest = String::from_utf8(read_entry(&signed, "META-INF/MANIFEST.MF")).unwrap();
    assert!(manifest.starts_with("Manifest-Version: 1.0\r\n"));
    assert!(manifest.contains("Name: assets/www/index.html\r\nSHA-256-Digest: "));
    assert!(!manifest.contains("META-INF/"));

    let sf = String::from_utf8(read_entry(&signed, "META-INF/CERT.SF")).unwrap();
    assert!(sf.contains("SHA-256-Digest-Manifest: "));
    assert!(sf.contains("X-Android-APK-Signed: 2\r\n"));

    let block = read_entry(&signed, "META-INF/CERT.RSA");
    crypto::parse_cms(&block).unwrap();

    let reader = ZipReader::new(Cursor::new(&signed)).unwrap();
    let cd_offset = reader.layout().cd_offset as usize;
    let (offset, block) = SigningBlock::parse_trailing(&signed[..cd_offset]).unwrap();
    assert_eq!(offset + block.size(), cd_offset);
    assert!(block.get(V2_SCHEME_ID).is_some());
}

#[test]
fn v1_only() {
    let credential = Credential::debug().unwrap();
    let archive = aligned_archive();
    let options = SignOptions { v1: true, v2: false };

    let (signed, digest) = sign(&archive, &credential, options);
    assert_eq!(digest, None);

    let sf = String::from_utf8(read_entry(&signed, "META-INF/CERT.SF")).unwrap();
    assert!(!sf.contains("X-Android-APK-Signed"));

    let reader = ZipReader::new(Cursor::new(&signed)).unwrap();
    let cd_offset = reader.layout().cd_offset as usize;
    assert_matches!(SigningBlock::parse_trailing(&signed[..cd_offset]), Err(_));
}

#[test]
fn keystore_credential() {
    let dir = tempfile::tempdir().unwrap();
    let keystore = dir.path().join("release.pem");
    let pass_file = dir.path().join("pass.txt");
    std::fs::write(&pass_file, "\n").unwrap();

    let debug = Credential::debug().unwrap();
    let source = PassphraseSource::File(pass_file.clone());
    crypto::write_pem_keystore_file(&keystore, &debug.cert, &debug.key, &source).unwrap();

    let config = SigningConfig {
        keystore: Some(keystore),
        alias: Some("release key".to_owned()),
        store_pass: Some(source),
        ..Default::default()
    };
    let credential = config.load_credential(sign::DEFAULT_ALIAS).unwrap();
    assert_eq!(credential.alias(), "RELEASEK");

    let (signed, _) = sign(&aligned_archive(), &credential, SignOptions::default());
    let reader = ZipReader::new(Cursor::new(&signed)).unwrap();
    assert!(reader.find("META-INF/RELEASEK.SF").is_some());
    assert!(reader.find("META-INF/RELEASEK.RSA").is_some());
}
