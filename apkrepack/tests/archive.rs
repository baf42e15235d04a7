// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{Cursor, Read, Write},
    sync::atomic::AtomicBool,
};

use apkrepack::{
    format::zip::{CompressionMethod, ZipEntry, ZipReader, ZipWriter},
    patch::align,
};
use zip::write::SimpleFileOptions;

fn sample_entries() -> Vec<ZipEntry> {
    vec![
        ZipEntry::stored("resources.arsc", vec![0x02; 77]),
        ZipEntry::deflated("AndroidManifest.xml", &[0x03; 300]).unwrap(),
        ZipEntry::stored("res/", vec![]),
        ZipEntry::compressed("assets/www/index.html", b"<html>hi</html>".to_vec()).unwrap(),
        ZipEntry::compressed("assets/www/app.js", "let x = 1;\n".repeat(50).into_bytes())
            .unwrap(),
    ]
}

#[test]
fn written_archive_is_readable_by_zip_crate() {
    let cancel_signal = AtomicBool::new(false);
    let entries = align::align_entries(sample_entries(), "resources.arsc", &cancel_signal).unwrap();

    let mut writer = ZipWriter::new(Vec::new());
    for entry in &entries {
        writer.write_entry(entry).unwrap();
    }
    let (data, _) = writer.finish().unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(&data)).unwrap();
    assert_eq!(archive.len(), entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let mut file = archive.by_index(i).unwrap();
        assert_eq!(file.name(), entry.name);

        let expected_method = match entry.method {
            CompressionMethod::Stored => zip::CompressionMethod::Stored,
            CompressionMethod::Deflated => zip::CompressionMethod::Deflated,
        };
        assert_eq!(file.compression(), expected_method);

        let mut contents = vec![];
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, entry.uncompressed_data().unwrap().as_ref());
    }
}

#[test]
fn reads_archive_from_zip_crate() {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let deflated =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    writer.start_file("classes.dex", stored).unwrap();
    writer.write_all(b"dex\n035\0").unwrap();
    writer.add_directory("lib/", stored).unwrap();
    writer.start_file("assets/www/style.css", deflated).unwrap();
    writer.write_all("body { margin: 0; }\n".repeat(20).as_bytes()).unwrap();
    let data = writer.finish().unwrap().into_inner();

    let mut reader = ZipReader::new(Cursor::new(&data)).unwrap();
    let entries = reader.entries().to_vec();

    let names = entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, ["classes.dex", "lib/", "assets/www/style.css"]);
    assert!(entries[1].is_dir());
    assert_eq!(entries[2].method, CompressionMethod::Deflated);

    assert_eq!(reader.read_data(&entries[0]).unwrap(), b"dex\n035\0");
    assert_eq!(
        reader.read_data(&entries[2]).unwrap(),
        "body { margin: 0; }\n".repeat(20).as_bytes(),
    );
}
