// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Assembly of a new archive from a template archive, a patched manifest, and
//! a project directory.

use std::{
    fs,
    io::{self, Read, Seek, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::{
    format::zip::{self, EOCD_SIZE, ZipEntry, ZipReader, ZipWriter},
    sign, stream,
};

/// Nested archives in the project directory are never packaged.
const NESTED_ARCHIVE_EXTENSIONS: &[&str] = &["apk", "aab", "apks"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Assembled archive is {size} bytes, which is below the minimum of {min_size} bytes")]
    AssemblyTooSmall { size: u64, min_size: u64 },
    #[error("Project path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),
    #[error("Failed to walk project directory: {0:?}")]
    Walk(PathBuf, #[source] walkdir::Error),
    #[error("Failed to read project file: {0:?}")]
    ReadFile(PathBuf, #[source] io::Error),
    #[error("Failed to compress entry: {0:?}")]
    Compress(String, #[source] io::Error),
    #[error("Zip error")]
    Zip(#[from] zip::Error),
    #[error("Failed to read template: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Fixed names and limits used during assembly.
#[derive(Clone, Copy, Debug)]
pub struct Assembler<'a> {
    pub resource_table: &'a str,
    pub manifest: &'a str,
    /// Prefix under which project files are placed. Ends with `/`.
    pub content_namespace: &'a str,
    /// Path of the project metadata file, relative to the project root.
    pub project_metadata: &'a str,
    pub min_size: u64,
}

impl Assembler<'_> {
    fn skip_template_entry(&self, name: &str, is_dir: bool) -> bool {
        is_dir
            || name == self.resource_table
            || name == self.manifest
            || name.starts_with(self.content_namespace)
            || sign::is_signature_entry(name)
    }

    fn is_nested_archive(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                NESTED_ARCHIVE_EXTENSIONS
                    .iter()
                    .any(|n| e.eq_ignore_ascii_case(n))
            })
    }

    /// Collect the entries kept from the template. The resource table comes
    /// first as a stored entry and the patched manifest replaces the
    /// template's. Copied entries keep their payload, but not their extra
    /// field.
    pub fn template_entries(
        &self,
        template: &mut ZipReader<impl Read + Seek>,
        manifest: &[u8],
        cancel_signal: &AtomicBool,
    ) -> Result<Vec<ZipEntry>> {
        let central_entries = template.entries().to_vec();
        let mut entries = Vec::with_capacity(central_entries.len() + 1);

        if let Some(central) = central_entries.iter().find(|e| e.name == self.resource_table) {
            let data = template.read_data(central)?;
            entries.push(ZipEntry::stored(central.name.clone(), data));
        } else {
            debug!("Template has no {:?}", self.resource_table);
        }

        for central in &central_entries {
            stream::check_cancel(cancel_signal).map_err(|e| Error::DataRead("entry", e))?;

            if self.skip_template_entry(&central.name, central.is_dir()) {
                trace!("Skipping template entry: {:?}", central.name);
                continue;
            }

            let mut entry = template.read_entry(central)?;
            entry.extra.clear();
            entries.push(entry);
        }

        entries.push(
            ZipEntry::deflated(self.manifest, manifest)
                .map_err(|e| Error::Compress(self.manifest.to_owned(), e))?,
        );

        Ok(entries)
    }

    /// Collect the project files in a reproducible order. Each file is placed
    /// under the content namespace and compressed unless that makes it
    /// larger.
    pub fn project_entries(&self, project: &Path, cancel_signal: &AtomicBool) -> Result<Vec<ZipEntry>> {
        let mut entries = vec![];

        for dir_entry in WalkDir::new(project)
            .follow_links(false)
            .sort_by_file_name()
        {
            stream::check_cancel(cancel_signal).map_err(|e| Error::DataRead("project", e))?;

            let dir_entry = dir_entry.map_err(|e| Error::Walk(project.to_owned(), e))?;
            if !dir_entry.file_type().is_file() {
                continue;
            }

            let path = dir_entry.path();
            let relative = path
                .strip_prefix(project)
                .ok()
                .and_then(|p| {
                    p.components()
                        .map(|c| c.as_os_str().to_str())
                        .collect::<Option<Vec<_>>>()
                })
                .ok_or_else(|| Error::NonUtf8Path(path.to_owned()))?
                .join("/");

            if relative == self.project_metadata {
                trace!("Skipping project metadata: {relative:?}");
                continue;
            } else if Self::is_nested_archive(path) {
                debug!("Skipping nested archive: {relative:?}");
                continue;
            }

            let data = fs::read(path).map_err(|e| Error::ReadFile(path.to_owned(), e))?;
            let name = format!("{}{relative}", self.content_namespace);
            let entry = ZipEntry::compressed(name.clone(), data).map_err(|e| Error::Compress(name, e))?;

            entries.push(entry);
        }

        Ok(entries)
    }

    /// Write the assembled archive. Returns the size of the archive. If it is
    /// smaller than the minimum size, an error is returned.
    pub fn assemble(
        &self,
        template: &mut ZipReader<impl Read + Seek>,
        manifest: &[u8],
        project: &Path,
        writer: impl Write,
        cancel_signal: &AtomicBool,
    ) -> Result<u64> {
        let mut entries = self.template_entries(template, manifest, cancel_signal)?;
        entries.extend(self.project_entries(project, cancel_signal)?);

        let mut zip_writer = ZipWriter::new(writer);
        for entry in &entries {
            zip_writer.write_entry(entry)?;
        }
        let (_, layout) = zip_writer.finish()?;

        let size = layout.eocd_offset + EOCD_SIZE as u64;
        if size < self.min_size {
            return Err(Error::AssemblyTooSmall {
                size,
                min_size: self.min_size,
            });
        }

        debug!("Assembled {} entries into {size} bytes", entries.len());

        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use crate::format::zip::CompressionMethod;

    use super::*;

    const ASSEMBLER: Assembler<'static> = Assembler {
        resource_table: "resources.arsc",
        manifest: "AndroidManifest.xml",
        content_namespace: "assets/www/",
        project_metadata: "project.json",
        min_size: 0,
    };

    fn template() -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new());
        for entry in [
            ZipEntry::deflated("AndroidManifest.xml", b"old manifest").unwrap(),
            ZipEntry::stored("META-INF/", vec![]),
            ZipEntry::deflated("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0").unwrap(),
            ZipEntry::stored("classes.dex", b"dex".to_vec()),
            ZipEntry::stored("assets/www/stale.html", b"stale".to_vec()),
            ZipEntry::deflated("resources.arsc", &[0u8; 64]).unwrap(),
        ] {
            writer.write_entry(&entry).unwrap();
        }
        writer.finish().unwrap().0
    }

    #[test]
    fn entry_order_and_filtering() {
        let cancel_signal = AtomicBool::new(false);
        let project = tempfile::tempdir().unwrap();
        fs::create_dir(project.path().join("js")).unwrap();
        fs::write(project.path().join("index.html"), "<html></html>").unwrap();
        fs::write(project.path().join("js/app.js"), "x".repeat(500)).unwrap();
        fs::write(project.path().join("project.json"), "{}").unwrap();
        fs::write(project.path().join("old.apk"), "PK").unwrap();

        let mut reader = ZipReader::new(Cursor::new(template())).unwrap();
        let mut output = vec![];
        ASSEMBLER
            .assemble(
                &mut reader,
                b"new manifest",
                project.path(),
                &mut output,
                &cancel_signal,
            )
            .unwrap();

        let mut reader = ZipReader::new(Cursor::new(output)).unwrap();
        let names = reader
            .entries()
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "resources.arsc",
                "classes.dex",
                "AndroidManifest.xml",
                "assets/www/index.html",
                "assets/www/js/app.js",
            ],
        );

        let entries = reader.entries().to_vec();
        assert_eq!(entries[0].method, CompressionMethod::Stored);
        assert_eq!(entries[2].method, CompressionMethod::Deflated);
        assert_eq!(entries[4].method, CompressionMethod::Deflated);
        assert_eq!(reader.read_data(&entries[2]).unwrap(), b"new manifest");
        assert_eq!(reader.read_data(&entries[3]).unwrap(), b"<html></html>");
    }

    #[test]
    fn too_small() {
        let cancel_signal = AtomicBool::new(false);
        let project = tempfile::tempdir().unwrap();
        let assembler = Assembler {
            min_size: 1 << 20,
            ..ASSEMBLER
        };

        let mut reader = ZipReader::new(Cursor::new(template())).unwrap();

        assert_matches!(
            assembler.assemble(
                &mut reader,
                b"manifest",
                project.path(),
                io::sink(),
                &cancel_signal,
            ),
            Err(Error::AssemblyTooSmall { min_size: 1048576, .. })
        );
    }
}
