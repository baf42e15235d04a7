// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    ffi::OsStr,
    fmt, io,
    path::{Path, PathBuf},
};

use num_traits::PrimInt;
use tempfile::NamedTempFile;

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes<T: PrimInt>(pub T);

impl<T: PrimInt + fmt::Debug> fmt::Debug for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "<{:?} byte>", self.0)
        } else {
            write!(f, "<{:?} bytes>", self.0)
        }
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Append a suffix to the file name portion of a path, keeping any extension
/// that is already there (eg. `app.apk` -> `app.apk.lock`).
pub fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    s.into()
}

/// Create a temporary file in the same directory as `output` so that it can
/// be atomically moved into place.
pub fn output_temp_file(output: &Path) -> io::Result<NamedTempFile> {
    NamedTempFile::with_prefix_in(
        output
            .file_name()
            .unwrap_or_else(|| OsStr::new("apkrepack.tmp")),
        parent_path(output),
    )
}

/// Move a temporary file created by [`output_temp_file`] to `output`.
pub fn persist_output(temp_file: NamedTempFile, output: &Path) -> io::Result<()> {
    // NamedTempFile forces 600 permissions on temp files because it's the safe
    // option for a shared /tmp. Since we're writing to the output file's
    // directory, just mimic umask.
    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::prelude::PermissionsExt};

        use rustix::{fs::Mode, process::umask};

        let mask = umask(Mode::empty());
        umask(mask);

        // Mac uses a 16-bit value.
        #[allow(clippy::useless_conversion)]
        let mode = u32::from(0o666 & !mask.bits());

        temp_file
            .as_file()
            .set_permissions(Permissions::from_mode(mode))?;
    }

    temp_file.persist(output).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn num_bytes_format() {
        assert_eq!(format!("{:?}", NumBytes(1u64)), "<1 byte>");
        assert_eq!(format!("{:?}", NumBytes(4096u32)), "<4096 bytes>");
    }

    #[test]
    fn parent_of_bare_name() {
        assert_eq!(parent_path(Path::new("app.apk")), Path::new("."));
        assert_eq!(parent_path(Path::new("out/app.apk")), Path::new("out"));
    }

    #[test]
    fn persist_replaces_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("app.apk");
        std::fs::write(&output, "old").unwrap();

        let mut temp_file = output_temp_file(&output).unwrap();
        io::Write::write_all(&mut temp_file, b"new").unwrap();
        assert_eq!(parent_path(temp_file.path()), dir.path());

        persist_output(temp_file, &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn suffix_keeps_extension() {
        assert_eq!(
            path_with_suffix(Path::new("out/app.apk"), ".lock"),
            Path::new("out/app.apk.lock"),
        );
    }
}
