// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! JAR manifest and signature file encoding. Only writing is supported.

use thiserror::Error;

/// Maximum line length in bytes, excluding the trailing CRLF.
const MAX_LINE_LEN: usize = 70;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid attribute name: {0:?}")]
    InvalidName(String),
    #[error("Attribute {name:?} has a value containing a line break: {value:?}")]
    InvalidValue { name: String, value: String },
}

type Result<T> = std::result::Result<T, Error>;

/// A group of attributes, terminated by an empty line when serialized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    attributes: Vec<(String, String)>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an individual section for a named entry.
    pub fn named(name: &str) -> Result<Self> {
        let mut section = Self::new();
        section.push("Name", name)?;
        Ok(section)
    }

    pub fn push(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty()
            || !name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::InvalidName(name.to_owned()));
        } else if value.contains(['\r', '\n', '\0']) {
            return Err(Error::InvalidValue {
                name: name.to_owned(),
                value: value.to_owned(),
            });
        }

        self.attributes.push((name.to_owned(), value.to_owned()));

        Ok(())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Serialize the section, including the terminating empty line.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![];

        for (name, value) in &self.attributes {
            write_line(&mut buf, &format!("{name}: {value}"));
        }
        buf.extend_from_slice(b"\r\n");

        buf
    }
}

/// Write a logical line, wrapping it so that no physical line exceeds the
/// limit. Continuation lines start with a single space. Multi-byte UTF-8
/// sequences are never split.
fn write_line(buf: &mut Vec<u8>, line: &str) {
    let mut remain = line;
    let mut limit = MAX_LINE_LEN;

    loop {
        let mut split = remain.len().min(limit);
        while !remain.is_char_boundary(split) {
            split -= 1;
        }

        buf.extend_from_slice(&remain.as_bytes()[..split]);
        buf.extend_from_slice(b"\r\n");
        remain = &remain[split..];

        if remain.is_empty() {
            break;
        }

        buf.push(b' ');
        limit = MAX_LINE_LEN - 1;
    }
}

/// A manifest consisting of a main section followed by individual sections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    pub main: Section,
    pub sections: Vec<Section>,
}

impl Manifest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.main.to_bytes();

        for section in &self.sections {
            buf.extend_from_slice(&section.to_bytes());
        }

        buf
    }
}
