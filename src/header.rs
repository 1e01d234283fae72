//! RFC822-style header blocks shared by ICAP messages and the HTTP messages
//! they encapsulate.
//!
//! Unlike `http::HeaderMap`, a [`HeaderBlock`] keeps fields in insertion
//! order, preserves duplicate names and original casing, and serializes back
//! byte-for-byte. Lookup compares names case-insensitively.

use crate::errors::MalformedHeaderError;
use bytes::BytesMut;
use std::slice::Iter;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct HeaderBlock {
    fields: Vec<HeaderField>,
}

impl HeaderBlock {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a complete header block, including the blank-line terminator.
    ///
    /// Fails on a line without a colon, on an obsolete folded continuation
    /// line (leading SP/HT), and on input that ends before the terminator.
    pub fn parse(buf: &[u8]) -> Result<Self, MalformedHeaderError> {
        let mut fields = Vec::new();
        let mut rest = buf;

        loop {
            let eol = memchr::memmem::find(rest, b"\r\n")
                .ok_or(MalformedHeaderError("missing blank-line terminator"))?;
            let line = &rest[..eol];
            rest = &rest[eol + 2..];

            if line.is_empty() {
                if !rest.is_empty() {
                    return Err(MalformedHeaderError("bytes after blank-line terminator"));
                }
                return Ok(Self { fields });
            }

            if line[0] == b' ' || line[0] == b'\t' {
                return Err(MalformedHeaderError("folded header line"));
            }

            let line = std::str::from_utf8(line)
                .map_err(|_| MalformedHeaderError("header line is not valid UTF-8"))?;
            let (name, value) = line
                .split_once(':')
                .ok_or(MalformedHeaderError("header line without colon"))?;
            let name = name.trim_end();
            if name.is_empty() {
                return Err(MalformedHeaderError("empty header name"));
            }

            fields.push(HeaderField {
                name: name.to_owned(),
                value: value.trim().to_owned(),
            });
        }
    }

    /// Writes `Name: value\r\n` per field, in insertion order. The blank-line
    /// terminator is left to the caller, which may append further fields.
    pub fn encode(&self, buf: &mut BytesMut) {
        for f in &self.fields {
            buf.extend_from_slice(f.name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(f.value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }

    /// First value stored under `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    #[inline]
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(HeaderField {
            name: name.into(),
            value: value.into(),
        });
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, HeaderField> {
        self.fields.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a> IntoIterator for &'a HeaderBlock {
    type Item = &'a HeaderField;
    type IntoIter = Iter<'a, HeaderField>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
