//! Wire-level decoding shared by the request parser: the ICAP request line,
//! the `Preview` and `Allow` headers, and the chunk/encapsulation codecs in
//! the submodules.

use crate::{errors::ParseError, header::HeaderBlock, Version};
use std::str::FromStr;
use tracing::trace;

pub mod chunk;
pub mod encapsulated;

pub use encapsulated::{EeList, EncapsulatedEntity};

/// Position just past the `\r\n\r\n` that terminates a header block, if the
/// buffer holds one.
#[inline]
pub(crate) fn find_blank_line(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n\r\n").map(|i| i + 4)
}

#[inline]
pub(crate) fn skip_whitespace(buf: &[u8], i: &mut usize) {
    while *i < buf.len() && matches!(buf[*i], b' ' | b'\t') {
        *i += 1;
    }
}

#[inline]
pub(crate) fn skip_char(buf: &[u8], i: &mut usize, c: u8) {
    if *i < buf.len() && buf[*i] == c {
        *i += 1;
    }
}

#[inline]
fn is_method_byte(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-' || b == b'_'
}

/// The decoded first line and ICAP headers of a request. The method is kept
/// as the raw token: an unknown method is not a parse error, the dispatcher
/// answers it with 501.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method_token: String,
    pub(crate) uri: http::Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderBlock,
}

/// Parses a complete ICAP head (request line + headers + blank line).
pub(crate) fn parse_request_head(buf: &[u8]) -> Result<RequestHead, ParseError> {
    let eol = memchr::memmem::find(buf, b"\r\n")
        .ok_or(ParseError::BadRequestLine("missing request line"))?;
    let line = std::str::from_utf8(&buf[..eol])
        .map_err(|_| ParseError::BadRequestLine("request line is not valid UTF-8"))?;

    let mut parts = line.split(' ').filter(|p| !p.is_empty());
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v), None) => (m, u, v),
        _ => return Err(ParseError::BadRequestLine("expected METHOD URI VERSION")),
    };

    if method.is_empty() || !method.bytes().all(is_method_byte) {
        return Err(ParseError::BadRequestLine("bad method token"));
    }

    let uri = http::Uri::from_str(uri).map_err(|e| ParseError::BadUri(e.to_string()))?;
    let version = Version::from_str(version).map_err(|_| ParseError::BadVersion(version.into()))?;

    let headers = HeaderBlock::parse(&buf[eol + 2..])?;
    trace!(method = method, headers = headers.len(), "parsed request head");

    Ok(RequestHead {
        method_token: method.to_owned(),
        uri,
        version,
        headers,
    })
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Allow {
    pub allow_204: bool,
    pub allow_206: bool,
}

impl Allow {
    pub fn add(&mut self, other: &Allow) {
        self.allow_204 = self.allow_204 || other.allow_204;
        self.allow_206 = self.allow_206 || other.allow_206;
    }
}

pub(crate) fn decode_allow(value: &str) -> Allow {
    let mut allow = Allow::default();
    for tok in value.split(|c: char| c.is_ascii_whitespace() || c == ',') {
        match tok {
            "204" => allow.allow_204 = true,
            "206" => allow.allow_206 = true,
            _ => continue,
        }
    }
    allow
}

pub(crate) fn decode_preview(value: &str) -> Result<usize, ParseError> {
    value.trim().parse().map_err(|_| ParseError::BadPreview)
}
