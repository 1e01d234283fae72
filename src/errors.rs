use std::{fmt, io};
use thiserror::Error;

#[derive(Error, Debug, Copy, Clone)]
#[error("bad ICAP method")]
#[non_exhaustive]
pub struct BadIcapMethodError;

#[derive(Error, Debug, Copy, Clone)]
#[error("bad ICAP version")]
#[non_exhaustive]
pub struct BadIcapVersionError;

/// A header line without a colon, an obsolete folded continuation line, or a
/// block that ends before the blank-line terminator.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("malformed header: {0}")]
pub struct MalformedHeaderError(pub(crate) &'static str);

/// A chunk size line that is not valid hex, or a chunk payload that is not
/// followed by CRLF.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("bad chunk framing: {0}")]
pub struct ChunkFramingError(pub(crate) &'static str);

/// An `Encapsulated` header that names an unknown section, repeats a section,
/// runs offsets backwards, or does not fit the request method.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("invalid encapsulation: {0}")]
pub struct InvalidEncapsulationError(pub(crate) &'static str);

/// A response-builder call made in the wrong order, e.g. writing body chunks
/// before `send_headers(true)`. Indicates a handler defect, not a peer fault.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("response state: {0}")]
pub struct ProtocolStateError(pub(crate) &'static str);

/// A handler returned control to the dispatcher without producing a response.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("handler contract: {0}")]
pub struct HandlerContractError(pub(crate) &'static str);

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    #[error(transparent)]
    MalformedHeader(#[from] MalformedHeaderError),
    #[error(transparent)]
    ChunkFraming(#[from] ChunkFramingError),
    #[error(transparent)]
    InvalidEncapsulation(#[from] InvalidEncapsulationError),
    #[error("bad request line: {0}")]
    BadRequestLine(&'static str),
    #[error("bad uri: {0}")]
    BadUri(String),
    #[error("bad version: {0}")]
    BadVersion(String),
    #[error("'Encapsulated' header not found")]
    NoEncapsulatedHdr,
    #[error("failed to parse 'Preview' header")]
    BadPreview,
    #[error("header block exceeds {0} bytes")]
    HeadTooLarge(usize),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("fmt error: {0}")]
    Fmt(#[from] fmt::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    State(#[from] ProtocolStateError),
}

impl From<MalformedHeaderError> for ConnectionError {
    fn from(e: MalformedHeaderError) -> Self {
        Self::Parse(e.into())
    }
}

impl From<ChunkFramingError> for ConnectionError {
    fn from(e: ChunkFramingError) -> Self {
        Self::Parse(e.into())
    }
}

impl From<InvalidEncapsulationError> for ConnectionError {
    fn from(e: InvalidEncapsulationError) -> Self {
        Self::Parse(e.into())
    }
}
