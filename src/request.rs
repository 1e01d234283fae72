use crate::{
    codec::{Allow, EeList},
    errors::MalformedHeaderError,
    header::HeaderBlock,
    Method, Version,
};

/// An embedded HTTP message head from a `req-hdr` or `res-hdr` section: the
/// start line verbatim, plus its header block.
#[derive(Debug, Clone)]
pub struct EmbeddedMessage {
    pub start_line: String,
    pub headers: HeaderBlock,
}

impl EmbeddedMessage {
    pub(crate) fn parse(buf: &[u8]) -> Result<Self, MalformedHeaderError> {
        let eol = memchr::memmem::find(buf, b"\r\n")
            .ok_or(MalformedHeaderError("missing embedded start line"))?;
        let start_line = std::str::from_utf8(&buf[..eol])
            .map_err(|_| MalformedHeaderError("embedded start line is not valid UTF-8"))?;
        let headers = HeaderBlock::parse(&buf[eol + 2..])?;
        Ok(Self {
            start_line: start_line.to_owned(),
            headers,
        })
    }
}

/// A fully parsed ICAP request: the request line, ICAP headers, interpreted
/// `Encapsulated` table, and the embedded HTTP message heads. The body is not
/// part of this struct; it is read incrementally through the exchange.
#[derive(Debug)]
pub struct IcapRequest {
    pub method: Method,
    pub uri: http::Uri,
    pub version: Version,
    pub headers: HeaderBlock,
    /// Value of the `Preview` header, when the client negotiated one.
    pub preview: Option<usize>,
    pub(crate) allow: Allow,
    pub(crate) ee_list: EeList,
    pub(crate) embedded_req: Option<EmbeddedMessage>,
    pub(crate) embedded_res: Option<EmbeddedMessage>,
}

impl IcapRequest {
    #[inline]
    pub fn encapsulated(&self) -> &EeList {
        &self.ee_list
    }

    /// The embedded HTTP request head (`req-hdr` section), when present.
    #[inline]
    pub fn embedded_req(&self) -> Option<&EmbeddedMessage> {
        self.embedded_req.as_ref()
    }

    /// The embedded HTTP response head (`res-hdr` section), when present.
    #[inline]
    pub fn embedded_res(&self) -> Option<&EmbeddedMessage> {
        self.embedded_res.as_ref()
    }

    /// True when the client offered `Allow: 204`.
    #[inline]
    pub fn allow_204(&self) -> bool {
        self.allow.allow_204
    }

    /// True when the client offered `Allow: 206`.
    #[inline]
    pub fn allow_206(&self) -> bool {
        self.allow.allow_206
    }

    /// True when chunked body bytes follow the embedded headers on the wire.
    #[inline]
    pub fn has_body(&self) -> bool {
        self.ee_list.has_body()
    }
}
