use crate::{
    codec::{chunk, EeList, EncapsulatedEntity},
    errors::{ConnectionError, ProtocolStateError},
    header::HeaderBlock,
    request::IcapRequest,
    Method, Version, DEFAULT_ISTAG,
};
use bytes::{Buf, Bytes, BytesMut};
use http::StatusCode;
use std::{collections::VecDeque, fmt::Write, io};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{trace, warn};

/// Byte stream an exchange runs over. Blanket-implemented; `Exchange` erases
/// the concrete type so handler signatures stay free of transport generics.
pub trait Transport: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> Transport for T {}

pub(crate) async fn recv(io: &mut dyn Transport, rbuf: &mut BytesMut) -> io::Result<usize> {
    rbuf.reserve(4096);
    let n = io.read_buf(rbuf).await?;
    trace!("received {} bytes", n);
    Ok(n)
}

#[derive(Debug)]
pub(crate) enum RawChunk {
    Data(Bytes),
    End { ieof: bool },
}

/// Reads one chunk off the stream, buffering as needed. Consumes the size
/// line, payload, and trailing CRLF from the front of `rbuf`.
pub(crate) async fn next_chunk(
    io: &mut dyn Transport,
    rbuf: &mut BytesMut,
) -> Result<RawChunk, ConnectionError> {
    loop {
        if let Some(line) = chunk::parse_chunk_line(rbuf)? {
            if line.size == 0 {
                let need = line.line_len + 2;
                while rbuf.len() < need {
                    if recv(io, rbuf).await? == 0 {
                        return Err(ConnectionError::Closed);
                    }
                }
                if &rbuf[line.line_len..need] != b"\r\n" {
                    return Err(crate::errors::ChunkFramingError(
                        "missing CRLF after terminal chunk",
                    )
                    .into());
                }
                rbuf.advance(need);
                return Ok(RawChunk::End { ieof: line.ieof });
            }

            let need = line.line_len + line.size + 2;
            while rbuf.len() < need {
                if recv(io, rbuf).await? == 0 {
                    return Err(ConnectionError::Closed);
                }
            }
            if &rbuf[line.line_len + line.size..need] != b"\r\n" {
                return Err(
                    crate::errors::ChunkFramingError("missing CRLF after chunk payload").into(),
                );
            }
            rbuf.advance(line.line_len);
            let payload = rbuf.split_to(line.size).freeze();
            rbuf.advance(2);
            return Ok(RawChunk::Data(payload));
        }

        if recv(io, rbuf).await? == 0 {
            return Err(ConnectionError::Closed);
        }
    }
}

/// Where the encapsulated request body currently stands.
#[derive(Debug)]
pub(crate) enum BodyState {
    /// No body on the wire, or the body has been fully consumed.
    None,
    /// Preview chunks buffered at parse time; the remainder, if any, is still
    /// at the client pending `100 Continue`.
    Preview { chunks: VecDeque<Bytes>, ieof: bool },
    /// Non-preview body, streamed off the socket on demand.
    Streaming,
    /// `100 Continue` went out; post-preview chunks stream off the socket.
    Continued,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum WriteState {
    Pending,
    Streaming,
    Closed,
}

#[derive(Debug)]
enum EncHead {
    Request(String),
    Response(String),
}

/// One ICAP transaction, handed to the service callback. Combines the parsed
/// request with the incremental body reader and the response writer; the
/// writer enforces the call order `send_headers` → `write_body_chunk`* →
/// `finish`.
pub struct Exchange<'c> {
    io: &'c mut dyn Transport,
    rbuf: &'c mut BytesMut,
    wbuf: &'c mut BytesMut,
    req: IcapRequest,
    body: BodyState,
    ieof: bool,
    state: WriteState,
    status: Option<StatusCode>,
    headers: HeaderBlock,
    enc_head: Option<EncHead>,
    enc_headers: HeaderBlock,
    sent_status: Option<StatusCode>,
}

impl<'c> Exchange<'c> {
    pub(crate) fn new(
        io: &'c mut dyn Transport,
        rbuf: &'c mut BytesMut,
        wbuf: &'c mut BytesMut,
        req: IcapRequest,
        body: BodyState,
        ieof: bool,
    ) -> Self {
        Self {
            io,
            rbuf,
            wbuf,
            req,
            body,
            ieof,
            state: WriteState::Pending,
            status: None,
            headers: HeaderBlock::new(),
            enc_head: None,
            enc_headers: HeaderBlock::new(),
            sent_status: None,
        }
    }

    #[inline]
    pub fn request(&self) -> &IcapRequest {
        &self.req
    }

    /// True once the body is known to have ended inside the preview.
    #[inline]
    pub fn ieof(&self) -> bool {
        self.ieof
    }

    /// Next decoded body chunk, or `None` once the body has ended. Reading
    /// past the end stays `None` and never fails, so over-reading handlers
    /// are harmless. Reading past an unfinished preview makes the engine send
    /// `100 Continue` first.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        loop {
            match &mut self.body {
                BodyState::None => return Ok(None),
                BodyState::Preview { chunks, ieof } => {
                    if let Some(b) = chunks.pop_front() {
                        return Ok(Some(b));
                    }
                    if *ieof {
                        self.body = BodyState::None;
                        return Ok(None);
                    }
                    self.send_continue().await?;
                    self.body = BodyState::Continued;
                }
                BodyState::Streaming | BodyState::Continued => {
                    match next_chunk(self.io, self.rbuf).await? {
                        RawChunk::Data(b) => return Ok(Some(b)),
                        RawChunk::End { ieof } => {
                            self.ieof |= ieof;
                            self.body = BodyState::None;
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }

    async fn send_continue(&mut self) -> Result<(), ConnectionError> {
        self.wbuf.clear();
        write!(self.wbuf, "{} {}\r\n\r\n", Version::Icap10, StatusCode::CONTINUE)?;
        self.io.write_all(self.wbuf).await?;
        trace!("sent 100 Continue");
        Ok(())
    }

    /// Sets the response status; 200 is assumed when never called.
    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Appends an ICAP response header. Order is preserved on the wire.
    #[inline]
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// Attaches an embedded HTTP request start line; the response will carry
    /// a `req-hdr` section (and `req-body` if a body follows).
    #[inline]
    pub fn set_enc_request(&mut self, start_line: impl Into<String>) {
        self.enc_head = Some(EncHead::Request(start_line.into()));
    }

    /// Attaches an embedded HTTP status line; the response will carry a
    /// `res-hdr` section (and `res-body` if a body follows).
    #[inline]
    pub fn set_enc_status(&mut self, start_line: impl Into<String>) {
        self.enc_head = Some(EncHead::Response(start_line.into()));
    }

    /// Appends a header to the embedded HTTP message.
    #[inline]
    pub fn set_enc_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.enc_headers.append(name, value);
    }

    /// Writes the status line, the ICAP headers, a computed `Encapsulated`
    /// header, and the embedded HTTP head if one was attached. Must be called
    /// exactly once; `has_body` opens the chunked body for
    /// [`write_body_chunk`](Self::write_body_chunk).
    pub async fn send_headers(&mut self, has_body: bool) -> Result<(), ConnectionError> {
        if self.state != WriteState::Pending {
            return Err(ProtocolStateError("headers already sent").into());
        }
        let status = self.status.unwrap_or(StatusCode::OK);

        if status == StatusCode::NO_CONTENT && (has_body || self.enc_head.is_some()) {
            return Err(ProtocolStateError("204 must not carry encapsulated sections").into());
        }

        let mut ebuf = BytesMut::new();
        let hdr_entity = match &self.enc_head {
            Some(head) => {
                let (line, entity) = match head {
                    EncHead::Request(line) => (line, EncapsulatedEntity::ReqHdr(0)),
                    EncHead::Response(line) => (line, EncapsulatedEntity::ResHdr(0)),
                };
                ebuf.extend_from_slice(line.as_bytes());
                ebuf.extend_from_slice(b"\r\n");
                self.enc_headers.encode(&mut ebuf);
                ebuf.extend_from_slice(b"\r\n");
                Some(entity)
            }
            None => {
                if !self.enc_headers.is_empty() {
                    return Err(
                        ProtocolStateError("encapsulated headers without a start line").into()
                    );
                }
                None
            }
        };

        let body_entity = if has_body {
            match (&hdr_entity, self.req.method) {
                (Some(EncapsulatedEntity::ReqHdr(_)), _) => {
                    EncapsulatedEntity::ReqBody(ebuf.len())
                }
                (Some(_), _) => EncapsulatedEntity::ResBody(ebuf.len()),
                (None, Method::ReqMod) => EncapsulatedEntity::ReqBody(0),
                (None, Method::RespMod) => EncapsulatedEntity::ResBody(0),
                (None, Method::Options) => {
                    return Err(
                        ProtocolStateError("OPTIONS response cannot carry a body").into()
                    );
                }
            }
        } else {
            EncapsulatedEntity::NullBody(ebuf.len())
        };

        let mut table = EeList::new();
        if let Some(e) = hdr_entity {
            table.push(e);
        }
        table.push(body_entity);

        self.wbuf.clear();
        write!(self.wbuf, "{} {}\r\n", Version::Icap10, status)?;
        self.headers.encode(self.wbuf);
        write!(self.wbuf, "Encapsulated: {}\r\n\r\n", table)?;
        self.wbuf.extend_from_slice(&ebuf);
        self.io.write_all(self.wbuf).await?;

        self.sent_status = Some(status);
        self.state = if has_body {
            WriteState::Streaming
        } else {
            WriteState::Closed
        };
        Ok(())
    }

    /// Writes one body chunk. Only valid after `send_headers(true)`. Empty
    /// payloads are ignored; the terminal chunk belongs to
    /// [`finish`](Self::finish).
    pub async fn write_body_chunk(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        if self.state != WriteState::Streaming {
            return Err(ProtocolStateError("body is not open for writing").into());
        }
        if payload.is_empty() {
            return Ok(());
        }
        self.wbuf.clear();
        chunk::encode_chunk(self.wbuf, payload);
        self.io.write_all(self.wbuf).await?;
        Ok(())
    }

    /// Terminates the chunked body if one was started. Idempotent; a no-op
    /// when no body was opened.
    pub async fn finish(&mut self) -> Result<(), ConnectionError> {
        if self.state == WriteState::Streaming {
            self.wbuf.clear();
            chunk::encode_last_chunk(self.wbuf);
            self.io.write_all(self.wbuf).await?;
            self.state = WriteState::Closed;
        }
        Ok(())
    }

    /// Responds `204 No Content` with `Encapsulated: null-body=0`: the client
    /// should use its original message unmodified. Fails if headers already
    /// went out with a different status; calling it again after a 204 is a
    /// no-op.
    pub async fn no_adaptation_required(&mut self) -> Result<(), ConnectionError> {
        match self.state {
            WriteState::Pending => {
                if !(self.req.allow.allow_204 || self.req.preview.is_some()) {
                    warn!("sending 204 although the client offered neither 'Allow: 204' nor a preview");
                }
                self.status = Some(StatusCode::NO_CONTENT);
                self.send_headers(false).await
            }
            _ => {
                if self.sent_status == Some(StatusCode::NO_CONTENT) {
                    Ok(())
                } else {
                    Err(ProtocolStateError("headers already sent with a different status").into())
                }
            }
        }
    }

    #[inline]
    pub(crate) fn write_state(&self) -> WriteState {
        self.state
    }

    /// True when either side asked for the connection to close after this
    /// exchange.
    pub(crate) fn wants_close(&self) -> bool {
        let says_close = |h: &HeaderBlock| {
            h.get("Connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false)
        };
        says_close(&self.req.headers) || says_close(&self.headers)
    }

    /// Synthesized error response on behalf of the dispatcher; always closes.
    pub(crate) async fn synthesize_error(
        &mut self,
        status: StatusCode,
    ) -> Result<(), ConnectionError> {
        debug_assert!(self.state == WriteState::Pending);
        write_error_response(self.io, self.wbuf, status).await?;
        self.sent_status = Some(status);
        self.state = WriteState::Closed;
        Ok(())
    }

    /// Discards body bytes still in flight so a persistent connection stays
    /// in sync. A preview whose remainder was never requested has nothing on
    /// the wire once the final response is out.
    pub(crate) async fn drain_body(&mut self) -> Result<(), ConnectionError> {
        loop {
            match &mut self.body {
                BodyState::None => return Ok(()),
                BodyState::Preview { .. } => {
                    self.body = BodyState::None;
                    return Ok(());
                }
                BodyState::Streaming | BodyState::Continued => {
                    match next_chunk(self.io, self.rbuf).await? {
                        RawChunk::Data(_) => continue,
                        RawChunk::End { ieof } => {
                            self.ieof |= ieof;
                            self.body = BodyState::None;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Status line plus the minimal headers every synthesized response carries.
pub(crate) async fn write_error_response(
    io: &mut dyn Transport,
    wbuf: &mut BytesMut,
    status: StatusCode,
) -> Result<(), ConnectionError> {
    wbuf.clear();
    write!(wbuf, "{} {}\r\n", Version::Icap10, status)?;
    write!(wbuf, "ISTag: {}\r\n", DEFAULT_ISTAG)?;
    write!(wbuf, "Connection: close\r\n")?;
    write!(wbuf, "Encapsulated: null-body=0\r\n")?;
    write!(wbuf, "\r\n")?;
    io.write_all(wbuf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Allow;
    use crate::Version;
    use std::str::FromStr;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn dummy_request(method: Method, preview: Option<usize>, allow_204: bool) -> IcapRequest {
        IcapRequest {
            method,
            uri: http::Uri::from_str("icap://icap.example/svc").unwrap(),
            version: Version::Icap10,
            headers: HeaderBlock::new(),
            preview,
            allow: Allow {
                allow_204,
                allow_206: false,
            },
            ee_list: EeList::new(),
            embedded_req: None,
            embedded_res: None,
        }
    }

    struct Fixture {
        io: DuplexStream,
        peer: DuplexStream,
        rbuf: BytesMut,
        wbuf: BytesMut,
    }

    impl Fixture {
        fn new() -> Self {
            let (io, peer) = duplex(64 * 1024);
            Self {
                io,
                peer,
                rbuf: BytesMut::new(),
                wbuf: BytesMut::new(),
            }
        }

        fn exchange(&mut self, req: IcapRequest, body: BodyState) -> Exchange<'_> {
            Exchange::new(&mut self.io, &mut self.rbuf, &mut self.wbuf, req, body, false)
        }

        async fn written(mut self) -> Vec<u8> {
            drop(self.io);
            let mut out = Vec::new();
            self.peer.read_to_end(&mut out).await.unwrap();
            out
        }
    }

    #[tokio::test]
    async fn test_send_headers_once() {
        let mut fx = Fixture::new();
        let mut xchg = fx.exchange(dummy_request(Method::Options, None, false), BodyState::None);
        xchg.set_status(StatusCode::OK);
        xchg.set_header("Methods", "RESPMOD");
        xchg.send_headers(false).await.unwrap();
        assert!(matches!(
            xchg.send_headers(false).await,
            Err(ConnectionError::State(_))
        ));
        drop(xchg);

        let out = fx.written().await;
        assert_eq!(
            out,
            b"ICAP/1.0 200 OK\r\nMethods: RESPMOD\r\nEncapsulated: null-body=0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_body_chunk_requires_open_body() {
        let mut fx = Fixture::new();
        let mut xchg = fx.exchange(dummy_request(Method::RespMod, None, true), BodyState::None);
        assert!(matches!(
            xchg.write_body_chunk(b"oops").await,
            Err(ConnectionError::State(_))
        ));

        xchg.set_enc_status("HTTP/1.1 200 OK");
        xchg.set_enc_header("Content-Type", "text/plain");
        xchg.send_headers(true).await.unwrap();
        xchg.write_body_chunk(b"hello").await.unwrap();
        xchg.write_body_chunk(b"").await.unwrap(); // ignored
        xchg.finish().await.unwrap();
        assert!(matches!(
            xchg.write_body_chunk(b"late").await,
            Err(ConnectionError::State(_))
        ));
        drop(xchg);

        let out = fx.written().await;
        let head_end = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let head = std::str::from_utf8(&out[..head_end]).unwrap();
        assert!(head.starts_with("ICAP/1.0 200 OK\r\n"));
        assert!(head.contains("Encapsulated: res-hdr=0, res-body=45\r\n"));
        assert!(out.ends_with(b"5\r\nhello\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_at_byte_level() {
        let run = |finishes: usize| async move {
            let mut fx = Fixture::new();
            let mut xchg =
                fx.exchange(dummy_request(Method::ReqMod, None, true), BodyState::None);
            xchg.send_headers(true).await.unwrap();
            xchg.write_body_chunk(b"data").await.unwrap();
            for _ in 0..finishes {
                xchg.finish().await.unwrap();
            }
            drop(xchg);
            fx.written().await
        };
        assert_eq!(run(1).await, run(3).await);
    }

    #[tokio::test]
    async fn test_no_adaptation_required() {
        let mut fx = Fixture::new();
        let mut xchg = fx.exchange(dummy_request(Method::RespMod, None, true), BodyState::None);
        xchg.no_adaptation_required().await.unwrap();
        // repeat after a 204 is a no-op
        xchg.no_adaptation_required().await.unwrap();
        drop(xchg);

        let out = fx.written().await;
        assert_eq!(
            out,
            b"ICAP/1.0 204 No Content\r\nEncapsulated: null-body=0\r\n\r\n"
        );
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_204_without_client_opt_in_warns() {
        let mut fx = Fixture::new();
        let mut xchg = fx.exchange(dummy_request(Method::RespMod, None, false), BodyState::None);
        xchg.no_adaptation_required().await.unwrap();
        assert!(logs_contain(
            "neither 'Allow: 204' nor a preview"
        ));
    }

    #[tokio::test]
    async fn test_no_adaptation_required_after_other_status() {
        let mut fx = Fixture::new();
        let mut xchg = fx.exchange(dummy_request(Method::RespMod, None, true), BodyState::None);
        xchg.set_status(StatusCode::OK);
        xchg.send_headers(false).await.unwrap();
        assert!(matches!(
            xchg.no_adaptation_required().await,
            Err(ConnectionError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_204_with_encapsulated_sections_rejected() {
        let mut fx = Fixture::new();
        let mut xchg = fx.exchange(dummy_request(Method::RespMod, None, true), BodyState::None);
        xchg.set_status(StatusCode::NO_CONTENT);
        xchg.set_enc_status("HTTP/1.1 200 OK");
        assert!(matches!(
            xchg.send_headers(false).await,
            Err(ConnectionError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_read_chunk_after_ieof_is_noop() {
        let mut fx = Fixture::new();
        let mut chunks = VecDeque::new();
        chunks.push_back(Bytes::from_static(b"previewed"));
        let mut xchg = fx.exchange(
            dummy_request(Method::RespMod, Some(10), false),
            BodyState::Preview { chunks, ieof: true },
        );
        assert_eq!(
            xchg.read_chunk().await.unwrap(),
            Some(Bytes::from_static(b"previewed"))
        );
        assert_eq!(xchg.read_chunk().await.unwrap(), None);
        assert_eq!(xchg.read_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_past_preview_sends_continue() {
        let mut fx = Fixture::new();
        // remaining body the client sends after 100 Continue
        use tokio::io::AsyncWriteExt;
        fx.peer.write_all(b"4\r\nrest\r\n0\r\n\r\n").await.unwrap();

        let mut chunks = VecDeque::new();
        chunks.push_back(Bytes::from_static(b"head"));
        let mut xchg = fx.exchange(
            dummy_request(Method::RespMod, Some(4), false),
            BodyState::Preview {
                chunks,
                ieof: false,
            },
        );

        assert_eq!(
            xchg.read_chunk().await.unwrap(),
            Some(Bytes::from_static(b"head"))
        );
        assert_eq!(
            xchg.read_chunk().await.unwrap(),
            Some(Bytes::from_static(b"rest"))
        );
        assert_eq!(xchg.read_chunk().await.unwrap(), None);
        drop(xchg);

        let out = fx.written().await;
        assert_eq!(out, b"ICAP/1.0 100 Continue\r\n\r\n");
    }
}
