use crate::{
    codec::{self, decode_allow, decode_preview, Allow, EeList, EncapsulatedEntity},
    errors::{ConnectionError, HandlerContractError, ParseError},
    request::{EmbeddedMessage, IcapRequest},
    server::{
        exchange::{next_chunk, recv, write_error_response, BodyState, RawChunk, WriteState},
        Exchange, ServerCfg, Transport,
    },
    service::{IcapService, ServiceError},
    Id, Method,
};
use bytes::BytesMut;
use http::StatusCode;
use std::{collections::VecDeque, str::FromStr, sync::Arc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument, trace, warn};

#[derive(Debug)]
enum ProcessingDecision {
    Continue,
    Shutdown,
}

type ConnectionResult = Result<ProcessingDecision, ConnectionError>;

/// One accepted connection: drives ICAP transactions sequentially until the
/// peer goes away or an exchange ends with `Connection: close`.
#[derive(Debug)]
pub struct Connection<IO, S> {
    pub id: Id,
    io: IO,
    svc: S,
    cfg: Arc<ServerCfg>,
    rbuf: BytesMut,
    wbuf: BytesMut,
    msgs_cnt: usize,
}

impl<IO, S> Connection<IO, S>
where
    IO: Transport,
    S: IcapService,
{
    pub fn new(id: Id, io: IO, svc: S, cfg: Arc<ServerCfg>) -> Self {
        let rbuf = BytesMut::with_capacity(cfg.rbuf_capacity());
        Connection {
            id,
            io,
            svc,
            cfg,
            rbuf,
            wbuf: BytesMut::with_capacity(512),
            msgs_cnt: 0,
        }
    }

    #[instrument(name = "connection", skip(self), fields(id = %self.id))]
    pub async fn process(&mut self) {
        loop {
            self.msgs_cnt += 1;
            match self.process_message().await {
                Ok(ProcessingDecision::Continue) => continue,
                Ok(ProcessingDecision::Shutdown) => break,
                Err(e) => {
                    error!(err = %e, "exchange abandoned");
                    break;
                }
            }
        }
        trace!("shutting down connection");
        if let Err(e) = self.io.shutdown().await {
            debug!(err = %e, "socket shutdown failed");
        }
    }

    #[instrument(name = "message", skip(self), fields(n = self.msgs_cnt), err)]
    async fn process_message(&mut self) -> ConnectionResult {
        let head = match self.read_head().await? {
            Some(head) => head,
            None => return Ok(ProcessingDecision::Shutdown),
        };

        let head = match head {
            Ok(head) => head,
            Err(e) => {
                error!(err = %e, "failed to decode request head");
                return self.send_status(StatusCode::BAD_REQUEST).await;
            }
        };

        let method = match Method::from_str(&head.method_token) {
            Ok(m) => m,
            Err(_) => {
                warn!(method = %head.method_token, "method without a handler");
                return self.send_status(StatusCode::NOT_IMPLEMENTED).await;
            }
        };

        let (req, body, ieof) = match self.interpret(method, head).await {
            Ok(parts) => parts,
            Err(ConnectionError::Parse(e)) => {
                error!(err = %e, "failed to decode encapsulated message");
                return self.send_status(StatusCode::BAD_REQUEST).await;
            }
            Err(e) => return Err(e),
        };

        // the exchange takes the buffers and the socket; the service value
        // stays with the connection
        let Self {
            ref mut io,
            ref mut svc,
            ref mut rbuf,
            ref mut wbuf,
            ..
        } = *self;
        let mut xchg = Exchange::new(io, rbuf, wbuf, req, body, ieof);

        let result = match method {
            Method::Options => svc.handle_options(&mut xchg).await,
            Method::ReqMod => svc.handle_reqmod(&mut xchg).await,
            Method::RespMod => svc.handle_respmod(&mut xchg).await,
        };

        match result {
            Ok(()) => match xchg.write_state() {
                WriteState::Pending => {
                    error!(
                        "{}",
                        HandlerContractError("handler returned without sending a response")
                    );
                    xchg.synthesize_error(StatusCode::INTERNAL_SERVER_ERROR).await?;
                    Ok(ProcessingDecision::Shutdown)
                }
                WriteState::Streaming | WriteState::Closed => {
                    xchg.finish().await?;
                    xchg.drain_body().await?;
                    if xchg.wants_close() {
                        Ok(ProcessingDecision::Shutdown)
                    } else {
                        Ok(ProcessingDecision::Continue)
                    }
                }
            },
            Err(e) => {
                let status = match e {
                    ServiceError::NotImplemented => {
                        warn!(method = %method, "no handler registered");
                        StatusCode::NOT_IMPLEMENTED
                    }
                    e => {
                        error!(err = %e, "handler failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if xchg.write_state() == WriteState::Pending {
                    xchg.synthesize_error(status).await?;
                }
                Ok(ProcessingDecision::Shutdown)
            }
        }
    }

    /// Reads bytes until the ICAP head is complete and parses it. `Ok(None)`
    /// is a clean close between transactions; a parse failure is returned as
    /// an inner `Err` so the caller can answer 400.
    async fn read_head(
        &mut self,
    ) -> Result<Option<Result<codec::RequestHead, ParseError>>, ConnectionError> {
        loop {
            if let Some(end) = codec::find_blank_line(&self.rbuf) {
                let head_bytes = self.rbuf.split_to(end);
                return Ok(Some(codec::parse_request_head(&head_bytes)));
            }
            if self.rbuf.len() > self.cfg.max_head_bytes() {
                return Ok(Some(Err(ParseError::HeadTooLarge(
                    self.cfg.max_head_bytes(),
                ))));
            }
            let n = recv(&mut self.io, &mut self.rbuf).await?;
            if n == 0 {
                if self.rbuf.is_empty() {
                    debug!("peer closed between transactions");
                    return Ok(None);
                }
                debug!("peer closed inside request head");
                return Err(ConnectionError::Closed);
            }
        }
    }

    /// Interprets the ICAP headers, reads and parses the embedded header
    /// sections, and buffers the preview chunks when one was negotiated.
    async fn interpret(
        &mut self,
        method: Method,
        head: codec::RequestHead,
    ) -> Result<(IcapRequest, BodyState, bool), ConnectionError> {
        let mut ee_list = EeList::new();
        let mut preview = None;
        let mut allow = Allow::default();

        for f in &head.headers {
            if f.name.eq_ignore_ascii_case("Encapsulated") {
                ee_list.parse_append(f.value.as_bytes())?;
            } else if f.name.eq_ignore_ascii_case("Preview") {
                preview = Some(decode_preview(&f.value).map_err(ConnectionError::Parse)?);
            } else if f.name.eq_ignore_ascii_case("Allow") {
                allow.add(&decode_allow(&f.value));
            }
        }

        if ee_list.is_empty() && method.is_adaptation() {
            return Err(ParseError::NoEncapsulatedHdr.into());
        }
        ee_list.validate_for(method)?;

        // embedded header sections span [0, body_offset)
        let body_offset = ee_list.body_offset().unwrap_or(0);
        while self.rbuf.len() < body_offset {
            if recv(&mut self.io, &mut self.rbuf).await? == 0 {
                debug!("peer closed inside encapsulated headers");
                return Err(ConnectionError::Closed);
            }
        }
        let sections = self.rbuf.split_to(body_offset);

        let mut embedded_req = None;
        let mut embedded_res = None;
        let entities: Vec<EncapsulatedEntity> = ee_list.iter().copied().collect();
        for (i, e) in entities.iter().enumerate() {
            if !e.is_hdr() {
                continue;
            }
            let end = entities
                .get(i + 1)
                .map(|n| n.offset())
                .unwrap_or(sections.len());
            let msg = EmbeddedMessage::parse(&sections[e.offset()..end])?;
            match e {
                EncapsulatedEntity::ReqHdr(_) => embedded_req = Some(msg),
                _ => embedded_res = Some(msg),
            }
        }

        let has_body = ee_list.has_body();
        let (body, ieof) = if !has_body {
            (BodyState::None, false)
        } else if preview.is_some() {
            let mut chunks = VecDeque::new();
            let mut ieof = false;
            loop {
                match next_chunk(&mut self.io, &mut self.rbuf).await? {
                    RawChunk::Data(b) => chunks.push_back(b),
                    RawChunk::End { ieof: e } => {
                        ieof = e;
                        break;
                    }
                }
            }
            trace!(chunks = chunks.len(), ieof = ieof, "buffered preview");
            (BodyState::Preview { chunks, ieof }, ieof)
        } else {
            (BodyState::Streaming, false)
        };

        let req = IcapRequest {
            method,
            uri: head.uri,
            version: head.version,
            headers: head.headers,
            preview,
            allow,
            ee_list,
            embedded_req,
            embedded_res,
        };
        Ok((req, body, ieof))
    }

    /// Synthesized response for requests that never reach a handler; always
    /// closes the connection.
    #[instrument(skip(self))]
    async fn send_status(&mut self, status: StatusCode) -> ConnectionResult {
        debug_assert!(status.is_client_error() || status.is_server_error());
        write_error_response(&mut self.io, &mut self.wbuf, status).await?;
        Ok(ProcessingDecision::Shutdown)
    }
}
