//! Per-connection driver (spec.md §4.4): owns the socket and the read/write
//! buffers, parses one request at a time, decides whether it dispatches as
//! plain HTTP, a WebSocket upgrade, or an SSE stream, and drives the
//! application bridge for each exchange. Keeps the teacher's split between
//! "the connection owns the socket" and "the handler owns application
//! logic" — only the wire on each side of that split has changed, from a
//! single `Request`/`Response` call to the `scope`/`receive`/`send`
//! interface in [`crate::bridge`].

use crate::{
    bridge::{self, BridgeFault, Handler, HttpSendGuard, SseSendGuard, WsSendGuard},
    errors::{ErrorKind, IoError},
    http::{
        request::{BodyFraming as ReqFraming, ChunkedDecoder, Parser, Request},
        response::{BodyFraming as RespFraming, Response},
        types::{Method, StatusCode, Version},
    },
    limits::AllLimits,
    scope::{
        Endpoint, Extension, HttpScheme, HttpScope, InEvent, LifespanState, OutEvent, PagiMeta,
        Scope, SseScope, TlsInfo, WebSocketScope, WsMessage, WsScheme,
    },
    sse, ws,
};
use std::{io, net::SocketAddr, sync::Arc, time::Duration, time::Instant};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

/// Per-connection bookkeeping: age and request count, checked against
/// [`crate::limits::ConnLimits`] to decide when a connection must close
/// even if the last response asked to keep it alive.
struct ConnMeta {
    created: Instant,
    request_count: usize,
}

impl ConnMeta {
    fn new() -> Self {
        Self { created: Instant::now(), request_count: 0 }
    }
}

/// Drives one accepted TCP connection end to end: possibly many HTTP
/// requests in sequence (keep-alive), or exactly one upgrade into a
/// WebSocket or SSE stream that then owns the connection until it closes.
pub(crate) struct HttpConnection<H: Handler> {
    handler: Arc<H>,
    limits: AllLimits,
    parser: Parser,
    request: Request,
    response: Response,
    meta: ConnMeta,
    /// Name advertised in `scope.pagi.event_loop` (spec.md §6.3 `--loop`).
    event_loop: &'static str,
    /// Published by the lifespan handler's startup; visible read-only to
    /// every scope opened after it.
    lifespan_state: Option<LifespanState>,
    /// Set by the acceptor layer for a TLS-terminated listener; populates
    /// `scope.extensions` and flips the advertised scheme to `https`/`wss`.
    tls: Option<TlsInfo>,
}

impl<H: Handler> HttpConnection<H> {
    pub(crate) fn new(
        handler: Arc<H>,
        limits: AllLimits,
        event_loop: &'static str,
        lifespan_state: Option<LifespanState>,
    ) -> Self {
        let parser = Parser::new(&limits.req);
        let request = Request::new(&limits.req);
        let response = Response::new(&limits.resp);
        Self {
            handler,
            limits,
            parser,
            request,
            response,
            meta: ConnMeta::new(),
            event_loop,
            lifespan_state,
            tls: None,
        }
    }

    pub(crate) fn set_tls(&mut self, tls: TlsInfo) {
        self.tls = Some(tls);
    }

    fn reset(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.limits.resp);
    }

    fn is_expired(&self) -> bool {
        self.meta.request_count >= self.limits.conn.max_requests_per_connection
            || self.meta.created.elapsed() > self.limits.conn.connection_lifetime
    }

    /// Drives the connection from `idle` until it reaches `closed`
    /// (spec.md §4.4): one request after another while keep-alive holds, or
    /// a single upgrade into `websocket_open`/`sse_open` that owns the rest
    /// of the connection's lifetime.
    pub(crate) async fn run(&mut self, stream: &mut TcpStream, client: SocketAddr, server: SocketAddr) {
        loop {
            self.reset();

            let has_head = match self.read_head(stream).await {
                Ok(has_head) => has_head,
                Err(err) => {
                    self.send_error(stream, err).await;
                    return;
                }
            };
            if !has_head {
                return; // idle -> closed: client went away without sending anything
            }

            if let Err(err) = self.parser.parse_head(&mut self.request, &self.limits.req) {
                self.send_error(stream, err).await;
                return;
            }

            self.meta.request_count += 1;

            let outcome = if is_websocket_upgrade(&self.request) {
                self.dispatch_websocket(stream, client, server).await
            } else if is_sse_request(&self.request) {
                self.dispatch_sse(stream, client, server).await
            } else {
                self.dispatch_http(stream, client, server).await
            };

            match outcome {
                Ok(keep_alive) if keep_alive && !self.is_expired() => continue,
                _ => return,
            }
        }
    }

    /// Reads bytes until a full header block is buffered, distinguishing
    /// "header block too large" from true EOF. `fill_buffer` reports bytes
    /// read *this call*, and reads into an empty slice (returning `Ok(0)`
    /// without touching the socket) once the buffer is full — so the
    /// too-large checks must run *before* the read, never after.
    ///
    /// The request-line boundary is tracked separately from the
    /// header-block boundary (spec.md:85-86): a request line alone longer
    /// than `limits.req.url_size` is `414 URI Too Long`, distinct from the
    /// header block as a whole exceeding `max_header_size` (`431`).
    async fn read_head(&mut self, stream: &mut TcpStream) -> Result<bool, ErrorKind> {
        loop {
            let buffered = &self.parser.buffer[..self.parser.len];
            if header_block_complete(buffered) {
                return Ok(true);
            }
            if request_line_end(buffered).is_none() && self.parser.len > self.limits.req.url_size {
                return Err(ErrorKind::RequestLineTooLong);
            }
            if self.parser.len == self.parser.buffer.len() {
                return Err(ErrorKind::HeaderBlockTooLarge);
            }

            let n = self
                .parser
                .fill_buffer(stream, self.limits.conn.socket_read_timeout)
                .await?;
            if n == 0 {
                if self.parser.len == 0 {
                    return Ok(false);
                }
                return Err(ErrorKind::Io(IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-request",
                ))));
            }
        }
    }

    async fn send_error(&mut self, stream: &mut TcpStream, err: ErrorKind) {
        let body = err.as_http(self.request.version(), self.limits.server.json_errors);
        let _ = write_with_timeout(stream, body, self.limits.conn.socket_write_timeout).await;
    }

    async fn flush(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        let buf = self.response.take_buffer();
        if buf.is_empty() {
            return Ok(());
        }
        write_with_timeout(stream, &buf, self.limits.conn.socket_write_timeout).await
    }

    /// Reads the full request body (identity or chunked), respecting
    /// whatever bytes `read_head` already buffered past the header block.
    /// The concrete codec assembles a body as one owned `Vec<u8>` rather
    /// than a byte stream (see [`ChunkedDecoder::into_body`]), so it is
    /// read to completion here and delivered to the application as a
    /// single `http.request` event rather than many small ones.
    async fn read_body(&mut self, stream: &mut TcpStream) -> Result<Vec<u8>, ErrorKind> {
        match self.request.framing {
            ReqFraming::None => Ok(Vec::new()),
            ReqFraming::Identity(len) => {
                let mut body = Vec::with_capacity(len.min(64 * 1024));
                let leftover = self.parser.leftover_head_bytes();
                let take = leftover.len().min(len);
                body.extend_from_slice(&leftover[..take]);
                while body.len() < len {
                    let chunk = self.read_more(stream).await?;
                    let remaining = len - body.len();
                    let take = chunk.len().min(remaining);
                    body.extend_from_slice(&chunk[..take]);
                }
                Ok(body)
            }
            ReqFraming::Chunked => {
                let mut decoder = ChunkedDecoder::new();
                let leftover = self.parser.leftover_head_bytes().to_vec();
                decoder.feed(&leftover, self.limits.req.body_size)?;
                while !decoder.is_done() {
                    let chunk = self.read_more(stream).await?;
                    decoder.feed(&chunk, self.limits.req.body_size)?;
                }
                Ok(decoder.into_body())
            }
        }
    }

    async fn read_more(&mut self, stream: &mut TcpStream) -> Result<Vec<u8>, ErrorKind> {
        let mut buf = [0u8; 8192];
        let n = tokio::select! {
            biased;
            result = stream.read(&mut buf) => result?,
            _ = sleep(self.limits.conn.socket_read_timeout) => {
                return Err(ErrorKind::Io(IoError(io::Error::new(io::ErrorKind::TimedOut, "body read timeout"))));
            }
        };
        if n == 0 {
            return Err(ErrorKind::Io(IoError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-body",
            ))));
        }
        Ok(buf[..n].to_vec())
    }

    fn endpoint(addr: SocketAddr) -> Endpoint {
        Endpoint { host: addr.ip().to_string(), port: addr.port() }
    }

    fn extensions(&self) -> Vec<Extension> {
        self.tls.iter().cloned().map(Extension::Tls).collect()
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        self.request
            .headers()
            .map(|(n, v)| (String::from_utf8_lossy(n).into_owned(), String::from_utf8_lossy(v).into_owned()))
            .collect()
    }

    /// HTTP/1.1 keeps the connection alive unless the request asked to
    /// close or the chosen response framing has no defined end short of
    /// closing; HTTP/1.0 only keeps alive when the client opted in *and*
    /// the response has a definite length (spec.md §4.4 keep-alive rules).
    fn keep_alive_decision(&self, framing: RespFraming) -> bool {
        match self.request.version() {
            Version::Http11 => self.request.keep_alive && framing != RespFraming::RawClose,
            Version::Http10 => {
                self.request.keep_alive && matches!(framing, RespFraming::Identity | RespFraming::None)
            }
        }
    }

    // ---- plain HTTP -----------------------------------------------------

    async fn dispatch_http(
        &mut self,
        stream: &mut TcpStream,
        client: SocketAddr,
        server: SocketAddr,
    ) -> Result<bool, ErrorKind> {
        let body = self.read_body(stream).await?;
        let head_only = self.request.method() == Method::Head;

        let scope = Scope::Http(HttpScope {
            method: self.request.method(),
            scheme: if self.tls.is_some() { HttpScheme::Https } else { HttpScheme::Http },
            path: percent_decode(self.request.url().path()),
            raw_path: String::from_utf8_lossy(self.request.url().path()).into_owned(),
            query_string: self.request.url().query_full().unwrap_or(b"").to_vec(),
            headers: self.request_headers(),
            http_version: self.request.version(),
            client: Self::endpoint(client),
            server: Self::endpoint(server),
            pagi: PagiMeta::new(self.event_loop),
            state: self.lifespan_state.clone(),
            extensions: self.extensions(),
        });

        let (join, in_tx, mut out_rx) = bridge::spawn(Arc::clone(&self.handler), scope, 2);
        let _ = in_tx.send(InEvent::HttpRequest { body, more: false }).await;
        let _ = in_tx.send(InEvent::HttpDisconnect).await;
        drop(in_tx);

        let mut guard = HttpSendGuard::default();
        let mut framing = RespFraming::None;
        let mut trailers_requested = false;
        let mut identity_remaining: Option<usize> = None;
        let mut response_done = false;
        let mut started = false;

        while let Some(event) = out_rx.recv().await {
            if let Err(fault) = guard.validate(&event) {
                return self.fail_bridge(stream, started, fault).await;
            }

            match event {
                OutEvent::HttpResponseStart { status, headers, trailers } => {
                    started = true;
                    trailers_requested = trailers;
                    let status_code = StatusCode::from_u16(status);
                    let content_length = find_content_length(&headers);
                    framing = choose_response_framing(
                        head_only,
                        status_code,
                        content_length,
                        trailers,
                        self.request.version(),
                    );
                    self.response.version = self.request.version();
                    self.response.keep_alive = self.keep_alive_decision(framing);
                    if framing == RespFraming::RawClose {
                        self.response.close();
                    }
                    self.response.begin(status_code, &headers, framing)?;
                    identity_remaining = (framing == RespFraming::Identity).then_some(content_length.unwrap_or(0));
                    self.flush(stream).await?;
                }
                OutEvent::HttpResponseBody { body, more } => {
                    match framing {
                        RespFraming::None => {}
                        RespFraming::Identity => {
                            let remaining = identity_remaining.get_or_insert(0);
                            let take = body.len().min(*remaining);
                            self.response.write_raw(&body[..take]);
                            *remaining -= take;
                        }
                        RespFraming::Chunked => {
                            if !body.is_empty() {
                                self.response.write_chunk(&body);
                            }
                        }
                        RespFraming::RawClose => self.response.write_raw(&body),
                    }
                    if !more {
                        match framing {
                            RespFraming::Identity => {
                                if identity_remaining.unwrap_or(0) > 0 {
                                    self.response.close();
                                }
                                response_done = true;
                            }
                            RespFraming::Chunked if !trailers_requested => {
                                self.response.write_final_chunk(&[])?;
                                response_done = true;
                            }
                            RespFraming::Chunked => {}
                            _ => response_done = true,
                        }
                    }
                    self.flush(stream).await?;
                }
                OutEvent::HttpResponseTrailers { headers } => {
                    self.response.write_final_chunk(&headers)?;
                    self.flush(stream).await?;
                    response_done = true;
                }
                _ => unreachable!("HttpSendGuard only admits HTTP response events"),
            }

            if response_done {
                break;
            }
        }

        if !response_done {
            return self.fail_bridge_exit(stream, started, join).await;
        }

        let _ = join.await;
        Ok(self.response.keep_alive)
    }

    async fn fail_bridge(&mut self, stream: &mut TcpStream, started: bool, fault: BridgeFault) -> Result<bool, ErrorKind> {
        tracing::warn!(%fault, "application bridge contract violation");
        if !started {
            self.send_error(stream, ErrorKind::UnsupportedScopeType).await;
        }
        Ok(false)
    }

    async fn fail_bridge_exit(
        &mut self,
        stream: &mut TcpStream,
        started: bool,
        join: tokio::task::JoinHandle<Result<(), ErrorKind>>,
    ) -> Result<bool, ErrorKind> {
        let outcome = join.await;
        tracing::warn!(started, "application task ended before finishing the response");
        if !started {
            let err = match outcome {
                Ok(Err(err)) => err,
                _ => ErrorKind::ServiceUnavailable,
            };
            self.send_error(stream, err).await;
        }
        Ok(false)
    }

    // ---- WebSocket ------------------------------------------------------

    async fn dispatch_websocket(
        &mut self,
        stream: &mut TcpStream,
        client: SocketAddr,
        server: SocketAddr,
    ) -> Result<bool, ErrorKind> {
        let Some(key) = self.request.header(b"sec-websocket-key").map(|k| String::from_utf8_lossy(k).into_owned())
        else {
            self.send_error(stream, ErrorKind::InvalidHeader).await;
            return Ok(false);
        };

        let subprotocols = self
            .request
            .header(b"sec-websocket-protocol")
            .map(|v| String::from_utf8_lossy(v).split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let scope = Scope::WebSocket(WebSocketScope {
            scheme: if self.tls.is_some() { WsScheme::Wss } else { WsScheme::Ws },
            path: percent_decode(self.request.url().path()),
            raw_path: String::from_utf8_lossy(self.request.url().path()).into_owned(),
            query_string: self.request.url().query_full().unwrap_or(b"").to_vec(),
            headers: self.request_headers(),
            subprotocols,
            client: Self::endpoint(client),
            server: Self::endpoint(server),
            pagi: PagiMeta::new(self.event_loop),
            state: self.lifespan_state.clone(),
            extensions: self.extensions(),
        });

        let (join, in_tx, mut out_rx) = bridge::spawn(Arc::clone(&self.handler), scope, self.limits.ws.max_receive_queue);
        let _ = in_tx.send(InEvent::WebSocketConnect).await;

        let mut guard = WsSendGuard::default();
        match out_rx.recv().await {
            Some(event @ OutEvent::WebSocketAccept { ref subprotocol, ref headers }) => {
                let _ = guard.validate(&event);
                self.response.version = Version::Http11;
                self.response.keep_alive = true;
                self.response.status(StatusCode::SwitchingProtocols);
                self.response.header("upgrade", "websocket");
                self.response.header("connection", "Upgrade");
                self.response.header("sec-websocket-accept", ws::accept_key(&key));
                if let Some(subprotocol) = subprotocol {
                    self.response.header("sec-websocket-protocol", subprotocol.as_str());
                }
                for (name, value) in headers {
                    self.response.header(name.as_str(), value.as_str());
                }
                self.response.body(b"" as &[u8]);
                self.flush(stream).await?;
            }
            _ => {
                self.send_error(stream, ErrorKind::UnsupportedScopeType).await;
                let _ = join.await;
                return Ok(false);
            }
        }

        let mut socket_buf = vec![0u8; self.limits.ws.max_frame_size.min(64 * 1024) + 256];
        let mut pending = Vec::new();
        let mut assembler = ws::FragmentAssembler::new();

        loop {
            tokio::select! {
                biased;

                event = out_rx.recv() => {
                    match event {
                        Some(event) => {
                            if guard.validate(&event).is_err() {
                                continue;
                            }
                            match event {
                                OutEvent::WebSocketSend(message) => {
                                    let mut out = Vec::new();
                                    match message {
                                        WsMessage::Text(text) => ws::serialize_text(&text, &mut out),
                                        WsMessage::Bytes(data) => ws::serialize_binary(&data, &mut out),
                                    }
                                    write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await?;
                                }
                                OutEvent::WebSocketClose { code, reason } => {
                                    let mut out = Vec::new();
                                    ws::serialize_close(code, reason.as_deref().unwrap_or(""), &mut out);
                                    let _ = write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await;
                                    break;
                                }
                                _ => {}
                            }
                        }
                        None => break,
                    }
                }

                read_result = stream.read(&mut socket_buf) => {
                    let n = read_result?;
                    if n == 0 {
                        break;
                    }
                    pending.extend_from_slice(&socket_buf[..n]);

                    loop {
                        match ws::parse_frame(&pending, self.limits.ws.max_frame_size) {
                            ws::ParseOutcome::NeedMore => break,
                            ws::ParseOutcome::Error(err) => {
                                let mut out = Vec::new();
                                ws::serialize_close(err.close_code(), err.reason(), &mut out);
                                let _ = write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await;
                                drop(in_tx);
                                let _ = join.await;
                                return Ok(false);
                            }
                            ws::ParseOutcome::Frame(frame, consumed) => {
                                pending.drain(..consumed);
                                match frame.opcode {
                                    ws::OpCode::Ping => {
                                        let mut out = Vec::new();
                                        ws::serialize_pong(&frame.payload, &mut out);
                                        write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await?;
                                    }
                                    ws::OpCode::Pong => {}
                                    ws::OpCode::Close => {
                                        let code = frame
                                            .payload
                                            .get(0..2)
                                            .map(|b| u16::from_be_bytes([b[0], b[1]]))
                                            .unwrap_or(1000);
                                        let _ = in_tx.send(InEvent::WebSocketDisconnect { code }).await;
                                        let mut out = Vec::new();
                                        ws::serialize_close(code, "", &mut out);
                                        let _ = write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await;
                                        drop(in_tx);
                                        let _ = join.await;
                                        return Ok(false);
                                    }
                                    ws::OpCode::Text | ws::OpCode::Binary | ws::OpCode::Continuation => {
                                        match assembler.push(frame) {
                                            Ok(Some(message)) => {
                                                if in_tx.try_send(InEvent::WebSocketReceive(message)).is_err() {
                                                    let mut out = Vec::new();
                                                    let err = ws::WsError::QueueOverflow;
                                                    ws::serialize_close(err.close_code(), err.reason(), &mut out);
                                                    let _ = write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await;
                                                    drop(in_tx);
                                                    let _ = join.await;
                                                    return Ok(false);
                                                }
                                            }
                                            Ok(None) => {}
                                            Err(err) => {
                                                let mut out = Vec::new();
                                                ws::serialize_close(err.close_code(), err.reason(), &mut out);
                                                let _ = write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await;
                                                drop(in_tx);
                                                let _ = join.await;
                                                return Ok(false);
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        drop(in_tx);
        let _ = join.await;
        Ok(false)
    }

    // ---- Server-Sent Events ---------------------------------------------

    async fn dispatch_sse(
        &mut self,
        stream: &mut TcpStream,
        client: SocketAddr,
        server: SocketAddr,
    ) -> Result<bool, ErrorKind> {
        let scope = Scope::Sse(SseScope {
            scheme: if self.tls.is_some() { HttpScheme::Https } else { HttpScheme::Http },
            path: percent_decode(self.request.url().path()),
            raw_path: String::from_utf8_lossy(self.request.url().path()).into_owned(),
            query_string: self.request.url().query_full().unwrap_or(b"").to_vec(),
            headers: self.request_headers(),
            client: Self::endpoint(client),
            server: Self::endpoint(server),
            pagi: PagiMeta::new(self.event_loop),
            state: self.lifespan_state.clone(),
            extensions: self.extensions(),
        });

        let (join, in_tx, mut out_rx) = bridge::spawn(Arc::clone(&self.handler), scope, 4);
        let mut guard = SseSendGuard::default();
        let mut started = false;
        let mut socket_buf = [0u8; 256];

        loop {
            tokio::select! {
                biased;

                event = out_rx.recv() => {
                    match event {
                        Some(event) => {
                            if guard.validate(&event).is_err() {
                                continue;
                            }
                            match event {
                                OutEvent::SseStart { status, headers } => {
                                    started = true;
                                    self.response.version = Version::Http11;
                                    self.response.keep_alive = true;
                                    self.response.status(StatusCode::from_u16(status.unwrap_or(200)));
                                    self.response.header("content-type", sse::CONTENT_TYPE);
                                    self.response.header("cache-control", sse::CACHE_CONTROL);
                                    self.response.header("connection", "keep-alive");
                                    for (name, value) in headers {
                                        self.response.header(name.as_str(), value.as_str());
                                    }
                                    self.response.body_with(|_| {});
                                    self.flush(stream).await?;
                                }
                                OutEvent::SseSend { event, id, retry, data } => {
                                    let mut out = Vec::new();
                                    sse::write_event(event.as_deref(), id.as_deref(), retry, &data, &mut out)
                                        .map_err(|_| ErrorKind::InvalidHeader)?;
                                    write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await?;
                                }
                                OutEvent::SseComment { text } => {
                                    let mut out = Vec::new();
                                    sse::write_heartbeat(&text, &mut out);
                                    write_with_timeout(stream, &out, self.limits.conn.socket_write_timeout).await?;
                                }
                                _ => {}
                            }
                        }
                        None => break,
                    }
                }

                read_result = stream.read(&mut socket_buf) => {
                    let n = read_result.unwrap_or(0);
                    if n == 0 {
                        let _ = in_tx.send(InEvent::SseDisconnect).await;
                        break;
                    }
                }
            }
        }

        drop(in_tx);
        let _ = join.await;
        let _ = started;
        Ok(false)
    }
}

fn header_block_complete(buf: &[u8]) -> bool {
    memchr::memmem::find(buf, b"\r\n\r\n").is_some() || memchr::memmem::find(buf, b"\n\n").is_some()
}

/// Index just past the request line's terminating `\n` (accepting a bare
/// `\n` alongside `\r\n`, matching the parser's own `has_crlf` tolerance),
/// or `None` while the request line itself is still incomplete.
fn request_line_end(buf: &[u8]) -> Option<usize> {
    memchr::memchr(b'\n', buf).map(|i| i + 1)
}

fn is_websocket_upgrade(request: &Request) -> bool {
    if request.method() != Method::Get || !request.has_upgrade_connection {
        return false;
    }
    let Some(upgrade) = request.header(b"upgrade") else { return false };
    if !upgrade.eq_ignore_ascii_case(b"websocket") {
        return false;
    }
    request.header(b"sec-websocket-key").is_some_and(|key| !key.is_empty())
}

/// The SSE path is chosen for a plain GET whose `Accept` header names
/// `text/event-stream` — the objective, pre-dispatch trigger used in place
/// of "the application decides", since a [`Scope`] has to be built before
/// the handler runs (documented as a resolved open question in DESIGN.md).
fn is_sse_request(request: &Request) -> bool {
    request
        .header(b"accept")
        .is_some_and(|accept| contains_token(accept, b"text/event-stream"))
}

fn contains_token(haystack: &[u8], needle: &[u8]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    lower.windows(needle.len()).any(|w| w.eq_ignore_ascii_case(needle))
}

fn find_content_length(headers: &[(String, String)]) -> Option<usize> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse().ok())
}

fn choose_response_framing(
    head_only: bool,
    status: StatusCode,
    content_length: Option<usize>,
    trailers_requested: bool,
    version: Version,
) -> RespFraming {
    if head_only || status.suppresses_body() {
        return RespFraming::None;
    }
    if content_length.is_some() {
        return RespFraming::Identity;
    }
    if trailers_requested || version == Version::Http11 {
        return RespFraming::Chunked;
    }
    RespFraming::RawClose
}

/// Percent-decodes a path for `scope.path`; `scope.raw_path` keeps the
/// untouched bytes (spec.md §3 data model). Invalid escapes and invalid
/// UTF-8 fall back to a lossy decode rather than failing the request —
/// there is no "bad path" error in the framing decision tree.
fn percent_decode(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(raw[i + 1]), hex_digit(raw[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

async fn write_with_timeout(stream: &mut TcpStream, buf: &[u8], timeout: Duration) -> Result<(), ErrorKind> {
    tokio::select! {
        biased;

        result = stream.write_all(buf) => Ok(result?),
        _ = sleep(timeout) => Err(ErrorKind::Io(IoError(io::Error::new(io::ErrorKind::TimedOut, "write timeout")))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_block_complete_detects_both_line_endings() {
        assert!(header_block_complete(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(header_block_complete(b"GET / HTTP/1.1\n\n"));
        assert!(!header_block_complete(b"GET / HTTP/1.1\r\nHost: x\r\n"));
    }

    #[test]
    fn request_line_end_distinguishes_line_from_block_boundary() {
        assert_eq!(request_line_end(b"GET / HTTP/1.1\r\n"), Some(16));
        assert_eq!(request_line_end(b"GET / HTTP/1.1\n"), Some(15));
        assert_eq!(request_line_end(b"GET / HTTP/1.1 still-going"), None);
    }

    #[test]
    fn percent_decode_handles_escapes_and_invalid_sequences() {
        assert_eq!(percent_decode(b"/a%20b"), "/a b");
        assert_eq!(percent_decode(b"/a%2"), "/a%2");
        assert_eq!(percent_decode(b"/plain"), "/plain");
    }

    #[test]
    fn response_framing_follows_decision_tree() {
        assert_eq!(
            choose_response_framing(true, StatusCode::Ok, Some(10), false, Version::Http11),
            RespFraming::None
        );
        assert_eq!(
            choose_response_framing(false, StatusCode::NoContent, None, false, Version::Http11),
            RespFraming::None
        );
        assert_eq!(
            choose_response_framing(false, StatusCode::Ok, Some(10), false, Version::Http11),
            RespFraming::Identity
        );
        assert_eq!(
            choose_response_framing(false, StatusCode::Ok, None, false, Version::Http11),
            RespFraming::Chunked
        );
        assert_eq!(
            choose_response_framing(false, StatusCode::Ok, None, false, Version::Http10),
            RespFraming::RawClose
        );
    }
}
