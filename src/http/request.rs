use crate::{
    errors::ErrorKind,
    http::types::{self, Header, HeaderMap, Method, Url, Version},
    limits::ReqLimits,
    query::Query,
};
use memchr::{memchr, memchr_iter};
use std::{io, mem, time::Duration};
use tokio::{io::AsyncReadExt, net::TcpStream, time::sleep};

/// How the request body is framed, per RFC 7230 §3.3.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// No body (no `Content-Length`, no `Transfer-Encoding`).
    None,
    /// `Content-Length: N` — exactly `N` bytes follow.
    Identity(usize),
    /// `Transfer-Encoding: chunked` — chunk-size-prefixed frames, then trailers.
    Chunked,
}

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance.
/// Head fields are zero-copy referenced from the connection's read buffer;
/// the body (assembled separately, possibly across several socket reads and,
/// for chunked requests, several frames) is owned.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    /// Whether the connection should stay open after this response, per
    /// the `Connection` header policy (§4.2). Copied onto the eventual
    /// response by the caller — parsing has no `Response` to write into.
    pub(crate) keep_alive: bool,
    /// Whether the request's `Connection` header carried an `upgrade`
    /// token (spec.md §4.4 upgrade detection uses this alongside the
    /// `Upgrade`/`Sec-WebSocket-Key` headers).
    pub(crate) has_upgrade_connection: bool,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    pub(crate) framing: BodyFraming,
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            keep_alive: true,
            has_upgrade_connection: false,
            headers: HeaderMap::new(limits.header_count),
            body: None,
            framing: BodyFraming::None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.keep_alive = true;
        self.has_upgrade_connection = false;
        self.headers.reset();
        self.body = None;
        self.framing = BodyFraming::None;
    }

    #[inline(always)]
    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.body = Some(body);
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Iterates over every header in receipt order.
    #[inline]
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter()
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the fully assembled request body, if the request had one.
    ///
    /// For chunked requests this is the dechunked payload with trailers
    /// stripped.
    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    pub(crate) position: usize,
    pub(crate) len: usize,
    pub(crate) has_crlf: bool,
    pub(crate) buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.head_buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.head_buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                let n = read_result?;
                self.len += n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    // Search level
    #[inline]
    pub(crate) fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        let slice = self.get_slice(last_index, step)?;
        Some(slice)
    }

    #[inline]
    pub(crate) fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    // Low level
    #[inline(always)]
    pub(crate) fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    pub(crate) fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    pub(crate) fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    pub(crate) fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references for tokio integration,
    // which become invalid after Request cleanup.
    // Parser: 'static (lives for entire program lifetime), buffer cleared via .fill(0).
    // Memory remains valid even if user holds references.
    pub(crate) const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        // Second `unsafe` for integration with the 2024 edition
        unsafe { mem::transmute(src) }
    }

    /// Bytes already sitting in the head buffer past the parsed headers —
    /// the start of the body (or of the first chunk line), already read off
    /// the socket in the same `fill_buffer` call that got the headers.
    #[inline]
    pub(crate) fn leftover_head_bytes(&self) -> &[u8] {
        &self.buffer[self.position..self.len]
    }
}

// Parsing — operates on a `Parser` (the connection's read buffer) and fills
// in a `Request`. Kept as free methods on `Parser` rather than tied to any
// particular connection type, so the connection task can drive parsing
// without owning a response builder.
impl Parser {
    /// Parses the request line and headers, leaving body assembly
    /// (identity read or chunked decode) to the connection loop, which owns
    /// the socket and can perform the extra reads a body may require.
    #[inline]
    pub(crate) fn parse_head(
        &mut self,
        request: &mut Request,
        limits: &ReqLimits,
    ) -> Result<Version, ErrorKind> {
        self.parse_method(request)?;
        self.parse_url(request, limits)?;
        self.check_version(request)?;
        self.parse_headers(request, limits)?;
        self.check_framing(request)?;

        Ok(request.version)
    }

    #[inline]
    fn parse_method(&mut self, request: &mut Request) -> Result<(), ErrorKind> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self.get_slice(0, 8).ok_or(ErrorKind::InvalidMethod)?;

        (request.method, self.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    // Cannot replace with `get_slice` or `find_slice` method
    // due to ownership error. And there is no need to use `into_static`
    fn parse_url(&mut self, request: &mut Request, limits: &ReqLimits) -> Result<(), ErrorKind> {
        let posit = self
            .find_char(limits.precalc.head_buffer, b' ')
            .ok_or(ErrorKind::InvalidUrl)?;
        let start = self.position + 1;

        let parser = self;
        let url = &mut request.url;

        let mut last = 0;
        let start_pos = start + posit;
        let slice_url = &parser.buffer[start..start_pos];

        if slice_url.is_empty() || parser.buffer[start - 1] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        for index in memchr_iter(b'/', slice_url) {
            if url.parts.len() == limits.url_parts {
                return Err(ErrorKind::InvalidUrl);
            }

            let slice_part = parser
                .get_slice_static(start + last, index - last)
                .ok_or(ErrorKind::InvalidUrl)?;

            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
            last = index + 1;
        }

        let range = [start + last, (posit - last).saturating_sub(1)];
        let (end, url_middle) = match parser.find_char(posit, b'?') {
            Some(q_pos) => {
                let slice = parser
                    .get_slice_static(q_pos, (range[0] + range[1]).saturating_sub(q_pos))
                    .ok_or(ErrorKind::InvalidUrl)?;
                let limit = url.query_parts.capacity();

                Query::parse_into(&mut url.query_parts, slice, limit)?;
                url.query = Some(slice);

                (q_pos, q_pos)
            }
            None => (posit, posit),
        };

        let slice = parser
            .get_slice_static(range[0], (parser.position + end).saturating_sub(range[0]))
            .ok_or(ErrorKind::InvalidUrl)?;

        if !slice.is_empty() {
            url.parts.push(slice);
        }

        url.path = parser
            .get_slice_static(parser.position, url_middle)
            .ok_or(ErrorKind::InvalidUrl)?;
        url.target = parser
            .get_slice_static(parser.position, posit)
            .ok_or(ErrorKind::InvalidUrl)?;

        parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self, request: &mut Request) -> Result<(), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self.find_slice(10, b'\n').ok_or(ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion);
        }

        (request.version, request.keep_alive) = Version::from_bytes(&slice[..8])?;

        // Check for the use of the '\r' character
        self.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }

    #[inline]
    fn parse_headers(&mut self, request: &mut Request, limits: &ReqLimits) -> Result<(), ErrorKind> {
        let mut header_block_len = 0usize;

        for _ in 0..=limits.header_count {
            let start = self.position;
            let Some(header) = self.parse_header(limits)? else {
                return Ok(());
            };
            header_block_len += self.position - start;

            if header_block_len > limits.max_header_size {
                return Err(ErrorKind::HeaderBlockTooLarge);
            }

            if !self.parse_special_header(request, limits, &header)? {
                request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::TooManyHeaders)
    }

    #[inline]
    fn parse_header(&mut self, limits: &ReqLimits) -> Result<Option<Header>, ErrorKind> {
        // HeaderName: Someone=data\r\n
        //                            |
        let end = self
            .find_char(limits.precalc.h_line, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;

        match self.get_slice(self.position + end - 1, 2) {
            Some([b'\r', b'\n']) if self.has_crlf => {}
            Some([_, b'\n']) if !self.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = self.find_char(end, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if self.get_slice(self.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader);
        }

        let value_start = split + 2;
        let len_value = end - value_start - self.has_crlf as usize;

        if split > limits.header_name_size || len_value > limits.header_value_size {
            return Err(ErrorKind::InvalidHeader);
        }

        let name = {
            let name = self
                .get_slice_mut(self.position, split)
                .ok_or(ErrorKind::InvalidHeader)?;

            if name.is_empty() || !types::is_valid_token(name) {
                return Err(ErrorKind::InvalidHeader);
            }

            types::to_lower_case(name);
            unsafe { Self::into_static(name) }
        };

        let value = self
            .get_slice_static(self.position + value_start, len_value)
            .ok_or(ErrorKind::InvalidHeader)?;

        self.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(
        &mut self,
        request: &mut Request,
        limits: &ReqLimits,
        header: &Header,
    ) -> Result<bool, ErrorKind> {
        match header.name {
            b"content-length" => self.parse_content_length(request, limits, header.value),
            b"transfer-encoding" => self.parse_transfer_encoding(request, header.value),
            b"connection" => self.parse_connection(request, header.value),
            _ => return Ok(false),
        }
        .map(|_| true)
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = self
            .get_slice(self.position + start - 3, 4)
            .ok_or(ErrorKind::InvalidHeader)?;

        if !match self.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader);
        }

        self.position += self.has_crlf as usize + 1;

        Ok(())
    }

    #[inline]
    fn parse_content_length(
        &mut self,
        request: &mut Request,
        limits: &ReqLimits,
        value: &[u8],
    ) -> Result<(), ErrorKind> {
        // RFC 7230 §3.3.2/§3.3.3: reject non-digit values outright (no
        // leading `+`/whitespace/sign tolerated) and multiple differing
        // Content-Length values.
        if value.is_empty() || value.len() > 19 || value.iter().any(|b| !b.is_ascii_digit()) {
            return Err(ErrorKind::InvalidContentLength);
        }

        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;

        // spec.md: a Content-Length value must be within [0, 2^31-1]
        // regardless of the configurable `body_size` cap (which defaults to
        // `usize::MAX` and would otherwise let an 11-19 digit value through).
        if len > 2_147_483_647 {
            return Err(ErrorKind::InvalidContentLength);
        }

        if let Some(existing) = request.headers.content_length {
            if existing != len {
                return Err(ErrorKind::InvalidContentLength);
            }
        }
        if matches!(request.framing, BodyFraming::Chunked) {
            return Err(ErrorKind::AmbiguousFraming);
        }

        if len > limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        request.headers.content_length = Some(len);
        request.framing = BodyFraming::Identity(len);
        Ok(())
    }

    #[inline]
    fn parse_transfer_encoding(&mut self, request: &mut Request, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 16];
        let len = types::into_lower_case(value, &mut normalized);

        // Only `chunked` is accepted; any other (or additional) coding is
        // rejected rather than silently ignored, per RFC 7230 §3.3.1.
        if &normalized[..len] != b"chunked" {
            return Err(ErrorKind::InvalidHeader);
        }

        if request.headers.content_length.is_some() {
            return Err(ErrorKind::AmbiguousFraming);
        }

        request.framing = BodyFraming::Chunked;
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, request: &mut Request, value: &[u8]) -> Result<(), ErrorKind> {
        // `Connection` is a comma-separated list of tokens (RFC 7230 §6.1),
        // not a single value: a WebSocket upgrade sends `keep-alive, Upgrade`
        // or just `Upgrade`. Unrecognized tokens (hop-by-hop header names)
        // are ignored rather than rejected.
        let mut saw_token = false;
        for token in value.split(|&b| b == b',') {
            let token = trim_ascii(token);
            if token.is_empty() {
                continue;
            }
            saw_token = true;
            if token.eq_ignore_ascii_case(b"keep-alive") {
                request.keep_alive = true;
            } else if token.eq_ignore_ascii_case(b"close") {
                request.keep_alive = false;
            } else if token.eq_ignore_ascii_case(b"upgrade") {
                request.has_upgrade_connection = true;
            }
        }

        if !saw_token {
            return Err(ErrorKind::InvalidConnection);
        }
        Ok(())
    }

    // Determine framing only; the connection loop performs the actual body read.
    #[inline]
    fn check_framing(&mut self, request: &mut Request) -> Result<(), ErrorKind> {
        if matches!(request.framing, BodyFraming::None) {
            let remaining = self.len - self.position;
            if remaining != 0 {
                return Err(ErrorKind::UnexpectedBody(remaining));
            }
        }
        Ok(())
    }
}

/// Incremental chunked-transfer-coding decoder (RFC 7230 §4.1).
///
/// Decodes chunks as bytes become available so the connection loop can ask
/// for more socket bytes between chunks without re-parsing from the start.
#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    body: Vec<u8>,
    state: ChunkState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataCrlf,
    Trailers,
    Done,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        Self {
            body: Vec::new(),
            state: ChunkState::Size,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub(crate) fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Consumes as many complete chunks as are present in `input`, returning
    /// the number of bytes consumed. Call repeatedly as more bytes arrive
    /// until [`is_done`](Self::is_done).
    pub(crate) fn feed(&mut self, input: &[u8], max_body: usize) -> Result<usize, ErrorKind> {
        let mut pos = 0;

        loop {
            match self.state {
                ChunkState::Done => return Ok(pos),
                ChunkState::Size => {
                    let Some(nl) = memchr(b'\n', &input[pos..]) else {
                        return Ok(pos);
                    };
                    let mut line = &input[pos..pos + nl];
                    if line.last() == Some(&b'\r') {
                        line = &line[..line.len() - 1];
                    }
                    // chunk extensions ("1a;ext=value") are accepted and ignored.
                    let size_part = memchr(b';', line).map(|i| &line[..i]).unwrap_or(line);
                    let size = parse_hex(size_part).ok_or(ErrorKind::InvalidChunkSize)?;

                    pos += nl + 1;
                    if self.body.len() + size > max_body {
                        return Err(ErrorKind::BodyTooLarge);
                    }
                    self.state = match size {
                        0 => ChunkState::Trailers,
                        n => ChunkState::Data(n),
                    };
                }
                ChunkState::Data(remaining) => {
                    let available = input.len() - pos;
                    let take = remaining.min(available);
                    self.body.extend_from_slice(&input[pos..pos + take]);
                    pos += take;

                    if take == remaining {
                        self.state = ChunkState::DataCrlf;
                    } else {
                        self.state = ChunkState::Data(remaining - take);
                        return Ok(pos);
                    }
                }
                ChunkState::DataCrlf => {
                    if input.len() - pos < 2 {
                        return Ok(pos);
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(ErrorKind::InvalidChunkSize);
                    }
                    pos += 2;
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    // Trailer header block, terminated by a bare CRLF line.
                    // Trailer field values are not surfaced to the
                    // application (non-goal: no mid-stream header API).
                    let Some(nl) = memchr(b'\n', &input[pos..]) else {
                        return Ok(pos);
                    };
                    let line_end = pos + nl;
                    let is_blank = matches!(&input[pos..line_end], [] | [b'\r']);
                    pos = line_end + 1;

                    if is_blank {
                        self.state = ChunkState::Done;
                        return Ok(pos);
                    }
                }
            }
        }
    }
}

#[inline]
fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

#[inline]
fn parse_hex(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: usize = 0;
    for &b in bytes {
        let digit = (b as char).to_digit(16)? as usize;
        value = value.checked_mul(16)?.checked_add(digit)?;
    }
    Some(value)
}

#[cfg(test)]
pub(crate) struct TestReq {
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) limits: ReqLimits,
}

#[cfg(test)]
impl TestReq {
    pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
        let limits = ReqLimits::default().precalculate();
        Self {
            parser: Parser::from(&limits, value),
            request: Request::new(&limits),
            limits,
        }
    }

    pub(crate) fn parse_head(&mut self) -> Result<Version, ErrorKind> {
        self.parser.parse_head(&mut self.request, &self.limits)
    }

    pub(crate) fn parse_method(&mut self) -> Result<(), ErrorKind> {
        self.parser.parse_method(&mut self.request)
    }

    pub(crate) fn parse_url(&mut self) -> Result<(), ErrorKind> {
        self.parser.parse_url(&mut self.request, &self.limits)
    }

    pub(crate) fn check_version(&mut self) -> Result<(), ErrorKind> {
        self.parser.check_version(&mut self.request)
    }

    pub(crate) fn parse_header(&mut self) -> Result<Option<Header>, ErrorKind> {
        self.parser.parse_header(&self.limits)
    }

    pub(crate) fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        self.parser.parse_headers(&mut self.request, &self.limits)
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t = TestReq::from_req("OPTIONS /qwe&q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse_head(), Ok(Version::Http10));
        t.request.reset();
        assert_eq!(Request::new(&limits), t.request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GET",        None),
            ("PYU ",       None),
            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let mut t = TestReq::from_req(method);

            if let Some(expected) = expected {
                assert_eq!(t.parse_method(), Ok(()));
                assert_eq!(t.request.method(), expected);
            } else {
                assert_eq!(t.parse_method(), Err(ErrorKind::InvalidMethod));
            }
        }
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",             Some((vec![], vec![]))),
            ("/// ",           Some((vec![], vec![]))),
            ("/? ",            Some((vec![], vec![]))),
            ("/?/ ",           Some((vec!["?"], vec![]))),
            ("/?? ",           Some((vec![], vec![]))),
            ("/???? ",         Some((vec![], vec![]))),

            ("/api/user ",     Some((vec!["api", "user"], vec![]))),
            ("///api//user ",  Some((vec!["api", "user"], vec![]))),
            ("/api/qwe/name/len ",  Some((vec!["api", "qwe", "name", "len"], vec![]))),
            ("/api//user/// ", Some((vec!["api", "user"], vec![]))),
            ("/api//user//? ", Some((vec!["api", "user"], vec![]))),

            ("/api ",          Some((vec!["api"], vec![]))),
            ("///api ",        Some((vec!["api"], vec![]))),
            ("/api// ",        Some((vec!["api"], vec![]))),
            ("//api///? ",     Some((vec!["api"], vec![]))),

            (
                "/api/find?user=qwe&id=223 ", Some((vec!["api", "find"],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?user=qwe&id=223 ", Some((vec![],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?debug&name=&=Qwe&key=sda&&id=123 ", Some((vec![],
                    vec![
                        ("debug", ""), ("name", ""), ("", "Qwe"),
                        ("key", "sda"), ("", "Qwe"), ("id", "123")
                    ]
                ))
            ),
            (
                "/?a=1&a=2&a=3 ",
                Some((vec![], vec![("a", "1"), ("a", "1"), ("a", "1")]))
            ),
            (
                "/?very=long=value=with=equals ",
                Some((vec![], vec![("very", "long=value=with=equals")]))
            ),

            ("qwe ",           None),
            (" ",              None),
            ("qwe/qwe ",       None),
            ("/qwe",           None),
        ];

        for (url, expected) in cases {
            let mut t = TestReq::from_req(url);

            if let Some((url, query)) = expected {
                assert_eq!(t.parse_url(), Ok(()));

                url.iter().enumerate().for_each(|(i, value)| {
                    assert_eq!(str(t.request.url().path_segment(i)), Some(*value));
                });
                assert_eq!(str(t.request.url().path_segment(url.len())), None);

                query.iter().for_each(|(name, value)| {
                    assert_eq!(str(t.request.url().query(name.as_bytes())), Some(*value));
                });
            } else {
                assert_eq!(t.parse_url(), Err(ErrorKind::InvalidUrl));
            }
        }
    }

    #[test]
    fn parse_url_full() {
        let mut t = TestReq::from_req("/api/users/123?sort=name&debug ");
        let segments = &[b"api" as &[u8], b"users" as &[u8], b"123" as &[u8]] as &[&[u8]];

        assert_eq!(t.parse_url(), Ok(()));

        assert_eq!(
            str_op(t.request.url().target()),
            "/api/users/123?sort=name&debug"
        );
        assert_eq!(str_op(t.request.url().path()), "/api/users/123");

        assert!(t.request.url().matches(segments));
        assert!(t.request.url().starts_with(segments));
        assert!(t.request.url().starts_with(&segments[..1]));
        assert!(t.request.url().starts_with(&[]));
        assert!(t.request.url().ends_with(segments));
        assert!(t.request.url().ends_with(&segments[1..]));
        assert!(t.request.url().ends_with(&[]));

        assert_eq!(t.request.url().path_segments(), segments);
        assert_eq!(str(t.request.url().path_segment(0)), Some("api"));
        assert_eq!(str(t.request.url().path_segment(1)), Some("users"));
        assert_eq!(str(t.request.url().path_segment(2)), Some("123"));
        assert_eq!(str(t.request.url().path_segment(3)), None);

        assert_eq!(str(t.request.url().query_full()), Some("?sort=name&debug"));
        assert_eq!(str(t.request.url().query(b"sort")), Some("name"));
        assert_eq!(str(t.request.url().query(b"debug")), Some(""));
    }

    #[test]
    fn check_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, true))),
            ("HTTP/1.1\n",     Ok((Version::Http11, false))),
            ("HTTP/1.0\n",     Ok((Version::Http10, false))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("HTTP/0.9\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r \n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.0\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.\n",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1 ",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1",       Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.",        Err(ErrorKind::InvalidVersion)),
            ("\r\n",           Err(ErrorKind::InvalidVersion)),
            ("\r",             Err(ErrorKind::InvalidVersion)),
            ("\n",             Err(ErrorKind::InvalidVersion)),
            (" ",              Err(ErrorKind::InvalidVersion)),
            ("",               Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let mut t = TestReq::from_req(value);

            if let Ok((version, has_crlf)) = expected {
                assert_eq!(t.check_version(), Ok(()));

                assert_eq!(t.request.version, version);
                assert_eq!(t.parser.has_crlf, has_crlf);

                match t.request.version {
                    Version::Http11 => assert!(t.request.keep_alive),
                    Version::Http10 => assert!(!t.request.keep_alive),
                }
            } else if let Err(e) = expected {
                assert_eq!(t.check_version(), Err(e));
            }
        }
    }

    #[test]
    fn parse_header() {
        #[rustfmt::skip]
        let cases = [
            (true,  "HEADER: value\r\n", Some(("header", "value"))),
            (true,  "Header: value\r\n", Some(("header", "value"))),
            (true,  "header: value\r\n", Some(("header", "value"))),
            (true,  "header: \r\n",      Some(("header", ""))),

            (false, "HEADER: value\n",   Some(("header", "value"))),
            (false, "Header: value\n",   Some(("header", "value"))),
            (false, "header: value\n",   Some(("header", "value"))),
            (false, "header: \n",        Some(("header", ""))),
            (true,  "Header : v\r\n",    Some(("header ", "v"))),
            (false, "Header : v\n",      Some(("header ", "v"))),

            (true,  "Header: value\r",   None),
            (false, "Header: value\r",   None),
            (true,  "Header: value",     None),
            (false, "Header: value",     None),
            (true,  "header:value\n",    None),
            (false, "header:value\n",    None),
            (true,  "header:\n",         None),
            (false, "header:\n",         None),
            (true,  ": value\r\n",       None),
            (false, ": value\r\n",       None),
            (true,  ": \r\n",            None),
            (false, ": \r\n",            None),
            (true,  ": value\n",         None),
            (false, ": value\n",         None),
            (true,  ": \n",              None),
            (false, ": \n",              None),

            (false, "HEADER: value\r\n", Some(("header", "value\r"))),
            (false, "Header: value\r\n", Some(("header", "value\r"))),
            (false, "header: value\r\n", Some(("header", "value\r"))),
            (false, "header: \r\n",      Some(("header", "\r"))),
        ];

        for (has_crlf, header, expected) in cases {
            let mut t = TestReq::from_req(header);
            t.parser.has_crlf = has_crlf;

            if let Some((name, value)) = expected {
                let header = t.parse_header().unwrap().unwrap();

                assert_eq!(str_op(header.name), name);
                assert_eq!(str_op(header.value), value);
            } else {
                assert_eq!(t.parse_header(), Err(ErrorKind::InvalidHeader));
            }
        }
    }

    #[test]
    fn parse_headers() {
        #[rustfmt::skip]
        let cases = [
            (
                true, "HEADER: value\r\n\r\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                false, "HEADER: value\n\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                true, "HEADER: value\r\nQwE: value\r\nasd: value\r\n\r\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                false, "HEADER: value\nQwE: value\nasd: value\n\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                true, "Empty-Value: \r\n\r\n",
                Some((vec!["empty-value"], "")),
            ),
            (
                true, "Space-Value:   \r\n\r\n",
                Some((vec!["space-value"], "  ")),
            ),
            (
                true, "Multi: value1\r\nMulti: value2\r\n\r\n",
                Some((vec!["multi"], "value1")),
            ),

            (true, ": empty-name\r\n\r\n", None),
            (true, "No-Colon value\r\n\r\n", None),
            (
                true, "Valid: ok\r\nInvalidname\r\nNext: value\r\n\r\n",
                None,
            ),
            (true, "Header: value\n\n", None),
        ];

        for (has_crlf, headers, expected) in cases {
            let mut t = TestReq::from_req(headers);
            t.parser.has_crlf = has_crlf;

            if let Some((names, value)) = expected {
                assert_eq!(t.parse_headers(), Ok(()));

                for name in names {
                    assert_eq!(str(t.request.header(name.as_bytes())), Some(value));
                }
            } else {
                assert_eq!(t.parse_headers(), Err(ErrorKind::InvalidHeader));
            }
        }
    }

    #[test]
    fn parse_special_header() {
        #[rustfmt::skip]
        let cases = [
            ("content-length: 1256\n\n", Ok((Some(1256), None))),
            ("content-length: 4096\n\n", Ok((Some(4096), None))),
            (
                "content-length: 1256\nconnection: keep-alive\n\n",
                Ok((Some(1256), Some(true)))
            ),
            ("connection: keep-alive\n\n", Ok((None, Some(true)))),
            (
                "content-length: 1256\nconnection: close\n\n",
                Ok((Some(1256), Some(false)))
            ),
            ("connection: close\n\n", Ok((None, Some(false)))),


            ("connection: keep_alive\n\n", Err(ErrorKind::InvalidConnection)),
            ("connection: qwerrew\n\n", Err(ErrorKind::InvalidConnection)),
            ("content-length: 12asd\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 123u64\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 4097\n\n", Err(ErrorKind::BodyTooLarge)),
            ("content-length: 123.9435\n\n", Err(ErrorKind::InvalidContentLength)),
            (
                "content-length: 999999999999999999999\n\n",
                Err(ErrorKind::InvalidContentLength)
            ),
            // 2^31-1 is the largest value the protocol accepts regardless
            // of the configurable body-size cap (spec.md Testable Property #5).
            ("content-length: 2147483648\n\n", Err(ErrorKind::InvalidContentLength)),
            (
                "content-length: 5\ntransfer-encoding: chunked\n\n",
                Err(ErrorKind::AmbiguousFraming),
            ),
        ];

        for (headers, result) in cases {
            let mut t = TestReq::from_req(headers);

            if let Ok((content_length, keep_alive)) = result {
                assert_eq!(t.parse_headers(), Ok(()));
                assert!(t.request.headers.headers.is_empty());

                if let Some(len) = content_length {
                    assert_eq!(t.request.headers.content_length, Some(len));
                }
                if let Some(keep_alive) = keep_alive {
                    assert_eq!(t.request.keep_alive, keep_alive);
                }
            } else if let Err(e) = result {
                assert_eq!(t.parse_headers(), Err(e));
            }
        }
    }

    macro_rules! parse_request {
        ($cases:expr) => {
            for (req, result) in $cases {
                let mut t = TestReq::from_req(req);

                if let Ok(result) = result {
                    assert_eq!(t.parse_head(), Ok(result.2));

                    assert_eq!(t.request.method(), result.0);
                    assert_eq!(str_op(t.request.url().target()), result.1);
                    assert_eq!(t.request.version, result.2);

                    for (name, value) in result.3 {
                        assert_eq!(
                            str(t.request.header(name.as_bytes())),
                            Some(value.to_string()).as_deref()
                        );
                    }
                    assert_eq!(t.request.keep_alive, result.4);
                } else if let Err(e) = result {
                    assert_eq!(t.parse_head(), Err(e));
                }
            }
        };
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/", Version::Http11, vec![], true)),
            ),
            (
                "GET /api/qwe/name/len/qwe HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/api/qwe/name/len/qwe", Version::Http11, vec![], true)),
            ),
            (
                "GET / HTTP/1.1\n\n",
                Ok((Method::Get, "/", Version::Http11, vec![], true)),
            ),
            (
                "POST /test HTTP/1.1\r\nHOST: 127.0.0.1\r\n\r\n",
                Ok((
                    Method::Post, "/test", Version::Http11,
                    vec![("host", "127.0.0.1")], true,
                )),
            ),
            (
                "HEAD / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
                Ok((Method::Head, "/", Version::Http11, vec![], true)),
            ),
            (
                "OPTIONS / HTTP/1.1\r\nCoNNEctIon: close\r\n\r\n",
                Ok((Method::Options, "/", Version::Http11, vec![], false)),
            ),
            (
                "GET / HTTP/1.0\r\n\r\n",
                Ok((Method::Get, "/", Version::Http10, vec![], false)),
            ),
            (
                "GET /file HTTP/1.1\ncontent-length: 12\n\nHello world!",
                Ok((Method::Get, "/file", Version::Http11, vec![], true)),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                " GET/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidMethod),
            ),
            ("GET", Err(ErrorKind::InvalidMethod)),
            ("GET ", Err(ErrorKind::InvalidUrl)),
            ("GET  HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET /\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET /HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", Err(ErrorKind::InvalidVersion)),
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\n\r\n",
                Err(ErrorKind::InvalidHeader),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\nbody",
                Err(ErrorKind::BodyTooLarge),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: invalid\r\n\r\nbody",
                Err(ErrorKind::InvalidContentLength),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\nhello",
                Err(ErrorKind::AmbiguousFraming),
            ),
        ];

        parse_request! { cases }
    }
}

#[cfg(test)]
mod chunked_tests {
    use super::*;

    #[test]
    fn single_chunk() {
        let mut decoder = ChunkedDecoder::new();
        let input = b"5\r\nhello\r\n0\r\n\r\n";

        let consumed = decoder.feed(input, 1024).unwrap();
        assert_eq!(consumed, input.len());
        assert!(decoder.is_done());
        assert_eq!(decoder.into_body(), b"hello");
    }

    #[test]
    fn multi_chunk_with_extension() {
        let mut decoder = ChunkedDecoder::new();
        let input = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";

        let consumed = decoder.feed(input, 1024).unwrap();
        assert_eq!(consumed, input.len());
        assert!(decoder.is_done());
        assert_eq!(decoder.into_body(), b"Wikipedia");
    }

    #[test]
    fn split_across_feeds() {
        let mut decoder = ChunkedDecoder::new();

        let n1 = decoder.feed(b"5\r\nhel", 1024).unwrap();
        assert_eq!(n1, 3);
        assert!(!decoder.is_done());

        let n2 = decoder.feed(b"lo\r\n0\r\n\r\n", 1024).unwrap();
        assert_eq!(n2, 9);
        assert!(decoder.is_done());
        assert_eq!(decoder.into_body(), b"hello");
    }

    #[test]
    fn rejects_bad_chunk_size() {
        let mut decoder = ChunkedDecoder::new();
        assert_eq!(decoder.feed(b"zz\r\n", 1024), Err(ErrorKind::InvalidChunkSize));
    }

    #[test]
    fn rejects_oversized_body() {
        let mut decoder = ChunkedDecoder::new();
        assert_eq!(decoder.feed(b"10\r\n", 4), Err(ErrorKind::BodyTooLarge));
    }
}

#[cfg(test)]
mod parser {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::new(&limits);

        parser.position = 5;
        parser.len = 10;
        parser.has_crlf = true;
        parser.buffer[0] = b'X';

        parser.reset();

        assert_eq!(Parser::new(&limits), parser);
    }

    // Search level
    #[test]
    fn find_slice() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET / HTTP/1.1");

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"GET");
        assert_eq!(parser.position, 4);

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"/");

        assert_eq!(parser.find_slice(limits.precalc.head_buffer + 1, b' '), None);
        assert_eq!(parser.find_slice(0, b' '), None);
    }

    #[test]
    fn find_char() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"hello world\nnext line");

        assert_eq!(parser.find_char(20, b' '), Some(5));
        assert_eq!(parser.find_char(20, b'\n'), Some(11));
        assert_eq!(parser.find_char(5, b'x'), None);
        assert_eq!(parser.find_char(3, b'o'), None);
    }

    // Low level
    #[test]
    fn get_slice() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"test data here");

        assert_eq!(str(parser.get_slice(0, 4)), Some("test"));
        assert_eq!(str(parser.get_slice(5, 4)), Some("data"));
        assert_eq!(str(parser.get_slice(20, 5)), Some("\0\0\0\0\0"));
        assert_eq!(parser.get_slice(limits.precalc.head_buffer + 1, 10), None);
    }

    #[test]
    fn get_slice_mut() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"original");

        {
            let slice = parser.get_slice_mut(0, 8).unwrap();
            slice.copy_from_slice(b"modified");
        }

        assert_eq!(parser.get_slice(0, 8), Some(b"modified".as_ref()));
    }

    #[test]
    fn get_slice_static() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"static data");

        assert_eq!(str(parser.get_slice_static(0, 6)), Some("static"));
        assert_eq!(str(parser.get_slice_static(7, 4)), Some("data"));
        assert_eq!(str(parser.get_slice_static(20, 5)), Some("\0\0\0\0\0"));
        assert_eq!(parser.get_slice_static(limits.precalc.head_buffer + 1, 10), None);
    }

    #[test]
    fn update_position() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"some data");

        let old_pos = parser.update_position(4);
        assert_eq!(old_pos, 0);
        assert_eq!(parser.position, 5);

        let old_pos = parser.update_position(3);
        assert_eq!(old_pos, 5);
        assert_eq!(parser.position, 9);
    }

    // Unsafe level
    #[test]
    fn into_static() {
        let vec = vec![1, 2, 3];
        let mut vec_mut = vec.clone();

        let vec_static = unsafe { Parser::into_static(&vec_mut) };
        assert_eq!(vec_mut, vec_static);

        vec_mut[0] = 2;
        assert_eq!(vec_mut, vec_static);
    }

    // Other
    #[test]
    fn sequence_operations() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET /api/users HTTP/1.1");

        let method = parser.find_slice(10, b' ').unwrap();
        assert_eq!(method, b"GET");

        let path = parser.find_slice(15, b' ').unwrap();
        assert_eq!(path, b"/api/users");

        let version = parser.get_slice_static(parser.position, 8).unwrap();
        assert_eq!(version, b"HTTP/1.1");
    }
}
