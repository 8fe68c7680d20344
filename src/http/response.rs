//! Zero-allocation HTTP response head/body serialization.
//!
//! `Response` is the internal write-buffer engine the application bridge
//! drives to render a response: it knows how to lay out a status line,
//! validated headers, and (per the framing decision tree, spec §4.1) either
//! an identity body, a chunked body with optional trailers, or a raw
//! close-terminated body. The application never touches this type directly
//! — it only ever sends `http.response.*` events; the bridge translates
//! those events into calls here.

use crate::{
    errors::ErrorKind,
    http::types::{self, StatusCode, Version},
    limits::RespLimits,
};
use std::{borrow::Cow, rc::Rc, sync::Arc};

use self::write::WriteBuffer;

/// How the response body is framed on the wire, decided by the bridge from
/// the application's declared `Content-Length`, whether trailers were
/// requested, and the request's HTTP version (spec §4.1 framing tree).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// HEAD request or a status that forbids a body (1xx/204/304): no body
    /// bytes are ever written, whatever the application sends.
    None,
    /// `Content-Length` was supplied by the application; body bytes are
    /// written as-is and their count is checked against the declared value.
    Identity,
    /// No declared length, HTTP/1.1 (or trailers requested): `Transfer-Encoding: chunked`.
    Chunked,
    /// No declared length, HTTP/1.0: body bytes are written raw and the
    /// connection closes once the final chunk is sent.
    RawClose,
}

#[derive(Debug)]
pub(crate) struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Drains everything accumulated so far, leaving an empty buffer the
    /// caller can reuse for the next chunk without losing the response's
    /// other bookkeeping (version, keep-alive decision, state).
    #[inline(always)]
    pub(crate) fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

/// Methods that work regardless of framing.
impl Response {
    /// Forces the connection to close after this response.
    #[inline]
    #[track_caller]
    pub(crate) fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }
}

impl Response {
    /// Writes the status line. Must be the first call on a fresh response.
    #[inline]
    #[track_caller]
    pub(crate) fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.into_first_line(self.version));
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header to the response.
    ///
    /// Callers forwarding application-supplied header names/values MUST
    /// validate them with [`types::is_injection_free`] first — this method
    /// performs no validation of its own, matching the teacher's
    /// compile-time-literal usage; [`Response::begin`] does the validation
    /// for the dynamic (application-supplied) path.
    #[inline]
    #[track_caller]
    pub(crate) fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");
        value.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Sets the response body and finalizes the response in one shot.
    /// Used for the identity-framing path, where the full body is already
    /// assembled (its length is known and declared up front).
    #[inline]
    #[track_caller]
    pub(crate) fn body<T: WriteBuffer>(&mut self, data: T) {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body();
    }

    /// Builds the response body via a closure, for bodies assembled from
    /// several pieces without an intermediate allocation.
    #[inline]
    #[track_caller]
    pub(crate) fn body_with<F: FnOnce(&mut write::BodyWriter)>(&mut self, f: F) {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut write::BodyWriter(&mut self.buffer));
        self.end_body();
    }
}

impl Response {
    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) -> &mut Self {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        self.buffer.extend_from_slice(b"content-length: ");
        self.posit_length = self.buffer.len();
        self.buffer.extend_from_slice(b"0000000000\r\n\r\n");
        self.start_body = self.buffer.len();
        self
    }

    #[inline(always)]
    fn end_body(&mut self) {
        let body_len = self.buffer.len() - self.start_body;
        let (arr, _) = Response::number_to_bytes(body_len as u128);

        let target_range = self.posit_length..self.posit_length + 10;
        self.buffer[target_range].copy_from_slice(&arr[29..39]);
        self.state = ResponseState::Complete;
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => Some(b"close"),
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }

    #[inline]
    const fn hex_bytes(mut n: u64) -> ([u8; 16], usize) {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut buffer = [b'0'; 16];
        let mut i = 16;

        if n == 0 {
            return (buffer, 15);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = HEX[(n & 0xf) as usize];
            n >>= 4;
        }

        (buffer, i)
    }
}

/// Streaming path used by the application bridge: the status/header/header
/// count isn't known at compile time (it comes off the wire from
/// `http.response.start`), and the body may arrive as several
/// `http.response.body` events rather than one call.
impl Response {
    /// Writes the status line, the application's headers (validated),
    /// the core's own `server`/`connection`/`transfer-encoding` headers,
    /// and the blank line ending the head block. After this call the
    /// caller streams body bytes directly (`write_chunk`/`write_raw`) —
    /// `Response`'s own state tracking is done, since the remaining bytes
    /// are no longer shaped like a single builder call.
    pub(crate) fn begin(
        &mut self,
        status: StatusCode,
        headers: &[(String, String)],
        framing: BodyFraming,
    ) -> Result<&mut Self, ErrorKind> {
        self.status(status);

        let mut has_server = false;
        for (name, value) in headers {
            if !types::is_injection_free(name.as_bytes()) || !types::is_injection_free(value.as_bytes())
            {
                return Err(ErrorKind::InvalidHeader);
            }
            has_server |= name.eq_ignore_ascii_case("server");
            self.header(name.as_str(), value.as_str());
        }
        if !has_server {
            self.header("server", "pagi-server");
        }
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }
        if framing == BodyFraming::Chunked {
            self.header("transfer-encoding", "chunked");
        }

        self.buffer.extend_from_slice(b"\r\n");
        self.state = ResponseState::Complete;
        Ok(self)
    }

    /// Appends one chunked-transfer-coding frame (`<hex-size>\r\n<bytes>\r\n`).
    pub(crate) fn write_chunk(&mut self, data: &[u8]) {
        let (arr, start) = Self::hex_bytes(data.len() as u64);
        self.buffer.extend_from_slice(&arr[start..]);
        self.buffer.extend_from_slice(b"\r\n");
        self.buffer.extend_from_slice(data);
        self.buffer.extend_from_slice(b"\r\n");
    }

    /// Appends the terminal `0\r\n` chunk, any validated trailers, and the
    /// final blank line.
    pub(crate) fn write_final_chunk(&mut self, trailers: &[(String, String)]) -> Result<(), ErrorKind> {
        self.buffer.extend_from_slice(b"0\r\n");
        for (name, value) in trailers {
            if !types::is_injection_free(name.as_bytes()) || !types::is_injection_free(value.as_bytes())
            {
                return Err(ErrorKind::InvalidHeader);
            }
            self.buffer.extend_from_slice(name.as_bytes());
            self.buffer.extend_from_slice(b": ");
            self.buffer.extend_from_slice(value.as_bytes());
            self.buffer.extend_from_slice(b"\r\n");
        }
        self.buffer.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Appends raw body bytes with no framing envelope (identity and
    /// raw-close paths).
    pub(crate) fn write_raw(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to a response buffer without an intermediate
    /// allocation.
    ///
    /// Implemented for common types like strings, bytes, booleans and
    /// numeric types (excluding floating-point numbers — locale-dependent
    /// formatting and precision issues have no good zero-alloc answer here;
    /// format to a `String` with controlled precision first if you need
    /// floats).
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = Response::number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        let abs = value.unsigned_abs();

        let (arr, start) = Response::number_to_bytes(abs);
        buffer.extend_from_slice(&arr[start..]);
    }
}

#[cfg(test)]
mod close_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (Version::Http11, false, ""),
            (Version::Http11, true, "connection: close\r\n"),
            (Version::Http10, false, "connection: keep-alive\r\n"),
            (Version::Http10, true, "connection: close\r\n"),
        ];

        for (version, is_close, header) in cases {
            let mut resp = Response::new(&RespLimits::default());
            resp.version = version;

            assert_eq!(resp.keep_alive, true);
            if is_close {
                resp.close();
                assert_eq!(resp.keep_alive, false);
                resp.close();
                assert_eq!(resp.keep_alive, false);
            }

            resp.status(StatusCode::Ok).body("");
            assert_eq!(
                str_op(resp.buffer()),
                format!(
                    "{}{header}content-length: 0000000000\r\n\r\n",
                    str_op(StatusCode::Ok.into_first_line(version))
                )
            );
        }
    }

    #[test]
    #[should_panic(expected = "Must be called before any finalizing method")]
    fn after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.close();
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (StatusCode::Ok, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::NotFound, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::Found, "HTTP/1.1 302 Found\r\n"),
            (StatusCode::BadRequest, "HTTP/1.1 400 Bad Request\r\n"),
        ];

        for (status, result) in cases {
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer(), []);

            resp.status(status);
            assert_eq!(str_op(resp.buffer()), result);
            assert_eq!(resp.state, ResponseState::Headers);
        }
    }

    #[test]
    #[should_panic(expected = "Must be first and called only once")]
    fn double_call() {
        Response::new(&RespLimits::default())
            .status(StatusCode::Ok)
            .status(StatusCode::Found);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_header {
        ($method:ident, $(($name:expr $(, $params:expr)*; $result:expr);)*) => {
           #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer(), []);

            resp.status(StatusCode::Ok);
            assert_eq!(resp.state, ResponseState::Headers);

            resp.$method($name $(, $params)*);
            assert_eq!(str_op(&resp.buffer()[17..]), $result);
            assert_eq!(resp.state, ResponseState::Headers);
        )*}};
    }

    test_header! {header,
        ("name", "value"; "name: value\r\n");
        ("", "value"; ": value\r\n");
        ("name", ""; "name: \r\n");

        ("name", 123; "name: 123\r\n");
        ("name", vec![35, 33, 43]; "name: #!+\r\n");
        ("name", false; "name: false\r\n");
        ("name", -123; "name: -123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_before_status() {
        Response::new(&RespLimits::default()).header("Name", "value");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header("Name", "value");
    }
}

#[cfg(test)]
mod body_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_body {
        ($(($data:expr, $len:expr);)*) => {
        #[test] fn body() {$(
            let mut resp = Response::new(&RespLimits::default());
            resp.status(StatusCode::Ok).body($data);

            let mut expected = Vec::new();
            $data.write_to(&mut expected);

            assert_eq!(
                str_op(resp.buffer()),
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
                    format!("{:0>10}", $len),
                    str_op(&expected)
                )
            );
            assert_eq!(resp.state, ResponseState::Complete);
        )*}};
    }

    test_body! {
        ("sample body", 11);
        ("{\"debug\": true, \"doc\": false}", 29);
        (true, 4);
        (-1234, 5);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_before_status() {
        Response::new(&RespLimits::default()).body("Name");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and any header methods")]
    fn body_double_call() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.body("Name");
    }
}

#[cfg(test)]
mod streaming_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn chunked_round_trip() {
        let mut resp = Response::new(&RespLimits::default());
        resp.begin(
            StatusCode::Ok,
            &[("content-type".into(), "text/plain".into())],
            BodyFraming::Chunked,
        )
        .unwrap();
        resp.write_chunk(b"hello");
        resp.write_chunk(b" world");
        resp.write_final_chunk(&[]).unwrap();

        let text = str_op(resp.buffer()).to_owned();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(text.ends_with("5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"));
    }

    #[test]
    fn identity_raw_body_matches_declared_length() {
        let mut resp = Response::new(&RespLimits::default());
        resp.begin(
            StatusCode::Ok,
            &[("content-length".into(), "5".into())],
            BodyFraming::Identity,
        )
        .unwrap();
        resp.write_raw(b"hello");

        assert!(str_op(resp.buffer()).ends_with("content-length: 5\r\n\r\nhello"));
    }

    #[test]
    fn rejects_header_with_crlf_injection() {
        let mut resp = Response::new(&RespLimits::default());
        let result = resp.begin(
            StatusCode::Ok,
            &[("x-evil".into(), "value\r\nSet-Cookie: hijack".into())],
            BodyFraming::None,
        );
        assert!(matches!(result, Err(ErrorKind::InvalidHeader)));
    }
}
