//! Error taxonomy shared by the HTTP codec, the application bridge, and the
//! lifespan handler. Maps onto the error-handling design: each kind knows
//! how to render itself as a final HTTP response without allocating.

use crate::http::Version;
use crate::query;
use std::io;
use thiserror::Error;

/// Failures observed while parsing or dispatching a single request.
///
/// Every variant renders to bytes via [`ErrorKind::as_http`] — callers
/// never need to format these by hand, and the rendered bytes never depend
/// on attacker-controlled content.
#[derive(Debug, Error, PartialEq)]
pub enum ErrorKind {
    #[error("invalid HTTP method")]
    InvalidMethod,

    #[error("invalid URL format")]
    InvalidUrl,
    #[error("invalid query string: {0}")]
    Query(#[from] query::Error),

    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("HTTP version not supported")]
    UnsupportedVersion,

    #[error("invalid header format")]
    InvalidHeader,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("request line too long")]
    RequestLineTooLong,
    #[error("header block too large")]
    HeaderBlockTooLarge,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("invalid Connection header")]
    InvalidConnection,
    #[error("conflicting Content-Length and Transfer-Encoding")]
    AmbiguousFraming,
    #[error("invalid chunk size")]
    InvalidChunkSize,

    #[error("request body too large")]
    BodyTooLarge,
    #[error("body length mismatch: expected {expected}, available {available}")]
    BodyMismatch { expected: usize, available: usize },
    #[error("unexpected request body of {0} bytes")]
    UnexpectedBody(usize),

    /// The application raised this specific kind from its lifespan
    /// handler to mean "I do not implement the lifespan scope type" —
    /// distinguished from a generic startup failure by kind, never by
    /// matching a substring of an error message (design note in spec.md §9).
    #[error("application does not support the lifespan scope")]
    UnsupportedScopeType,

    #[error("service temporarily unavailable")]
    ServiceUnavailable,
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        /// Renders this error as a complete, final HTTP response (status
        /// line, `Connection: close`, and either a JSON body or an empty
        /// body depending on `json`).
        pub const fn as_http(&self, version: Version, json: bool) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        RequestLineTooLong: "414 URI Too Long", "51"
            => r#"{"error":"Request line too long","code":"URI_TOO_LONG"}"#;
        HeaderBlockTooLarge: "431 Request Header Fields Too Large", "58"
            => r#"{"error":"Header block too large","code":"HEADERS_TOO_LARGE"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;
        AmbiguousFraming: "400 Bad Request", "68"
            => r#"{"error":"Conflicting request framing","code":"AMBIGUOUS_FRAMING"}"#;
        InvalidChunkSize: "400 Bad Request", "56"
            => r#"{"error":"Invalid chunk size","code":"INVALID_CHUNK_SIZE"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;

        UnsupportedScopeType: "500 Internal Server Error", "63"
            => r#"{"error":"Application does not support scope","code":"UNSUPPORTED_SCOPE"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct IoError(pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bodies_are_well_formed() {
        let cases = [
            (ErrorKind::InvalidMethod, 400),
            (ErrorKind::TooManyHeaders, 431),
            (ErrorKind::RequestLineTooLong, 414),
            (ErrorKind::BodyTooLarge, 413),
            (ErrorKind::UnsupportedVersion, 505),
        ];

        for (err, code) in cases {
            let rendered = err.as_http(Version::Http11, true);
            let text = std::str::from_utf8(rendered).unwrap();
            assert!(text.starts_with(&format!("HTTP/1.1 {code}")));
            assert!(text.contains("connection: close\r\n"));
            assert!(text.ends_with('}'));
        }
    }

    #[test]
    fn non_json_body_is_empty() {
        let rendered = ErrorKind::InvalidMethod.as_http(Version::Http11, false);
        assert!(std::str::from_utf8(rendered)
            .unwrap()
            .ends_with("content-length: 0\r\n\r\n"));
    }
}
