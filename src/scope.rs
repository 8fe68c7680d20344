//! Scope and event record types — the exhaustive application interface
//! catalogue exchanged between the core and the application via `receive`/
//! `send`.
//!
//! A [`Scope`] is built once per exchange (one HTTP request, the entire
//! lifetime of a WebSocket/SSE connection, or the process lifespan) and
//! handed to the application alongside a `receive`/`send` pair (see
//! [`crate::bridge`]). Event records are plain, immutable data — producers
//! never mutate an event after it has been enqueued.

use crate::http::types::{Method, Version};
use std::{any::Any, sync::Arc};

/// Process-wide state produced by the application's lifespan handler.
/// Read/write during `lifespan.startup`; read-only to every scope opened
/// afterward. Opaque to the core — applications downcast it themselves.
pub type LifespanState = Arc<dyn Any + Send + Sync>;

/// A network endpoint, as seen by the core (`[host, port]` in spec terms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Server identity/runtime metadata carried in every scope.
#[derive(Debug, Clone, Copy)]
pub struct PagiMeta {
    pub version: &'static str,
    /// Name of the event-loop backend in use (`--loop`, spec.md §6.3).
    pub event_loop: &'static str,
}

impl PagiMeta {
    pub(crate) const fn new(event_loop: &'static str) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            event_loop,
        }
    }
}

/// An optional server feature advertised in `scope.extensions`.
///
/// New extensions are added by extending this enum (spec.md §9's "tagged
/// variant per extension" note); applications that don't recognize a
/// variant simply don't match on it.
#[derive(Debug, Clone)]
pub enum Extension {
    /// TLS connection attributes. The core never retains the full peer
    /// certificate — only a fingerprint and negotiated parameters
    /// (spec.md §9, "TLS information exposure").
    Tls(TlsInfo),
    /// The application may send a `send`-side signal (not modeled as an
    /// event type of its own; see [`crate::scope::OutEvent`] when this
    /// extension is advertised) asking outbound buffers to be flushed to
    /// the kernel immediately.
    FullFlush,
}

#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub cipher: String,
    pub protocol_version: String,
    pub peer_certificate_fingerprint: Option<String>,
}

/// `ws` or `wss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsScheme {
    Ws,
    Wss,
}

/// `http` or `https`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpScheme {
    Http,
    Https,
}

#[derive(Debug, Clone)]
pub struct HttpScope {
    pub method: Method,
    pub scheme: HttpScheme,
    pub path: String,
    pub raw_path: String,
    pub query_string: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub http_version: Version,
    pub client: Endpoint,
    pub server: Endpoint,
    pub pagi: PagiMeta,
    pub state: Option<LifespanState>,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone)]
pub struct WebSocketScope {
    pub scheme: WsScheme,
    pub path: String,
    pub raw_path: String,
    pub query_string: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub subprotocols: Vec<String>,
    pub client: Endpoint,
    pub server: Endpoint,
    pub pagi: PagiMeta,
    pub state: Option<LifespanState>,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone)]
pub struct SseScope {
    pub scheme: HttpScheme,
    pub path: String,
    pub raw_path: String,
    pub query_string: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub client: Endpoint,
    pub server: Endpoint,
    pub pagi: PagiMeta,
    pub state: Option<LifespanState>,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone)]
pub struct LifespanScope {
    pub pagi: PagiMeta,
    pub state: Option<LifespanState>,
}

/// The tagged record passed to the application exactly once per exchange.
#[derive(Debug, Clone)]
pub enum Scope {
    Http(HttpScope),
    WebSocket(WebSocketScope),
    Sse(SseScope),
    Lifespan(LifespanScope),
}

impl Scope {
    /// Name used for logging/error messages; never exposed to the wire.
    pub const fn kind(&self) -> &'static str {
        match self {
            Scope::Http(_) => "http",
            Scope::WebSocket(_) => "websocket",
            Scope::Sse(_) => "sse",
            Scope::Lifespan(_) => "lifespan",
        }
    }
}

/// A WebSocket message payload: exactly one of text or bytes, never both
/// (spec.md §6.1's "exactly one set").
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Text(String),
    Bytes(Vec<u8>),
}

/// A `sse.send` `data` payload: either a pre-formatted string or a
/// structured value serialized to JSON by the SSE serializer (spec.md
/// §4.3).
#[derive(Debug, Clone)]
pub enum SseData {
    Text(String),
    Json(serde_json::Value),
}

/// Server → application events, yielded by `receive`.
#[derive(Debug, Clone)]
pub enum InEvent {
    HttpRequest { body: Vec<u8>, more: bool },
    HttpDisconnect,
    WebSocketConnect,
    WebSocketReceive(WsMessage),
    WebSocketDisconnect { code: u16 },
    SseDisconnect,
    LifespanStartup,
    LifespanShutdown,
}

/// Application → server events, accepted by `send`.
#[derive(Debug, Clone)]
pub enum OutEvent {
    HttpResponseStart {
        status: u16,
        headers: Vec<(String, String)>,
        trailers: bool,
    },
    HttpResponseBody {
        body: Vec<u8>,
        more: bool,
    },
    HttpResponseTrailers {
        headers: Vec<(String, String)>,
    },
    WebSocketAccept {
        subprotocol: Option<String>,
        headers: Vec<(String, String)>,
    },
    WebSocketSend(WsMessage),
    WebSocketClose {
        code: u16,
        reason: Option<String>,
    },
    SseStart {
        status: Option<u16>,
        headers: Vec<(String, String)>,
    },
    SseSend {
        event: Option<String>,
        id: Option<String>,
        retry: Option<u64>,
        data: SseData,
    },
    /// A heartbeat comment (`:` + text), emitted only at the application's
    /// request (spec.md §4.3's heartbeat MUST) — never inserted by the core
    /// on its own schedule.
    SseComment {
        text: String,
    },
    LifespanStartupComplete {
        state: Option<LifespanState>,
    },
    LifespanStartupFailed {
        message: String,
    },
    LifespanShutdownComplete,
    LifespanShutdownFailed {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_kind_names_match_spec_tags() {
        let meta = PagiMeta::new("tokio");
        assert_eq!(Scope::Lifespan(LifespanScope { pagi: meta, state: None }).kind(), "lifespan");
    }

    #[test]
    fn ws_message_variants_are_exclusive() {
        let text = WsMessage::Text("hi".into());
        let bytes = WsMessage::Bytes(vec![1, 2, 3]);
        assert_ne!(format!("{text:?}"), format!("{bytes:?}"));
    }
}
