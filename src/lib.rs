//! pagi_server - an async HTTP/1.1 server exposing a uniform
//! `scope`/`receive`/`send` application interface for HTTP, WebSocket,
//! Server-Sent Events, and a lifespan startup/shutdown protocol.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections, chunked transfer encoding,
//!   trailers.
//! - **HTTP/1.0**: request/response without keep-alive by default.
//! - **WebSocket** (RFC 6455): handshake, fragmented messages, control
//!   frames, a bounded receive queue per connection.
//! - **Server-Sent Events**: `text/event-stream` serialization with
//!   `id`/`retry`/multi-line `data` support.
//!
//! # Features
//!
//! ## Security & Protection
//! - **Built-in DoS/DDoS protection** - enabled by default, with no
//!   performance penalty.
//! - **Fully configurable limits and timeouts** for requests, responses,
//!   connections, and WebSocket queues — see [`limits`].
//! - **Custom connection filtering** - implement the
//!   [`server::server::ConnectionFilter`] trait to reject unwanted
//!   connections at the TCP level, before a single byte is parsed.
//!
//! ## Performance & Memory
//! - **Zero-allocation request-head parsing** - the HTTP/1.1 codec borrows
//!   from a reused per-connection buffer; no allocations after connection
//!   startup for the request head.
//! - **Pre-allocated memory for each connection** - linear and transparent
//!   scaling, sized from [`limits::ReqLimits`].
//!
//! ## Application interface
//! - A single [`bridge::Handler`] trait serves HTTP, WebSocket, SSE, and
//!   lifespan scopes uniformly, via a `scope` value plus `receive`/`send`
//!   channel ends - no protocol-specific handler traits.
//! - **Lifespan protocol** - applications may publish read-only state at
//!   startup, shared (via `Arc`) with every subsequent request scope.
//!
//! ## Production Ready
//! - **Graceful performance degradation** - automatic `503` responses when
//!   the admission queue is full.
//! - **Custom error format** - structured JSON (with codes) or an empty
//!   body, controlled by [`limits::ServerLimits::json_errors`].
//! - **Graceful shutdown** - `server::supervisor` stops accepting on
//!   SIGTERM/SIGINT, drains within a configurable timeout, then runs the
//!   lifespan shutdown exchange.
//!
//! # Quick Start
//!
//! ```no_run
//! use pagi_server::{bridge::Handler, scope::{Scope, InEvent, OutEvent}, Server};
//! use pagi_server::errors::ErrorKind;
//! use tokio::net::TcpListener;
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     async fn call(
//!         &self,
//!         scope: Scope,
//!         mut receive: pagi_server::bridge::Receive,
//!         send: pagi_server::bridge::Send,
//!     ) -> Result<(), ErrorKind> {
//!         let Scope::Http(_) = scope else { return Ok(()) };
//!         while let Some(event) = receive.recv().await {
//!             if let InEvent::HttpRequest { .. } = event {
//!                 let _ = send.send(OutEvent::HttpResponseStart {
//!                     status: 200,
//!                     headers: vec![],
//!                     trailers: false,
//!                 }).await;
//!                 let _ = send.send(OutEvent::HttpResponseBody {
//!                     body: b"Hello World!".to_vec(),
//!                     more: false,
//!                 }).await;
//!                 break;
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(Echo)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! For CLI wiring, logging setup, and a full example handler, see
//! `src/bin/pagi-server.rs`.

pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;

    pub(crate) use types::Version;
}
pub mod server {
    pub(crate) mod connection;
    pub mod server;
    pub mod supervisor;
}
pub mod bridge;
pub mod config;
pub mod errors;
pub mod lifespan;
pub mod limits;
pub mod logging;
pub mod scope;
pub mod sse;
pub mod ws;

pub use crate::{
    bridge::Handler,
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    server::server::{ConnectionFilter, Server, ServerBuilder},
};

#[doc(hidden)]
#[cfg(test)]
pub(crate) mod tools {
    use std::str::from_utf8;

    #[inline]
    pub(crate) fn str(value: Option<&[u8]>) -> Option<&str> {
        Some(from_utf8(value?).unwrap())
    }

    #[inline]
    pub(crate) fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub(crate) fn str_2<'a>(value: (&'a [u8], &'a [u8])) -> (&'a str, &'a str) {
        (from_utf8(value.0).unwrap(), from_utf8(value.1).unwrap())
    }
}
