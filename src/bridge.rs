//! The application interface bridge (spec.md §4.5).
//!
//! Builds the `receive`/`send` primitives backing each [`crate::scope::Scope`]
//! and enforces `send` ordering per scope type. The bridge never talks to
//! the socket directly — it only shuttles typed events between the
//! connection task and the spawned application future over bounded
//! channels, matching the teacher's separation between `HttpConnection`
//! (owns the socket) and `Handler` (owns application logic).

use crate::errors::ErrorKind;
use crate::scope::{InEvent, OutEvent, Scope};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The `receive` primitive: yields the next inbound event, in wire order.
pub struct Receive {
    rx: mpsc::Receiver<InEvent>,
}

impl Receive {
    fn new(rx: mpsc::Receiver<InEvent>) -> Self {
        Self { rx }
    }

    /// Awaits the next event. Resolves to `None` once the connection side
    /// drops its sender (I/O error, forced close) — the application should
    /// treat that the same as an unexpected disconnect.
    pub async fn recv(&mut self) -> Option<InEvent> {
        self.rx.recv().await
    }
}

/// The `send` primitive: accepts the next outbound event, in call order.
#[derive(Clone)]
pub struct Send {
    tx: mpsc::Sender<OutEvent>,
}

impl Send {
    fn new(tx: mpsc::Sender<OutEvent>) -> Self {
        Self { tx }
    }

    /// Sends one event to the connection task. Errs if the connection
    /// side has already gone away.
    pub async fn send(&self, event: OutEvent) -> Result<(), BridgeFault> {
        self.tx.send(event).await.map_err(|_| BridgeFault::Disconnected)
    }
}

/// A violation of the `send`/`receive` contract (spec.md §4.4 "Failure to
/// observe the contract", §7 "Application contract violation"). Unlike the
/// teacher's in-process `Response` builder — which `debug_assert!`s on the
/// *server operator's own* misuse — these are runtime conditions produced
/// by the application, out-of-process from the core's point of view, so
/// they are reported and the connection is closed, never panicked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BridgeFault {
    #[error("response.start sent more than once")]
    StartSentTwice,
    #[error("body or trailers sent before the response/stream was started")]
    BodyBeforeStart,
    #[error("event sent after the response/stream was already finalized")]
    SendAfterFinal,
    #[error("websocket.send attempted before websocket.accept")]
    SendBeforeAccept,
    #[error("the connection side has disconnected")]
    Disconnected,
}

/// Spawns the application's handler against a fresh scope, wiring up the
/// bounded channels backing `receive`/`send`.
///
/// `receive_capacity` is the bounded receive-queue size (spec.md §3):
/// pass `ws_limits.max_receive_queue` for a WebSocket scope; HTTP/SSE/
/// lifespan scopes have no queueing requirement of their own, so a small
/// fixed capacity (the codec awaits the application directly) is enough.
pub fn spawn<H: Handler>(
    handler: Arc<H>,
    scope: Scope,
    receive_capacity: usize,
) -> (JoinHandle<Result<(), ErrorKind>>, mpsc::Sender<InEvent>, mpsc::Receiver<OutEvent>) {
    let (in_tx, in_rx) = mpsc::channel(receive_capacity.max(1));
    let (out_tx, out_rx) = mpsc::channel(8);

    let receive = Receive::new(in_rx);
    let send = Send::new(out_tx);

    let join = tokio::spawn(async move { handler.call(scope, receive, send).await });
    (join, in_tx, out_rx)
}

/// The application's single entry point. One implementation handles every
/// scope type, matching on `scope` itself — the same shape the reference
/// protocol uses, and the teacher's own `Handler<S>::handle` generalized
/// from a single HTTP call into the four-scope-type dispatch this spec
/// describes.
pub trait Handler: Send + Sync + 'static {
    fn call(
        &self,
        scope: Scope,
        receive: Receive,
        send: Send,
    ) -> impl std::future::Future<Output = Result<(), ErrorKind>> + Send;
}

/// Validates `send` ordering for an HTTP scope (spec.md §4.5):
/// exactly one `http.response.start`, then zero or more
/// `http.response.body` (last one with `more: false`), then an optional
/// `http.response.trailers`.
#[derive(Debug, Default)]
pub struct HttpSendGuard {
    stage: HttpStage,
}

#[derive(Debug, Default, PartialEq, Eq)]
enum HttpStage {
    #[default]
    NotStarted,
    Started,
    BodyDone,
    Complete,
}

impl HttpSendGuard {
    pub fn validate(&mut self, event: &OutEvent) -> Result<(), BridgeFault> {
        match (&self.stage, event) {
            (HttpStage::NotStarted, OutEvent::HttpResponseStart { .. }) => {
                self.stage = HttpStage::Started;
                Ok(())
            }
            (HttpStage::NotStarted, _) => Err(BridgeFault::BodyBeforeStart),

            (HttpStage::Started, OutEvent::HttpResponseBody { more, .. }) => {
                if !more {
                    self.stage = HttpStage::BodyDone;
                }
                Ok(())
            }
            (HttpStage::Started, OutEvent::HttpResponseStart { .. }) => Err(BridgeFault::StartSentTwice),
            (HttpStage::Started, _) => Err(BridgeFault::SendAfterFinal),

            (HttpStage::BodyDone, OutEvent::HttpResponseTrailers { .. }) => {
                self.stage = HttpStage::Complete;
                Ok(())
            }
            (HttpStage::BodyDone, _) => Err(BridgeFault::SendAfterFinal),

            (HttpStage::Complete, _) => Err(BridgeFault::SendAfterFinal),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.stage, HttpStage::BodyDone | HttpStage::Complete)
    }
}

/// Validates `send` ordering for a WebSocket scope (spec.md §4.5): the
/// application must accept (or reject with close) before sending data.
#[derive(Debug, Default)]
pub struct WsSendGuard {
    accepted: bool,
    closed: bool,
}

impl WsSendGuard {
    pub fn validate(&mut self, event: &OutEvent) -> Result<(), BridgeFault> {
        if self.closed {
            return Err(BridgeFault::SendAfterFinal);
        }
        match event {
            OutEvent::WebSocketAccept { .. } => {
                if self.accepted {
                    return Err(BridgeFault::StartSentTwice);
                }
                self.accepted = true;
                Ok(())
            }
            OutEvent::WebSocketClose { .. } => {
                self.closed = true;
                Ok(())
            }
            OutEvent::WebSocketSend(_) => {
                if !self.accepted {
                    return Err(BridgeFault::SendBeforeAccept);
                }
                Ok(())
            }
            _ => Err(BridgeFault::SendAfterFinal),
        }
    }
}

/// Validates `send` ordering for an SSE scope: `sse.start` must precede
/// any `sse.send`.
#[derive(Debug, Default)]
pub struct SseSendGuard {
    started: bool,
}

impl SseSendGuard {
    pub fn validate(&mut self, event: &OutEvent) -> Result<(), BridgeFault> {
        match event {
            OutEvent::SseStart { .. } => {
                if self.started {
                    return Err(BridgeFault::StartSentTwice);
                }
                self.started = true;
                Ok(())
            }
            OutEvent::SseSend { .. } | OutEvent::SseComment { .. } => {
                if !self.started {
                    return Err(BridgeFault::BodyBeforeStart);
                }
                Ok(())
            }
            _ => Err(BridgeFault::SendAfterFinal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_guard_enforces_start_then_body_then_trailers() {
        let mut guard = HttpSendGuard::default();
        assert!(matches!(
            guard.validate(&OutEvent::HttpResponseBody { body: vec![], more: false }),
            Err(BridgeFault::BodyBeforeStart)
        ));

        guard
            .validate(&OutEvent::HttpResponseStart { status: 200, headers: vec![], trailers: true })
            .unwrap();
        assert!(matches!(
            guard.validate(&OutEvent::HttpResponseStart { status: 200, headers: vec![], trailers: true }),
            Err(BridgeFault::StartSentTwice)
        ));

        guard
            .validate(&OutEvent::HttpResponseBody { body: b"hi".to_vec(), more: false })
            .unwrap();
        assert!(guard.is_complete());

        guard
            .validate(&OutEvent::HttpResponseTrailers { headers: vec![] })
            .unwrap();
        assert!(matches!(
            guard.validate(&OutEvent::HttpResponseTrailers { headers: vec![] }),
            Err(BridgeFault::SendAfterFinal)
        ));
    }

    #[test]
    fn ws_guard_requires_accept_before_send() {
        let mut guard = WsSendGuard::default();
        assert!(matches!(
            guard.validate(&OutEvent::WebSocketSend(crate::scope::WsMessage::Text("hi".into()))),
            Err(BridgeFault::SendBeforeAccept)
        ));

        guard
            .validate(&OutEvent::WebSocketAccept { subprotocol: None, headers: vec![] })
            .unwrap();
        guard
            .validate(&OutEvent::WebSocketSend(crate::scope::WsMessage::Text("hi".into())))
            .unwrap();

        guard.validate(&OutEvent::WebSocketClose { code: 1000, reason: None }).unwrap();
        assert!(matches!(
            guard.validate(&OutEvent::WebSocketSend(crate::scope::WsMessage::Text("hi".into()))),
            Err(BridgeFault::SendAfterFinal)
        ));
    }

    #[test]
    fn sse_guard_requires_start_before_send() {
        let mut guard = SseSendGuard::default();
        assert!(matches!(
            guard.validate(&OutEvent::SseSend {
                event: None,
                id: None,
                retry: None,
                data: crate::scope::SseData::Text("x".into()),
            }),
            Err(BridgeFault::BodyBeforeStart)
        ));

        guard.validate(&OutEvent::SseStart { status: None, headers: vec![] }).unwrap();
        guard
            .validate(&OutEvent::SseSend {
                event: None,
                id: None,
                retry: None,
                data: crate::scope::SseData::Text("x".into()),
            })
            .unwrap();
    }

    #[test]
    fn sse_guard_requires_start_before_comment() {
        let mut guard = SseSendGuard::default();
        assert!(matches!(
            guard.validate(&OutEvent::SseComment { text: "keep-alive".into() }),
            Err(BridgeFault::BodyBeforeStart)
        ));

        guard.validate(&OutEvent::SseStart { status: None, headers: vec![] }).unwrap();
        guard.validate(&OutEvent::SseComment { text: "keep-alive".into() }).unwrap();
    }
}
