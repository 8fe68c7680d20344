//! The lifespan protocol (spec.md §4.7): a startup/shutdown exchange with
//! the application, over the same `scope`/`receive`/`send` interface as
//! every other scope type, tolerant of applications that don't implement
//! it at all.
//!
//! Per spec.md §4.7, the whole exchange is ONE scope that spans both
//! events: the application's handler is invoked once and is expected to
//! `receive()` `lifespan.startup`, complete it, then later `receive()`
//! `lifespan.shutdown` on the very same call. [`LifespanSession`] keeps
//! that single spawned invocation alive between [`LifespanSession::startup`]
//! and [`LifespanSession::shutdown`].

use crate::bridge::{self, Handler};
use crate::errors::ErrorKind;
use crate::scope::{InEvent, LifespanScope, LifespanState, OutEvent, PagiMeta, Scope};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outcome of the `lifespan.startup` exchange.
pub enum StartupOutcome {
    /// The application completed startup and optionally published state,
    /// visible read-only to every subsequent request scope.
    Ready(Option<LifespanState>),
    /// The application raised [`ErrorKind::UnsupportedScopeType`] — per
    /// spec.md §4.7/§9, the core proceeds to accept connections with no
    /// published state, and [`LifespanSession::shutdown`] must not be
    /// called later.
    Unsupported,
    /// The application reported `lifespan.startup.failed`, or exited
    /// without completing (any other error). The caller must not begin
    /// accepting connections.
    Failed(String),
}

/// Outcome of the `lifespan.shutdown` exchange.
pub enum ShutdownOutcome {
    Complete,
    Failed(String),
}

/// A single spawned lifespan handler invocation, alive from startup
/// through shutdown.
pub struct LifespanSession {
    join: Option<JoinHandle<Result<(), ErrorKind>>>,
    in_tx: mpsc::Sender<InEvent>,
    out_rx: mpsc::Receiver<OutEvent>,
}

impl LifespanSession {
    pub fn spawn<H: Handler>(handler: Arc<H>, event_loop: &'static str) -> Self {
        let scope = Scope::Lifespan(LifespanScope { pagi: PagiMeta::new(event_loop), state: None });
        let (join, in_tx, out_rx) = bridge::spawn(handler, scope, 1);
        Self { join: Some(join), in_tx, out_rx }
    }

    /// Sends `lifespan.startup` and awaits the application's response.
    pub async fn startup(&mut self) -> StartupOutcome {
        if self.in_tx.send(InEvent::LifespanStartup).await.is_err() {
            return self.resolve_exit("startup").await;
        }

        while let Some(event) = self.out_rx.recv().await {
            match event {
                OutEvent::LifespanStartupComplete { state } => return StartupOutcome::Ready(state),
                OutEvent::LifespanStartupFailed { message } => return StartupOutcome::Failed(message),
                _ => continue,
            }
        }

        self.resolve_exit("startup").await
    }

    /// Sends `lifespan.shutdown` and awaits the application's response.
    /// Callers MUST NOT call this after [`LifespanSession::startup`]
    /// returned [`StartupOutcome::Unsupported`] or [`StartupOutcome::Failed`].
    pub async fn shutdown(mut self) -> ShutdownOutcome {
        if self.in_tx.send(InEvent::LifespanShutdown).await.is_err() {
            return into_shutdown_outcome(self.resolve_exit("shutdown").await);
        }

        while let Some(event) = self.out_rx.recv().await {
            match event {
                OutEvent::LifespanShutdownComplete => return ShutdownOutcome::Complete,
                OutEvent::LifespanShutdownFailed { message } => return ShutdownOutcome::Failed(message),
                _ => continue,
            }
        }

        into_shutdown_outcome(self.resolve_exit("shutdown").await)
    }

    async fn resolve_exit(&mut self, phase: &'static str) -> StartupOutcome {
        let Some(join) = self.join.take() else {
            return StartupOutcome::Failed(format!("lifespan handler already reaped ({phase})"));
        };

        match join.await {
            Ok(Err(ErrorKind::UnsupportedScopeType)) => StartupOutcome::Unsupported,
            Ok(Err(err)) => StartupOutcome::Failed(err.to_string()),
            Ok(Ok(())) => {
                StartupOutcome::Failed(format!("lifespan handler returned without completing {phase}"))
            }
            Err(_) => StartupOutcome::Failed(format!("lifespan handler panicked during {phase}")),
        }
    }
}

fn into_shutdown_outcome(outcome: StartupOutcome) -> ShutdownOutcome {
    match outcome {
        StartupOutcome::Failed(message) => ShutdownOutcome::Failed(message),
        StartupOutcome::Ready(_) | StartupOutcome::Unsupported => ShutdownOutcome::Complete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Receive, Send};

    struct UnsupportedHandler;
    impl Handler for UnsupportedHandler {
        async fn call(&self, _scope: Scope, _receive: Receive, _send: Send) -> Result<(), ErrorKind> {
            Err(ErrorKind::UnsupportedScopeType)
        }
    }

    struct CompletingHandler;
    impl Handler for CompletingHandler {
        async fn call(&self, _scope: Scope, mut receive: Receive, send: Send) -> Result<(), ErrorKind> {
            while let Some(event) = receive.recv().await {
                match event {
                    InEvent::LifespanStartup => {
                        send.send(OutEvent::LifespanStartupComplete { state: None }).await.ok();
                    }
                    InEvent::LifespanShutdown => {
                        send.send(OutEvent::LifespanShutdownComplete).await.ok();
                        return Ok(());
                    }
                    _ => {}
                }
            }
            Ok(())
        }
    }

    struct StatefulHandler;
    impl Handler for StatefulHandler {
        async fn call(&self, _scope: Scope, mut receive: Receive, send: Send) -> Result<(), ErrorKind> {
            while let Some(event) = receive.recv().await {
                match event {
                    InEvent::LifespanStartup => {
                        let state: LifespanState = Arc::new(42u32);
                        send.send(OutEvent::LifespanStartupComplete { state: Some(state) }).await.ok();
                    }
                    InEvent::LifespanShutdown => {
                        send.send(OutEvent::LifespanShutdownComplete).await.ok();
                        return Ok(());
                    }
                    _ => {}
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn unsupported_scope_type_is_tolerated() {
        let mut session = LifespanSession::spawn(Arc::new(UnsupportedHandler), "tokio");
        assert!(matches!(session.startup().await, StartupOutcome::Unsupported));
    }

    #[tokio::test]
    async fn completing_handler_reports_ready_then_shuts_down_on_one_session() {
        let mut session = LifespanSession::spawn(Arc::new(CompletingHandler), "tokio");
        assert!(matches!(session.startup().await, StartupOutcome::Ready(None)));
        assert!(matches!(session.shutdown().await, ShutdownOutcome::Complete));
    }

    #[tokio::test]
    async fn startup_state_is_threaded_back_to_the_caller() {
        let mut session = LifespanSession::spawn(Arc::new(StatefulHandler), "tokio");
        let state = match session.startup().await {
            StartupOutcome::Ready(state) => state,
            _ => panic!("expected Ready"),
        };
        let state = state.expect("handler published state");
        assert_eq!(*state.downcast::<u32>().expect("u32 state"), 42);
        assert!(matches!(session.shutdown().await, ShutdownOutcome::Complete));
    }
}
