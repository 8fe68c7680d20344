//! Public entry point: `Server`/`ServerBuilder`, the worker pool, and the
//! connection-filter hook. Grounded on the teacher's own
//! `Server`/`ServerBuilder` (`SegQueue`-backed admission queue, fixed pool
//! of `spawn_worker` tasks polling it, dedicated overload-response tasks)
//! re-targeted at the `bridge::Handler` contract and `AllLimits` instead of
//! the teacher's `Request -> Response` `Handler<S>` and tuple limits.

use crate::{
    bridge::Handler,
    errors::ErrorKind,
    http::{
        response::Response,
        types::{StatusCode, Version},
    },
    lifespan::{LifespanSession, ShutdownOutcome, StartupOutcome},
    limits::{AllLimits, WaitStrategy},
    server::connection::HttpConnection,
};
use crossbeam::queue::SegQueue;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    task::yield_now,
    time::sleep as tokio_sleep,
};

/// Early TCP-level connection admission hook (spec.md §4.6's acceptor
/// stage) — runs before the first byte is read, so it can reject by
/// address alone (geoblocking, static blacklists) without spending a
/// parser buffer on a connection that will just be closed.
///
/// Unlike the teacher's `ConnectionFilter` (which returned the same
/// `Handled` terminal marker the HTTP handler did), rejection here has no
/// relationship to the `scope`/`receive`/`send` contract — an application
/// that wants to reject *after* seeing a scope just never sends
/// `http.response.start`/`websocket.accept`/`sse.start`. This trait only
/// covers the TCP-level pre-check, so it reports a plain unit error and
/// writes its own rejection response directly into `error_response`.
pub trait ConnectionFilter: Send + Sync + 'static {
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), ()> {
        let _ = (client_addr, server_addr, error_response);
        Ok(())
    }

    fn filter_async(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> impl Future<Output = Result<(), ()>> + Send {
        async move { self.filter(client_addr, server_addr, error_response) }
    }
}

impl ConnectionFilter for () {}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;

/// An accepting server instance: owns the listener and the admission
/// queues; the worker pool and overload handlers are spawned once
/// [`Server::launch`] performs the lifespan startup exchange.
pub struct Server<H: Handler, F: ConnectionFilter = ()> {
    listener: TcpListener,
    handler: Arc<H>,
    filter: Arc<F>,
    limits: AllLimits,
    event_loop: &'static str,
}

impl<H: Handler> Server<H, ()> {
    #[inline]
    pub fn builder() -> ServerBuilder<H, ()> {
        ServerBuilder {
            listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            limits: AllLimits::default(),
            event_loop: "tokio",
        }
    }
}

impl<H: Handler, F: ConnectionFilter> Server<H, F> {
    /// Runs the lifespan startup exchange, spawns the worker pool and
    /// overload handlers, then accepts connections until the process is
    /// killed. For a version that stops accepting and drains on a signal,
    /// see [`Server::launch_until`] (used by `server::supervisor`).
    pub async fn launch(self) {
        let _ = self.launch_until(std::future::pending()).await;
    }

    /// As [`Server::launch`], but stops the accept loop as soon as
    /// `shutdown_signal` resolves, runs the lifespan shutdown exchange, and
    /// gives in-flight connections up to `limits.shutdown.shutdown_timeout`
    /// to finish on their own before returning. Worker tasks are polling
    /// loops with no handle to join, so "drain" here is a bounded wait, not
    /// a tracked join — documented as a simplification in DESIGN.md.
    pub async fn launch_until(self, shutdown_signal: impl Future<Output = ()>) -> ShutdownOutcome {
        let mut lifespan = LifespanSession::spawn(Arc::clone(&self.handler), self.event_loop);
        let lifespan_state = match lifespan.startup().await {
            StartupOutcome::Ready(state) => state,
            StartupOutcome::Unsupported => None,
            StartupOutcome::Failed(message) => {
                tracing::error!(message, "lifespan startup failed; not accepting connections");
                return ShutdownOutcome::Failed(message);
            }
        };

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        let error_queue: TcpQueue = Arc::new(SegQueue::new());

        for _ in 0..self.limits.server.max_connections {
            Self::spawn_worker(
                &stream_queue,
                &self.filter,
                &self.handler,
                self.limits.clone(),
                self.event_loop,
                lifespan_state.clone(),
            );
        }
        if self.limits.server.count_503_handlers != 0 {
            for _ in 0..self.limits.server.count_503_handlers {
                Self::spawn_alarmist(&error_queue, self.limits.clone());
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, self.limits.clone());
        }

        tokio::pin!(shutdown_signal);
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_signal => break,

                accepted = self.listener.accept() => {
                    let Ok(value) = accepted else { continue };
                    if stream_queue.len() < self.limits.server.max_pending_connections {
                        stream_queue.push(value);
                    } else {
                        error_queue.push(value);
                    }
                }
            }
        }

        tokio_sleep(self.limits.shutdown.shutdown_timeout).await;
        lifespan.shutdown().await
    }

    #[inline]
    async fn get_stream(queue: &TcpQueue, wait: &WaitStrategy) -> (TcpStream, SocketAddr) {
        loop {
            if let Some(value) = queue.pop() {
                return value;
            }
            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }

    fn spawn_worker(
        queue: &TcpQueue,
        filter: &Arc<F>,
        handler: &Arc<H>,
        limits: AllLimits,
        event_loop: &'static str,
        lifespan_state: Option<crate::scope::LifespanState>,
    ) {
        let queue = Arc::clone(queue);
        let filter = Arc::clone(filter);
        let mut conn = HttpConnection::new(Arc::clone(handler), limits.clone(), event_loop, lifespan_state);
        let wait_strategy = limits.server.wait_strategy.clone();

        tokio::spawn(async move {
            loop {
                let (mut stream, client_addr) = Self::get_stream(&queue, &wait_strategy).await;

                let Ok(server_addr) = stream.local_addr() else { continue };

                let mut rejection = Response::new(&limits.resp);
                let accepted = filter.filter(client_addr, server_addr, &mut rejection).is_ok()
                    && filter
                        .filter_async(client_addr, server_addr, &mut rejection)
                        .await
                        .is_ok();

                if !accepted {
                    let _ = stream.write_all(rejection.buffer()).await;
                    continue;
                }

                conn.run(&mut stream, client_addr, server_addr).await;
            }
        });
    }

    fn spawn_alarmist(queue: &TcpQueue, limits: AllLimits) {
        let queue = Arc::clone(queue);

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = Self::get_stream(&queue, &limits.server.wait_strategy).await;
                let body = ErrorKind::ServiceUnavailable.as_http(Version::Http11, limits.server.json_errors);
                let _ = stream.write_all(body).await;
            }
        });
    }

    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: AllLimits) {
        let queue = Arc::clone(queue);

        tokio::spawn(async move {
            loop {
                let (stream, _) = Self::get_stream(&queue, &limits.server.wait_strategy).await;
                drop(stream);
            }
        });
    }
}

/// Builder for [`Server`], mirroring the teacher's fluent
/// `.listener()/.handler()/.conn_filter()/...build()` surface.
pub struct ServerBuilder<H: Handler, F: ConnectionFilter = ()> {
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    limits: AllLimits,
    event_loop: &'static str,
}

impl<H: Handler, F: ConnectionFilter> ServerBuilder<H, F> {
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[inline(always)]
    pub fn conn_filter<NewF: ConnectionFilter>(self, filter: NewF) -> ServerBuilder<H, NewF> {
        ServerBuilder {
            listener: self.listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            limits: self.limits,
            event_loop: self.event_loop,
        }
    }

    #[inline(always)]
    pub fn limits(mut self, limits: AllLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Name advertised in `scope.pagi.event_loop` (default: `"tokio"`).
    #[inline(always)]
    pub fn event_loop(mut self, name: &'static str) -> Self {
        self.event_loop = name;
        self
    }

    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H, F> {
        let mut limits = self.limits;
        limits.req = limits.req.precalculate();

        Server {
            listener: self.listener.expect("The `listener` method must be called to create"),
            handler: self.handler.expect("The `handler` method must be called to create"),
            filter: self.connection_filter,
            limits,
            event_loop: self.event_loop,
        }
    }
}
