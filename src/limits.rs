//! Server configuration limits and timeouts.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//! - WebSocket receive-queue exhaustion
//!
//! # Memory Consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request Buffer`](crate::limits::ReqLimits#memory-allocation-strategy) +
//!           [`Response Buffer`](crate::limits::RespLimits#buffer-management) +
//!           `Runtime Overhead`
//!
//! See each component's documentation for details and configuration options.

use std::time::Duration;

/// Controls server-level concurrency, queueing, and overload behavior.
///
/// Configures how the server handles connection admission, worker pools,
/// and overload protection with tunable parameters for different workloads.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Handler ] <====== | Is there a free handler? | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// The queue acts as a buffer between connection acceptance and processing.
/// Workers continuously poll the queue using the configured `wait_strategy`.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of concurrently processed connections per worker (default: `100`).
    pub max_connections: usize,

    /// Maximum number of TCP connections waiting in the admission queue (default: `250`).
    ///
    /// All accepted connections first go into this queue. Worker tasks pull
    /// connections from here. If the queue is full, new connections get an
    /// immediate HTTP `503` response (spec's overload policy).
    pub max_pending_connections: usize,

    /// Strategy for worker task waiting behavior (default: `Sleep(50us)`).
    pub wait_strategy: WaitStrategy,

    /// Dedicated tasks for queue-overflow `503` responses (default: `1`).
    pub count_503_handlers: usize,

    /// Format for error responses (default: `true`, JSON bodies).
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,
            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`].
    ///
    /// Keeps latency minimal at the cost of near-100% CPU on an idle
    /// worker; prefer [`Sleep`](Self::Sleep) unless you have measured a
    /// need for this.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`].
    Sleep(Duration),
}

/// Connection-level limits and timeouts.
///
/// Default values balance performance, resource usage, and security. Only
/// change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for bytes from the socket (default: `2 seconds`).
    ///
    /// Applies while the connection is in `idle`/`reading_headers`/
    /// `reading_body`. Disarmed once the connection reaches
    /// `websocket_open`/`sse_open` (the application owns heartbeats there).
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for a single socket write (default: `3 seconds`).
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`).
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from accept to close (default: `2 minutes`).
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,
            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// # Memory Allocation Strategy
///
/// Each TCP connection pre-allocates a fixed-size buffer based on these
/// limits:
///
/// ```text
/// Total Buffer = First Line + (Headers x Header Line) + Body + Overhead
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum request-line size in bytes (method + target + version + CRLF,
    /// default: `8192`). Corresponds to spec's `max_request_line_size`;
    /// exceeding it yields `414 URI Too Long`.
    pub url_size: usize,
    /// Maximum number of path segments in the target (default: `32`).
    pub url_parts: usize,
    /// Maximum query string length, including the leading `?` (default: `1024`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `64`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `64`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `8192`).
    pub header_value_size: usize,
    /// Maximum size of the whole header block, request-line excluded
    /// (default: `8192`, spec's `max_header_size`).
    pub max_header_size: usize,

    /// Maximum request body size in bytes (default: unlimited,
    /// `usize::MAX`, per spec's default).
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 8192,
            url_parts: 32,
            url_query_size: 1024,
            url_query_parts: 64,

            header_count: 64,
            header_name_size: 64,
            header_value_size: 8192,
            max_header_size: 8192,

            body_size: usize::MAX,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated memory buffer size required per connection,
    /// excluding the body (which for large/unlimited bodies is streamed
    /// rather than buffered whole).
    #[inline(always)]
    pub fn estimated_head_buffer_size(&self) -> usize {
        self.clone().precalculate().precalc.head_buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.head_buffer = self.head_buffer();
        self
    }

    #[inline(always)]
    // First line + Header * N + "\r\n"
    fn head_buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2
    }

    #[inline(always)]
    // Method SP Target SP Version CRLF
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    // Name: Value\r\n
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) head_buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) h_line: usize,
}

/// Configuration for response buffer allocation.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024`).
    pub default_capacity: usize,
    /// Maximum buffer capacity retained between responses on the same
    /// connection; larger buffers are freed and reallocated at
    /// `default_capacity` (default: `8192`).
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,
            _priv: (),
        }
    }
}

/// WebSocket framing and receive-queue limits.
#[derive(Debug, Clone)]
pub struct WsLimits {
    /// Maximum accepted frame payload size in bytes (default: `65536`,
    /// spec's `max_ws_frame_size`). Larger frames are rejected with close
    /// code `1009`.
    pub max_frame_size: usize,
    /// Maximum number of queued inbound events (data frames) awaiting the
    /// application (default: `1000`, spec's `max_receive_queue`). Overflow
    /// closes with code `1008`.
    pub max_receive_queue: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for WsLimits {
    fn default() -> Self {
        Self {
            max_frame_size: 64 * 1024,
            max_receive_queue: 1000,
            _priv: (),
        }
    }
}

/// Graceful-shutdown timing.
#[derive(Debug, Clone)]
pub struct ShutdownLimits {
    /// How long the supervisor waits for active connections to drain
    /// before force-closing them (default: `30 seconds`).
    pub shutdown_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ShutdownLimits {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            _priv: (),
        }
    }
}

/// Aggregate of every tunable limit, threaded through the connection and
/// supervisor layers as a single bundle.
#[derive(Debug, Clone, Default)]
pub struct AllLimits {
    pub server: ServerLimits,
    pub conn: ConnLimits,
    pub req: ReqLimits,
    pub resp: RespLimits,
    pub ws: WsLimits,
    pub shutdown: ShutdownLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_buffer_matches_formula() {
        let limits = ReqLimits::default();
        let expected = (19 + limits.url_size)
            + limits.header_count * (limits.header_name_size + limits.header_value_size + 4)
            + 2;
        assert_eq!(limits.estimated_head_buffer_size(), expected);
    }

    #[test]
    fn defaults_match_spec_process_surface() {
        let ws = WsLimits::default();
        assert_eq!(ws.max_frame_size, 65536);
        assert_eq!(ws.max_receive_queue, 1000);

        let shutdown = ShutdownLimits::default();
        assert_eq!(shutdown.shutdown_timeout, Duration::from_secs(30));

        let req = ReqLimits::default();
        assert_eq!(req.max_header_size, 8192);
        assert_eq!(req.body_size, usize::MAX);
    }
}
