//! Structured logging (spec.md §6.4), grounded in the ambient-stack donor
//! (`TaceoLabs-oprf-service`, which pairs `tracing` with `tracing-subscriber`
//! for exactly this init-once-at-startup shape).
//!
//! The access log stays a thin byte/line counter: formatting the line is an
//! external-collaborator concern (spec.md §1), so [`AccessLog::record`] only
//! emits a structured `tracing` event plus, if configured, one line to a
//! file or stdout. Reformatting that line does not touch the library core.

use crate::config::{AccessLogTarget, ServerConfig};
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    sync::Mutex,
    time::Duration,
};
use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber::fmt` subscriber driven by `RUST_LOG`
/// (falling back to `info`). Call once at process startup, before
/// [`crate::server::server::Server::launch`].
pub fn init(_config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// One line per completed HTTP request: method, path, status, response size
/// (bytes passed through `send`, not a `Content-Length` echo — requests
/// where the application streams an unknown-length body still get an
/// accurate count), and duration.
pub struct AccessLog {
    sink: Mutex<Option<Box<dyn Write + Send>>>,
}

impl AccessLog {
    pub fn new(target: &AccessLogTarget) -> io::Result<Self> {
        let sink: Option<Box<dyn Write + Send>> = match target {
            AccessLogTarget::Disabled => None,
            AccessLogTarget::Stdout => Some(Box::new(io::stdout())),
            AccessLogTarget::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(file))
            }
        };
        Ok(Self { sink: Mutex::new(sink) })
    }

    pub fn disabled() -> Self {
        Self { sink: Mutex::new(None) }
    }

    /// Records one completed HTTP request. Always emits a `tracing` event;
    /// additionally writes a plain line to the configured sink, if any.
    pub fn record(
        &self,
        client: SocketAddr,
        method: &str,
        path: &str,
        status: u16,
        response_bytes: u64,
        duration: Duration,
    ) {
        tracing::info!(
            %client,
            method,
            path,
            status,
            response_bytes,
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );

        let Ok(mut guard) = self.sink.lock() else { return };
        if let Some(sink) = guard.as_mut() {
            let _ = writeln!(
                sink,
                "{client} \"{method} {path}\" {status} {response_bytes} {}ms",
                duration.as_millis()
            );
            let _ = sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn disabled_sink_does_not_panic() {
        let log = AccessLog::disabled();
        let client = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        log.record(client, "GET", "/health", 200, 2, Duration::from_millis(1));
    }
}
