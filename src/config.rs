//! Plain-data process configuration (spec.md §6.3), independent of any
//! flag-parsing crate so the library itself has no CLI dependency — the
//! same separation the teacher draws between its `*Limits` structs (library
//! tunables) and the example binaries that hardcode them. `src/bin/
//! pagi-server.rs`'s `clap`-derived `Cli` converts into this.

use crate::limits::{AllLimits, ConnLimits, ReqLimits, ServerLimits, ShutdownLimits, WsLimits};
use std::time::Duration;

/// TLS material discovery is an external-collaborator concern (spec.md
/// §1) — these fields are carried here only so the CLI surface can accept
/// and display them; the library does no certificate parsing itself.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub ca_path: Option<String>,
    pub verify_client: bool,
}

/// Where the access log (spec.md §6.4) is written.
#[derive(Debug, Clone)]
pub enum AccessLogTarget {
    Stdout,
    File(String),
    Disabled,
}

impl Default for AccessLogTarget {
    fn default() -> Self {
        AccessLogTarget::Stdout
    }
}

/// Flat process configuration mirroring spec.md §6.3's CLI surface exactly.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub listener_backlog: i32,
    pub reuseport: bool,

    /// Idle socket-read timeout in seconds (default: `60`).
    pub timeout: Duration,
    pub max_header_size: usize,
    /// Unlimited by default, matching spec.md.
    pub max_body_size: usize,
    pub max_receive_queue: usize,
    pub max_ws_frame_size: usize,
    pub shutdown_timeout: Duration,

    pub access_log: AccessLogTarget,
    /// Selects the event-loop backend name advertised in `scope.pagi.event_loop`.
    pub loop_backend: &'static str,

    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
            workers: 1,
            listener_backlog: 2048,
            reuseport: false,

            timeout: Duration::from_secs(60),
            max_header_size: 8192,
            max_body_size: usize::MAX,
            max_receive_queue: 1000,
            max_ws_frame_size: 65536,
            shutdown_timeout: Duration::from_secs(30),

            access_log: AccessLogTarget::default(),
            loop_backend: "tokio",

            tls: TlsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Translates the flat CLI-shaped config into the library's nested
    /// limits structs. Fields spec.md's process surface does not mention
    /// (e.g. per-URL-part limits) keep [`AllLimits::default`]'s values.
    pub fn to_limits(&self) -> AllLimits {
        AllLimits {
            server: ServerLimits::default(),
            conn: ConnLimits {
                socket_read_timeout: self.timeout,
                ..ConnLimits::default()
            },
            req: ReqLimits {
                max_header_size: self.max_header_size,
                header_value_size: self.max_header_size,
                body_size: self.max_body_size,
                ..ReqLimits::default()
            },
            resp: Default::default(),
            ws: WsLimits {
                max_frame_size: self.max_ws_frame_size,
                max_receive_queue: self.max_receive_queue,
                ..WsLimits::default()
            },
            shutdown: ShutdownLimits {
                shutdown_timeout: self.shutdown_timeout,
                ..ShutdownLimits::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_process_surface() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.listener_backlog, 2048);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_header_size, 8192);
        assert_eq!(config.max_body_size, usize::MAX);
        assert_eq!(config.max_receive_queue, 1000);
        assert_eq!(config.max_ws_frame_size, 65536);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn to_limits_carries_process_surface_fields() {
        let config = ServerConfig {
            max_header_size: 4096,
            max_ws_frame_size: 1024,
            ..ServerConfig::default()
        };
        let limits = config.to_limits();
        assert_eq!(limits.req.max_header_size, 4096);
        assert_eq!(limits.ws.max_frame_size, 1024);
    }
}
