//! CLI launcher — an external collaborator over the `pagi_server` library
//! (spec.md §1): flag parsing, process wiring, and an example handler.
//! Not part of the library's public contract, mirroring how the teacher
//! crate ships a library plus thin `examples/*.rs` binaries.

use clap::Parser as ClapParser;
use pagi_server::bridge::{Handler, Receive, Send};
use pagi_server::config::{AccessLogTarget, ServerConfig, TlsConfig};
use pagi_server::errors::ErrorKind;
use pagi_server::logging::{self, AccessLog};
use pagi_server::scope::{InEvent, OutEvent, Scope, WsMessage};
use pagi_server::Server;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::TcpListener;

#[derive(ClapParser, Debug)]
#[command(name = "pagi-server", about = "Run a pagi_server application")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 8000)]
    port: u16,
    #[arg(long, default_value_t = 1)]
    workers: usize,
    #[arg(long, default_value_t = 2048)]
    listener_backlog: i32,
    #[arg(long, default_value_t = false)]
    reuseport: bool,

    #[arg(long, default_value_t = 60)]
    timeout: u64,
    #[arg(long, default_value_t = 8192)]
    max_header_size: usize,
    #[arg(long)]
    max_body_size: Option<usize>,
    #[arg(long, default_value_t = 1000)]
    max_receive_queue: usize,
    #[arg(long, default_value_t = 65536)]
    max_ws_frame_size: usize,
    #[arg(long, default_value_t = 30)]
    shutdown_timeout: u64,

    #[arg(long)]
    access_log: Option<String>,
    #[arg(long, default_value_t = false)]
    no_access_log: bool,
    #[arg(long, default_value = "tokio")]
    r#loop: String,

    #[arg(long)]
    ssl_cert: Option<String>,
    #[arg(long)]
    ssl_key: Option<String>,
    #[arg(long)]
    ssl_ca: Option<String>,
    #[arg(long, default_value_t = false)]
    ssl_verify_client: bool,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let access_log = if self.no_access_log {
            AccessLogTarget::Disabled
        } else {
            match self.access_log.as_deref() {
                Some("-") | None => AccessLogTarget::Stdout,
                Some(path) => AccessLogTarget::File(path.to_owned()),
            }
        };

        ServerConfig {
            host: self.host,
            port: self.port,
            workers: self.workers,
            listener_backlog: self.listener_backlog,
            reuseport: self.reuseport,
            timeout: std::time::Duration::from_secs(self.timeout),
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size.unwrap_or(usize::MAX),
            max_receive_queue: self.max_receive_queue,
            max_ws_frame_size: self.max_ws_frame_size,
            shutdown_timeout: std::time::Duration::from_secs(self.shutdown_timeout),
            access_log,
            loop_backend: Box::leak(self.r#loop.into_boxed_str()),
            tls: TlsConfig {
                cert_path: self.ssl_cert,
                key_path: self.ssl_key,
                ca_path: self.ssl_ca,
                verify_client: self.ssl_verify_client,
            },
        }
    }
}

/// A minimal demo handler: answers every HTTP request with a greeting,
/// echoes WebSocket messages back verbatim, and emits one heartbeat-style
/// SSE event every second until the client disconnects.
struct DemoHandler {
    access_log: AccessLog,
}

impl Handler for DemoHandler {
    async fn call(&self, scope: Scope, mut receive: Receive, send: Send) -> Result<(), ErrorKind> {
        match scope {
            Scope::Http(http_scope) => {
                let started = Instant::now();
                let client: SocketAddr = format!("{}:{}", http_scope.client.host, http_scope.client.port)
                    .parse()
                    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
                let method = format!("{:?}", http_scope.method);
                let path = http_scope.raw_path.clone();

                while let Some(event) = receive.recv().await {
                    if let InEvent::HttpRequest { more: false, .. } = event {
                        let body = b"Hello from pagi_server!";
                        let _ = send
                            .send(OutEvent::HttpResponseStart {
                                status: 200,
                                headers: vec![("content-type".into(), "text/plain".into())],
                                trailers: false,
                            })
                            .await;
                        let _ = send
                            .send(OutEvent::HttpResponseBody { body: body.to_vec(), more: false })
                            .await;

                        self.access_log.record(client, &method, &path, 200, body.len() as u64, started.elapsed());
                        break;
                    }
                }
                Ok(())
            }

            Scope::WebSocket(_) => {
                let _ = send
                    .send(OutEvent::WebSocketAccept { subprotocol: None, headers: vec![] })
                    .await;

                while let Some(event) = receive.recv().await {
                    match event {
                        InEvent::WebSocketReceive(WsMessage::Text(text)) => {
                            let _ = send.send(OutEvent::WebSocketSend(WsMessage::Text(text))).await;
                        }
                        InEvent::WebSocketReceive(WsMessage::Bytes(bytes)) => {
                            let _ = send.send(OutEvent::WebSocketSend(WsMessage::Bytes(bytes))).await;
                        }
                        InEvent::WebSocketDisconnect { .. } => break,
                        _ => {}
                    }
                }
                Ok(())
            }

            Scope::Sse(_) => {
                let _ = send.send(OutEvent::SseStart { status: None, headers: vec![] }).await;

                loop {
                    tokio::select! {
                        biased;
                        event = receive.recv() => {
                            match event {
                                Some(InEvent::SseDisconnect) | None => break,
                                _ => {}
                            }
                        }
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                            let sent = send.send(OutEvent::SseComment { text: "keep-alive".into() }).await;
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(())
            }

            Scope::Lifespan(_) => {
                while let Some(event) = receive.recv().await {
                    match event {
                        InEvent::LifespanStartup => {
                            let _ = send.send(OutEvent::LifespanStartupComplete { state: None }).await;
                        }
                        InEvent::LifespanShutdown => {
                            let _ = send.send(OutEvent::LifespanShutdownComplete).await;
                            break;
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Cli::parse().into_config();
    logging::init(&config);

    let access_log = AccessLog::new(&config.access_log).unwrap_or_else(|err| {
        tracing::warn!(%err, "failed to open access log; falling back to disabled");
        AccessLog::disabled()
    });

    let bind_addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("invalid --host/--port");

    let limits = config.to_limits();
    let loop_backend: &'static str = config.loop_backend;
    let workers = config.workers.max(1);

    #[cfg(unix)]
    if workers > 1 {
        let listener_backlog = config.listener_backlog;
        let handler_limits = limits;
        let code = pagi_server::server::supervisor::run_forked(workers, bind_addr, listener_backlog, move |listener| {
            Server::builder()
                .listener(listener)
                .handler(DemoHandler { access_log: AccessLog::disabled() })
                .limits(handler_limits.clone())
                .event_loop(loop_backend)
                .build()
        });
        std::process::exit(code);
    }
    #[cfg(not(unix))]
    if workers > 1 {
        tracing::warn!("multi-worker mode requires a unix target; running single-process instead");
    }

    let listener = TcpListener::bind(bind_addr).await.expect("failed to bind listener");
    let server = Server::builder()
        .listener(listener)
        .handler(DemoHandler { access_log })
        .limits(limits)
        .event_loop(loop_backend)
        .build();

    let code = pagi_server::server::supervisor::run_single(server).await;
    std::process::exit(code);
}
