//! Process-level concerns above [`crate::server::server::Server`]: installing
//! SIGTERM/SIGINT handlers, running the single-process graceful-shutdown
//! sequence, and (optionally) a pre-fork multi-worker mode sharing one
//! `SO_REUSEPORT` listening port across child processes (spec.md §4.6).
//!
//! The teacher has no process-level fork/signal handling of its own (it is
//! always single-process); this module is grounded on `denoland-deno`'s
//! `ext/process`/`ext/signals` use of `nix` for exactly this purpose.

use crate::{
    bridge::Handler,
    lifespan::ShutdownOutcome,
    server::server::{ConnectionFilter, Server},
};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};
use tokio::signal::unix::{signal, SignalKind};

/// Exit code a worker uses to tell its supervisor "startup failed, do not
/// respawn" (spec.md §6.3).
pub const EXIT_NO_RESPAWN: i32 = 2;

/// Waits for either SIGTERM or SIGINT, whichever arrives first.
async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}

/// Runs `server` in single-process mode (spec.md §4.6): accepts connections
/// until SIGTERM/SIGINT, then stops accepting, waits for the application's
/// lifespan shutdown, and returns the process exit code.
pub async fn run_single<H: Handler, F: ConnectionFilter>(server: Server<H, F>) -> i32 {
    match server.launch_until(wait_for_shutdown_signal()).await {
        ShutdownOutcome::Complete => 0,
        ShutdownOutcome::Failed(message) => {
            tracing::error!(message, "shutdown did not complete cleanly");
            EXIT_NO_RESPAWN
        }
    }
}

/// A fork-eligible worker process: binds its own `SO_REUSEPORT` listener on
/// `bind_addr` and runs a fresh single-threaded Tokio runtime until it is
/// told to stop. Must run entirely inside the forked child — `fork()`
/// inside a live multi-threaded Tokio runtime only leaves one thread alive
/// in the child, so no runtime may exist yet when `fork` is called.
#[cfg(unix)]
mod prefork {
    use super::*;
    use nix::{
        sys::{
            signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
            wait::{waitpid, WaitPidFlag, WaitStatus},
        },
        unistd::{fork, ForkResult, Pid},
    };
    use socket2::{Domain, Socket, Type};
    use std::io;

    static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn request_shutdown(_signum: i32) {
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
    }

    fn install_flag_handler() -> nix::Result<()> {
        let action = SigAction::new(SigHandler::Handler(request_shutdown), SaFlags::empty(), SigSet::empty());
        unsafe {
            sigaction(Signal::SIGTERM, &action)?;
            sigaction(Signal::SIGINT, &action)?;
        }
        Ok(())
    }

    fn bind_reuseport(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        Ok(socket.into())
    }

    /// Runs one forked worker: installs its own signal flag, binds its
    /// `SO_REUSEPORT` share of `bind_addr`, builds a `Server` via `build`,
    /// and blocks on the single-process graceful-shutdown sequence.
    fn run_worker<H, F, B>(bind_addr: SocketAddr, backlog: i32, build: B) -> i32
    where
        H: Handler,
        F: ConnectionFilter,
        B: FnOnce(tokio::net::TcpListener) -> Server<H, F>,
    {
        if install_flag_handler().is_err() {
            return super::EXIT_NO_RESPAWN;
        }

        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(_) => return super::EXIT_NO_RESPAWN,
        };

        runtime.block_on(async move {
            let std_listener = match bind_reuseport(bind_addr, backlog) {
                Ok(listener) => listener,
                Err(_) => return super::EXIT_NO_RESPAWN,
            };
            let listener = match tokio::net::TcpListener::from_std(std_listener) {
                Ok(listener) => listener,
                Err(_) => return super::EXIT_NO_RESPAWN,
            };
            let server = build(listener);
            let signal = async {
                while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            };
            match server.launch_until(signal).await {
                ShutdownOutcome::Complete => 0,
                ShutdownOutcome::Failed(_) => super::EXIT_NO_RESPAWN,
            }
        })
    }

    /// Forks `workers` worker processes sharing one `SO_REUSEPORT` listener
    /// on `bind_addr` (spec.md §4.6 "inherited socket" mode), waits for
    /// SIGTERM/SIGINT in the parent, forwards it to every child, and
    /// respawns any child that exits with a code other than
    /// [`super::EXIT_NO_RESPAWN`]. Must be called before any Tokio runtime
    /// exists in the current process.
    pub fn run_forked<H, F, B>(workers: usize, bind_addr: SocketAddr, backlog: i32, build: B) -> i32
    where
        H: Handler,
        F: ConnectionFilter,
        B: Fn(tokio::net::TcpListener) -> Server<H, F> + Clone,
    {
        if install_flag_handler().is_err() {
            return super::EXIT_NO_RESPAWN;
        }

        let mut children = Vec::with_capacity(workers);
        for _ in 0..workers {
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let code = run_worker(bind_addr, backlog, build.clone());
                    std::process::exit(code);
                }
                Ok(ForkResult::Parent { child }) => children.push(child),
                Err(errno) => {
                    tracing::error!(%errno, "fork failed");
                    return super::EXIT_NO_RESPAWN;
                }
            }
        }

        reap_and_respawn(children, bind_addr, backlog, build)
    }

    fn reap_and_respawn<H, F, B>(mut alive: Vec<Pid>, bind_addr: SocketAddr, backlog: i32, build: B) -> i32
    where
        H: Handler,
        F: ConnectionFilter,
        B: Fn(tokio::net::TcpListener) -> Server<H, F> + Clone,
    {
        loop {
            if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                for pid in &alive {
                    let _ = kill(*pid, Signal::SIGTERM);
                }
                let deadline = Instant::now() + Duration::from_secs(30);
                while !alive.is_empty() && Instant::now() < deadline {
                    alive.retain(|pid| !matches!(waitpid(*pid, Some(WaitPidFlag::WNOHANG)), Ok(status) if status.pid().is_some() && !matches!(status, WaitStatus::StillAlive)));
                    std::thread::sleep(Duration::from_millis(50));
                }
                for pid in &alive {
                    let _ = kill(*pid, Signal::SIGKILL);
                }
                return 0;
            }

            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    alive.retain(|p| *p != pid);
                    if code == super::EXIT_NO_RESPAWN {
                        tracing::error!(?pid, "worker signaled startup failure; not respawning");
                    } else if !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                        tracing::warn!(?pid, code, "worker exited unexpectedly; respawning");
                        match unsafe { fork() } {
                            Ok(ForkResult::Child) => {
                                let code = run_worker(bind_addr, backlog, build.clone());
                                std::process::exit(code);
                            }
                            Ok(ForkResult::Parent { child }) => alive.push(child),
                            Err(errno) => tracing::error!(%errno, "respawn fork failed"),
                        }
                    }
                }
                Ok(WaitStatus::Signaled(pid, ..)) => alive.retain(|p| *p != pid),
                _ => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }
}

#[cfg(unix)]
pub use prefork::run_forked;
