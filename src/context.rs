//! Context lifecycle
//!
//! A context owns one ZeroMQ context, the signaling pair, the command queue,
//! the control channel, and the two bridge threads. Both threads are either
//! not yet started, both alive, or both terminated; the shutdown barrier in
//! [`Context::close`] is what upholds the last transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::command::{panic_message, Registration};
use crate::config::{BridgeConfig, SocketConfig};
use crate::error::{invariant_breach, BridgeError, Result};
use crate::injector::Injector;
use crate::poller::Poller;
use crate::signal::SignalPair;
use crate::socket::{Endpoint, SocketHandle, SocketKind};
use crate::stats::{BridgeStats, StatsSnapshot};

enum State {
    Idle,
    Running(RunningState),
    Terminated,
}

/// Sets a task-terminated flag on every exit path, unwinding included, so
/// `is_terminated` and `close` can never disagree about a dead thread.
struct DoneGuard(Arc<AtomicBool>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

struct RunningState {
    ctl_tx: Sender<Registration>,
    injector_term: Receiver<zmq::Socket>,
    poller_term: Receiver<Vec<zmq::Socket>>,
    injector_handle: JoinHandle<()>,
    poller_handle: JoinHandle<()>,
}

/// A logical grouping of bridged sockets over one ZeroMQ context.
///
/// Cheap to clone; clones share the same bridge. The two bridge threads are
/// started lazily on the first socket creation (or explicitly via
/// [`Context::init`]).
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    config: BridgeConfig,
    zmq_ctx: zmq::Context,
    stats: Arc<BridgeStats>,
    state: Mutex<State>,
    started: AtomicBool,
    injector_done: Arc<AtomicBool>,
    poller_done: Arc<AtomicBool>,
}

impl Context {
    /// Create a context with default configuration. Threads are not started
    /// until the first socket is created.
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default()).expect("default bridge configuration is valid")
    }

    pub fn with_config(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let zmq_ctx = zmq::Context::new();
        zmq_ctx.set_io_threads(config.io_threads)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                zmq_ctx,
                stats: Arc::new(BridgeStats::default()),
                state: Mutex::new(State::Idle),
                started: AtomicBool::new(false),
                injector_done: Arc::new(AtomicBool::new(false)),
                poller_done: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    /// Start the bridge threads if they are not already running. Returns
    /// whether this call actually started them.
    pub fn init(&self) -> Result<bool> {
        let mut state = self.inner.state.lock();
        match &*state {
            State::Running(_) => Ok(false),
            State::Terminated => Err(BridgeError::ContextTerminated),
            State::Idle => {
                *state = State::Running(self.start()?);
                Ok(true)
            }
        }
    }

    /// Create a bridged socket of the given kind. Options are applied before
    /// any bind or connect; subscriptions after. The socket is registered
    /// with the bridge before the handle is returned.
    pub fn socket(&self, kind: SocketKind, mut config: SocketConfig) -> Result<SocketHandle> {
        config.validate()?;
        let ctl_tx = self.ensure_running()?;

        let socket = self.inner.zmq_ctx.socket(kind.native())?;
        apply_socket_options(&socket, &config)?;
        for addr in &config.bind {
            socket.bind(addr)?;
        }
        for addr in &config.connect {
            socket.connect(addr)?;
        }
        for raw in &config.attach {
            match Endpoint::parse(raw)? {
                Endpoint::Bind(addr) => socket.bind(&addr)?,
                Endpoint::Connect(addr) => socket.connect(&addr)?,
            }
        }
        for topic in &config.subscribe {
            socket.set_subscribe(topic)?;
        }

        let in_capacity = config.in_capacity.unwrap_or(self.inner.config.in_capacity);
        let out_capacity = config.out_capacity.unwrap_or(self.inner.config.out_capacity);
        let (in_tx, in_rx) = config.in_channel.take().unwrap_or_else(|| bounded(in_capacity));
        let (out_tx, out_rx) = config
            .out_channel
            .take()
            .unwrap_or_else(|| bounded(out_capacity));
        let (ctl_in_tx, ctl_in_rx) = bounded(self.inner.config.ctl_capacity);
        let (ctl_out_tx, ctl_out_rx) = unbounded();

        ctl_tx
            .send(Registration {
                kind,
                socket,
                in_rx,
                ctl_in_rx,
                out_tx,
                ctl_out_tx,
            })
            .map_err(|_| BridgeError::ContextTerminated)?;

        debug!("[BRIDGE] created {} socket", kind.name());
        Ok(SocketHandle::new(kind, in_tx, out_rx, ctl_in_tx, ctl_out_rx))
    }

    /// Orderly shutdown: close the control channel, await both task
    /// termination signals, then close every returned native socket on this
    /// thread. Returns true exactly once; later calls are no-ops.
    pub fn close(&self) -> bool {
        let mut state = self.inner.state.lock();
        shutdown_state(&mut state)
    }

    /// True once both bridge threads have terminated (vacuously true for a
    /// context closed before it ever started).
    pub fn is_terminated(&self) -> bool {
        if !matches!(*self.inner.state.lock(), State::Terminated) {
            return false;
        }
        if !self.inner.started.load(Ordering::Acquire) {
            return true;
        }
        self.inner.injector_done.load(Ordering::Acquire)
            && self.inner.poller_done.load(Ordering::Acquire)
    }

    /// Number of user sockets currently owned by the poller.
    pub fn socket_count(&self) -> usize {
        self.inner.stats.active_sockets()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn ensure_running(&self) -> Result<Sender<Registration>> {
        let mut state = self.inner.state.lock();
        if let State::Idle = &*state {
            *state = State::Running(self.start()?);
        }
        match &*state {
            State::Running(run) => Ok(run.ctl_tx.clone()),
            State::Terminated => Err(BridgeError::ContextTerminated),
            State::Idle => invariant_breach("context state regressed to idle"),
        }
    }

    /// Wire the signaling pair on this thread (PULL bound before PUSH
    /// connects), then spawn the poller first and the injector second.
    fn start(&self) -> Result<RunningState> {
        let pair = SignalPair::create(&self.inner.zmq_ctx)?;
        let (ctl_tx, ctl_rx) = unbounded();
        let (cmd_tx, cmd_rx) = unbounded();
        let (injector_term_tx, injector_term) = bounded(1);
        let (poller_term_tx, poller_term) = bounded(1);

        let poller = Poller::new(
            pair.pull,
            cmd_rx,
            Arc::clone(&self.inner.stats),
            poller_term_tx,
        );
        let poller_done = DoneGuard(Arc::clone(&self.inner.poller_done));
        let poller_handle = thread::Builder::new()
            .name("bridge-poller".to_string())
            .spawn(move || {
                let _done = poller_done;
                poller.run();
            })
            .expect("failed to spawn bridge-poller thread");

        let injector = Injector::new(ctl_rx, cmd_tx, pair.push, injector_term_tx);
        let injector_done = DoneGuard(Arc::clone(&self.inner.injector_done));
        let injector_handle = thread::Builder::new()
            .name("bridge-injector".to_string())
            .spawn(move || {
                let _done = injector_done;
                injector.run();
            })
            .expect("failed to spawn bridge-injector thread");

        self.inner.started.store(true, Ordering::Release);
        info!("[BRIDGE] context started");
        Ok(RunningState {
            ctl_tx,
            injector_term,
            poller_term,
            injector_handle,
            poller_handle,
        })
    }
}

fn shutdown_state(state: &mut State) -> bool {
    match std::mem::replace(state, State::Terminated) {
        State::Idle => true,
        State::Terminated => false,
        State::Running(run) => {
            info!("[BRIDGE] shutting down context");
            let RunningState {
                ctl_tx,
                injector_term,
                poller_term,
                injector_handle,
                poller_handle,
            } = run;
            // Closing the control channel is the shutdown request.
            drop(ctl_tx);
            if let Ok(push) = injector_term.recv() {
                drop(push);
            }
            // The poller hands back every native socket it still owns;
            // dropping them here closes them on a thread that no longer
            // interleaves with the poller's use of them.
            if let Ok(sockets) = poller_term.recv() {
                drop(sockets);
            }
            if let Err(payload) = injector_handle.join() {
                error!(
                    "[BRIDGE] injector thread panicked: {}",
                    panic_message(payload)
                );
            }
            if let Err(payload) = poller_handle.join() {
                error!(
                    "[BRIDGE] poller thread panicked: {}",
                    panic_message(payload)
                );
            }
            info!("[BRIDGE] context terminated");
            true
        }
    }
}

fn apply_socket_options(socket: &zmq::Socket, config: &SocketConfig) -> Result<()> {
    if let Some(identity) = &config.identity {
        socket.set_identity(identity)?;
    }
    if let Some(on) = config.plain_server {
        socket.set_plain_server(on)?;
    }
    if let Some(user) = &config.plain_username {
        socket.set_plain_username(Some(user))?;
    }
    if let Some(pass) = &config.plain_password {
        socket.set_plain_password(Some(pass))?;
    }
    if let Some(domain) = &config.zap_domain {
        socket.set_zap_domain(domain)?;
    }
    if let Some(hwm) = config.send_hwm {
        socket.set_sndhwm(hwm)?;
    }
    if let Some(hwm) = config.recv_hwm {
        socket.set_rcvhwm(hwm)?;
    }
    if let Some(linger) = config.linger {
        socket.set_linger(linger)?;
    }
    if config.req_retry {
        socket.set_req_relaxed(true)?;
        socket.set_req_correlate(true)?;
    }
    Ok(())
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        shutdown_state(self.state.get_mut());
    }
}

static DEFAULT_CONTEXT: Lazy<Context> = Lazy::new(Context::default);

/// The process-wide default context, created lazily on first use and never
/// closed automatically.
pub fn default_context() -> &'static Context {
    &DEFAULT_CONTEXT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let ctx = Context::new();
        assert!(ctx.init().unwrap());
        assert!(!ctx.init().unwrap());
        assert!(ctx.close());
        assert!(ctx.init().is_err());
    }

    #[test]
    fn test_close_returns_true_exactly_once() {
        let ctx = Context::new();
        ctx.init().unwrap();
        assert!(ctx.close());
        assert!(!ctx.close());
        assert!(ctx.is_terminated());
    }

    #[test]
    fn test_close_before_start() {
        let ctx = Context::new();
        assert!(!ctx.is_terminated());
        assert!(ctx.close());
        assert!(ctx.is_terminated());
        assert!(!ctx.close());
    }

    #[test]
    fn test_socket_on_terminated_context() {
        let ctx = Context::new();
        ctx.close();
        let err = ctx.socket(SocketKind::Pair, SocketConfig::new()).unwrap_err();
        assert!(matches!(err, BridgeError::ContextTerminated));
    }

    #[test]
    fn test_invalid_io_threads_rejected() {
        let config = BridgeConfig {
            io_threads: 0,
            ..BridgeConfig::default()
        };
        assert!(Context::with_config(config).is_err());
    }
}
