//! User-facing socket handles
//!
//! A handle bundles the four channel endpoints of one bridged socket. The
//! native socket itself lives on the poller thread; everything here goes
//! through channels, so every operation is safe from any thread.

use std::any::Any;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::warn;

use crate::command::{CommandReply, SocketFn};
use crate::error::{BridgeError, Result};
use crate::Frames;

/// The ZeroMQ socket kinds the bridge can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Pair,
    Pub,
    Sub,
    Req,
    Rep,
    Dealer,
    Router,
    Pull,
    Push,
    Xpub,
    Xsub,
    Stream,
}

impl SocketKind {
    pub(crate) fn native(self) -> zmq::SocketType {
        match self {
            SocketKind::Pair => zmq::PAIR,
            SocketKind::Pub => zmq::PUB,
            SocketKind::Sub => zmq::SUB,
            SocketKind::Req => zmq::REQ,
            SocketKind::Rep => zmq::REP,
            SocketKind::Dealer => zmq::DEALER,
            SocketKind::Router => zmq::ROUTER,
            SocketKind::Pull => zmq::PULL,
            SocketKind::Push => zmq::PUSH,
            SocketKind::Xpub => zmq::XPUB,
            SocketKind::Xsub => zmq::XSUB,
            SocketKind::Stream => zmq::STREAM,
        }
    }

    /// Lowercase name used in socket ids and log lines.
    pub fn name(self) -> &'static str {
        match self {
            SocketKind::Pair => "pair",
            SocketKind::Pub => "pub",
            SocketKind::Sub => "sub",
            SocketKind::Req => "req",
            SocketKind::Rep => "rep",
            SocketKind::Dealer => "dealer",
            SocketKind::Router => "router",
            SocketKind::Pull => "pull",
            SocketKind::Push => "push",
            SocketKind::Xpub => "xpub",
            SocketKind::Xsub => "xsub",
            SocketKind::Stream => "stream",
        }
    }
}

/// An endpoint string with its `@` (bind) or `>` (connect) prefix resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Endpoint {
    Bind(String),
    Connect(String),
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(addr) = raw.strip_prefix('@') {
            if !addr.is_empty() {
                return Ok(Endpoint::Bind(addr.to_string()));
            }
        } else if let Some(addr) = raw.strip_prefix('>') {
            if !addr.is_empty() {
                return Ok(Endpoint::Connect(addr.to_string()));
            }
        }
        Err(BridgeError::InvalidEndpoint(raw.to_string()))
    }
}

/// Handle to one bridged socket.
///
/// Dropping the handle closes its `in` channel, which the injector interprets
/// as a teardown request, exactly like [`SocketHandle::close`].
#[derive(Debug)]
pub struct SocketHandle {
    kind: SocketKind,
    in_tx: Mutex<Option<Sender<Frames>>>,
    out_rx: Receiver<Frames>,
    ctl_in_tx: Sender<SocketFn>,
    ctl_out_rx: Receiver<CommandReply>,
}

impl SocketHandle {
    pub(crate) fn new(
        kind: SocketKind,
        in_tx: Sender<Frames>,
        out_rx: Receiver<Frames>,
        ctl_in_tx: Sender<SocketFn>,
        ctl_out_rx: Receiver<CommandReply>,
    ) -> Self {
        Self {
            kind,
            in_tx: Mutex::new(Some(in_tx)),
            out_rx,
            ctl_in_tx,
            ctl_out_rx,
        }
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Non-blocking offer of a single frame. Returns whether the message was
    /// accepted; a full buffer or a closed socket drops it, never blocks.
    pub fn send(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.send_multipart(vec![frame.into()])
    }

    /// Non-blocking offer of an ordered multipart message.
    pub fn send_multipart(&self, frames: Frames) -> bool {
        if frames.is_empty() {
            return false;
        }
        let guard = self.in_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(frames) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("[BRIDGE] {} send buffer full, dropping message", self.kind.name());
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Blocking receive. `None` once the socket is closed and drained.
    pub fn recv(&self) -> Option<Frames> {
        self.out_rx.recv().ok()
    }

    /// Blocking receive with an upper bound, composed from the channel
    /// library's timeout facility. `None` on timeout or closed socket.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frames> {
        self.out_rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking receive. `None` if nothing is queued or the socket is
    /// closed.
    pub fn try_recv(&self) -> Option<Frames> {
        self.out_rx.try_recv().ok()
    }

    /// Run `f` against the native socket on its owner thread and return its
    /// result. Blocks until the reply arrives; an error raised by `f` (or a
    /// panic, captured) comes back as `Err`.
    pub fn command<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&zmq::Socket) -> std::result::Result<T, zmq::Error> + Send + 'static,
    {
        let boxed: SocketFn = Box::new(move |socket| {
            let value = f(socket)?;
            Ok(Some(Box::new(value) as Box<dyn Any + Send>))
        });
        self.ctl_in_tx
            .send(boxed)
            .map_err(|_| BridgeError::SocketClosed)?;
        match self
            .ctl_out_rx
            .recv()
            .map_err(|_| BridgeError::SocketClosed)?
        {
            CommandReply::Value(value) => value
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| BridgeError::CommandType),
            // A closure without a value translates to the empty value.
            CommandReply::Nil => (Box::new(()) as Box<dyn Any>)
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| BridgeError::CommandType),
            CommandReply::Error(e) => Err(e),
        }
    }

    pub fn bind(&self, endpoint: &str) -> Result<()> {
        let addr = endpoint.to_string();
        self.command(move |s| s.bind(&addr))
    }

    pub fn unbind(&self, endpoint: &str) -> Result<()> {
        let addr = endpoint.to_string();
        self.command(move |s| s.unbind(&addr))
    }

    pub fn connect(&self, endpoint: &str) -> Result<()> {
        let addr = endpoint.to_string();
        self.command(move |s| s.connect(&addr))
    }

    pub fn disconnect(&self, endpoint: &str) -> Result<()> {
        let addr = endpoint.to_string();
        self.command(move |s| s.disconnect(&addr))
    }

    pub fn subscribe(&self, topic: impl Into<Vec<u8>>) -> Result<()> {
        let topic = topic.into();
        self.command(move |s| s.set_subscribe(&topic))
    }

    pub fn unsubscribe(&self, topic: impl Into<Vec<u8>>) -> Result<()> {
        let topic = topic.into();
        self.command(move |s| s.set_unsubscribe(&topic))
    }

    /// Resolved address of the last bind, needed after wildcard binds.
    pub fn last_endpoint(&self) -> Result<String> {
        self.command(|s| {
            let endpoint = s.get_last_endpoint()?;
            Ok(endpoint.unwrap_or_else(|raw| String::from_utf8_lossy(&raw).into_owned()))
        })
    }

    /// `@addr` binds, `>addr` connects; anything else is rejected.
    pub fn attach(&self, endpoint: &str) -> Result<()> {
        match Endpoint::parse(endpoint)? {
            Endpoint::Bind(addr) => self.bind(&addr),
            Endpoint::Connect(addr) => self.connect(&addr),
        }
    }

    /// Probe liveness through `ctl-in`: a rejected offer means the bridge
    /// has torn the socket down; an accepted no-op must produce a reply
    /// unless teardown won the race.
    pub fn is_terminated(&self) -> bool {
        let probe: SocketFn = Box::new(|_| Ok(None));
        match self.ctl_in_tx.try_send(probe) {
            Ok(()) => self.ctl_out_rx.recv().is_err(),
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => true,
        }
    }

    /// Whether [`SocketHandle::close`] has been called on this handle.
    pub fn is_closed(&self) -> bool {
        self.in_tx.lock().is_none()
    }

    /// Close the `in` channel, requesting orderly teardown. Queued inbound
    /// messages remain readable until the bridge drops the `out` side.
    pub fn close(&self) {
        self.in_tx.lock().take();
    }
}
