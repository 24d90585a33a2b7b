//! Commands exchanged between the injector and the poller
//!
//! The command queue is the only channel between the two tasks. It is strictly
//! FIFO, single-producer (injector), single-consumer (poller), and every
//! entry is paired with exactly one `Message` signal through the signaling
//! pair.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam::channel::{Receiver, Sender};

use crate::error::{BridgeError, Result};
use crate::socket::SocketKind;
use crate::Frames;

/// Stable identifier assigned by the injector at registration. Used for
/// logging and as the key in both registries.
pub(crate) type SocketId = String;

/// Registry key of the signal PULL socket inside the poller.
pub(crate) const INJECT_ID: &str = "__inject__";

/// A user closure executed against the native socket on the poller thread.
///
/// `Ok(Some(value))` is delivered as a boxed value, `Ok(None)` as the
/// nil-sentinel, and `Err` as a captured error. The closure's environment
/// must be movable to the poller thread.
pub type SocketFn =
    Box<dyn FnOnce(&zmq::Socket) -> Result<Option<Box<dyn Any + Send>>> + Send + 'static>;

/// Reply offered on `ctl-out` for every executed [`SocketFn`]. One reply is
/// produced per command, without exception, so blocking callers always
/// unblock.
pub enum CommandReply {
    Value(Box<dyn Any + Send>),
    /// The closure legitimately returned no value.
    Nil,
    Error(BridgeError),
}

impl std::fmt::Debug for CommandReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandReply::Value(_) => f.write_str("CommandReply::Value(..)"),
            CommandReply::Nil => f.write_str("CommandReply::Nil"),
            CommandReply::Error(e) => write!(f, "CommandReply::Error({e})"),
        }
    }
}

/// One unit of work handed from the injector to the poller.
pub(crate) enum Command {
    Register {
        id: SocketId,
        socket: zmq::Socket,
        out: Sender<Frames>,
        ctl_out: Sender<CommandReply>,
    },
    Close(SocketId),
    Command { id: SocketId, f: SocketFn },
    Send { id: SocketId, frames: Frames },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Register { id, .. } => write!(f, "Register({id})"),
            Command::Close(id) => write!(f, "Close({id})"),
            Command::Command { id, .. } => write!(f, "Command({id})"),
            Command::Send { id, frames } => write!(f, "Send({id}, {} frames)", frames.len()),
        }
    }
}

/// Registration request carried on the context control channel. The injector
/// keeps the input side and forwards the output side to the poller.
pub(crate) struct Registration {
    pub kind: SocketKind,
    pub socket: zmq::Socket,
    pub in_rx: Receiver<Frames>,
    pub ctl_in_rx: Receiver<SocketFn>,
    pub out_tx: Sender<Frames>,
    pub ctl_out_tx: Sender<CommandReply>,
}

/// Run a user closure against the owned socket, converting every possible
/// outcome (value, no value, error, panic) into a reply. A panicking closure
/// must never take the poller down with it.
pub(crate) fn run_socket_fn(socket: &zmq::Socket, f: SocketFn) -> CommandReply {
    match panic::catch_unwind(AssertUnwindSafe(|| f(socket))) {
        Ok(Ok(Some(value))) => CommandReply::Value(value),
        Ok(Ok(None)) => CommandReply::Nil,
        Ok(Err(e)) => CommandReply::Error(e),
        Err(payload) => CommandReply::Error(BridgeError::CommandPanicked(panic_message(payload))),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
