//! Thread-safe bridge between ZeroMQ sockets and crossbeam channels.
//!
//! ZeroMQ sockets must only ever be touched by one thread. This crate hides
//! that constraint behind plain channels: every bridged socket is owned by a
//! single poller thread, and users talk to it through a [`SocketHandle`]
//! from any thread they like.
//!
//! # Architecture
//!
//! Two threads per [`Context`]:
//! - **`bridge-poller`**: owns every native socket, blocks in `zmq::poll`,
//!   dispatches commands and forwards inbound frames.
//! - **`bridge-injector`**: owns the read side of every user input channel,
//!   selects across them, and serializes user intent into a one-way command
//!   queue toward the poller. An internal PUSH/PULL pair wakes the poller
//!   whenever a command is waiting.
//!
//! The two threads never wait on each other except through that one-way
//! queue, which is what keeps the bridge deadlock-free: user channels can
//! fill up, sockets can be registered and torn down at runtime, and the
//! poller keeps making progress.
//!
//! Arbitrary socket manipulation (options, binds, subscriptions, anything
//! `&zmq::Socket` exposes) goes through [`SocketHandle::command`], which
//! ships a closure to the poller thread and blocks for its result.
//!
//! # Example
//!
//! ```no_run
//! use zmq_bridge::{Context, SocketConfig, SocketKind};
//!
//! let ctx = Context::new();
//! let rep = ctx
//!     .socket(SocketKind::Rep, SocketConfig::new().endpoint("@tcp://127.0.0.1:5555"))
//!     .unwrap();
//! let req = ctx
//!     .socket(SocketKind::Req, SocketConfig::new().endpoint(">tcp://127.0.0.1:5555"))
//!     .unwrap();
//!
//! req.send("ping");
//! let request = rep.recv().unwrap();
//! rep.send(request[0].clone());
//! assert_eq!(req.recv().unwrap()[0], b"ping");
//!
//! ctx.close();
//! ```

mod command;
mod config;
mod context;
mod error;
mod injector;
mod poller;
mod proxy;
mod registry;
mod signal;
mod socket;
mod stats;

/// A message as an ordered sequence of frames. A single-frame message is a
/// one-element sequence.
pub type Frames = Vec<Vec<u8>>;

pub use command::{CommandReply, SocketFn};
pub use config::{BridgeConfig, ChannelPair, SocketConfig};
pub use context::{default_context, Context};
pub use error::{BridgeError, Result};
pub use proxy::proxy;
pub use socket::{SocketHandle, SocketKind};
pub use stats::{BridgeStats, StatsSnapshot};

/// Create a socket on the process-wide default context.
pub fn socket(kind: SocketKind, config: SocketConfig) -> Result<SocketHandle> {
    default_context().socket(kind, config)
}
