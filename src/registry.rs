//! Thread-confined registries for the two bridge tasks
//!
//! Each registry is owned by exactly one task, so no locking is needed.
//! Teardown is ordered: the injector drops the input side first (no new user
//! writes are accepted), then the poller drops the native socket and the
//! output side.

use std::collections::HashMap;

use crossbeam::channel::{Receiver, Sender};

use crate::command::{CommandReply, SocketFn, SocketId, INJECT_ID};
use crate::socket::SocketKind;
use crate::Frames;

/// Input side of one socket's channel set (injector-owned).
pub(crate) struct InputChans {
    pub in_rx: Receiver<Frames>,
    pub ctl_in_rx: Receiver<SocketFn>,
}

/// Output side of one socket's channel set (poller-owned).
pub(crate) struct OutputChans {
    pub out_tx: Sender<Frames>,
    pub ctl_out_tx: Sender<CommandReply>,
}

/// Injector-local map of input channels, plus the id generator.
pub(crate) struct ChannelRegistry {
    tag: String,
    next_seq: u64,
    entries: HashMap<SocketId, InputChans>,
}

impl ChannelRegistry {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            next_seq: 0,
            entries: HashMap::new(),
        }
    }

    /// `"{thread-tag}-{socket-kind-name}-{monotonic-counter}"`
    pub fn assign_id(&mut self, kind: SocketKind) -> SocketId {
        let id = format!("{}-{}-{}", self.tag, kind.name(), self.next_seq);
        self.next_seq += 1;
        id
    }

    pub fn insert(&mut self, id: SocketId, chans: InputChans) {
        self.entries.insert(id, chans);
    }

    /// Dropping the returned channels closes the socket's input side.
    pub fn remove(&mut self, id: &str) -> Option<InputChans> {
        self.entries.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SocketId, &InputChans)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drops every input channel at once (context shutdown).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Poller-local map of native sockets and output channels, seeded with the
/// signal PULL socket under [`INJECT_ID`].
pub(crate) struct SocketRegistry {
    socks: HashMap<SocketId, zmq::Socket>,
    chans: HashMap<SocketId, OutputChans>,
}

impl SocketRegistry {
    pub fn new(signal_pull: zmq::Socket) -> Self {
        let mut socks = HashMap::new();
        socks.insert(INJECT_ID.to_string(), signal_pull);
        Self {
            socks,
            chans: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: SocketId, socket: zmq::Socket, chans: OutputChans) {
        self.socks.insert(id.clone(), socket);
        self.chans.insert(id, chans);
    }

    /// Closes the native socket first, then the output channels.
    pub fn close(&mut self, id: &str) -> bool {
        let had_socket = self.socks.remove(id).is_some();
        self.chans.remove(id);
        had_socket
    }

    pub fn socket(&self, id: &str) -> Option<&zmq::Socket> {
        self.socks.get(id)
    }

    pub fn chans(&self, id: &str) -> Option<&OutputChans> {
        self.chans.get(id)
    }

    pub fn iter_sockets(&self) -> impl Iterator<Item = (&SocketId, &zmq::Socket)> {
        self.socks.iter()
    }

    pub fn socket_count(&self) -> usize {
        self.socks.len()
    }

    /// Number of user sockets (the signal PULL excluded).
    pub fn user_socket_count(&self) -> usize {
        self.socks.len().saturating_sub(1)
    }

    /// Shutdown: drop every output channel, hand back every owned socket.
    pub fn into_sockets(mut self) -> Vec<zmq::Socket> {
        self.chans.clear();
        self.socks.drain().map(|(_, socket)| socket).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    fn input_chans() -> (Sender<Frames>, Sender<SocketFn>, InputChans) {
        let (in_tx, in_rx) = unbounded();
        let (ctl_in_tx, ctl_in_rx) = unbounded();
        (in_tx, ctl_in_tx, InputChans { in_rx, ctl_in_rx })
    }

    #[test]
    fn test_ids_are_stable_and_monotonic() {
        let mut registry = ChannelRegistry::new("bridge-injector");
        assert_eq!(registry.assign_id(SocketKind::Req), "bridge-injector-req-0");
        assert_eq!(registry.assign_id(SocketKind::Pub), "bridge-injector-pub-1");
        assert_eq!(registry.assign_id(SocketKind::Req), "bridge-injector-req-2");
    }

    #[test]
    fn test_removing_entry_disconnects_input_side() {
        let mut registry = ChannelRegistry::new("t");
        let (in_tx, _ctl_in_tx, chans) = input_chans();
        let id = registry.assign_id(SocketKind::Pair);
        registry.insert(id.clone(), chans);
        assert_eq!(registry.len(), 1);

        drop(registry.remove(&id));
        assert!(in_tx.send(vec![b"x".to_vec()]).is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_socket_registry_seeded_with_signal_pull() {
        let ctx = zmq::Context::new();
        let pull = ctx.socket(zmq::PULL).unwrap();
        let registry = SocketRegistry::new(pull);
        assert!(registry.socket(INJECT_ID).is_some());
        assert_eq!(registry.socket_count(), 1);
        assert_eq!(registry.user_socket_count(), 0);
    }
}
