//! Poller task
//!
//! Single owner of every native socket in a context. Blocks in `zmq::poll`
//! over all of them (the signal PULL included), dispatches queued commands
//! when the signal socket fires, and forwards inbound frames to the owning
//! socket's `out` channel. Every side effect on a native socket happens on
//! this one thread, which is what satisfies ZeroMQ's single-thread rule.
//!
//! The poller never reads from a user channel: offers onto `out` are
//! non-blocking (overflow drops, counted) and `ctl-out` is unbounded, so no
//! user-side behavior can stall this loop.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::command::{run_socket_fn, Command, CommandReply, SocketId, INJECT_ID};
use crate::error::{invariant_breach, BridgeError};
use crate::registry::{OutputChans, SocketRegistry};
use crate::signal::Signal;
use crate::stats::BridgeStats;
use crate::Frames;

pub(crate) struct Poller {
    registry: SocketRegistry,
    cmd_rx: Receiver<Command>,
    stats: Arc<BridgeStats>,
    term_tx: Sender<Vec<zmq::Socket>>,
}

impl Poller {
    pub fn new(
        signal_pull: zmq::Socket,
        cmd_rx: Receiver<Command>,
        stats: Arc<BridgeStats>,
        term_tx: Sender<Vec<zmq::Socket>>,
    ) -> Self {
        Self {
            registry: SocketRegistry::new(signal_pull),
            cmd_rx,
            stats,
            term_tx,
        }
    }

    pub fn run(mut self) {
        debug!("[BRIDGE-POLLER] loop started");
        let mut rng = rand::rng();
        loop {
            let ready = match self.poll_ready() {
                Some(ready) => ready,
                None => break,
            };
            if ready.is_empty() {
                continue;
            }

            // Uniform random pick among the ready set, matching the fairness
            // of the channel library's select on the injector side.
            let id = ready[rng.random_range(0..ready.len())].clone();
            if id == INJECT_ID {
                match self.read_signal() {
                    Some(Signal::Message) => {
                        // The signal was sent after the command was queued,
                        // so this read cannot block indefinitely.
                        let command = match self.cmd_rx.recv() {
                            Ok(command) => command,
                            Err(_) => {
                                invariant_breach("message signal without a queued command")
                            }
                        };
                        self.dispatch(command);
                    }
                    Some(Signal::Shutdown) => break,
                    None => {}
                }
            } else {
                self.forward_inbound(&id);
            }
        }
        self.shutdown();
    }

    /// Block in `zmq::poll` over all owned sockets and return the readable
    /// ids. `None` means the ZeroMQ context went away underneath us.
    fn poll_ready(&self) -> Option<Vec<SocketId>> {
        let mut order = Vec::with_capacity(self.registry.socket_count());
        let mut items = Vec::with_capacity(self.registry.socket_count());
        for (id, socket) in self.registry.iter_sockets() {
            order.push(id);
            items.push(socket.as_poll_item(zmq::POLLIN));
        }

        match zmq::poll(&mut items, -1) {
            Ok(_) => {}
            Err(zmq::Error::EINTR) => return Some(Vec::new()),
            Err(zmq::Error::ETERM) => {
                error!("[BRIDGE-POLLER] context terminated under the poller");
                return None;
            }
            Err(e) => {
                error!("[BRIDGE-POLLER] poll failed: {e}");
                return Some(Vec::new());
            }
        }

        Some(
            order
                .into_iter()
                .zip(items.iter())
                .filter(|(_, item)| item.is_readable())
                .map(|(id, _)| id.clone())
                .collect(),
        )
    }

    fn read_signal(&self) -> Option<Signal> {
        let Some(pull) = self.registry.socket(INJECT_ID) else {
            invariant_breach("signal socket missing from registry");
        };
        let bytes = match pull.recv_bytes(zmq::DONTWAIT) {
            Ok(bytes) => bytes,
            Err(zmq::Error::EAGAIN) => return None,
            Err(e) => {
                error!("[BRIDGE-POLLER] signal receive failed: {e}");
                return None;
            }
        };
        let Some(&byte) = bytes.first() else {
            invariant_breach("empty signal frame");
        };
        // Any tag other than message/shutdown means the signal stream is
        // corrupt, which nothing downstream can recover from.
        match Signal::from_byte(byte) {
            Some(signal) => Some(signal),
            None => invariant_breach(&format!("invalid signal tag {byte:#04x}")),
        }
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Register {
                id,
                socket,
                out,
                ctl_out,
            } => {
                debug!("[BRIDGE-POLLER] registered {id}");
                self.registry.insert(
                    id,
                    socket,
                    OutputChans {
                        out_tx: out,
                        ctl_out_tx: ctl_out,
                    },
                );
                self.stats.socket_registered();
            }
            Command::Close(id) => {
                debug!("[BRIDGE-POLLER] closing {id}");
                if self.registry.close(&id) {
                    self.stats.socket_closed();
                }
            }
            Command::Command { id, f } => {
                let reply = match self.registry.socket(&id) {
                    Some(socket) => run_socket_fn(socket, f),
                    None => CommandReply::Error(BridgeError::SocketClosed),
                };
                self.stats.record_command();
                if let Some(chans) = self.registry.chans(&id) {
                    // ctl-out is unbounded: the reply offer can never block
                    // the poller, and every blocking caller unblocks.
                    let _ = chans.ctl_out_tx.send(reply);
                }
            }
            Command::Send { id, frames } => self.send_outbound(&id, frames),
        }
    }

    /// Non-blocking multipart send. Backpressure from ZeroMQ drops the whole
    /// message with an error log; the poller itself never blocks and never
    /// dies here.
    fn send_outbound(&self, id: &str, frames: Frames) {
        let Some(socket) = self.registry.socket(id) else {
            warn!("[BRIDGE-POLLER] send to unknown socket {id}");
            return;
        };
        if frames.is_empty() {
            return;
        }
        let last = frames.len() - 1;
        for (i, frame) in frames.into_iter().enumerate() {
            let flags = if i < last {
                zmq::DONTWAIT | zmq::SNDMORE
            } else {
                zmq::DONTWAIT
            };
            match socket.send(frame, flags) {
                Ok(()) => {}
                Err(zmq::Error::EAGAIN) => {
                    self.stats.record_send_drop();
                    error!("[BRIDGE-POLLER] send would block on {id}, dropping message");
                    return;
                }
                Err(e) => {
                    self.stats.record_send_failure();
                    error!("[BRIDGE-POLLER] send failed on {id}: {e}");
                    return;
                }
            }
        }
        self.stats.record_message_out();
    }

    /// Read the full message off a readable user socket and offer it on the
    /// socket's `out` channel.
    fn forward_inbound(&mut self, id: &str) {
        let Some(socket) = self.registry.socket(id) else {
            return;
        };
        let frames = match socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => return,
            Err(e) => {
                error!("[BRIDGE-POLLER] receive failed on {id}: {e}");
                return;
            }
        };
        let Some(chans) = self.registry.chans(id) else {
            return;
        };
        match chans.out_tx.try_send(frames) {
            Ok(()) => self.stats.record_message_in(),
            Err(TrySendError::Full(_)) => {
                self.stats.record_recv_drop();
                warn!("[BRIDGE-POLLER] out channel full on {id}, dropping message");
            }
            // The user dropped the receiving end; nothing to deliver to.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn shutdown(self) {
        let user_sockets = self.registry.user_socket_count();
        for _ in 0..user_sockets {
            self.stats.socket_closed();
        }
        let sockets = self.registry.into_sockets();
        info!(
            "[BRIDGE-POLLER] shutting down, releasing {} sockets",
            sockets.len()
        );
        let _ = self.term_tx.send(sockets);
    }
}
