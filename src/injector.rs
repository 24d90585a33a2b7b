//! Injector task
//!
//! Single owner of the read side of every user input channel. Selects across
//! the context control channel and every registered `in`/`ctl-in` receiver,
//! and serializes user intent into the command queue. The injector never
//! waits on the poller, so no cycle between the two tasks exists.

use crossbeam::channel::{Receiver, Select, Sender};
use tracing::{debug, error, info};

use crate::command::{Command, Registration, SocketFn, SocketId};
use crate::registry::{ChannelRegistry, InputChans};
use crate::signal::{send_signal, Signal};
use crate::Frames;

#[derive(Clone, Copy)]
enum Port {
    In,
    CtlIn,
}

enum Action {
    Register(Box<Registration>),
    Send(SocketId, Frames),
    Command(SocketId, SocketFn),
    Teardown(SocketId),
    Shutdown,
}

pub(crate) struct Injector {
    ctl_rx: Receiver<Registration>,
    cmd_tx: Sender<Command>,
    push: zmq::Socket,
    registry: ChannelRegistry,
    term_tx: Sender<zmq::Socket>,
}

impl Injector {
    pub fn new(
        ctl_rx: Receiver<Registration>,
        cmd_tx: Sender<Command>,
        push: zmq::Socket,
        term_tx: Sender<zmq::Socket>,
    ) -> Self {
        Self {
            ctl_rx,
            cmd_tx,
            push,
            registry: ChannelRegistry::new("bridge-injector"),
            term_tx,
        }
    }

    pub fn run(mut self) {
        debug!("[BRIDGE-INJECTOR] loop started");
        loop {
            match self.next_action() {
                Action::Register(reg) => self.register(*reg),
                Action::Send(id, frames) => self.enqueue(Command::Send { id, frames }),
                Action::Command(id, f) => self.enqueue(Command::Command { id, f }),
                Action::Teardown(id) => self.teardown(id),
                Action::Shutdown => break,
            }
        }
        self.shutdown();
    }

    /// Block in a select over the control channel and every registered input
    /// channel. A disconnected channel is as much an event as a value: the
    /// control channel closing means context shutdown, a socket's input
    /// closing means teardown of that socket.
    fn next_action(&self) -> Action {
        let mut sel = Select::new();
        sel.recv(&self.ctl_rx);
        let mut index: Vec<(&SocketId, &InputChans, Port)> = Vec::new();
        for (id, chans) in self.registry.iter() {
            sel.recv(&chans.in_rx);
            index.push((id, chans, Port::In));
            sel.recv(&chans.ctl_in_rx);
            index.push((id, chans, Port::CtlIn));
        }

        let oper = sel.select();
        match oper.index() {
            0 => match oper.recv(&self.ctl_rx) {
                Ok(reg) => Action::Register(Box::new(reg)),
                Err(_) => Action::Shutdown,
            },
            i => {
                let (id, chans, port) = &index[i - 1];
                match port {
                    Port::In => match oper.recv(&chans.in_rx) {
                        Ok(frames) => Action::Send((*id).clone(), frames),
                        Err(_) => Action::Teardown((*id).clone()),
                    },
                    Port::CtlIn => match oper.recv(&chans.ctl_in_rx) {
                        Ok(f) => Action::Command((*id).clone(), f),
                        Err(_) => Action::Teardown((*id).clone()),
                    },
                }
            }
        }
    }

    fn register(&mut self, reg: Registration) {
        let Registration {
            kind,
            socket,
            in_rx,
            ctl_in_rx,
            out_tx,
            ctl_out_tx,
        } = reg;
        let id = self.registry.assign_id(kind);
        debug!("[BRIDGE-INJECTOR] registering {id}");
        self.registry.insert(id.clone(), InputChans { in_rx, ctl_in_rx });
        self.enqueue(Command::Register {
            id,
            socket,
            out: out_tx,
            ctl_out: ctl_out_tx,
        });
    }

    fn teardown(&mut self, id: SocketId) {
        debug!("[BRIDGE-INJECTOR] tearing down {id}");
        // Input side first: stop accepting user writes before the poller
        // closes the native socket and the output side.
        drop(self.registry.remove(&id));
        self.enqueue(Command::Close(id));
    }

    /// One command, one signal byte, in that order, so the poller's blocking
    /// command read after a `Message` signal always succeeds.
    fn enqueue(&self, command: Command) {
        if self.cmd_tx.send(command).is_err() {
            error!("[BRIDGE-INJECTOR] command queue disconnected, poller is gone");
            return;
        }
        if let Err(e) = send_signal(&self.push, Signal::Message) {
            error!("[BRIDGE-INJECTOR] failed to signal poller: {e}");
        }
    }

    fn shutdown(mut self) {
        info!(
            "[BRIDGE-INJECTOR] shutting down, closing {} input channel sets",
            self.registry.len()
        );
        self.registry.clear();
        if let Err(e) = send_signal(&self.push, Signal::Shutdown) {
            error!("[BRIDGE-INJECTOR] failed to send shutdown signal: {e}");
        }
        let _ = self.term_tx.send(self.push);
    }
}
