//! Bridge health counters
//!
//! Lock-free counters updated by the poller and readable from any thread.
//! Drops are counted rather than silently absorbed so callers can observe
//! poller-side backpressure without the bridge ever blocking on them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Default, Debug)]
pub struct BridgeStats {
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    commands_run: AtomicU64,
    /// Inbound messages dropped because a socket's `out` channel was full.
    recv_drops: AtomicU64,
    /// Outbound messages dropped because the ZeroMQ send would have blocked.
    send_drops: AtomicU64,
    /// Outbound messages lost to a ZeroMQ error other than backpressure.
    send_failures: AtomicU64,
    /// User sockets currently owned by the poller.
    active_sockets: AtomicUsize,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_in: u64,
    pub messages_out: u64,
    pub commands_run: u64,
    pub recv_drops: u64,
    pub send_drops: u64,
    pub send_failures: u64,
    pub active_sockets: usize,
}

impl BridgeStats {
    pub(crate) fn record_message_in(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_out(&self) {
        self.messages_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_command(&self) {
        self.commands_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv_drop(&self) {
        self.recv_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_drop(&self) {
        self.send_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn socket_registered(&self) {
        self.active_sockets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn socket_closed(&self) {
        self.active_sockets.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_sockets(&self) -> usize {
        self.active_sockets.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            commands_run: self.commands_run.load(Ordering::Relaxed),
            recv_drops: self.recv_drops.load(Ordering::Relaxed),
            send_drops: self.send_drops.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            active_sockets: self.active_sockets.load(Ordering::Relaxed),
        }
    }
}
