//! Wake-up signaling between the injector and the poller
//!
//! A PUSH/PULL pair over an in-process endpoint carries one-byte tags whose
//! only job is to unblock the poller out of `zmq::poll`. The real payload
//! always travels through the command queue; every `Message` tag pairs 1:1
//! with exactly one queued command.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// One-byte tag sent through the signaling pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// One command is waiting in the command queue.
    Message,
    /// The context is shutting down.
    Shutdown,
}

impl Signal {
    pub(crate) const fn as_byte(self) -> u8 {
        match self {
            Signal::Message => b'm',
            Signal::Shutdown => b's',
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'm' => Some(Signal::Message),
            b's' => Some(Signal::Shutdown),
            _ => None,
        }
    }
}

/// The connected pair. `push` goes to the injector, `pull` to the poller.
pub(crate) struct SignalPair {
    pub push: zmq::Socket,
    pub pull: zmq::Socket,
}

static PAIR_COUNTER: AtomicU64 = AtomicU64::new(0);

impl SignalPair {
    /// Build the pair on the calling thread: PULL bound first, PUSH connected
    /// second, so neither task can observe a half-wired pair. HWMs are
    /// unlimited to keep the signal-to-command pairing exact, and the PUSH
    /// side is immediate so nothing is queued before the connection is up.
    pub fn create(ctx: &zmq::Context) -> Result<Self> {
        let addr = format!(
            "inproc://zmq-bridge-signal-{}",
            PAIR_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        let pull = ctx.socket(zmq::PULL)?;
        pull.set_linger(0)?;
        pull.set_rcvhwm(0)?;
        pull.bind(&addr)?;

        let push = ctx.socket(zmq::PUSH)?;
        push.set_linger(0)?;
        push.set_sndhwm(0)?;
        push.set_immediate(true)?;
        push.connect(&addr)?;

        Ok(Self { push, pull })
    }
}

/// Send one tag through the PUSH side.
pub(crate) fn send_signal(push: &zmq::Socket, signal: Signal) -> Result<()> {
    push.send(&[signal.as_byte()][..], 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_byte_round_trip() {
        for signal in [Signal::Message, Signal::Shutdown] {
            assert_eq!(Signal::from_byte(signal.as_byte()), Some(signal));
        }
        assert_eq!(Signal::from_byte(b'x'), None);
    }

    #[test]
    fn test_pair_delivers_tags_in_order() {
        let ctx = zmq::Context::new();
        let pair = SignalPair::create(&ctx).unwrap();

        send_signal(&pair.push, Signal::Message).unwrap();
        send_signal(&pair.push, Signal::Shutdown).unwrap();

        let first = pair.pull.recv_bytes(0).unwrap();
        let second = pair.pull.recv_bytes(0).unwrap();
        assert_eq!(Signal::from_byte(first[0]), Some(Signal::Message));
        assert_eq!(Signal::from_byte(second[0]), Some(Signal::Shutdown));
    }

    #[test]
    fn test_each_context_gets_its_own_endpoint() {
        let ctx = zmq::Context::new();
        let _first = SignalPair::create(&ctx).unwrap();
        // A second pair on the same context must not collide on the address.
        let _second = SignalPair::create(&ctx).unwrap();
    }
}
