//! Bridge and per-socket configuration

use crossbeam::channel::{Receiver, Sender};

use crate::error::{BridgeError, Result};
use crate::Frames;

/// Both endpoints of a caller-supplied channel. The bridge keeps the side it
/// owns (receiver for `in`, sender for `out`) and hands the other side back
/// through the socket handle.
pub type ChannelPair<T> = (Sender<T>, Receiver<T>);

/// Runtime configuration for a bridge context.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// ZeroMQ I/O threads for the underlying context.
    pub io_threads: i32,
    /// Default capacity of each socket's `in` channel. Kept small so that
    /// backpressure lands on the caller instead of hiding in the bridge.
    pub in_capacity: usize,
    /// Capacity of each socket's `ctl-in` channel.
    pub ctl_capacity: usize,
    /// Default capacity of each socket's `out` channel. Matches the default
    /// ZeroMQ receive high-water mark.
    pub out_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            io_threads: 1,
            in_capacity: 16,
            ctl_capacity: 16,
            out_capacity: 1000,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.io_threads < 1 {
            return Err(BridgeError::Config("io_threads must be >= 1".to_string()));
        }
        if self.in_capacity == 0 || self.ctl_capacity == 0 || self.out_capacity == 0 {
            return Err(BridgeError::Config(
                "channel capacities must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-socket options, applied when the socket is created.
///
/// Identity and security options are applied before any bind or connect;
/// subscriptions are applied last.
#[derive(Debug, Default)]
pub struct SocketConfig {
    /// `@addr` / `>addr` shorthand endpoints (bind / connect).
    pub attach: Vec<String>,
    pub bind: Vec<String>,
    pub connect: Vec<String>,
    pub identity: Option<Vec<u8>>,
    pub plain_server: Option<bool>,
    pub plain_username: Option<String>,
    pub plain_password: Option<String>,
    pub zap_domain: Option<String>,
    pub send_hwm: Option<i32>,
    pub recv_hwm: Option<i32>,
    /// Linger applied at creation. `None` keeps the library default, which
    /// can stall context teardown behind unsent messages.
    pub linger: Option<i32>,
    pub subscribe: Vec<Vec<u8>>,
    /// Sets ZMQ_REQ_RELAXED and ZMQ_REQ_CORRELATE so a REQ socket survives
    /// lost replies.
    pub req_retry: bool,
    /// Per-socket override of [`BridgeConfig::in_capacity`].
    pub in_capacity: Option<usize>,
    /// Per-socket override of [`BridgeConfig::out_capacity`].
    pub out_capacity: Option<usize>,
    /// Caller-supplied `in` channel (both ends). Overrides `in_capacity`.
    pub in_channel: Option<ChannelPair<Frames>>,
    /// Caller-supplied `out` channel (both ends). Overrides `out_capacity`.
    pub out_channel: Option<ChannelPair<Frames>>,
}

impl SocketConfig {
    pub fn new() -> Self {
        Self {
            linger: Some(0),
            ..Self::default()
        }
    }

    /// Endpoint shorthand: `@addr` binds, `>addr` connects. Anything else is
    /// rejected when the socket is created.
    pub fn endpoint(mut self, ep: impl Into<String>) -> Self {
        self.attach.push(ep.into());
        self
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind.push(addr.into());
        self
    }

    pub fn connect(mut self, addr: impl Into<String>) -> Self {
        self.connect.push(addr.into());
        self
    }

    pub fn identity(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.identity = Some(id.into());
        self
    }

    pub fn plain_server(mut self, on: bool) -> Self {
        self.plain_server = Some(on);
        self
    }

    pub fn plain_user(mut self, user: impl Into<String>) -> Self {
        self.plain_username = Some(user.into());
        self
    }

    pub fn plain_pass(mut self, pass: impl Into<String>) -> Self {
        self.plain_password = Some(pass.into());
        self
    }

    pub fn zap_domain(mut self, domain: impl Into<String>) -> Self {
        self.zap_domain = Some(domain.into());
        self
    }

    pub fn send_hwm(mut self, hwm: i32) -> Self {
        self.send_hwm = Some(hwm);
        self
    }

    pub fn recv_hwm(mut self, hwm: i32) -> Self {
        self.recv_hwm = Some(hwm);
        self
    }

    pub fn linger(mut self, ms: i32) -> Self {
        self.linger = Some(ms);
        self
    }

    pub fn subscribe(mut self, topic: impl Into<Vec<u8>>) -> Self {
        self.subscribe.push(topic.into());
        self
    }

    pub fn req_retry(mut self, on: bool) -> Self {
        self.req_retry = on;
        self
    }

    pub fn in_capacity(mut self, capacity: usize) -> Self {
        self.in_capacity = Some(capacity);
        self
    }

    pub fn out_capacity(mut self, capacity: usize) -> Self {
        self.out_capacity = Some(capacity);
        self
    }

    pub fn in_channel(mut self, pair: ChannelPair<Frames>) -> Self {
        self.in_channel = Some(pair);
        self
    }

    pub fn out_channel(mut self, pair: ChannelPair<Frames>) -> Self {
        self.out_channel = Some(pair);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_capacity == Some(0) || self.out_capacity == Some(0) {
            return Err(BridgeError::Config(
                "channel capacities must be >= 1".to_string(),
            ));
        }
        if self.plain_username.is_some() != self.plain_password.is_some() {
            return Err(BridgeError::Config(
                "plain_user and plain_pass must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BridgeConfig::default().validate().is_ok());
        assert!(SocketConfig::new().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BridgeConfig {
            out_capacity: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SocketConfig::new().in_capacity(0).validate().is_err());
    }

    #[test]
    fn test_plain_credentials_must_pair() {
        assert!(SocketConfig::new().plain_user("u").validate().is_err());
        assert!(SocketConfig::new()
            .plain_user("u")
            .plain_pass("p")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_builder_accumulates_endpoints() {
        let config = SocketConfig::new()
            .endpoint("@tcp://127.0.0.1:5555")
            .bind("tcp://127.0.0.1:5556")
            .connect("tcp://127.0.0.1:5557")
            .subscribe("topic");
        assert_eq!(config.attach.len(), 1);
        assert_eq!(config.bind.len(), 1);
        assert_eq!(config.connect.len(), 1);
        assert_eq!(config.subscribe, vec![b"topic".to_vec()]);
        assert_eq!(config.linger, Some(0));
    }
}
