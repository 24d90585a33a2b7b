//! Bidirectional piping between two bridged sockets

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::socket::SocketHandle;

/// Pipe `out` of each handle into `in` of the other, e.g. to relay between
/// an XSUB and an XPUB socket. Runs on two helper threads until the sockets
/// close (both pumps exit when their source stops delivering).
pub fn proxy(a: SocketHandle, b: SocketHandle) -> (JoinHandle<()>, JoinHandle<()>) {
    let a = Arc::new(a);
    let b = Arc::new(b);
    let forward = pump("bridge-proxy-fwd", Arc::clone(&a), Arc::clone(&b));
    let reverse = pump("bridge-proxy-rev", b, a);
    (forward, reverse)
}

fn pump(name: &str, from: Arc<SocketHandle>, to: Arc<SocketHandle>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            while let Some(frames) = from.recv() {
                if !to.send_multipart(frames) && to.is_closed() {
                    break;
                }
            }
            debug!(
                "[BRIDGE-PROXY] {} -> {} pump finished",
                from.kind().name(),
                to.kind().name()
            );
        })
        .expect("failed to spawn bridge proxy thread")
}
