//! Thin wrapper over the one primitive the engine needs from the host's
//! datagram socket: fire-and-forget send. Receiving is the reader's own
//! concern (it needs the read-timeout/shutdown dance), so it isn't here.

use std::net::{SocketAddr, UdpSocket};

use log::warn;

/// Sends `payload` to `addr`, logging and swallowing the error on failure.
/// Every call site in the engine already has its own retry/liveness policy
/// (the timer will retransmit, or the caller will time out) — there's
/// nothing more useful to do with a `TransportFailure` here than log it,
/// matching the original's `(void) send_payload(...)`.
pub fn send(socket: &UdpSocket, addr: SocketAddr, payload: &[u8]) {
	if let Err(err) = socket.send_to(payload, addr) {
		warn!("send to {addr} failed: {err}");
	}
}
