//! The connection table: every active peer relationship, dual-indexed by
//! endpoint and by connection-id, guarded by one mutex that also serializes
//! every state transition on every [`CRecord`] it holds.
//!
//! The two indexes are modeled as one owning map (by endpoint) plus a
//! non-owning secondary index (id -> endpoint) rather than two maps of
//! shared pointers to the same record: simpler to keep in sync under a
//! single lock, and sidesteps the aliasing `Arc`/`RefCell` would need to be
//! mutably reachable from two places at once.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::config;
use crate::crecord::{CRecord, State};
use crate::endpoint::{Endpoint, SubportAllocator};
use crate::transport;

/// The four disjoint classifications a [`CRecord`] falls into on one timer
/// sweep. A record lands in exactly one list: the source's mutual-exclusion
/// between the retry branch and the liveness (ping) branch is preserved here
/// structurally by the `match` in [`Inner::scan`], not by an intrusive
/// shared `link` field.
#[derive(Default)]
pub struct Scan {
	pub retry: Vec<Endpoint>,
	pub timed_out: Vec<Endpoint>,
	pub ping: Vec<Endpoint>,
	pub purge: Vec<Endpoint>,
}

#[derive(Default)]
pub struct Inner {
	by_endpoint: HashMap<Endpoint, CRecord>,
	id_index: HashMap<u32, Endpoint>,
}

impl Inner {
	pub fn get(&self, ep: &Endpoint) -> Option<&CRecord> {
		self.by_endpoint.get(ep)
	}

	pub fn get_mut(&mut self, ep: &Endpoint) -> Option<&mut CRecord> {
		self.by_endpoint.get_mut(ep)
	}

	pub fn get_by_id_mut(&mut self, id: u32) -> Option<&mut CRecord> {
		let ep = *self.id_index.get(&id)?;
		self.by_endpoint.get_mut(&ep)
	}

	/// Inserts a freshly-created record into both indexes.
	pub fn insert(&mut self, cr: CRecord) {
		self.id_index.insert(cr.id, cr.endpoint);
		self.by_endpoint.insert(cr.endpoint, cr);
	}

	/// Removes a record from both indexes, returning it for the caller to
	/// drop (or, in the timer's purge path, simply discard).
	pub fn remove(&mut self, ep: &Endpoint) -> Option<CRecord> {
		let cr = self.by_endpoint.remove(ep)?;
		self.id_index.remove(&cr.id);
		Some(cr)
	}

	/// Drops every record: used by `reinit` to discard the table inherited
	/// across a fork before the child starts its own reader/timer threads.
	pub fn clear(&mut self) {
		self.by_endpoint.clear();
		self.id_index.clear();
	}

	/// Classifies every record into the four [`Scan`] lists, advancing
	/// retry/liveness counters as it goes. Mirrors `ctable_scan` in the
	/// original: ticking down `ticks_left`/`attempts_remaining` for retry
	/// candidates, `ticks_til_ping`/`pings_til_purge` for everything else.
	pub fn scan(&mut self) -> Scan {
		let mut out = Scan::default();

		for cr in self.by_endpoint.values_mut() {
			if cr.state == State::TimedOut {
				out.purge.push(cr.endpoint);
				continue;
			}

			if cr.state.is_retry_candidate() {
				let Some(outbound) = cr.outbound.as_mut() else { continue };

				outbound.ticks_left = outbound.ticks_left.saturating_sub(1);

				if outbound.ticks_left == 0 {
					outbound.attempts_remaining = outbound.attempts_remaining.saturating_sub(1);

					if outbound.attempts_remaining == 0 {
						out.timed_out.push(cr.endpoint);
					} else {
						outbound.ticks = outbound.ticks.saturating_mul(2);
						outbound.ticks_left = outbound.ticks;
						out.retry.push(cr.endpoint);
					}
				}
			} else {
				cr.ticks_til_ping = cr.ticks_til_ping.saturating_sub(1);

				if cr.ticks_til_ping == 0 {
					cr.pings_til_purge = cr.pings_til_purge.saturating_sub(1);

					if cr.pings_til_purge == 0 {
						out.timed_out.push(cr.endpoint);
					} else {
						cr.ticks_til_ping = config::TICKS_BETWEEN_PINGS;
						out.ping.push(cr.endpoint);
					}
				}
			}
		}

		out
	}
}

pub struct CTable {
	mutex: Mutex<Inner>,
	subports: SubportAllocator,
	next_id: AtomicU32,
}

impl CTable {
	pub fn new() -> Self {
		Self { mutex: Mutex::new(Inner::default()), subports: SubportAllocator::new(), next_id: AtomicU32::new(config::MIN_CONN_ID) }
	}

	pub fn lock(&self) -> MutexGuard<'_, Inner> {
		self.mutex.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Assigns a fresh locally-unique subport for an outbound-side peer.
	pub fn new_subport(&self) -> u32 {
		self.subports.next()
	}

	/// Process-wide monotonic connection-id generator, wrapping back to
	/// [`config::MIN_CONN_ID`] on reaching [`config::MAX_CONN_ID`]. Not
	/// per-bucket: a single counter, as in the original.
	pub fn next_conn_id(&self) -> u32 {
		loop {
			let current = self.next_id.load(Ordering::Relaxed);
			let next = if current >= config::MAX_CONN_ID { config::MIN_CONN_ID } else { current + 1 };

			if self.next_id.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
				return next;
			}
		}
	}

	/// Blocks the calling thread until the record at `ep` reaches one of
	/// `targets`, or disappears from the table (treated as `TimedOut`).
	/// Takes and returns ownership of the lock guard, since
	/// `Condvar::wait` must be called with a guard derived from this same
	/// mutex — the "hold the lock across the blocking wait" pattern the
	/// source's `crecord_waitForState` relies on.
	pub fn wait_for<'a>(&'a self, mut guard: MutexGuard<'a, Inner>, ep: Endpoint, targets: &[State]) -> (MutexGuard<'a, Inner>, State) {
		loop {
			match guard.get(&ep) {
				Some(cr) if targets.contains(&cr.state) => return (guard, cr.state),
				Some(cr) => {
					let cv = cr.condvar.clone();
					guard = cv.wait(guard).unwrap_or_else(|e| e.into_inner());
				}
				None => return (guard, State::TimedOut),
			}
		}
	}
}

impl Default for CTable {
	fn default() -> Self {
		Self::new()
	}
}

/// Broadcasts on every condvar of every record still in the table. Used by
/// `shutdown` so that threads blocked in [`CTable::wait_for`] are not left
/// waiting forever on a mutex that is about to become unreachable.
pub fn wake_all(inner: &Inner) {
	for cr in inner.by_endpoint.values() {
		cr.condvar.notify_all();
	}
}

/// Sends the PING datagrams and outbound retransmissions produced by one
/// timer sweep's classification. Split out of `timer.rs` so both the timer
/// and tests exercising `Inner::scan` directly can drive it.
pub fn dispatch_scan(socket: &UdpSocket, inner: &mut Inner, scan: Scan) {
	for ep in scan.purge {
		inner.remove(&ep);
	}

	for ep in scan.timed_out {
		if let Some(cr) = inner.get_mut(&ep) {
			cr.set_state(State::TimedOut);
		}
	}

	for ep in scan.ping {
		if let Some(cr) = inner.get(&ep) {
			let payload = crate::wire::build_control(cr.endpoint.subport, crate::wire::Opcode::Ping, cr.seqno, 1, 1);
			transport::send(socket, cr.endpoint.addr, &payload);
		}
	}

	for ep in scan.retry {
		if let Some(cr) = inner.get(&ep) {
			if let Some(outbound) = cr.outbound.as_ref() {
				transport::send(socket, cr.endpoint.addr, &outbound.payload);
			}
		}
	}
}
