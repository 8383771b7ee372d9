//! Per-peer connection state: the state machine, the retry slot for the
//! outbound payload currently awaiting an ACK, and the reassembly buffer
//! for an inbound multi-fragment message.

use std::sync::Arc;
use std::sync::Condvar;

use crate::config;
use crate::endpoint::Endpoint;
use crate::queue::Queue;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
	Idle,
	QackSent,
	ResponseSent,
	ConnectSent,
	QuerySent,
	AwaitingResponse,
	TimedOut,
	DisconnectSent,
	FragmentSent,
	FackReceived,
	/// Reachable in principle (symmetric with [`FackSent`](State::FackSent)
	/// for the opposite direction of a fragment exchange) but never
	/// actually entered by the reader: request/response reassembly both
	/// route through `FackSent`.
	FragmentReceived,
	FackSent,
	SeqnoSent,
}

impl State {
	/// States whose record carries a retry slot that the timer retransmits.
	pub fn is_retry_candidate(self) -> bool {
		matches!(
			self,
			State::ConnectSent | State::QuerySent | State::ResponseSent | State::DisconnectSent | State::FragmentSent | State::SeqnoSent
		)
	}
}

/// A CRecord's outbound payload awaiting acknowledgement, plus the backoff
/// schedule the timer drives it through.
pub struct Outbound {
	pub payload: Vec<u8>,
	pub attempts_remaining: u16,
	pub ticks: u16,
	pub ticks_left: u16,
}

pub struct CRecord {
	pub endpoint: Endpoint,
	pub id: u32,
	pub condvar: Arc<Condvar>,
	pub state: State,
	pub seqno: u32,
	pub service: Option<Arc<Queue>>,
	/// Last fragment number accepted (inbound) or sent (outbound); the two
	/// uses never overlap since a record is only ever fragmenting in one
	/// direction at a time (state machine enforced).
	pub last_frag: u8,
	pub outbound: Option<Outbound>,
	/// Inbound reassembly buffer. Non-empty while a multi-fragment message
	/// is still arriving (`state == FackSent`), and also holds the fully
	/// assembled response between the reader marking the record `Idle` and
	/// `call` draining it with `take()`.
	pub assembly: Option<Vec<u8>>,
	pub ticks_til_ping: u16,
	pub pings_til_purge: u16,
}

impl CRecord {
	pub fn new(endpoint: Endpoint, id: u32, seqno: u32, state: State) -> Self {
		Self {
			endpoint,
			id,
			condvar: Arc::new(Condvar::new()),
			state,
			seqno,
			service: None,
			last_frag: 0,
			outbound: None,
			assembly: None,
			ticks_til_ping: config::TICKS_BETWEEN_PINGS,
			pings_til_purge: config::PINGS_BEFORE_PURGE,
		}
	}

	/// Sets the state and wakes every thread waiting on this record,
	/// resetting the liveness counters the way every transition does in
	/// the original (PACK handling reuses this by calling it with the
	/// record's current state to reset the counters without moving it).
	pub fn set_state(&mut self, state: State) {
		self.state = state;
		self.ticks_til_ping = config::TICKS_BETWEEN_PINGS;
		self.pings_til_purge = config::PINGS_BEFORE_PURGE;
		self.condvar.notify_all();
	}

	/// Replaces the buffered outbound payload, retiring whatever was
	/// there before.
	pub fn set_outbound(&mut self, payload: Vec<u8>, attempts: u16, ticks: u16) {
		self.outbound = Some(Outbound { payload, attempts_remaining: attempts, ticks, ticks_left: ticks });
	}
}
