//! The reader task: the single thread that receives every datagram and
//! drives the per-[`CRecord`] state machine in response. One iteration:
//! receive, parse the fixed header, look the sender up by its synthesized
//! [`Endpoint`], dispatch on opcode, all under the CTable lock.
//!
//! Unlike the original's blocking `recvfrom` cancelled by `pthread_cancel`,
//! this reader uses a short read timeout so it can observe `shutdown` and
//! `suspend` cooperatively — `std::thread` has no asynchronous cancellation
//! point to mirror `pthread_cancel` with.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::config;
use crate::crecord::{CRecord, State};
use crate::ctable::Inner;
use crate::endpoint::Endpoint;
use crate::engine::Shared;
use crate::queue::Item;
use crate::transport;
use crate::wire::{self, Opcode};

pub fn run(shared: Arc<Shared>, socket: Arc<UdpSocket>) {
	debug!("reader thread started");
	let mut buf = vec![0u8; config::RECV_BUF_SIZE];

	loop {
		if shared.shutdown_requested.load(Ordering::SeqCst) {
			break;
		}

		let (n, from) = match socket.recv_from(&mut buf) {
			Ok(v) => v,
			Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
			Err(err) => {
				warn!("recv_from failed: {err}");
				continue;
			}
		};

		shared.wait_if_suspended();

		if shared.shutdown_requested.load(Ordering::SeqCst) {
			break;
		}

		let Some(frame) = wire::parse(&buf[..n]) else {
			warn!("datagram from {from} too short for a payload header");
			continue;
		};

		let command = frame.header.command.get();
		let Ok(opcode) = Opcode::try_from(command) else {
			warn!("illegal command received from {from}: {command}");
			continue;
		};

		let sender_subport = frame.header.subport.get();
		let seqno = frame.header.seqno.get();
		let fnum = frame.header.fnum;
		let nfrags = frame.header.nfrags;
		let ep = Endpoint::new(from, sender_subport);

		trace!("{} from {from}:{sender_subport:08x}; seqno={seqno}, frag={fnum}/{nfrags}", opcode.name());

		let mut guard = shared.ctable.lock();

		match opcode {
			Opcode::Connect => on_connect(&shared, &socket, &mut guard, ep, seqno, frame.rest),
			Opcode::Cack => on_simple_ack(&mut guard, ep, seqno, State::Idle),
			Opcode::Query => on_query(&socket, &mut guard, ep, seqno, fnum, nfrags, frame.rest),
			Opcode::Qack => on_simple_ack(&mut guard, ep, seqno, State::AwaitingResponse),
			Opcode::Response => on_response(&socket, &mut guard, ep, seqno, fnum, nfrags, frame.rest),
			Opcode::Rack => on_simple_ack(&mut guard, ep, seqno, State::Idle),
			Opcode::Disconnect => on_disconnect(&socket, &mut guard, ep, seqno),
			Opcode::Dack => on_simple_ack(&mut guard, ep, seqno, State::TimedOut),
			Opcode::Fragment => on_fragment(&socket, &mut guard, ep, seqno, fnum, nfrags, frame.rest),
			Opcode::Fack => on_fack(&mut guard, ep, seqno, fnum),
			Opcode::Ping => on_ping(&socket, &guard, ep, seqno),
			Opcode::Pack => on_pack(&mut guard, ep),
			Opcode::Seqno => on_seqno(&socket, &mut guard, ep, seqno),
			Opcode::Sack => on_sack(&mut guard, ep),
		}
	}

	debug!("reader thread exiting");
}

fn on_connect(shared: &Shared, socket: &UdpSocket, inner: &mut Inner, ep: Endpoint, seqno: u32, rest: &[u8]) {
	let Some(name) = wire::parse_service_name(rest) else {
		warn!("malformed CONNECT from {ep:?}: no EOS-terminated service name");
		return;
	};

	let Some(queue) = shared.stable.lookup(name) else {
		debug!("CONNECT for unknown service {name:?} from {ep:?}");
		return;
	};

	let existing_state = inner.get(&ep).map(|cr| cr.state);

	match existing_state {
		None => {
			let id = shared.ctable.next_conn_id();
			let mut cr = CRecord::new(ep, id, seqno, State::Idle);
			cr.service = Some(queue);
			let cack = wire::build_control(ep.subport, Opcode::Cack, seqno, 1, 1);
			cr.set_outbound(cack.clone(), config::ATTEMPTS, config::TICKS);
			transport::send(socket, ep.addr, &cack);
			cr.set_state(State::Idle);
			inner.insert(cr);
		}
		Some(State::Idle) => {
			if let Some(cr) = inner.get_mut(&ep) {
				let cack = wire::build_control(ep.subport, Opcode::Cack, seqno, 1, 1);
				cr.set_outbound(cack.clone(), config::ATTEMPTS, config::TICKS);
				transport::send(socket, ep.addr, &cack);
				cr.set_state(State::Idle);
			}
		}
		Some(state) => {
			debug!("duplicate CONNECT for {ep:?} while in {state:?}; ignoring");
		}
	}
}

fn on_simple_ack(inner: &mut Inner, ep: Endpoint, seqno: u32, target: State) {
	if let Some(cr) = inner.get_mut(&ep) {
		if seqno == cr.seqno {
			cr.set_state(target);
		}
	}
}

/// Grows (or allocates) the reassembly buffer to fit `offset + body.len()`
/// and copies `body` in at `offset`. Shared by the FRAGMENT/QUERY/RESPONSE
/// handlers, which all reassemble into `cr.assembly` the same way.
fn copy_into_assembly(assembly: &mut Vec<u8>, offset: usize, body: &[u8]) {
	if assembly.len() < offset + body.len() {
		assembly.resize(offset + body.len(), 0);
	}

	assembly[offset..offset + body.len()].copy_from_slice(body);
}

fn on_query(socket: &UdpSocket, inner: &mut Inner, ep: Endpoint, seqno: u32, fnum: u8, nfrags: u8, rest: &[u8]) {
	let Some((_dhdr, body)) = wire::parse_data(rest) else {
		warn!("malformed QUERY from {ep:?}");
		return;
	};

	let Some(cr) = inner.get_mut(&ep) else { return };

	enum Accept {
		Fresh,
		Old(State),
	}

	let accept = if seqno == cr.seqno.wrapping_add(1) && matches!(cr.state, State::Idle | State::ResponseSent) {
		Some(Accept::Fresh)
	} else if seqno == cr.seqno && cr.state == State::FackSent && fnum == cr.last_frag.wrapping_add(1) && fnum == nfrags {
		Some(Accept::Fresh)
	} else if seqno == cr.seqno && matches!(cr.state, State::QackSent | State::ResponseSent) {
		Some(Accept::Old(cr.state))
	} else {
		None
	};

	match accept {
		Some(Accept::Fresh) => {
			let full_body = if nfrags == 1 {
				body.to_vec()
			} else {
				let mut assembly = cr.assembly.take().unwrap_or_default();
				let offset = (fnum as usize - 1) * config::FR_SIZE;
				copy_into_assembly(&mut assembly, offset, body);
				assembly
			};

			cr.seqno = seqno;

			let qack = wire::build_control(ep.subport, Opcode::Qack, seqno, fnum, nfrags);
			cr.set_outbound(qack.clone(), config::ATTEMPTS, config::TICKS);
			transport::send(socket, ep.addr, &qack);

			match cr.service.clone() {
				Some(queue) => queue.append(Item { endpoint: ep, data: full_body }),
				None => warn!("QUERY completed for {ep:?}, which has no attached service"),
			}

			cr.set_state(State::QackSent);
		}
		Some(Accept::Old(state)) => {
			if let Some(outbound) = cr.outbound.as_ref() {
				let payload = outbound.payload.clone();
				transport::send(socket, ep.addr, &payload);
			}

			cr.set_state(state);
		}
		None => {}
	}
}

fn on_response(socket: &UdpSocket, inner: &mut Inner, ep: Endpoint, seqno: u32, fnum: u8, nfrags: u8, rest: &[u8]) {
	let Some((_dhdr, body)) = wire::parse_data(rest) else {
		warn!("malformed RESPONSE from {ep:?}");
		return;
	};

	let Some(cr) = inner.get_mut(&ep) else { return };

	if seqno != cr.seqno {
		return;
	}

	let completed = match cr.state {
		State::QuerySent | State::AwaitingResponse => {
			cr.assembly = Some(body.to_vec());
			cr.last_frag = fnum;
			true
		}
		State::FackSent if fnum == cr.last_frag.wrapping_add(1) && fnum == nfrags => {
			let mut assembly = cr.assembly.take().unwrap_or_default();
			let offset = (fnum as usize - 1) * config::FR_SIZE;
			copy_into_assembly(&mut assembly, offset, body);
			cr.assembly = Some(assembly);
			cr.last_frag = fnum;
			true
		}
		_ => false,
	};

	if !completed {
		return;
	}

	let rack = wire::build_control(ep.subport, Opcode::Rack, seqno, fnum, nfrags);
	cr.set_outbound(rack.clone(), config::ATTEMPTS, config::TICKS);
	transport::send(socket, ep.addr, &rack);
	cr.set_state(State::Idle);
}

fn on_disconnect(socket: &UdpSocket, inner: &mut Inner, ep: Endpoint, seqno: u32) {
	let dack = wire::build_control(ep.subport, Opcode::Dack, seqno, 1, 1);
	transport::send(socket, ep.addr, &dack);

	if let Some(cr) = inner.get_mut(&ep) {
		cr.set_state(State::TimedOut);
	}
}

fn on_fragment(socket: &UdpSocket, inner: &mut Inner, ep: Endpoint, seqno: u32, fnum: u8, nfrags: u8, rest: &[u8]) {
	let Some((dhdr, body)) = wire::parse_data(rest) else {
		warn!("malformed FRAGMENT from {ep:?}");
		return;
	};

	let Some(cr) = inner.get_mut(&ep) else { return };

	let is_request_start = matches!(cr.state, State::Idle | State::ResponseSent) && seqno == cr.seqno.wrapping_add(1) && fnum == 1;
	let is_response_start = matches!(cr.state, State::QuerySent | State::AwaitingResponse) && seqno == cr.seqno && fnum == 1;

	enum Accept {
		Fresh,
		Duplicate,
	}

	let accept = if is_request_start || is_response_start {
		Some(Accept::Fresh)
	} else if seqno == cr.seqno && cr.state == State::FackSent && fnum == cr.last_frag.wrapping_add(1) {
		Some(Accept::Fresh)
	} else if seqno == cr.seqno && cr.state == State::FackSent && fnum == cr.last_frag {
		Some(Accept::Duplicate)
	} else {
		None
	};

	match accept {
		Some(Accept::Fresh) => {
			if is_request_start {
				cr.seqno = seqno;
			}

			let tlen = dhdr.tlen.get() as usize;
			let mut assembly = cr.assembly.take().unwrap_or_else(|| vec![0u8; tlen]);

			if assembly.len() < tlen {
				assembly.resize(tlen, 0);
			}

			let offset = (fnum as usize - 1) * config::FR_SIZE;
			copy_into_assembly(&mut assembly, offset, body);
			cr.assembly = Some(assembly);
			cr.last_frag = fnum;

			let fack = wire::build_control(ep.subport, Opcode::Fack, seqno, fnum, nfrags);
			cr.set_outbound(fack.clone(), config::ATTEMPTS, config::TICKS);
			transport::send(socket, ep.addr, &fack);
			cr.set_state(State::FackSent);
		}
		Some(Accept::Duplicate) => {
			if let Some(outbound) = cr.outbound.as_ref() {
				let payload = outbound.payload.clone();
				transport::send(socket, ep.addr, &payload);
			}

			cr.set_state(State::FackSent);
		}
		None => {}
	}
}

fn on_fack(inner: &mut Inner, ep: Endpoint, seqno: u32, fnum: u8) {
	if let Some(cr) = inner.get_mut(&ep) {
		if seqno == cr.seqno && cr.state == State::FragmentSent && fnum == cr.last_frag {
			cr.set_state(State::FackReceived);
		}
	}
}

fn on_ping(socket: &UdpSocket, inner: &Inner, ep: Endpoint, seqno: u32) {
	if inner.get(&ep).is_some() {
		let pack = wire::build_control(ep.subport, Opcode::Pack, seqno, 1, 1);
		transport::send(socket, ep.addr, &pack);
	}
}

fn on_pack(inner: &mut Inner, ep: Endpoint) {
	if let Some(cr) = inner.get_mut(&ep) {
		let state = cr.state;
		cr.set_state(state);
	}
}

fn on_seqno(socket: &UdpSocket, inner: &mut Inner, ep: Endpoint, seqno: u32) {
	if let Some(cr) = inner.get_mut(&ep) {
		if matches!(cr.state, State::Idle | State::ResponseSent) {
			let sack = wire::build_control(ep.subport, Opcode::Sack, seqno, 1, 1);
			cr.set_outbound(sack.clone(), config::ATTEMPTS, config::TICKS);
			transport::send(socket, ep.addr, &sack);
			cr.seqno = seqno;
			cr.set_state(State::Idle);
		}
	}
}

fn on_sack(inner: &mut Inner, ep: Endpoint) {
	if let Some(cr) = inner.get_mut(&ep) {
		if cr.state == State::SeqnoSent {
			cr.set_state(State::Idle);
		}
	}
}
