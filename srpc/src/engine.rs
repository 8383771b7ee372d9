//! The public API: `Engine` is the process's one SRPC instance (nothing
//! stops a test from building more than one in-process, unlike the
//! original's file-scope statics — see DESIGN.md). Every method here
//! corresponds 1:1 to one of the original's `rpc_*` entry points.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};

use crate::config;
use crate::crecord::{CRecord, State};
use crate::ctable::CTable;
use crate::endpoint::Endpoint;
use crate::error::{Result, SrpcError};
use crate::queue::Queue;
use crate::stable::STable;
use crate::transport;
use crate::wire::{self, Opcode};
use crate::{reader, timer};

/// How long the reader's `recv_from` blocks before it re-checks shutdown
/// and suspend state. Short enough that `shutdown`/`suspend` feel
/// immediate, long enough that the reader isn't busy-spinning.
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// An opaque, process-local handle to a connection established by
/// [`Engine::connect`]. Wraps the connection-id the wire protocol itself
/// uses, so `call`/`disconnect` can look the record up by id in one step.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnHandle(u32);

/// An opaque handle to a service registered with [`Engine::offer`].
#[derive(Clone)]
pub struct ServiceHandle {
	name: String,
	queue: Arc<Queue>,
}

/// A query buffer paired with a caller-declared length, mirroring the
/// original's `struct qdecl`: a caller can hand over a larger buffer than
/// the bytes it actually wants sent, and [`Engine::call`] will catch the
/// case where the declared length overruns the buffer itself rather than
/// silently reading past it.
pub struct QueryDescriptor<'a> {
	buf: &'a [u8],
	len: usize,
}

impl<'a> QueryDescriptor<'a> {
	/// The whole buffer is the query.
	pub fn new(buf: &'a [u8]) -> Self {
		let len = buf.len();
		Self { buf, len }
	}

	/// Only the first `len` bytes of `buf` are the query; `len` may be
	/// (incorrectly) larger than `buf`, in which case `call` reports
	/// [`SrpcError::CallerOverrun`] instead of panicking or truncating.
	pub fn with_len(buf: &'a [u8], len: usize) -> Self {
		Self { buf, len }
	}
}

struct Threads {
	reader: JoinHandle<()>,
	timer: JoinHandle<()>,
}

pub(crate) struct Shared {
	pub(crate) ctable: CTable,
	pub(crate) stable: STable,
	socket: Mutex<Arc<UdpSocket>>,
	local_name: Mutex<String>,
	pub(crate) shutdown_requested: AtomicBool,
	suspended: Mutex<bool>,
	suspend_cv: Condvar,
	threads: Mutex<Option<Threads>>,
}

impl Shared {
	/// Blocks the calling thread (reader or timer) while the engine is
	/// suspended. See [`Engine::suspend`] for the quiescence argument.
	pub(crate) fn wait_if_suspended(&self) {
		let mut guard = self.suspended.lock().unwrap_or_else(|e| e.into_inner());

		while *guard {
			guard = self.suspend_cv.wait(guard).unwrap_or_else(|e| e.into_inner());
		}
	}
}

/// The engine itself: a cheaply-cloneable handle over the shared state
/// (socket, CTable, STable, reader/timer threads) every clone refers to.
#[derive(Clone)]
pub struct Engine(Arc<Shared>);

impl Engine {
	/// Creates the socket, binds it (port 0 = kernel-chosen), and starts
	/// the reader and timer threads.
	pub fn init(port: Option<u16>) -> Result<Self> {
		let socket = bind(port.unwrap_or(0))?;
		let local_name = resolve_local_name();

		let shared = Arc::new(Shared {
			ctable: CTable::new(),
			stable: STable::new(),
			socket: Mutex::new(Arc::new(socket)),
			local_name: Mutex::new(local_name),
			shutdown_requested: AtomicBool::new(false),
			suspended: Mutex::new(false),
			suspend_cv: Condvar::new(),
			threads: Mutex::new(None),
		});

		spawn_threads(&shared);

		Ok(Self(shared))
	}

	/// Reports this engine's advertised address: the resolved local
	/// hostname's IP (falling back to `127.0.0.1`) and the bound port.
	pub fn details(&self) -> (String, u16) {
		let port = self.0.socket.lock().unwrap_or_else(|e| e.into_inner()).local_addr().map(|a| a.port()).unwrap_or(0);
		let ip = self.0.local_name.lock().unwrap_or_else(|e| e.into_inner()).clone();
		(ip, port)
	}

	/// Best-effort PTR lookup; returns `ip` unchanged if resolution fails.
	pub fn reverse_lookup(&self, ip: &str) -> String {
		match ip.parse::<IpAddr>() {
			Ok(addr) => dns_lookup::lookup_addr(&addr).unwrap_or_else(|_| ip.to_owned()),
			Err(_) => ip.to_owned(),
		}
	}

	/// Registers a new service. Fails if `name` is already offered.
	pub fn offer(&self, name: &str) -> Result<ServiceHandle> {
		let queue = self.0.stable.offer(name)?;
		Ok(ServiceHandle { name: name.to_owned(), queue })
	}

	/// Withdraws a previously-offered service. Matches the original's
	/// `rpc_withdraw`, which is itself a deliberate no-op beyond removing
	/// the name from the table: in-flight CRecords already holding an
	/// `Arc<Queue>` keep working until their connections time out.
	pub fn withdraw(&self, svc: &ServiceHandle) {
		self.0.stable.withdraw(&svc.name);
	}

	/// Blocks until a reassembled request arrives, then copies it into
	/// `buf`. Returns `0` (and drops the message) if `buf` is too small,
	/// matching the original `rpc_query` contract exactly.
	pub fn query(&self, svc: &ServiceHandle, buf: &mut [u8]) -> (Endpoint, usize) {
		let item = svc.queue.remove();

		if item.data.len() > buf.len() {
			warn!("query buffer too small ({} < {}); dropping message from {:?}", buf.len(), item.data.len(), item.endpoint);
			return (item.endpoint, 0);
		}

		buf[..item.data.len()].copy_from_slice(&item.data);
		(item.endpoint, item.data.len())
	}

	/// Same contract as [`Engine::query`], but reports the too-small case
	/// as [`SrpcError::BufferTooSmall`] instead of collapsing it into the
	/// same `0` a catastrophic queue failure would produce.
	pub fn try_query(&self, svc: &ServiceHandle, buf: &mut [u8]) -> Result<(Endpoint, usize)> {
		let item = svc.queue.remove();

		if item.data.len() > buf.len() {
			return Err(SrpcError::BufferTooSmall);
		}

		buf[..item.data.len()].copy_from_slice(&item.data);
		Ok((item.endpoint, item.data.len()))
	}

	/// Sends `data` back to the peer that issued the request `endpoint`
	/// was handed out for. Fragments transparently if `data` exceeds
	/// [`config::FR_SIZE`].
	pub fn response(&self, _svc: &ServiceHandle, endpoint: Endpoint, data: &[u8]) -> Result<()> {
		let mut guard = self.0.ctable.lock();

		let seqno = {
			let cr = guard.get(&endpoint).ok_or(SrpcError::NoSuchConnection)?;
			if cr.state != State::QackSent {
				return Err(SrpcError::ProtocolViolation);
			}
			cr.seqno
		};

		let nfrags = wire::fragment_count(data.len(), config::FR_SIZE);

		for fnum in 1..nfrags {
			let start = (fnum as usize - 1) * config::FR_SIZE;
			let chunk = &data[start..start + config::FR_SIZE];
			let packet = wire::build_data(endpoint.subport, Opcode::Fragment, seqno, fnum, nfrags, data.len() as u16, chunk);

			let cr = guard.get_mut(&endpoint).ok_or(SrpcError::NoSuchConnection)?;
			cr.last_frag = fnum;
			cr.set_outbound(packet.clone(), config::ATTEMPTS, config::TICKS);
			cr.set_state(State::FragmentSent);
			self.send(&packet, endpoint.addr);

			let (g2, state) = self.0.ctable.wait_for(guard, endpoint, &[State::FackReceived, State::TimedOut]);
			guard = g2;

			if state == State::TimedOut {
				return Err(SrpcError::Timeout);
			}
		}

		let last_start = (nfrags as usize - 1) * config::FR_SIZE;
		let last_chunk = &data[last_start..];
		let packet = wire::build_data(endpoint.subport, Opcode::Response, seqno, nfrags, nfrags, data.len() as u16, last_chunk);

		let cr = guard.get_mut(&endpoint).ok_or(SrpcError::NoSuchConnection)?;
		cr.set_outbound(packet.clone(), config::ATTEMPTS, config::TICKS);
		cr.set_state(State::ResponseSent);
		self.send(&packet, endpoint.addr);

		Ok(())
	}

	/// Establishes a connection to `svc_name` on `host:port`. Blocks until
	/// the CACK arrives or the CONNECT retransmits are exhausted.
	pub fn connect(&self, host: &str, port: u16, svc_name: &str, initial_seqno: u32) -> Result<ConnHandle> {
		let ip = resolve_host(host)?;
		let addr = SocketAddr::new(ip, port);

		let subport = self.0.ctable.new_subport();
		let endpoint = Endpoint::new(addr, subport);
		let id = self.0.ctable.next_conn_id();

		let packet = wire::build_connect(subport, initial_seqno, svc_name);

		let mut cr = CRecord::new(endpoint, id, initial_seqno, State::ConnectSent);
		cr.set_outbound(packet.clone(), config::ATTEMPTS, config::TICKS);

		let mut guard = self.0.ctable.lock();
		guard.insert(cr);
		self.send(&packet, addr);

		let (mut guard, state) = self.0.ctable.wait_for(guard, endpoint, &[State::Idle, State::TimedOut]);

		if state == State::TimedOut {
			guard.remove(&endpoint);
			return Err(SrpcError::Timeout);
		}

		Ok(ConnHandle(id))
	}

	/// Issues one request/response round trip over an established
	/// connection. Transparently fragments `query`, transparently
	/// reassembles the reply, and performs the SEQNO/SACK reset handshake
	/// first if the connection's sequence number has crossed
	/// [`config::SEQNO_LIMIT`].
	pub fn call(&self, conn: ConnHandle, query: &QueryDescriptor<'_>, resp: &mut [u8]) -> Result<usize> {
		if query.len > query.buf.len() {
			error!("call() - buffer overrun by caller");
			return Err(SrpcError::CallerOverrun);
		}

		let query_bytes = &query.buf[..query.len];
		let mut guard = self.0.ctable.lock();

		let endpoint = {
			let cr = guard.get_by_id_mut(conn.0).ok_or(SrpcError::NoSuchConnection)?;
			if cr.state != State::Idle {
				return Err(SrpcError::ProtocolViolation);
			}
			cr.endpoint
		};

		if guard.get(&endpoint).map(|cr| cr.seqno).unwrap_or(0) >= config::SEQNO_LIMIT {
			let packet = wire::build_control(endpoint.subport, Opcode::Seqno, config::SEQNO_START, 1, 1);
			let cr = guard.get_mut(&endpoint).ok_or(SrpcError::NoSuchConnection)?;
			cr.seqno = config::SEQNO_START;
			cr.set_outbound(packet.clone(), config::ATTEMPTS, config::TICKS);
			cr.set_state(State::SeqnoSent);
			self.send(&packet, endpoint.addr);

			let (g2, state) = self.0.ctable.wait_for(guard, endpoint, &[State::Idle, State::TimedOut]);
			guard = g2;

			if state == State::TimedOut {
				return Err(SrpcError::Timeout);
			}
		}

		let seqno = {
			let cr = guard.get_mut(&endpoint).ok_or(SrpcError::NoSuchConnection)?;
			cr.seqno += 1;
			cr.seqno
		};

		let nfrags = wire::fragment_count(query_bytes.len(), config::FR_SIZE);

		for fnum in 1..nfrags {
			let start = (fnum as usize - 1) * config::FR_SIZE;
			let chunk = &query_bytes[start..start + config::FR_SIZE];
			let packet = wire::build_data(endpoint.subport, Opcode::Fragment, seqno, fnum, nfrags, query_bytes.len() as u16, chunk);

			let cr = guard.get_mut(&endpoint).ok_or(SrpcError::NoSuchConnection)?;
			cr.last_frag = fnum;
			cr.set_outbound(packet.clone(), config::ATTEMPTS, config::TICKS);
			cr.set_state(State::FragmentSent);
			self.send(&packet, endpoint.addr);

			let (g2, state) = self.0.ctable.wait_for(guard, endpoint, &[State::FackReceived, State::TimedOut]);
			guard = g2;

			if state == State::TimedOut {
				return Err(SrpcError::Timeout);
			}
		}

		let last_start = (nfrags as usize - 1) * config::FR_SIZE;
		let last_chunk = &query_bytes[last_start..];
		let packet = wire::build_data(endpoint.subport, Opcode::Query, seqno, nfrags, nfrags, query_bytes.len() as u16, last_chunk);

		let cr = guard.get_mut(&endpoint).ok_or(SrpcError::NoSuchConnection)?;
		cr.set_outbound(packet.clone(), config::ATTEMPTS, config::TICKS);
		cr.set_state(State::QuerySent);
		self.send(&packet, endpoint.addr);

		let (mut guard, state) = self.0.ctable.wait_for(guard, endpoint, &[State::Idle, State::TimedOut]);

		if state == State::TimedOut {
			return Err(SrpcError::Timeout);
		}

		let body = guard.get_mut(&endpoint).and_then(|cr| cr.assembly.take()).unwrap_or_default();

		if body.len() > resp.len() {
			return Err(SrpcError::BufferTooSmall);
		}

		resp[..body.len()].copy_from_slice(&body);
		Ok(body.len())
	}

	/// Sends DISCONNECT and marks the record `DisconnectSent`. Fire and
	/// forget: per the original's commented-out wait, this does not block
	/// for the peer's DACK. The timer purges the record once it reaches
	/// `TimedOut`.
	pub fn disconnect(&self, conn: ConnHandle) {
		let mut guard = self.0.ctable.lock();
		let Some(cr) = guard.get_by_id_mut(conn.0) else { return };

		let endpoint = cr.endpoint;
		let seqno = cr.seqno;
		let packet = wire::build_control(endpoint.subport, Opcode::Disconnect, seqno, 1, 1);

		cr.set_outbound(packet.clone(), config::ATTEMPTS, config::TICKS);
		cr.set_state(State::DisconnectSent);
		self.send(&packet, endpoint.addr);
	}

	/// Suspends reader/timer processing. Actually acquires (and releases)
	/// the CTable mutex once after raising the flag, so that by the time
	/// this call returns, no reader/timer critical section that was
	/// already in flight when the flag was raised can still be running —
	/// closing the race a flag check alone would leave open.
	pub fn suspend(&self) {
		*self.0.suspended.lock().unwrap_or_else(|e| e.into_inner()) = true;
		drop(self.0.ctable.lock());
	}

	/// Resumes reader/timer processing suspended by [`Engine::suspend`].
	pub fn resume(&self) {
		*self.0.suspended.lock().unwrap_or_else(|e| e.into_inner()) = false;
		self.0.suspend_cv.notify_all();
	}

	/// For use after `suspend` plus a `fork`-based snapshot: purges the
	/// table inherited from the parent, closes the inherited socket, opens
	/// a fresh one on `port`, and restarts reader/timer. Does not attempt
	/// to join the threads it inherited — they do not exist in this
	/// process' view once `fork` has run.
	pub fn reinit(&self, port: u16) -> Result<()> {
		self.0.ctable.lock().clear();

		let socket = bind(port)?;
		*self.0.socket.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(socket);
		self.0.shutdown_requested.store(false, Ordering::SeqCst);

		spawn_threads(&self.0);
		Ok(())
	}

	/// Cancels the reader and timer threads and joins them. Callers must
	/// not call `shutdown` while requests are in flight: any thread
	/// blocked in [`CTable::wait_for`] is left blocked forever once this
	/// returns, since nothing further will ever change the CRecord's
	/// state.
	pub fn shutdown(&self) {
		self.0.shutdown_requested.store(true, Ordering::SeqCst);

		*self.0.suspended.lock().unwrap_or_else(|e| e.into_inner()) = false;
		self.0.suspend_cv.notify_all();

		crate::ctable::wake_all(&self.0.ctable.lock());

		if let Some(threads) = self.0.threads.lock().unwrap_or_else(|e| e.into_inner()).take() {
			let _ = threads.reader.join();
			let _ = threads.timer.join();
		}
	}

	fn send(&self, payload: &[u8], addr: SocketAddr) {
		let socket = self.0.socket.lock().unwrap_or_else(|e| e.into_inner()).clone();
		transport::send(&socket, addr, payload);
	}
}

fn bind(port: u16) -> Result<UdpSocket> {
	let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(|err| {
		error!("failed to bind UDP socket on port {port}: {err}");
		SrpcError::TransportFailure
	})?;

	socket.set_read_timeout(Some(POLL_TIMEOUT)).map_err(|err| {
		error!("failed to set read timeout: {err}");
		SrpcError::TransportFailure
	})?;

	Ok(socket)
}

fn spawn_threads(shared: &Arc<Shared>) {
	let socket = shared.socket.lock().unwrap_or_else(|e| e.into_inner()).clone();

	let reader_shared = shared.clone();
	let reader_socket = socket.clone();
	let reader_handle = thread::spawn(move || reader::run(reader_shared, reader_socket));

	let timer_shared = shared.clone();
	let timer_handle = thread::spawn(move || timer::run(timer_shared, socket));

	*shared.threads.lock().unwrap_or_else(|e| e.into_inner()) = Some(Threads { reader: reader_handle, timer: timer_handle });
}

/// Resolves this host's own advertised IP the way `rpc_init` does:
/// `gethostname` then forward-resolve it, falling back to `127.0.0.1` if
/// either step fails.
fn resolve_local_name() -> String {
	let host = hostname::get().ok().and_then(|h| h.into_string().ok());

	let resolved = host.as_deref().and_then(|h| (h, 0u16).to_socket_addrs().ok()).and_then(|mut addrs| addrs.next());

	match resolved {
		Some(addr) => addr.ip().to_string(),
		None => {
			debug!("hostname resolution failed; falling back to 127.0.0.1");
			"127.0.0.1".to_owned()
		}
	}
}

fn resolve_host(host: &str) -> Result<IpAddr> {
	dns_lookup::lookup_host(host).map_err(|err| {
		error!("failed to resolve host {host:?}: {err}");
		SrpcError::TransportFailure
	})?
	.into_iter()
	.next()
	.ok_or(SrpcError::TransportFailure)
}
