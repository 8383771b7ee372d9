//! The timer task: wakes every [`config::TICK`] (20ms), classifies every
//! [`CRecord`] into purge/timed-out/ping/retry, and acts on each list.
//! Mirrors `ctable_scan` + the dispatch loop in the original's `timer()`,
//! with the classification itself factored into [`crate::ctable::Inner::scan`]
//! so it's unit-testable without a live socket.

use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use log::debug;

use crate::config;
use crate::ctable::dispatch_scan;
use crate::engine::Shared;

pub fn run(shared: Arc<Shared>, socket: Arc<UdpSocket>) {
	debug!("timer thread started");

	loop {
		thread::sleep(config::TICK);

		if shared.shutdown_requested.load(Ordering::SeqCst) {
			break;
		}

		shared.wait_if_suspended();

		if shared.shutdown_requested.load(Ordering::SeqCst) {
			break;
		}

		let mut guard = shared.ctable.lock();
		let scan = guard.scan();
		dispatch_scan(&socket, &mut guard, scan);
	}

	debug!("timer thread exiting");
}
