//! Small pieces of process-wide scaffolding shared by the `srpc` demo
//! binaries: a colored logger and a Ctrl-C driven shutdown flag.

pub mod logger;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::LevelFilter;

/// Installs [`logger::Logger`] as the global `log` backend.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init_logger(level: LevelFilter) {
	static LOGGER: logger::Logger = logger::Logger;

	if log::set_logger(&LOGGER).is_ok() {
		log::set_max_level(level);
	}
}

/// A flag that flips to `true` the first time Ctrl-C is received.
///
/// Demo binaries poll this from their main loop to know when to tear down
/// cleanly instead of being killed mid-request.
#[derive(Clone)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
	/// Registers the process-wide Ctrl-C handler and returns a handle to it.
	///
	/// ### Panics
	/// Panics if a Ctrl-C handler has already been installed in this process
	/// (see [`ctrlc::set_handler`]).
	pub fn install() -> Self {
		let flag = Arc::new(AtomicBool::new(false));
		let handler = flag.clone();

		ctrlc::set_handler(move || handler.store(true, Ordering::SeqCst)).expect("failed to install Ctrl-C handler");

		Self(flag)
	}

	/// Returns whether Ctrl-C has been received.
	pub fn requested(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}
