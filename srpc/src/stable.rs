//! Service table: maps an offered service name to its inbound queue. Its
//! own mutex, independent of the connection table's (never held while the
//! CTable lock is held).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, SrpcError};
use crate::queue::Queue;

pub struct STable {
	services: Mutex<HashMap<String, Arc<Queue>>>,
}

impl STable {
	pub fn new() -> Self {
		Self { services: Mutex::new(HashMap::new()) }
	}

	/// Registers a new service. Fails if the name is already offered.
	pub fn offer(&self, name: &str) -> Result<Arc<Queue>> {
		let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());

		if services.contains_key(name) {
			return Err(SrpcError::DuplicateOffer);
		}

		let queue = Arc::new(Queue::new());
		services.insert(name.to_owned(), queue.clone());
		Ok(queue)
	}

	pub fn lookup(&self, name: &str) -> Option<Arc<Queue>> {
		let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
		services.get(name).cloned()
	}

	pub fn withdraw(&self, name: &str) {
		let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
		services.remove(name);
	}
}

impl Default for STable {
	fn default() -> Self {
		Self::new()
	}
}
