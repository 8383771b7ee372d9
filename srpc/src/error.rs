//! Internal error type. No `thiserror`/`anyhow`: a plain enum with a
//! hand-written `Display`, matching the rest of the workspace. Public API
//! methods collapse this down to the original's boolean/`Option` contracts;
//! internally it is threaded through with `?` so the reason isn't lost
//! before it reaches a `log::error!`/`log::warn!` call site.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpcError {
	/// A socket send/recv failed at the OS level.
	TransportFailure,
	/// A `*_SENT` record exhausted its retry attempts.
	Timeout,
	/// Caller's receive buffer was too small for the returned message.
	BufferTooSmall,
	/// Caller declared a smaller capacity than the data actually queued.
	CallerOverrun,
	/// A CONNECT named a service that isn't offered here.
	UnknownService,
	/// An opcode was accepted while the record was in the wrong state.
	ProtocolViolation,
	/// `offer` was called with a name already registered.
	DuplicateOffer,
	/// No record exists for the handle/endpoint the caller supplied.
	NoSuchConnection,
}

impl fmt::Display for SrpcError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let msg = match self {
			SrpcError::TransportFailure => "transport failure",
			SrpcError::Timeout => "connection timed out",
			SrpcError::BufferTooSmall => "caller's buffer too small",
			SrpcError::CallerOverrun => "buffer overrun by caller",
			SrpcError::UnknownService => "unknown service",
			SrpcError::ProtocolViolation => "opcode accepted in wrong state",
			SrpcError::DuplicateOffer => "service name already registered",
			SrpcError::NoSuchConnection => "no such connection",
		};

		f.write_str(msg)
	}
}

impl std::error::Error for SrpcError {}

pub type Result<T, E = SrpcError> = std::result::Result<T, E>;
