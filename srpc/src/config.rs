//! Tuning constants. Mirrors the `#define`-based knobs of the original
//! `srpcdefs.h`: leaf constants, not worth a config file or CLI surface.

use std::time::Duration;

/// Number of attempts before a `*_SENT` record is given up on and moved to
/// [`TIMEDOUT`](crate::crecord::State::TimedOut).
pub const ATTEMPTS: u16 = 7;

/// Initial number of ticks before the first retry of a `*_SENT` record.
/// Doubled on every subsequent retry.
pub const TICKS: u16 = 2;

/// Duration of one timer tick.
pub const TICK: Duration = Duration::from_millis(20);

/// Max payload size before a message is split into fragments.
pub const FR_SIZE: usize = 1024;

/// Soft ceiling on a connection's sequence number; crossing it triggers the
/// SEQNO/SACK reset handshake before the next request is sent.
pub const SEQNO_LIMIT: u32 = 1_000_000_000;

/// Sequence number both peers adopt after a SEQNO/SACK handshake.
pub const SEQNO_START: u32 = 0;

/// Lower bound (inclusive) of the connection-id space.
pub const MIN_CONN_ID: u32 = 0x1000_0000;

/// Upper bound (exclusive) of the connection-id space; wraps to
/// [`MIN_CONN_ID`] on reaching it.
pub const MAX_CONN_ID: u32 = 0x7FFF_FFFF;

/// Number of ticks between liveness pings for a record that is not
/// currently awaiting a retry (≈ 1s at the default 20ms tick).
pub const TICKS_BETWEEN_PINGS: u16 = 50;

/// Number of unanswered pings tolerated before an idle peer is purged
/// (≈ 30s idle-peer window at the default ping interval).
pub const PINGS_BEFORE_PURGE: u16 = 30;

/// Size of the UDP receive buffer; a single reassembled message has no
/// size limit beyond `u16` `tlen`.
pub const RECV_BUF_SIZE: usize = 10240;

/// Bucket count for the connection table's two hash indexes.
pub const CTABLE_SIZE: usize = 31;

/// Bucket count for the service table.
pub const STABLE_SIZE: usize = 13;
