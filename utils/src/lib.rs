pub mod bytes;
/// Utilities for storing integer-like data in different byteorders.
pub mod endian;
