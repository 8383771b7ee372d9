//! Wire-format integers: thin newtypes that always hold their value in
//! network (big-endian) byte order, so a `#[derive(Cast)]` wire struct can
//! embed a `u16`/`u32` field without the reader having to remember to call
//! `to_be`/`from_be` at every use site.

use crate::bytes::{Cast, Unaligned};

macro_rules! define_be {
	($name:ident, $repr:ty, $n:literal) => {
		#[doc = concat!("A `", stringify!($repr), "` stored on the wire in big-endian byte order.")]
		#[derive(Clone, Copy, Default, PartialEq, Eq)]
		#[repr(transparent)]
		#[allow(non_camel_case_types)]
		pub struct $name([u8; $n]);

		impl $name {
			/// Retrieves the value in native byte order.
			#[inline]
			pub fn get(self) -> $repr {
				<$repr>::from_be_bytes(self.0)
			}
		}

		impl From<$repr> for $name {
			#[inline]
			fn from(value: $repr) -> Self {
				Self(value.to_be_bytes())
			}
		}

		impl From<$name> for $repr {
			#[inline]
			fn from(value: $name) -> Self {
				value.get()
			}
		}

		impl core::fmt::Debug for $name {
			fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
				core::fmt::Debug::fmt(&self.get(), f)
			}
		}

		// SAFETY: a `[u8; N]` has no padding or invalid states, and neither does this transparent wrapper.
		unsafe impl Cast for $name {}
		// SAFETY: `repr(transparent)` over `[u8; N]`, which has alignment 1.
		unsafe impl Unaligned for $name {}
	};
}

define_be!(u16be, u16, 2);
define_be!(u32be, u32, 4);
