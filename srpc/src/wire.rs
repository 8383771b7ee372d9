//! Byte-exact datagram framing: a fixed payload header, an optional data
//! header for the opcodes that carry a message body, and the body bytes
//! themselves. Headers are cast directly over the wire bytes the way the
//! rest of the workspace casts its packet headers; bodies are plain byte
//! slices since their length is only known at runtime.

use std::mem::size_of;

use macros::Cast;
use utils::bytes::{as_slice, cast};
use utils::endian::{u16be, u32be};

/// Opcode carried in every payload header's `command` field.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u16)]
pub enum Opcode {
	Connect = 1,
	Cack = 2,
	Query = 3,
	Qack = 4,
	Response = 5,
	Rack = 6,
	Disconnect = 7,
	Dack = 8,
	Fragment = 9,
	Fack = 10,
	Ping = 11,
	Pack = 12,
	Seqno = 13,
	Sack = 14,
}

impl Opcode {
	pub const LOW: u16 = Opcode::Connect as u16;
	pub const HIGH: u16 = Opcode::Sack as u16;

	pub fn name(self) -> &'static str {
		match self {
			Opcode::Connect => "CONNECT",
			Opcode::Cack => "CACK",
			Opcode::Query => "QUERY",
			Opcode::Qack => "QACK",
			Opcode::Response => "RESPONSE",
			Opcode::Rack => "RACK",
			Opcode::Disconnect => "DISCONNECT",
			Opcode::Dack => "DACK",
			Opcode::Fragment => "FRAGMENT",
			Opcode::Fack => "FACK",
			Opcode::Ping => "PING",
			Opcode::Pack => "PACK",
			Opcode::Seqno => "SEQNO",
			Opcode::Sack => "SACK",
		}
	}
}

impl TryFrom<u16> for Opcode {
	type Error = ();

	fn try_from(value: u16) -> Result<Self, ()> {
		Ok(match value {
			1 => Opcode::Connect,
			2 => Opcode::Cack,
			3 => Opcode::Query,
			4 => Opcode::Qack,
			5 => Opcode::Response,
			6 => Opcode::Rack,
			7 => Opcode::Disconnect,
			8 => Opcode::Dack,
			9 => Opcode::Fragment,
			10 => Opcode::Fack,
			11 => Opcode::Ping,
			12 => Opcode::Pack,
			13 => Opcode::Seqno,
			14 => Opcode::Sack,
			_ => return Err(()),
		})
	}
}

/// Fixed 12-byte header present on every datagram.
#[derive(Clone, Copy, Cast)]
#[repr(C)]
pub struct PayloadHeader {
	pub subport: u32be,
	pub seqno: u32be,
	pub command: u16be,
	pub fnum: u8,
	pub nfrags: u8,
}

/// Header appended after [`PayloadHeader`] by data-carrying opcodes
/// (QUERY, RESPONSE, FRAGMENT).
#[derive(Clone, Copy, Cast)]
#[repr(C)]
pub struct DataHeader {
	pub tlen: u16be,
	pub flen: u16be,
}

pub const PH_SIZE: usize = size_of::<PayloadHeader>();
pub const DH_SIZE: usize = size_of::<DataHeader>();

/// A datagram as decoded off the wire: the fixed header plus whatever
/// follows it (a data header + body, an EOS-terminated service name, or
/// nothing, depending on opcode).
pub struct Frame<'a> {
	pub header: PayloadHeader,
	pub rest: &'a [u8],
}

/// Parses the fixed header out of a received datagram. Returns `None` if
/// the datagram is too short to hold one.
pub fn parse(buf: &[u8]) -> Option<Frame<'_>> {
	if buf.len() < PH_SIZE {
		return None;
	}

	let header: &PayloadHeader = cast(&buf[..PH_SIZE]);

	Some(Frame { header: *header, rest: &buf[PH_SIZE..] })
}

/// Splits a data-carrying frame's remainder into its data header and body.
/// Returns `None` if the remainder is shorter than the data header plus
/// the `flen` it declares.
pub fn parse_data(rest: &[u8]) -> Option<(DataHeader, &[u8])> {
	if rest.len() < DH_SIZE {
		return None;
	}

	let dhdr: &DataHeader = cast(&rest[..DH_SIZE]);
	let flen = dhdr.flen.get() as usize;
	let body = &rest[DH_SIZE..];

	if body.len() < flen {
		return None;
	}

	Some((*dhdr, &body[..flen]))
}

/// Splits a CONNECT frame's remainder into the EOS-terminated service name.
pub fn parse_service_name(rest: &[u8]) -> Option<&str> {
	let end = rest.iter().position(|&b| b == 0)?;
	std::str::from_utf8(&rest[..end]).ok()
}

fn header_bytes(header: &PayloadHeader) -> &[u8] {
	as_slice(header)
}

fn data_header_bytes(header: &DataHeader) -> &[u8] {
	as_slice(header)
}

/// Builds a control datagram (no body): CACK, QACK, RACK, DACK, FACK, PING,
/// PACK, SACK, or a retransmitted CONNECT/DISCONNECT control frame.
pub fn build_control(subport: u32, command: Opcode, seqno: u32, fnum: u8, nfrags: u8) -> Vec<u8> {
	let header = PayloadHeader {
		subport: subport.into(),
		seqno: seqno.into(),
		command: (command as u16).into(),
		fnum,
		nfrags,
	};

	header_bytes(&header).to_vec()
}

/// Builds a CONNECT datagram carrying the EOS-terminated service name.
pub fn build_connect(subport: u32, seqno: u32, service: &str) -> Vec<u8> {
	let mut buf = build_control(subport, Opcode::Connect, seqno, 1, 1);
	buf.extend_from_slice(service.as_bytes());
	buf.push(0);
	buf
}

/// Builds a data-carrying datagram (QUERY, RESPONSE, or FRAGMENT).
pub fn build_data(subport: u32, command: Opcode, seqno: u32, fnum: u8, nfrags: u8, tlen: u16, body: &[u8]) -> Vec<u8> {
	let header = PayloadHeader {
		subport: subport.into(),
		seqno: seqno.into(),
		command: (command as u16).into(),
		fnum,
		nfrags,
	};

	let dhdr = DataHeader { tlen: tlen.into(), flen: (body.len() as u16).into() };

	let mut buf = Vec::with_capacity(PH_SIZE + DH_SIZE + body.len());
	buf.extend_from_slice(header_bytes(&header));
	buf.extend_from_slice(data_header_bytes(&dhdr));
	buf.extend_from_slice(body);
	buf
}

/// Splits `payload` into `ceil(len / FR_SIZE)` pieces of at most `fr_size`
/// bytes each.
pub fn fragment_count(len: usize, fr_size: usize) -> u8 {
	(((len.max(1) - 1) / fr_size) + 1) as u8
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn control_frame_round_trips() {
		let buf = build_control(0xdead_beef, Opcode::Cack, 42, 1, 1);
		let frame = parse(&buf).unwrap();
		assert_eq!(frame.header.subport.get(), 0xdead_beef);
		assert_eq!(frame.header.seqno.get(), 42);
		assert_eq!(Opcode::try_from(frame.header.command.get()).unwrap(), Opcode::Cack);
		assert!(frame.rest.is_empty());
	}

	#[test]
	fn connect_frame_carries_service_name() {
		let buf = build_connect(7, 0, "Echo");
		let frame = parse(&buf).unwrap();
		assert_eq!(Opcode::try_from(frame.header.command.get()).unwrap(), Opcode::Connect);
		assert_eq!(parse_service_name(frame.rest), Some("Echo"));
	}

	#[test]
	fn data_frame_round_trips() {
		let body = b"hello world";
		let buf = build_data(1, Opcode::Query, 5, 1, 1, body.len() as u16, body);
		let frame = parse(&buf).unwrap();
		let (dhdr, got) = parse_data(frame.rest).unwrap();
		assert_eq!(dhdr.tlen.get() as usize, body.len());
		assert_eq!(got, body);
	}

	#[test]
	fn fragment_count_matches_ceil_division() {
		assert_eq!(fragment_count(1024, 1024), 1);
		assert_eq!(fragment_count(1025, 1024), 2);
		assert_eq!(fragment_count(3000, 1024), 3);
		assert_eq!(fragment_count(0, 1024), 1);
	}

	#[test]
	fn short_buffer_is_rejected() {
		assert!(parse(&[0u8; 4]).is_none());
	}
}
