//! # Packet Module.
//!
//! AODV control message encodings (RFC 3561 layout, network byte order) and the
//! packet container exchanged with sockets.

use crate::error::AodvError;
use std::net::Ipv4Addr;

/// UDP port for AODV control traffic.
pub const AODV_PORT: u16 = 654;

/// Size of an encoded RREQ body.
pub const RREQ_SIZE: usize = 23;
/// Size of an encoded RREP body.
pub const RREP_SIZE: usize = 19;
/// Size of an encoded RREP-ACK body.
pub const RREP_ACK_SIZE: usize = 1;

/// AODV message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
	/// Route request
	RouteRequest = 1,
	/// Route reply
	RouteReply = 2,
	/// Route error
	RouteError = 3,
	/// Route reply acknowledgement
	RouteReplyAck = 4,
}

impl TryFrom<u8> for MessageType {
	type Error = AodvError;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			1 => Ok(MessageType::RouteRequest),
			2 => Ok(MessageType::RouteReply),
			3 => Ok(MessageType::RouteError),
			4 => Ok(MessageType::RouteReplyAck),
			_ => Err(AodvError::ParsingError(format!("Unknown message type {}", value))),
		}
	}
}

/// A datagram and the IP time-to-live it travels with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
	payload: Vec<u8>,
	ttl: u8,
}

impl Packet {
	/// Creates a packet.
	pub fn new(payload: Vec<u8>, ttl: u8) -> Self {
		Self { payload, ttl }
	}

	/// Creates a control packet: type byte followed by the encoded body.
	pub fn control(kind: MessageType, body: &[u8], ttl: u8) -> Self {
		let mut payload = Vec::with_capacity(body.len() + 1);
		payload.push(kind as u8);
		payload.extend_from_slice(body);
		Self { payload, ttl }
	}

	/// The payload bytes.
	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	/// The time-to-live tag.
	pub fn ttl(&self) -> u8 {
		self.ttl
	}

	/// Overwrites the time-to-live tag.
	pub fn set_ttl(&mut self, ttl: u8) {
		self.ttl = ttl;
	}

	/// Splits off the leading type byte. Returns the raw type and the body.
	pub fn split_type(&self) -> Option<(u8, Packet)> {
		self.payload
			.split_first()
			.map(|(&kind, body)| (kind, Packet { payload: body.to_vec(), ttl: self.ttl }))
	}
}

/// IP header fields the data plane looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
	/// Source address.
	pub source: Ipv4Addr,
	/// Destination address.
	pub destination: Ipv4Addr,
	/// Remaining time-to-live.
	pub ttl: u8,
}

/// Route request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RreqHeader {
	/// Join flag (multicast).
	pub join: bool,
	/// Repair flag (multicast).
	pub repair: bool,
	/// Gratuitous RREP flag.
	pub gratuitous: bool,
	/// Only the destination may answer.
	pub destination_only: bool,
	/// Destination sequence number is unknown.
	pub unknown_seqno: bool,
	/// Hops from the originator.
	pub hop_count: u8,
	/// Request identifier, unique per originator.
	pub request_id: u32,
	/// Destination being searched.
	pub destination: Ipv4Addr,
	/// Latest known destination sequence number.
	pub dst_seqno: u32,
	/// Originator of the request.
	pub origin: Ipv4Addr,
	/// Originator sequence number.
	pub origin_seqno: u32,
}

impl RreqHeader {
	/// Encodes the body.
	pub fn encode(&self) -> Vec<u8> {
		let mut flags = 0u8;
		for (set, bit) in [
			(self.join, 0x80),
			(self.repair, 0x40),
			(self.gratuitous, 0x20),
			(self.destination_only, 0x10),
			(self.unknown_seqno, 0x08),
		] {
			if set {
				flags |= bit;
			}
		}

		let mut bytes = Vec::with_capacity(RREQ_SIZE);
		bytes.extend_from_slice(&[flags, 0, self.hop_count]);
		bytes.extend_from_slice(&self.request_id.to_be_bytes());
		bytes.extend_from_slice(&self.destination.octets());
		bytes.extend_from_slice(&self.dst_seqno.to_be_bytes());
		bytes.extend_from_slice(&self.origin.octets());
		bytes.extend_from_slice(&self.origin_seqno.to_be_bytes());
		bytes
	}

	/// Decodes the body.
	pub fn decode(bytes: &[u8]) -> Result<Self, AodvError> {
		check_len("RREQ", bytes, RREQ_SIZE)?;
		let flags = bytes[0];

		Ok(Self {
			join: flags & 0x80 != 0,
			repair: flags & 0x40 != 0,
			gratuitous: flags & 0x20 != 0,
			destination_only: flags & 0x10 != 0,
			unknown_seqno: flags & 0x08 != 0,
			hop_count: bytes[2],
			request_id: read_u32(bytes, 3),
			destination: read_addr(bytes, 7),
			dst_seqno: read_u32(bytes, 11),
			origin: read_addr(bytes, 15),
			origin_seqno: read_u32(bytes, 19),
		})
	}
}

/// Route reply body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RrepHeader {
	/// Repair flag (multicast).
	pub repair: bool,
	/// The receiver must answer with a RREP-ACK.
	pub ack_required: bool,
	/// Prefix size of the destination subnet.
	pub prefix_size: u8,
	/// Hops from the destination.
	pub hop_count: u8,
	/// Destination the route leads to.
	pub destination: Ipv4Addr,
	/// Destination sequence number.
	pub dst_seqno: u32,
	/// Originator of the route request.
	pub origin: Ipv4Addr,
	/// Route lifetime in milliseconds.
	pub lifetime_ms: u32,
}

impl RrepHeader {
	/// Encodes the body.
	pub fn encode(&self) -> Vec<u8> {
		let mut flags = 0u8;
		if self.repair {
			flags |= 0x80;
		}
		if self.ack_required {
			flags |= 0x40;
		}

		let mut bytes = Vec::with_capacity(RREP_SIZE);
		bytes.extend_from_slice(&[flags, self.prefix_size, self.hop_count]);
		bytes.extend_from_slice(&self.destination.octets());
		bytes.extend_from_slice(&self.dst_seqno.to_be_bytes());
		bytes.extend_from_slice(&self.origin.octets());
		bytes.extend_from_slice(&self.lifetime_ms.to_be_bytes());
		bytes
	}

	/// Decodes the body.
	pub fn decode(bytes: &[u8]) -> Result<Self, AodvError> {
		check_len("RREP", bytes, RREP_SIZE)?;

		Ok(Self {
			repair: bytes[0] & 0x80 != 0,
			ack_required: bytes[0] & 0x40 != 0,
			prefix_size: bytes[1],
			hop_count: bytes[2],
			destination: read_addr(bytes, 3),
			dst_seqno: read_u32(bytes, 7),
			origin: read_addr(bytes, 11),
			lifetime_ms: read_u32(bytes, 15),
		})
	}
}

/// Route error body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RerrHeader {
	/// Upstream nodes must not delete the route.
	pub no_delete: bool,
	/// Unreachable destinations and their sequence numbers.
	pub unreachable: Vec<(Ipv4Addr, u32)>,
}

impl RerrHeader {
	/// Encodes the body. At most 255 destinations are written.
	pub fn encode(&self) -> Vec<u8> {
		let count = self.unreachable.len().min(usize::from(u8::MAX));
		let flags = if self.no_delete { 0x80 } else { 0 };

		let mut bytes = Vec::with_capacity(3 + count * 8);
		bytes.extend_from_slice(&[flags, 0, count as u8]);
		for (destination, seqno) in self.unreachable.iter().take(count) {
			bytes.extend_from_slice(&destination.octets());
			bytes.extend_from_slice(&seqno.to_be_bytes());
		}
		bytes
	}

	/// Decodes the body.
	pub fn decode(bytes: &[u8]) -> Result<Self, AodvError> {
		check_len("RERR", bytes, 3)?;
		let count = usize::from(bytes[2]);
		check_len("RERR", bytes, 3 + count * 8)?;

		let unreachable = (0..count)
			.map(|i| {
				let offset = 3 + i * 8;
				(read_addr(bytes, offset), read_u32(bytes, offset + 4))
			})
			.collect();

		Ok(Self { no_delete: bytes[0] & 0x80 != 0, unreachable })
	}
}

fn check_len(kind: &str, bytes: &[u8], expected: usize) -> Result<(), AodvError> {
	if bytes.len() < expected {
		return Err(AodvError::ParsingError(format!(
			"{} truncated: {} bytes, expected {}",
			kind,
			bytes.len(),
			expected
		)));
	}
	Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
	u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn read_addr(bytes: &[u8], offset: usize) -> Ipv4Addr {
	Ipv4Addr::new(bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_decode_rrep_wire_bytes() {
		let bytes = [
			0x40, 0x00, 0x02, // flags (ack), prefix, hop count
			10, 0, 0, 9, // destination
			0x00, 0x00, 0x00, 0x05, // destination seqno
			10, 0, 0, 1, // origin
			0x00, 0x00, 0x0b, 0xb8, // lifetime 3000 ms
		];

		let rrep = RrepHeader::decode(&bytes).unwrap();
		assert!(rrep.ack_required);
		assert!(!rrep.repair);
		assert_eq!(rrep.hop_count, 2);
		assert_eq!(rrep.destination, Ipv4Addr::new(10, 0, 0, 9));
		assert_eq!(rrep.dst_seqno, 5);
		assert_eq!(rrep.origin, Ipv4Addr::new(10, 0, 0, 1));
		assert_eq!(rrep.lifetime_ms, 3000);
		assert_eq!(rrep.encode(), bytes.to_vec());
	}

	#[test]
	fn test_decode_rreq_destination() {
		let rreq = RreqHeader {
			join: false,
			repair: false,
			gratuitous: false,
			destination_only: true,
			unknown_seqno: true,
			hop_count: 3,
			request_id: 77,
			destination: Ipv4Addr::new(10, 0, 0, 4),
			dst_seqno: 0,
			origin: Ipv4Addr::new(10, 0, 0, 1),
			origin_seqno: 12,
		};

		let bytes = rreq.encode();
		assert_eq!(bytes.len(), RREQ_SIZE);
		assert_eq!(bytes[0], 0x18);
		assert_eq!(RreqHeader::decode(&bytes).unwrap(), rreq);
	}

	#[test]
	fn test_truncated_bodies_fail() {
		assert!(RrepHeader::decode(&[0u8; RREP_SIZE - 1]).is_err());
		assert!(RreqHeader::decode(&[]).is_err());
		// Claims two destinations, carries one
		assert!(RerrHeader::decode(&[0, 0, 2, 10, 0, 0, 1, 0, 0, 0, 1]).is_err());
	}

	#[test]
	fn test_rerr_layout() {
		let rerr = RerrHeader {
			no_delete: true,
			unreachable: vec![(Ipv4Addr::new(10, 0, 0, 3), 4), (Ipv4Addr::new(10, 0, 0, 5), 9)],
		};
		let bytes = rerr.encode();
		assert_eq!(&bytes[..3], &[0x80, 0, 2]);
		assert_eq!(RerrHeader::decode(&bytes).unwrap(), rerr);
	}

	#[test]
	fn test_split_type() {
		let packet = Packet::control(MessageType::RouteReplyAck, &[0], 1);
		let (kind, body) = packet.split_type().unwrap();
		assert_eq!(MessageType::try_from(kind).unwrap(), MessageType::RouteReplyAck);
		assert_eq!(body.payload(), &[0]);
		assert_eq!(body.ttl(), 1);

		assert!(Packet::new(Vec::new(), 1).split_type().is_none());
		assert!(MessageType::try_from(9).is_err());
	}
}
