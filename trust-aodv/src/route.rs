//! # Route Module.
//!
//! Routing table entries, the table itself and the acceptance policy applied
//! when a route reply advertises a route to a known destination.

use crate::net::InterfaceAddress;
use std::{
	collections::{BTreeSet, HashMap},
	net::Ipv4Addr,
	time::Duration,
};

/// State of a routing table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteFlag {
	/// The route can be used for forwarding.
	Valid,
	/// The route expired or broke.
	Invalid,
	/// A discovery for the destination is outstanding.
	InSearch,
}

/// The path a packet takes out of this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Route {
	/// Final destination.
	pub destination: Ipv4Addr,
	/// Local source address.
	pub source: Ipv4Addr,
	/// Next hop.
	pub gateway: Ipv4Addr,
	/// Outgoing interface index.
	pub interface: u32,
}

/// A routing table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEntry {
	/// Destination address.
	pub destination: Ipv4Addr,
	/// Next hop towards the destination.
	pub next_hop: Ipv4Addr,
	/// Outgoing interface index.
	pub interface: u32,
	/// Address of the outgoing interface.
	pub local: InterfaceAddress,
	/// Distance to the destination.
	pub hop_count: u8,
	/// Destination sequence number.
	pub seq_no: u32,
	/// Whether `seq_no` can be trusted.
	pub valid_seq_no: bool,
	/// Entry state.
	pub flag: RouteFlag,
	/// Absolute expiry time.
	pub expires_at: Duration,
	/// Neighbours that route through this entry.
	pub precursors: BTreeSet<Ipv4Addr>,
}

impl RouteEntry {
	/// A valid one-hop entry with an unknown sequence number that expires at `now`.
	/// Callers override the remaining fields with struct update syntax.
	pub fn new(
		destination: Ipv4Addr, next_hop: Ipv4Addr, interface: u32, local: InterfaceAddress,
		now: Duration,
	) -> Self {
		Self {
			destination,
			next_hop,
			interface,
			local,
			hop_count: 1,
			seq_no: 0,
			valid_seq_no: false,
			flag: RouteFlag::Valid,
			expires_at: now,
			precursors: BTreeSet::new(),
		}
	}

	/// Time left before the entry expires.
	pub fn lifetime(&self, now: Duration) -> Duration {
		self.expires_at.saturating_sub(now)
	}

	/// Makes the entry expire `lifetime` after `now`.
	pub fn set_lifetime(&mut self, lifetime: Duration, now: Duration) {
		self.expires_at = now + lifetime;
	}

	/// Records a neighbour depending on this route. Returns false if it was known.
	pub fn insert_precursor(&mut self, precursor: Ipv4Addr) -> bool {
		self.precursors.insert(precursor)
	}

	/// The route packets to the destination follow.
	pub fn route(&self) -> Ipv4Route {
		Ipv4Route {
			destination: self.destination,
			source: self.local.local,
			gateway: self.next_hop,
			interface: self.interface,
		}
	}
}

/// Whether sequence number `a` is newer than `b`, allowing for wrap-around.
pub fn seq_newer(a: u32, b: u32) -> bool {
	let diff = a.wrapping_sub(b);
	diff != 0 && diff < 1 << 31
}

/// Whether an advertised route should overwrite the existing one.
///
/// Conditions are checked in order and the first match accepts:
/// the existing sequence number is invalid; the candidate's is newer; they are
/// equal and the existing route is not valid; they are equal and the candidate
/// is shorter. Sequence numbers compare with wrap-around.
pub fn should_replace(existing: &RouteEntry, candidate: &RouteEntry) -> bool {
	if !existing.valid_seq_no {
		return true;
	}

	if seq_newer(candidate.seq_no, existing.seq_no) {
		return true;
	}
	let same = candidate.seq_no == existing.seq_no;
	if same && existing.flag != RouteFlag::Valid {
		return true;
	}
	same && candidate.hop_count < existing.hop_count
}

/// Routing table keyed by destination.
#[derive(Clone, Debug, Default)]
pub struct RoutingTable {
	entries: HashMap<Ipv4Addr, RouteEntry>,
}

impl RoutingTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Entry for the destination, whatever its state.
	pub fn lookup_route(&self, destination: Ipv4Addr) -> Option<&RouteEntry> {
		self.entries.get(&destination)
	}

	/// Mutable entry for the destination.
	pub fn lookup_route_mut(&mut self, destination: Ipv4Addr) -> Option<&mut RouteEntry> {
		self.entries.get_mut(&destination)
	}

	/// Entry for the destination if it is valid.
	pub fn lookup_valid_route(&self, destination: Ipv4Addr) -> Option<&RouteEntry> {
		self.entries.get(&destination).filter(|e| e.flag == RouteFlag::Valid)
	}

	/// Inserts a new entry. Returns false if the destination already had one.
	pub fn add_route(&mut self, entry: RouteEntry) -> bool {
		if self.entries.contains_key(&entry.destination) {
			return false;
		}
		self.entries.insert(entry.destination, entry);
		true
	}

	/// Overwrites the entry of the same destination. Returns false if there was none.
	pub fn update(&mut self, entry: RouteEntry) -> bool {
		match self.entries.get_mut(&entry.destination) {
			Some(existing) => {
				*existing = entry;
				true
			},
			None => false,
		}
	}

	/// Removes the entry for the destination.
	pub fn delete_route(&mut self, destination: Ipv4Addr) -> Option<RouteEntry> {
		self.entries.remove(&destination)
	}

	/// Marks the entry invalid and bumps its sequence number. Returns false if
	/// there was no valid entry.
	pub fn invalidate(&mut self, destination: Ipv4Addr) -> bool {
		match self.entries.get_mut(&destination) {
			Some(entry) if entry.flag == RouteFlag::Valid => {
				entry.flag = RouteFlag::Invalid;
				entry.seq_no = entry.seq_no.wrapping_add(1);
				true
			},
			_ => false,
		}
	}

	/// Invalidates valid entries whose lifetime ran out.
	pub fn purge(&mut self, now: Duration) {
		for entry in self.entries.values_mut() {
			if entry.flag == RouteFlag::Valid && entry.expires_at <= now {
				entry.flag = RouteFlag::Invalid;
			}
		}
	}

	/// All entries, in no particular order.
	pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
		self.entries.values()
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the table is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
