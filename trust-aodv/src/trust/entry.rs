//! A single neighbour's trust score.

use super::TrustValue;
use std::{net::Ipv4Addr, time::Duration};

/// Trust record of one neighbour, keyed by its address.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrustEntry {
	neighbour_address: Ipv4Addr,
	trust_value: TrustValue,
	timestamp: Duration,
}

impl TrustEntry {
	/// Constructs a new trust entry.
	pub fn new(neighbour_address: Ipv4Addr, trust_value: TrustValue, timestamp: Duration) -> Self {
		Self { neighbour_address, trust_value, timestamp }
	}

	/// Returns the neighbour address.
	pub fn neighbour_address(&self) -> Ipv4Addr {
		self.neighbour_address
	}

	/// Sets the neighbour address.
	pub fn set_neighbour_address(&mut self, neighbour_address: Ipv4Addr) {
		self.neighbour_address = neighbour_address;
	}

	/// Returns the trust value.
	pub fn trust_value(&self) -> TrustValue {
		self.trust_value
	}

	/// Sets the trust value. The value is stored as given.
	pub fn set_trust_value(&mut self, trust_value: TrustValue) {
		self.trust_value = trust_value;
	}

	/// Returns the time the value was last set.
	pub fn timestamp(&self) -> Duration {
		self.timestamp
	}

	/// Sets the timestamp.
	pub fn set_timestamp(&mut self, timestamp: Duration) {
		self.timestamp = timestamp;
	}
}
