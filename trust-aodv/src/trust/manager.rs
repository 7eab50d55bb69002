//! Trust manager scoring neighbours by observed forwarding behaviour.

use super::{TrustEntry, TrustMediator, TrustTable, TrustValue};
use log::debug;
use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

/// Forwarding counters for one neighbour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Observations {
	/// Packets the neighbour was seen forwarding.
	pub forwarded: u64,
	/// Packets the neighbour was seen dropping.
	pub dropped: u64,
}

impl Observations {
	/// Beta-reputation estimate of the forwarding probability. An unobserved
	/// neighbour scores 0.5.
	pub fn score(&self) -> TrustValue {
		(self.forwarded as f64 + 1.0) / ((self.forwarded + self.dropped) as f64 + 2.0)
	}
}

/// Watches neighbours forward traffic and keeps their scores in a trust table.
#[derive(Clone, Debug, Default)]
pub struct ForwardingTrustManager {
	observations: HashMap<Ipv4Addr, Observations>,
	table: TrustTable,
}

impl ForwardingTrustManager {
	/// Creates a manager with an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Records that the neighbour forwarded a packet it was handed.
	pub fn observe_forward(&mut self, neighbour: Ipv4Addr, now: Duration) {
		self.observations.entry(neighbour).or_default().forwarded += 1;
		self.refresh(neighbour, now);
	}

	/// Records that the neighbour dropped a packet it should have forwarded.
	pub fn observe_drop(&mut self, neighbour: Ipv4Addr, now: Duration) {
		self.observations.entry(neighbour).or_default().dropped += 1;
		self.refresh(neighbour, now);
	}

	/// Counters collected for a neighbour.
	pub fn observations(&self, neighbour: Ipv4Addr) -> Observations {
		self.observations.get(&neighbour).copied().unwrap_or_default()
	}

	fn refresh(&mut self, neighbour: Ipv4Addr, now: Duration) {
		let score = self.observations(neighbour).score();
		debug!("Trust of {} is now {:.3}", neighbour, score);
		self.table.update_record(TrustEntry::new(neighbour, score, now));
	}
}

impl TrustMediator for ForwardingTrustManager {
	fn strategy(&self) -> &'static str {
		"forwarding-observation"
	}

	/// Overrides the observed score; counters are left alone and the next
	/// observation recomputes the score from them.
	fn record_trust(&mut self, neighbour: Ipv4Addr, value: TrustValue, now: Duration) {
		self.table.update_record(TrustEntry::new(neighbour, value, now));
	}

	fn trust_table(&self) -> &TrustTable {
		&self.table
	}
}
