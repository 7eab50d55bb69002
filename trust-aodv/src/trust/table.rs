//! Ordered collection of trust entries keyed by neighbour address.

use super::{TrustEntry, TrustProvider};
use crate::{error::AodvError, storage::TrustRecord};
use std::net::Ipv4Addr;

/// Trust table holding at most one entry per neighbour.
///
/// Entries keep their insertion order, but every operation addresses them by
/// neighbour address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrustTable {
	records: Vec<TrustEntry>,
}

impl TrustTable {
	/// Constructs an empty table.
	pub fn new() -> Self {
		Self { records: Vec::new() }
	}

	/// Appends a new entry. Fails if the neighbour already has one.
	pub fn add_record(&mut self, entry: TrustEntry) -> Result<(), AodvError> {
		if self.position(entry.neighbour_address()).is_some() {
			return Err(AodvError::ValidationError(format!(
				"Trust entry for {} already exists",
				entry.neighbour_address()
			)));
		}

		self.records.push(entry);
		Ok(())
	}

	/// Removes the entry of the given neighbour and returns it.
	pub fn remove_record(&mut self, neighbour: Ipv4Addr) -> Option<TrustEntry> {
		let index = self.position(neighbour)?;
		Some(self.records.remove(index))
	}

	/// Replaces the value and timestamp of a neighbour's entry, inserting it
	/// when the neighbour is unknown.
	pub fn update_record(&mut self, entry: TrustEntry) {
		match self.position(entry.neighbour_address()) {
			Some(index) => {
				let record = &mut self.records[index];
				record.set_trust_value(entry.trust_value());
				record.set_timestamp(entry.timestamp());
			},
			None => self.records.push(entry),
		}
	}

	/// Looks up the entry of a neighbour. `None` means no score is known and no
	/// trust field may be read.
	pub fn lookup_trust_entry(&self, neighbour: Ipv4Addr) -> Option<TrustEntry> {
		self.position(neighbour).map(|index| self.records[index])
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Whether the table is empty.
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Iterates the entries in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = &TrustEntry> {
		self.records.iter()
	}

	/// Converts the table into storage records.
	pub fn to_records(&self) -> Vec<TrustRecord> {
		self.records.iter().map(|entry| TrustRecord::from(*entry)).collect()
	}

	/// Builds a table from storage records, rejecting duplicated neighbours.
	pub fn from_records(records: Vec<TrustRecord>) -> Result<Self, AodvError> {
		let mut table = Self::new();
		for record in records {
			table.add_record(record.try_into()?)?;
		}

		Ok(table)
	}

	fn position(&self, neighbour: Ipv4Addr) -> Option<usize> {
		self.records.iter().position(|entry| entry.neighbour_address() == neighbour)
	}
}

impl TrustProvider for TrustTable {
	fn lookup_trust(&self, neighbour: Ipv4Addr) -> Option<TrustEntry> {
		self.lookup_trust_entry(neighbour)
	}
}
