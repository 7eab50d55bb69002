//! Boundary between trust-computation strategies and the routing layer.

use super::{TrustEntry, TrustTable, TrustValue};
use log::warn;
use std::{net::Ipv4Addr, sync::RwLock, time::Duration};

/// Read access to neighbour trust, as seen by the routing engine.
pub trait TrustProvider {
	/// Returns the neighbour's entry, or `None` when no score is known.
	fn lookup_trust(&self, neighbour: Ipv4Addr) -> Option<TrustEntry>;
}

/// A trust-computation strategy that feeds a [`TrustTable`].
///
/// Strategies differ in how they arrive at a score (forwarding observation,
/// reputation exchange, ...). The routing engine only ever reads the table
/// through [`TrustProvider`], so strategies can be swapped freely.
pub trait TrustMediator {
	/// Short name of the strategy, used in logs.
	fn strategy(&self) -> &'static str;

	/// Feeds a freshly computed score for a neighbour.
	fn record_trust(&mut self, neighbour: Ipv4Addr, value: TrustValue, now: Duration);

	/// The table of current scores.
	fn trust_table(&self) -> &TrustTable;
}

impl<M: TrustMediator> TrustProvider for RwLock<M> {
	fn lookup_trust(&self, neighbour: Ipv4Addr) -> Option<TrustEntry> {
		match self.read() {
			Ok(mediator) => mediator.trust_table().lookup_trust_entry(neighbour),
			Err(_) => {
				warn!("Trust table lock poisoned, ignoring trust for {}", neighbour);
				None
			},
		}
	}
}
