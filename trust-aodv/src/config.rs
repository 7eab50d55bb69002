//! # Configuration Module.
//!
//! Selfish-behaviour knobs and the protocol timeouts the trust-aware engine reads.

use crate::error::AodvError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default drop probability for every selfish knob, in percent.
pub const DEFAULT_DROP_PROBABILITY: f64 = 10.0;
/// Default active route timeout in milliseconds.
pub const DEFAULT_ACTIVE_ROUTE_TIMEOUT_MS: u64 = 3000;

/// Protocol configuration settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
	/// Probability (percent) of dropping a route request addressed to someone else.
	pub rreq_drop_probability: f64,
	/// Probability (percent) of dropping a route reply that should be forwarded.
	pub rrep_drop_probability: f64,
	/// Probability (percent) of refusing to forward a data packet.
	pub data_drop_probability: f64,
	/// Lifetime granted to routes in active use, in milliseconds.
	pub active_route_timeout_ms: u64,
}

impl Default for ProtocolConfig {
	fn default() -> Self {
		Self {
			rreq_drop_probability: DEFAULT_DROP_PROBABILITY,
			rrep_drop_probability: DEFAULT_DROP_PROBABILITY,
			data_drop_probability: DEFAULT_DROP_PROBABILITY,
			active_route_timeout_ms: DEFAULT_ACTIVE_ROUTE_TIMEOUT_MS,
		}
	}
}

impl ProtocolConfig {
	/// Configuration of a node that never drops anything.
	pub fn honest() -> Self {
		Self {
			rreq_drop_probability: 0.0,
			rrep_drop_probability: 0.0,
			data_drop_probability: 0.0,
			..Default::default()
		}
	}

	/// Checks that every probability lies in [0, 100].
	pub fn validate(&self) -> Result<(), AodvError> {
		check_probability("rreq_drop_probability", self.rreq_drop_probability)?;
		check_probability("rrep_drop_probability", self.rrep_drop_probability)?;
		check_probability("data_drop_probability", self.data_drop_probability)
	}

	/// Sets the route request drop probability.
	pub fn set_rreq_drop_probability(&mut self, probability: f64) -> Result<(), AodvError> {
		check_probability("rreq_drop_probability", probability)?;
		self.rreq_drop_probability = probability;
		Ok(())
	}

	/// Sets the route reply drop probability.
	pub fn set_rrep_drop_probability(&mut self, probability: f64) -> Result<(), AodvError> {
		check_probability("rrep_drop_probability", probability)?;
		self.rrep_drop_probability = probability;
		Ok(())
	}

	/// Sets the data packet drop probability.
	pub fn set_data_drop_probability(&mut self, probability: f64) -> Result<(), AodvError> {
		check_probability("data_drop_probability", probability)?;
		self.data_drop_probability = probability;
		Ok(())
	}

	/// Active route timeout as a duration.
	pub fn active_route_timeout(&self) -> Duration {
		Duration::from_millis(self.active_route_timeout_ms)
	}
}

fn check_probability(name: &str, probability: f64) -> Result<(), AodvError> {
	// NaN fails the range check too
	if (0.0..=100.0).contains(&probability) {
		Ok(())
	} else {
		Err(AodvError::ConfigurationError(format!(
			"{} must be within [0, 100], got {}",
			name, probability
		)))
	}
}
