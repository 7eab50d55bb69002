//! # Trust Module.
//!
//! Trust data store consulted by the routing engine, and the trust
//! applications that populate it.
//!
//! Scores are normalised to [0, 1]. A neighbour whose score is strictly below
//! [`TRUST_THRESHOLD`] is not trusted to carry routes.

pub mod eigen;
pub mod entry;
pub mod manager;
pub mod mediator;
pub mod table;

pub use entry::TrustEntry;
pub use mediator::{TrustMediator, TrustProvider};
pub use table::TrustTable;

/// Trust score type.
pub type TrustValue = f64;

/// Scores below this value mark a neighbour as untrustworthy.
pub const TRUST_THRESHOLD: TrustValue = 0.4;

/// Whether a score is high enough to accept routing advertisements.
pub fn is_trustworthy(value: TrustValue) -> bool {
	value >= TRUST_THRESHOLD
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_threshold_boundary() {
		assert!(!is_trustworthy(0.3));
		assert!(!is_trustworthy(0.399));
		assert!(is_trustworthy(0.4));
		assert!(is_trustworthy(1.0));
	}
}
