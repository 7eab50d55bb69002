//! # Trust AODV
//!
//! A trust-aware extension of the Ad hoc On-Demand Distance Vector routing
//! protocol (RFC 3561) for simulated wireless ad-hoc networks.
//!
//! ## Main characteristics:
//!
//! **Trust-gated routes** - a route reply is only allowed to change the routing
//! table when both the neighbour that sent it and the current next hop towards
//! its destination are trusted.
//!
//! **Selfish nodes** - route requests, route replies and data packets can be
//! dropped with configurable probabilities, reproducibly, from a seeded random
//! source.
//!
//! **Pluggable trust** - scores come from any [`trust::TrustMediator`]
//! strategy; the engine reads them through [`trust::TrustProvider`] only.
//!
//! ## Implementation
//!
//! [`protocol::RoutingProtocol`] intercepts control traffic and forwarding
//! decisions and delegates everything else to a [`protocol::BaseProtocol`],
//! such as the bundled [`base::BasicAodv`]. [`sim::Network`] runs whole
//! networks in memory.

// Rustc
#![warn(trivial_casts)]
#![deny(
	absolute_paths_not_starting_with_crate, deprecated, future_incompatible, missing_docs,
	nonstandard_style, unreachable_code, unreachable_patterns
)]
#![forbid(unsafe_code)]
// Clippy
#![allow(clippy::tabs_in_doc_comments, clippy::needless_range_loop, clippy::new_without_default)]
#![deny(
	// Complexity
 	clippy::unnecessary_cast,
	clippy::needless_question_mark,
	clippy::clone_on_copy,
	// Pedantic
 	clippy::cast_lossless,
 	clippy::cast_possible_wrap,
	// Perf
	clippy::redundant_clone,
	// Restriction
 	clippy::panic,
	// Style
 	clippy::let_and_return,
 	clippy::needless_borrow
)]

pub mod base;
pub mod config;
pub mod error;
pub mod net;
pub mod packet;
pub mod protocol;
pub mod route;
pub mod sim;
pub mod socket;
pub mod storage;
pub mod trust;

pub use config::ProtocolConfig;
pub use error::AodvError;
pub use packet::AODV_PORT;
pub use protocol::{DataOutcome, DropReason, Outcome, ProtocolStats, RoutingProtocol};
pub use trust::{TrustEntry, TrustMediator, TrustProvider, TrustTable, TRUST_THRESHOLD};
