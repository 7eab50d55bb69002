//! # Network Module.
//!
//! Contracts of the collaborators the engine runs on: the IPv4 layer, the
//! simulation clock and the random source.

use crate::{
	packet::{Ipv4Header, Packet},
	route::Ipv4Route,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{cell::Cell, net::Ipv4Addr, rc::Rc, time::Duration};

/// Identifier of a network device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

/// Address assigned to an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterfaceAddress {
	/// Local unicast address.
	pub local: Ipv4Addr,
	/// Subnet broadcast address.
	pub broadcast: Ipv4Addr,
}

impl InterfaceAddress {
	/// Builds the address of `local` inside a subnet of `prefix_len` bits.
	pub fn new(local: Ipv4Addr, prefix_len: u8) -> Self {
		let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len.min(32))).unwrap_or(0);
		let broadcast = Ipv4Addr::from(u32::from(local) | !mask);
		Self { local, broadcast }
	}
}

/// The network-layer object a routing protocol is installed on.
pub trait Ipv4Stack {
	/// Interface index bound to a device.
	fn interface_for_device(&self, device: DeviceId) -> Option<u32>;
	/// Interface index owning an address.
	fn interface_for_address(&self, address: Ipv4Addr) -> Option<u32>;
	/// The `index`-th address of an interface.
	fn address(&self, interface: u32, index: u32) -> Option<InterfaceAddress>;
	/// Whether the interface forwards packets.
	fn is_forwarding(&self, interface: u32) -> bool;
	/// Enables or disables forwarding on an interface.
	fn set_forwarding(&mut self, interface: u32, forwarding: bool);
	/// Hands a packet to the link layer along a route.
	fn unicast_forward(&mut self, route: &Ipv4Route, packet: Packet, header: Ipv4Header);
	/// Delivers a packet to the local host.
	fn local_deliver(&mut self, packet: Packet, header: Ipv4Header, interface: u32);
}

/// Source of the current simulation time.
pub trait Clock {
	/// Time elapsed since the start of the run.
	fn now(&self) -> Duration;
}

/// Manually advanced clock, shared by cloning.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
	now: Rc<Cell<Duration>>,
}

impl VirtualClock {
	/// Creates a clock at time zero.
	pub fn new() -> Self {
		Self::default()
	}

	/// Moves the clock forward.
	pub fn advance(&self, by: Duration) {
		self.now.set(self.now.get() + by);
	}
}

impl Clock for VirtualClock {
	fn now(&self) -> Duration {
		self.now.get()
	}
}

/// Uniform random draws used by the selfish-behaviour simulation.
pub trait RandomSource {
	/// Draws uniformly from `[min, max)`.
	fn uniform(&mut self, min: f64, max: f64) -> f64;
}

/// Random source seeded once per run.
#[derive(Clone, Debug)]
pub struct SeededRandom {
	rng: StdRng,
}

impl SeededRandom {
	/// Creates a source from a seed.
	pub fn from_seed(seed: u64) -> Self {
		Self { rng: StdRng::seed_from_u64(seed) }
	}
}

impl RandomSource for SeededRandom {
	fn uniform(&mut self, min: f64, max: f64) -> f64 {
		if min >= max {
			return min;
		}
		self.rng.gen_range(min..max)
	}
}
