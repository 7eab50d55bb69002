//! # Simulation Module.
//!
//! Single-threaded in-memory network. Every node runs a trust-aware engine on
//! top of [`BasicAodv`]; frames travel over a shared medium and are delivered
//! round by round between linked nodes.

use crate::{
	base::{BasicAodv, DEFAULT_TTL},
	config::ProtocolConfig,
	error::AodvError,
	net::{Clock, DeviceId, InterfaceAddress, Ipv4Stack, SeededRandom, VirtualClock},
	packet::{Ipv4Header, Packet, AODV_PORT},
	protocol::{DataOutcome, ProtocolStats, RoutingProtocol},
	route::Ipv4Route,
	socket::{Socket, SocketId, SocketRegistry},
	trust::{manager::ForwardingTrustManager, TrustMediator, TrustProvider, TrustValue},
};
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::{
	cell::RefCell,
	collections::{BTreeSet, VecDeque},
	net::{Ipv4Addr, SocketAddrV4},
	rc::Rc,
	sync::{Arc, RwLock},
	time::Duration,
};

/// Prefix length of the simulated subnet.
pub const PREFIX_LEN: u8 = 24;
/// Largest network the 10.0.0.0/24 subnet can hold.
pub const MAX_NODES: usize = 254;
/// Simulated time a delivery round takes.
pub const ROUND_DURATION: Duration = Duration::from_millis(10);

/// Address of the `index`-th node.
pub fn node_address(index: usize) -> Ipv4Addr {
	Ipv4Addr::new(10, 0, 0, (index + 1) as u8)
}

/// Links of a line topology with `size` nodes.
pub fn line_links(size: usize) -> Vec<(usize, usize)> {
	(1..size).map(|i| (i - 1, i)).collect()
}

enum Frame {
	Control { from: Ipv4Addr, to: SocketAddrV4, packet: Packet },
	Data { from: Ipv4Addr, route: Ipv4Route, packet: Packet, header: Ipv4Header },
}

type Medium = Rc<RefCell<VecDeque<Frame>>>;
type Inbox = Rc<RefCell<VecDeque<(Packet, SocketAddrV4)>>>;

/// Socket attached to the shared medium.
pub struct SimSocket {
	local: Ipv4Addr,
	inbox: Inbox,
	medium: Medium,
}

impl Socket for SimSocket {
	fn recv_from(&mut self) -> Option<(Packet, SocketAddrV4)> {
		self.inbox.borrow_mut().pop_front()
	}

	fn send_to(&mut self, packet: Packet, destination: SocketAddrV4) {
		let frame = Frame::Control { from: self.local, to: destination, packet };
		self.medium.borrow_mut().push_back(frame);
	}
}

/// Network layer of a simulated node: one interface on one device.
pub struct SimIpv4 {
	interface: InterfaceAddress,
	forwarding: bool,
	medium: Medium,
	delivered: Vec<(Packet, Ipv4Header)>,
}

impl SimIpv4 {
	/// Packets delivered to this node.
	pub fn delivered(&self) -> &[(Packet, Ipv4Header)] {
		&self.delivered
	}
}

impl Ipv4Stack for SimIpv4 {
	fn interface_for_device(&self, device: DeviceId) -> Option<u32> {
		(device == DeviceId(0)).then_some(0)
	}

	fn interface_for_address(&self, address: Ipv4Addr) -> Option<u32> {
		(address == self.interface.local).then_some(0)
	}

	fn address(&self, interface: u32, index: u32) -> Option<InterfaceAddress> {
		(interface == 0 && index == 0).then_some(self.interface)
	}

	fn is_forwarding(&self, _interface: u32) -> bool {
		self.forwarding
	}

	fn set_forwarding(&mut self, _interface: u32, forwarding: bool) {
		self.forwarding = forwarding;
	}

	fn unicast_forward(&mut self, route: &Ipv4Route, packet: Packet, header: Ipv4Header) {
		let frame = Frame::Data { from: self.interface.local, route: *route, packet, header };
		self.medium.borrow_mut().push_back(frame);
	}

	fn local_deliver(&mut self, packet: Packet, header: Ipv4Header, _interface: u32) {
		trace!("{} delivered a packet from {}", self.interface.local, header.source);
		self.delivered.push((packet, header));
	}
}

/// Engine type every simulated node runs.
pub type SimProtocol = RoutingProtocol<BasicAodv, SimIpv4>;

struct SimNode {
	protocol: SimProtocol,
	unicast: (SocketId, Inbox),
	broadcast: (SocketId, Inbox),
	trust: Option<Arc<RwLock<ForwardingTrustManager>>>,
}

/// Per-node part of a [`SimulationReport`].
#[derive(Clone, Debug, Serialize)]
pub struct NodeReport {
	/// Node address.
	pub address: Ipv4Addr,
	/// Engine counters.
	pub stats: ProtocolStats,
	/// Data packets delivered to this node.
	pub delivered: usize,
	/// Trust the node holds in its neighbours.
	pub trust: Vec<(Ipv4Addr, TrustValue)>,
}

/// Outcome of a simulation run.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
	/// Data packets originated.
	pub sent: u64,
	/// Data packets delivered.
	pub delivered: u64,
	/// Per-node details.
	pub nodes: Vec<NodeReport>,
}

/// Simulated network.
pub struct Network {
	nodes: Vec<SimNode>,
	links: BTreeSet<(usize, usize)>,
	medium: Medium,
	clock: VirtualClock,
	sent: u64,
}

impl Network {
	/// Builds a network with one node per configuration. Node `i` gets
	/// address `10.0.0.(i+1)`; links are undirected.
	pub fn new(
		links: &[(usize, usize)], configs: Vec<ProtocolConfig>, seed: u64, with_trust: bool,
	) -> Result<Self, AodvError> {
		if configs.is_empty() || configs.len() > MAX_NODES {
			return Err(AodvError::ConfigurationError(format!(
				"A network needs between 1 and {} nodes, got {}",
				MAX_NODES,
				configs.len()
			)));
		}

		let size = configs.len();
		let mut link_set = BTreeSet::new();
		for &(a, b) in links {
			if a >= size || b >= size || a == b {
				return Err(AodvError::ConfigurationError(format!("Invalid link {}-{}", a, b)));
			}
			link_set.insert((a.min(b), a.max(b)));
		}

		let medium: Medium = Rc::new(RefCell::new(VecDeque::new()));
		let clock = VirtualClock::new();
		let mut nodes = Vec::with_capacity(size);
		for (i, config) in configs.into_iter().enumerate() {
			let address = node_address(i);
			let interface = InterfaceAddress::new(address, PREFIX_LEN);

			let mut sockets = SocketRegistry::new();
			let unicast_inbox: Inbox = Rc::default();
			let broadcast_inbox: Inbox = Rc::default();
			let unicast = sockets.register_unicast(
				Box::new(SimSocket {
					local: address,
					inbox: unicast_inbox.clone(),
					medium: medium.clone(),
				}),
				interface,
			);
			let broadcast = sockets.register_subnet_broadcast(
				Box::new(SimSocket {
					local: address,
					inbox: broadcast_inbox.clone(),
					medium: medium.clone(),
				}),
				interface,
			);

			let trust = with_trust.then(|| Arc::new(RwLock::new(ForwardingTrustManager::new())));
			let provider = trust.clone().map(|t| t as Arc<dyn TrustProvider>);
			let ipv4 =
				SimIpv4 { interface, forwarding: true, medium: medium.clone(), delivered: Vec::new() };
			let protocol = RoutingProtocol::new(
				config,
				BasicAodv::new(),
				ipv4,
				sockets,
				Box::new(SeededRandom::from_seed(seed.wrapping_add(i as u64))),
				Box::new(clock.clone()),
				provider,
			)?;

			nodes.push(SimNode {
				protocol,
				unicast: (unicast, unicast_inbox),
				broadcast: (broadcast, broadcast_inbox),
				trust,
			});
		}

		info!("Network of {} nodes and {} links", size, link_set.len());
		Ok(Self { nodes, links: link_set, medium, clock, sent: 0 })
	}

	/// Line topology where every node shares one configuration.
	pub fn line(size: usize, config: ProtocolConfig, seed: u64) -> Result<Self, AodvError> {
		Network::new(&line_links(size), vec![config; size], seed, false)
	}

	/// Originates a data packet at node `from` for node `to`.
	pub fn send_data(&mut self, from: usize, to: usize, payload: Vec<u8>) -> Result<(), AodvError> {
		if to >= self.nodes.len() {
			return Err(AodvError::ValidationError(format!("Unknown node {}", to)));
		}
		let node = self
			.nodes
			.get_mut(from)
			.ok_or_else(|| AodvError::ValidationError(format!("Unknown node {}", from)))?;

		node.protocol.send(Packet::new(payload, DEFAULT_TTL), node_address(to))?;
		self.sent += 1;
		Ok(())
	}

	/// Delivers frames until the medium is quiet or `max_rounds` ran out.
	/// Returns the number of rounds that carried traffic.
	pub fn run(&mut self, max_rounds: usize) -> Result<usize, AodvError> {
		for round in 0..max_rounds {
			let frames: Vec<Frame> = self.medium.borrow_mut().drain(..).collect();
			if frames.is_empty() {
				return Ok(round);
			}
			self.clock.advance(ROUND_DURATION);
			trace!("Round {}: {} frames", round, frames.len());

			for frame in frames {
				match frame {
					Frame::Control { from, to, packet } => self.deliver_control(from, to, packet)?,
					Frame::Data { from, route, packet, header } => {
						self.deliver_data(from, route, packet, header)?
					},
				}
			}
		}

		if !self.medium.borrow().is_empty() {
			warn!("Simulation stopped after {} rounds with traffic in flight", max_rounds);
		}
		Ok(max_rounds)
	}

	fn deliver_control(
		&mut self, from: Ipv4Addr, to: SocketAddrV4, packet: Packet,
	) -> Result<(), AodvError> {
		let sender = match self.index_of(from) {
			Some(sender) => sender,
			None => return Ok(()),
		};
		let source = SocketAddrV4::new(from, AODV_PORT);

		let broadcast = InterfaceAddress::new(from, PREFIX_LEN).broadcast;
		if *to.ip() == broadcast {
			for neighbour in self.neighbours(sender) {
				let node = &mut self.nodes[neighbour];
				node.broadcast.1.borrow_mut().push_back((packet.clone(), source));
				let outcome = node.protocol.recv_aodv(node.broadcast.0)?;
				trace!("{} -> {}: {:?}", from, node_address(neighbour), outcome);
			}
			return Ok(());
		}

		match self.index_of(*to.ip()) {
			Some(receiver) if self.linked(sender, receiver) => {
				let node = &mut self.nodes[receiver];
				node.unicast.1.borrow_mut().push_back((packet, source));
				let outcome = node.protocol.recv_aodv(node.unicast.0)?;
				trace!("{} -> {}: {:?}", from, to, outcome);
			},
			_ => debug!("{} is out of range of {}, frame lost", to, from),
		}
		Ok(())
	}

	fn deliver_data(
		&mut self, from: Ipv4Addr, route: Ipv4Route, packet: Packet, header: Ipv4Header,
	) -> Result<(), AodvError> {
		let (sender, receiver) = match (self.index_of(from), self.index_of(route.gateway)) {
			(Some(sender), Some(receiver)) if self.linked(sender, receiver) => (sender, receiver),
			_ => {
				debug!("{} is out of range of {}, data lost", route.gateway, from);
				return Ok(());
			},
		};

		let outcome = self.nodes[receiver].protocol.route_input(packet, header, DeviceId(0))?;
		if header.destination == route.gateway {
			return Ok(());
		}

		// Honest refusals leave the relay's score alone.
		let sabotaged = match outcome {
			DataOutcome::Accepted => false,
			DataOutcome::Sabotaged => true,
			DataOutcome::Refused => return Ok(()),
		};
		if let Some(trust) = &self.nodes[sender].trust {
			let now = self.clock.now();
			match trust.write() {
				Ok(mut manager) if sabotaged => manager.observe_drop(route.gateway, now),
				Ok(mut manager) => manager.observe_forward(route.gateway, now),
				Err(_) => warn!("Trust manager of {} is poisoned", from),
			}
		}
		Ok(())
	}

	fn index_of(&self, address: Ipv4Addr) -> Option<usize> {
		let [a, b, c, d] = address.octets();
		let index = usize::from(d).checked_sub(1)?;
		((a, b, c) == (10, 0, 0) && index < self.nodes.len()).then_some(index)
	}

	fn linked(&self, a: usize, b: usize) -> bool {
		self.links.contains(&(a.min(b), a.max(b)))
	}

	fn neighbours(&self, node: usize) -> Vec<usize> {
		self.links
			.iter()
			.filter_map(|&(a, b)| match node {
				n if n == a => Some(b),
				n if n == b => Some(a),
				_ => None,
			})
			.collect()
	}

	/// Engine of the `index`-th node.
	pub fn node(&self, index: usize) -> Option<&SimProtocol> {
		self.nodes.get(index).map(|n| &n.protocol)
	}

	/// Mutable engine of the `index`-th node.
	pub fn node_mut(&mut self, index: usize) -> Option<&mut SimProtocol> {
		self.nodes.get_mut(index).map(|n| &mut n.protocol)
	}

	/// Trust manager of the `index`-th node, when trust is enabled.
	pub fn trust_manager(&self, index: usize) -> Option<Arc<RwLock<ForwardingTrustManager>>> {
		self.nodes.get(index).and_then(|n| n.trust.clone())
	}

	/// Shared simulation clock.
	pub fn clock(&self) -> &VirtualClock {
		&self.clock
	}

	/// Counters of the run so far.
	pub fn report(&self) -> SimulationReport {
		let nodes: Vec<NodeReport> = self
			.nodes
			.iter()
			.enumerate()
			.map(|(i, node)| {
				let trust: Vec<(Ipv4Addr, TrustValue)> = node
					.trust
					.as_ref()
					.and_then(|t| t.read().ok())
					.map(|m| {
						m.trust_table()
							.iter()
							.map(|e| (e.neighbour_address(), e.trust_value()))
							.collect()
					})
					.unwrap_or_default();
				NodeReport {
					address: node_address(i),
					stats: node.protocol.stats(),
					delivered: node.protocol.ipv4().delivered().len(),
					trust,
				}
			})
			.collect();
		let delivered: u64 = nodes.iter().map(|n| n.delivered as u64).sum();

		SimulationReport { sent: self.sent, delivered, nodes }
	}
}
