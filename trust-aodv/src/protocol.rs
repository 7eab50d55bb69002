//! # Protocol Module.
//!
//! The trust-aware routing engine. It sits on top of a [`BaseProtocol`] and
//! intercepts inbound control traffic and data forwarding decisions:
//! route requests and data packets pass a selfish-drop gate, route replies go
//! through a trust veto before they may touch the routing table.

use crate::{
	config::ProtocolConfig,
	error::AodvError,
	net::{Clock, DeviceId, InterfaceAddress, Ipv4Stack, RandomSource},
	packet::{
		Ipv4Header, MessageType, Packet, RerrHeader, RreqHeader, RrepHeader, AODV_PORT,
	},
	route::{should_replace, Ipv4Route, RouteEntry, RouteFlag, RoutingTable},
	socket::{SocketId, SocketRegistry},
	trust::{is_trustworthy, TrustProvider},
};
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use std::{
	net::{Ipv4Addr, SocketAddrV4},
	sync::Arc,
	time::Duration,
};

/// Why a control packet was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
	/// Selfish node refused to handle someone else's route request.
	SelfishRequest,
	/// Selfish node refused to forward a route reply.
	SelfishReply,
	/// Sender or current next hop is not trustworthy.
	TrustVeto,
	/// Unrecognised message type.
	UnknownType,
	/// Message body failed to decode.
	Malformed,
	/// No usable route back to the discovery origin.
	NoReturnRoute,
	/// Time-to-live exhausted.
	TtlExceeded,
}

/// What happened to an inbound control packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
	/// Handed to the base protocol.
	Processed,
	/// Route reply treated as a hello.
	Hello,
	/// Route reply reached the discovery origin.
	ReplyConsumed,
	/// Route reply forwarded towards the origin.
	ReplyForwarded {
		/// Next hop the reply was sent to.
		next_hop: Ipv4Addr,
	},
	/// Dropped on purpose or because of bad input.
	Dropped(DropReason),
}

/// What happened to an inbound data packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataOutcome {
	/// Delivered locally or forwarded.
	Accepted,
	/// Not forwarded by an honest decision: no route, exhausted time-to-live
	/// or forwarding disabled on the interface.
	Refused,
	/// Withheld by selfish behaviour.
	Sabotaged,
}

/// Engine counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
	/// Packets handed to the base protocol.
	pub processed: u64,
	/// Replies forwarded towards an origin.
	pub replies_forwarded: u64,
	/// Replies that completed a local discovery.
	pub replies_consumed: u64,
	/// Hello messages.
	pub hellos: u64,
	/// Control packets dropped by selfish behaviour.
	pub selfish_drops: u64,
	/// Replies vetoed by trust.
	pub trust_vetoes: u64,
	/// Unknown or malformed packets.
	pub invalid: u64,
	/// Replies without a return route.
	pub no_route: u64,
	/// Replies with exhausted time-to-live.
	pub ttl_drops: u64,
	/// Data packets the node refused to forward.
	pub data_sabotaged: u64,
}

impl ProtocolStats {
	fn record(&mut self, outcome: &Outcome) {
		let counter = match outcome {
			Outcome::Processed => &mut self.processed,
			Outcome::Hello => &mut self.hellos,
			Outcome::ReplyConsumed => &mut self.replies_consumed,
			Outcome::ReplyForwarded { .. } => &mut self.replies_forwarded,
			Outcome::Dropped(DropReason::SelfishRequest | DropReason::SelfishReply) => {
				&mut self.selfish_drops
			},
			Outcome::Dropped(DropReason::TrustVeto) => &mut self.trust_vetoes,
			Outcome::Dropped(DropReason::UnknownType | DropReason::Malformed) => &mut self.invalid,
			Outcome::Dropped(DropReason::NoReturnRoute) => &mut self.no_route,
			Outcome::Dropped(DropReason::TtlExceeded) => &mut self.ttl_drops,
		};
		*counter += 1;
	}
}

/// State the base protocol works on, lent by the engine for one call.
pub struct BaseContext<'a> {
	/// Routing table.
	pub routing_table: &'a mut RoutingTable,
	/// Network layer.
	pub ipv4: &'a mut dyn Ipv4Stack,
	/// Registered sockets.
	pub sockets: &'a mut SocketRegistry,
	/// Active route timeout.
	pub active_route_timeout: Duration,
	/// Current time.
	pub now: Duration,
}

/// Override points of the underlying on-demand distance-vector protocol.
pub trait BaseProtocol {
	/// Handles a route request that passed the selfish gate.
	fn recv_request(
		&mut self, ctx: &mut BaseContext, rreq: RreqHeader, ttl: u8, receiver: InterfaceAddress,
		sender: Ipv4Addr,
	) -> Result<(), AodvError>;

	/// Handles a route error.
	fn recv_error(
		&mut self, ctx: &mut BaseContext, rerr: RerrHeader, sender: Ipv4Addr,
	) -> Result<(), AodvError>;

	/// Handles a route reply acknowledgement.
	fn recv_reply_ack(&mut self, ctx: &mut BaseContext, sender: Ipv4Addr);

	/// Handles a route reply whose destination equals its origin.
	fn process_hello(
		&mut self, ctx: &mut BaseContext, rrep: &RrepHeader, receiver: InterfaceAddress,
	) -> Result<(), AodvError>;

	/// Acknowledges a route reply.
	fn send_reply_ack(&mut self, ctx: &mut BaseContext, neighbour: Ipv4Addr)
		-> Result<(), AodvError>;

	/// Sends the packets queued for a destination along a freshly found route.
	fn send_packet_from_queue(
		&mut self, ctx: &mut BaseContext, destination: Ipv4Addr, route: Ipv4Route,
	);

	/// Stops the pending discovery of a destination.
	fn cancel_route_request(&mut self, destination: Ipv4Addr);

	/// Decides what to do with an inbound data packet. Returns true if the
	/// packet was delivered or forwarded.
	fn route_input(
		&mut self, ctx: &mut BaseContext, packet: Packet, header: Ipv4Header, interface: u32,
	) -> Result<bool, AodvError>;

	/// Sends a locally originated data packet, discovering a route if needed.
	fn send(
		&mut self, ctx: &mut BaseContext, packet: Packet, destination: Ipv4Addr,
	) -> Result<(), AodvError>;
}

/// Trust-aware routing engine.
pub struct RoutingProtocol<B: BaseProtocol, I: Ipv4Stack> {
	config: ProtocolConfig,
	base: B,
	ipv4: I,
	routing_table: RoutingTable,
	sockets: SocketRegistry,
	rng: Box<dyn RandomSource>,
	clock: Box<dyn Clock>,
	trust: Option<Arc<dyn TrustProvider>>,
	stats: ProtocolStats,
}

impl<B: BaseProtocol, I: Ipv4Stack> RoutingProtocol<B, I> {
	/// Creates an engine. The configuration is validated and the trust
	/// provider, if any, is fixed for the engine's lifetime.
	pub fn new(
		config: ProtocolConfig, base: B, ipv4: I, sockets: SocketRegistry,
		rng: Box<dyn RandomSource>, clock: Box<dyn Clock>, trust: Option<Arc<dyn TrustProvider>>,
	) -> Result<Self, AodvError> {
		config.validate()?;
		Ok(Self {
			config,
			base,
			ipv4,
			routing_table: RoutingTable::new(),
			sockets,
			rng,
			clock,
			trust,
			stats: ProtocolStats::default(),
		})
	}

	/// Reads one packet from a socket and handles it. Returns `None` when
	/// the socket had nothing to read.
	pub fn recv_aodv(&mut self, socket: SocketId) -> Result<Option<Outcome>, AodvError> {
		let receiver = self.sockets.receiver_address(socket).ok_or_else(|| {
			error!("Received a packet from an unknown socket {:?}", socket);
			AodvError::ConsistencyError(format!("Socket {:?} is not registered", socket))
		})?;
		let (packet, sender) = match self.sockets.recv_from(socket)? {
			Some(datagram) => datagram,
			None => return Ok(None),
		};
		let sender = *sender.ip();
		debug!("{} received an AODV packet from {}", receiver.local, sender);

		self.update_route_to_neighbor(sender, receiver)?;
		let outcome = self.dispatch(packet, receiver, sender)?;
		self.stats.record(&outcome);

		Ok(Some(outcome))
	}

	fn dispatch(
		&mut self, packet: Packet, receiver: InterfaceAddress, sender: Ipv4Addr,
	) -> Result<Outcome, AodvError> {
		let (kind, body) = match packet.split_type() {
			Some(split) => split,
			None => {
				debug!("Empty AODV packet from {}. Drop", sender);
				return Ok(Outcome::Dropped(DropReason::Malformed));
			},
		};
		let kind = match MessageType::try_from(kind) {
			Ok(kind) => kind,
			Err(e) => {
				debug!("AODV message from {} with unknown type: {}. Drop", sender, e);
				return Ok(Outcome::Dropped(DropReason::UnknownType));
			},
		};

		match kind {
			MessageType::RouteRequest => self.handle_request(body, receiver, sender),
			MessageType::RouteReply => self.trust_recv_reply(body, receiver, sender),
			MessageType::RouteError => {
				let rerr = match RerrHeader::decode(body.payload()) {
					Ok(rerr) => rerr,
					Err(e) => return Ok(malformed(e)),
				};
				let (base, mut ctx) = self.split();
				base.recv_error(&mut ctx, rerr, sender)?;
				Ok(Outcome::Processed)
			},
			MessageType::RouteReplyAck => {
				let (base, mut ctx) = self.split();
				base.recv_reply_ack(&mut ctx, sender);
				Ok(Outcome::Processed)
			},
		}
	}

	fn handle_request(
		&mut self, body: Packet, receiver: InterfaceAddress, sender: Ipv4Addr,
	) -> Result<Outcome, AodvError> {
		let rreq = match RreqHeader::decode(body.payload()) {
			Ok(rreq) => rreq,
			Err(e) => return Ok(malformed(e)),
		};

		if !self.is_my_own_address(rreq.destination) {
			let p = self.config.rreq_drop_probability;
			let draw = self.rng.uniform(0.0, 100.0);
			if p > 0.0 && draw <= p {
				debug!("Selfish behaviour, dropping a RREQ");
				return Ok(Outcome::Dropped(DropReason::SelfishRequest));
			}
		}

		let ttl = body.ttl();
		let (base, mut ctx) = self.split();
		base.recv_request(&mut ctx, rreq, ttl, receiver, sender)?;
		Ok(Outcome::Processed)
	}

	fn trust_recv_reply(
		&mut self, body: Packet, receiver: InterfaceAddress, sender: Ipv4Addr,
	) -> Result<Outcome, AodvError> {
		trace!("trust_recv_reply from {}", sender);
		let mut rrep = match RrepHeader::decode(body.payload()) {
			Ok(rrep) => rrep,
			Err(e) => return Ok(malformed(e)),
		};
		let dst = rrep.destination;
		debug!("RREP destination {} RREP origin {}", dst, rrep.origin);

		rrep.hop_count = rrep.hop_count.saturating_add(1);

		if dst == rrep.origin {
			let (base, mut ctx) = self.split();
			base.process_hello(&mut ctx, &rrep, receiver)?;
			return Ok(Outcome::Hello);
		}

		let now = self.clock.now();
		let interface = self.interface_index(receiver.local)?;
		let local = self.ipv4.address(interface, 0).ok_or_else(|| {
			AodvError::ConsistencyError(format!("Interface {} has no address", interface))
		})?;
		let mut candidate = RouteEntry {
			hop_count: rrep.hop_count,
			seq_no: rrep.dst_seqno,
			valid_seq_no: true,
			..RouteEntry::new(dst, sender, interface, local, now)
		};
		candidate.set_lifetime(Duration::from_millis(u64::from(rrep.lifetime_ms)), now);

		let existing = self.routing_table.lookup_route(dst).cloned();
		match &existing {
			Some(to_dst) => {
				if self.vetoed(sender, "sender") || self.vetoed(to_dst.next_hop, "next hop") {
					return Ok(Outcome::Dropped(DropReason::TrustVeto));
				}
				if should_replace(to_dst, &candidate) {
					self.routing_table.update(candidate.clone());
				}
			},
			None => {
				debug!("Add new route to {}", dst);
				self.routing_table.add_route(candidate.clone());
			},
		}

		if rrep.ack_required {
			let (base, mut ctx) = self.split();
			base.send_reply_ack(&mut ctx, sender)?;
			rrep.ack_required = false;
		}

		if self.is_my_own_address(rrep.origin) {
			if existing.map_or(false, |e| e.flag == RouteFlag::InSearch) {
				self.routing_table.update(candidate);
				self.base.cancel_route_request(dst);
			}
			if let Some(route) = self.routing_table.lookup_route(dst).map(RouteEntry::route) {
				let (base, mut ctx) = self.split();
				base.send_packet_from_queue(&mut ctx, dst, route);
			}
			return Ok(Outcome::ReplyConsumed);
		}

		if self.rng.uniform(0.0, 100.0) < self.config.rrep_drop_probability {
			debug!("Selfish behaviour, dropping a RREP");
			return Ok(Outcome::Dropped(DropReason::SelfishReply));
		}

		let mut to_origin = match self.routing_table.lookup_route(rrep.origin) {
			Some(route) if route.flag != RouteFlag::InSearch => route.clone(),
			_ => {
				warn!("No route back to RREP origin {}. Drop", rrep.origin);
				return Ok(Outcome::Dropped(DropReason::NoReturnRoute));
			},
		};
		let lifetime = self.config.active_route_timeout().max(to_origin.lifetime(now));
		to_origin.set_lifetime(lifetime, now);
		self.routing_table.update(to_origin.clone());

		if let Some(dst_next_hop) = self.routing_table.lookup_valid_route(dst).map(|r| r.next_hop) {
			let origin_next_hop = to_origin.next_hop;
			for (route, precursor) in [
				(dst, origin_next_hop),
				(dst_next_hop, origin_next_hop),
				(rrep.origin, dst_next_hop),
				(origin_next_hop, dst_next_hop),
			] {
				if let Some(entry) = self.routing_table.lookup_route_mut(route) {
					entry.insert_precursor(precursor);
				}
			}
		}

		let ttl = body.ttl();
		if ttl < 2 {
			debug!("TTL exceeded. Drop RREP destination {} origin {}", dst, rrep.origin);
			return Ok(Outcome::Dropped(DropReason::TtlExceeded));
		}

		let socket = self.sockets.find_socket_with_interface_address(to_origin.local).ok_or_else(
			|| {
				error!("No socket bound to {}", to_origin.local.local);
				AodvError::ConsistencyError(format!("No socket for {}", to_origin.local.local))
			},
		)?;
		let packet = Packet::control(MessageType::RouteReply, &rrep.encode(), ttl - 1);
		self.sockets.send_to(socket, packet, SocketAddrV4::new(to_origin.next_hop, AODV_PORT))?;

		Ok(Outcome::ReplyForwarded { next_hop: to_origin.next_hop })
	}

	/// Data-plane entry point. A selfish draw switches forwarding off on the
	/// receiving interface for this one decision.
	pub fn route_input(
		&mut self, packet: Packet, header: Ipv4Header, device: DeviceId,
	) -> Result<DataOutcome, AodvError> {
		let interface = self.ipv4.interface_for_device(device).ok_or_else(|| {
			error!("Data packet arrived on unknown device {:?}", device);
			AodvError::ConsistencyError(format!("Device {:?} has no interface", device))
		})?;
		let forwarding = self.ipv4.is_forwarding(interface);

		let selfish = self.rng.uniform(0.0, 100.0) < self.config.data_drop_probability;
		if selfish {
			self.ipv4.set_forwarding(interface, false);
		}

		let destination = header.destination;
		let (base, mut ctx) = self.split();
		let result = base.route_input(&mut ctx, packet, header, interface);
		self.ipv4.set_forwarding(interface, forwarding);

		if result? {
			return Ok(DataOutcome::Accepted);
		}
		// Only a forward the cleared flag actually blocked counts as sabotage.
		if selfish && forwarding && !self.is_my_own_address(destination) {
			debug!("Selfish behaviour, dropping a DATA packet");
			self.stats.data_sabotaged += 1;
			return Ok(DataOutcome::Sabotaged);
		}
		Ok(DataOutcome::Refused)
	}

	/// Sends a locally originated data packet.
	pub fn send(&mut self, packet: Packet, destination: Ipv4Addr) -> Result<(), AodvError> {
		let (base, mut ctx) = self.split();
		base.send(&mut ctx, packet, destination)
	}

	/// Whether the address belongs to this node.
	pub fn is_my_own_address(&self, address: Ipv4Addr) -> bool {
		self.sockets.is_my_own_address(address)
	}

	/// Keeps a fresh one-hop route to the neighbour a packet came from.
	fn update_route_to_neighbor(
		&mut self, sender: Ipv4Addr, receiver: InterfaceAddress,
	) -> Result<(), AodvError> {
		let interface = self.interface_index(receiver.local)?;
		let timeout = self.config.active_route_timeout();
		let now = self.clock.now();

		match self.routing_table.lookup_route_mut(sender) {
			Some(route)
				if route.hop_count == 1
					&& route.next_hop == sender
					&& route.interface == interface
					&& route.flag == RouteFlag::Valid =>
			{
				let lifetime = timeout.max(route.lifetime(now));
				route.set_lifetime(lifetime, now);
			},
			Some(route) => {
				let mut fresh = RouteEntry {
					seq_no: route.seq_no,
					..RouteEntry::new(sender, sender, interface, receiver, now)
				};
				fresh.set_lifetime(timeout.max(route.lifetime(now)), now);
				*route = fresh;
			},
			None => {
				let mut fresh = RouteEntry::new(sender, sender, interface, receiver, now);
				fresh.set_lifetime(timeout, now);
				self.routing_table.add_route(fresh);
			},
		}

		Ok(())
	}

	/// Logs and returns true if the neighbour's trust is below the threshold.
	/// No provider or no entry means no veto.
	fn vetoed(&self, neighbour: Ipv4Addr, role: &str) -> bool {
		let entry = match self.trust.as_ref().and_then(|t| t.lookup_trust(neighbour)) {
			Some(entry) => entry,
			None => return false,
		};
		if is_trustworthy(entry.trust_value()) {
			return false;
		}

		info!(
			"Drop RREP because {} ({}) is not trustworthy: {:.3}",
			role,
			neighbour,
			entry.trust_value()
		);
		true
	}

	fn interface_index(&self, address: Ipv4Addr) -> Result<u32, AodvError> {
		self.ipv4.interface_for_address(address).ok_or_else(|| {
			error!("Address {} maps to no interface", address);
			AodvError::ConsistencyError(format!("No interface for {}", address))
		})
	}

	fn split(&mut self) -> (&mut B, BaseContext<'_>) {
		let now = self.clock.now();
		let ctx = BaseContext {
			routing_table: &mut self.routing_table,
			ipv4: &mut self.ipv4,
			sockets: &mut self.sockets,
			active_route_timeout: self.config.active_route_timeout(),
			now,
		};
		(&mut self.base, ctx)
	}

	/// Sets the route request drop probability.
	pub fn set_rreq_drop_probability(&mut self, probability: f64) -> Result<(), AodvError> {
		self.config.set_rreq_drop_probability(probability)
	}

	/// Sets the route reply drop probability.
	pub fn set_rrep_drop_probability(&mut self, probability: f64) -> Result<(), AodvError> {
		self.config.set_rrep_drop_probability(probability)
	}

	/// Sets the data drop probability.
	pub fn set_data_drop_probability(&mut self, probability: f64) -> Result<(), AodvError> {
		self.config.set_data_drop_probability(probability)
	}

	/// Current configuration.
	pub fn config(&self) -> &ProtocolConfig {
		&self.config
	}

	/// Engine counters.
	pub fn stats(&self) -> ProtocolStats {
		self.stats
	}

	/// The routing table.
	pub fn routing_table(&self) -> &RoutingTable {
		&self.routing_table
	}

	/// Mutable routing table.
	pub fn routing_table_mut(&mut self) -> &mut RoutingTable {
		&mut self.routing_table
	}

	/// The network layer.
	pub fn ipv4(&self) -> &I {
		&self.ipv4
	}

	/// Mutable network layer.
	pub fn ipv4_mut(&mut self) -> &mut I {
		&mut self.ipv4
	}

	/// The base protocol.
	pub fn base(&self) -> &B {
		&self.base
	}
}

fn malformed(e: AodvError) -> Outcome {
	debug!("Malformed AODV message: {}. Drop", e);
	Outcome::Dropped(DropReason::Malformed)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		net::VirtualClock,
		socket::tests::QueueSocket,
		trust::{TrustEntry, TrustTable},
	};
	use std::collections::VecDeque;

	const OWN: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
	const SENDER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);
	const NEXT_HOP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 4);
	const TOWARDS_ORIGIN: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
	const ORIGIN: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 10);
	const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 20);

	struct FixedDraws(VecDeque<f64>);

	impl RandomSource for FixedDraws {
		fn uniform(&mut self, _min: f64, _max: f64) -> f64 {
			self.0.pop_front().unwrap_or(50.0)
		}
	}

	#[derive(Default)]
	struct TestIpv4 {
		forwarding: bool,
		detached: bool,
		forwarded: Vec<(Ipv4Route, Packet)>,
		delivered: Vec<Packet>,
	}

	impl Ipv4Stack for TestIpv4 {
		fn interface_for_device(&self, device: DeviceId) -> Option<u32> {
			(device == DeviceId(0)).then_some(0)
		}

		fn interface_for_address(&self, address: Ipv4Addr) -> Option<u32> {
			(address == OWN && !self.detached).then_some(0)
		}

		fn address(&self, interface: u32, index: u32) -> Option<InterfaceAddress> {
			(interface == 0 && index == 0).then(|| InterfaceAddress::new(OWN, 24))
		}

		fn is_forwarding(&self, _interface: u32) -> bool {
			self.forwarding
		}

		fn set_forwarding(&mut self, _interface: u32, forwarding: bool) {
			self.forwarding = forwarding;
		}

		fn unicast_forward(&mut self, route: &Ipv4Route, packet: Packet, _header: Ipv4Header) {
			self.forwarded.push((*route, packet));
		}

		fn local_deliver(&mut self, packet: Packet, _header: Ipv4Header, _interface: u32) {
			self.delivered.push(packet);
		}
	}

	#[derive(Debug, PartialEq)]
	enum Call {
		Request(Ipv4Addr),
		Error(Ipv4Addr),
		ReplyAck(Ipv4Addr),
		Hello(Ipv4Addr, u8),
		SendReplyAck(Ipv4Addr),
		FlushQueue(Ipv4Addr, Ipv4Addr),
		Cancel(Ipv4Addr),
		RouteInput(bool),
	}

	#[derive(Default)]
	struct RecordingBase {
		calls: Vec<Call>,
	}

	impl BaseProtocol for RecordingBase {
		fn recv_request(
			&mut self, _ctx: &mut BaseContext, rreq: RreqHeader, _ttl: u8,
			_receiver: InterfaceAddress, _sender: Ipv4Addr,
		) -> Result<(), AodvError> {
			self.calls.push(Call::Request(rreq.destination));
			Ok(())
		}

		fn recv_error(
			&mut self, _ctx: &mut BaseContext, _rerr: RerrHeader, sender: Ipv4Addr,
		) -> Result<(), AodvError> {
			self.calls.push(Call::Error(sender));
			Ok(())
		}

		fn recv_reply_ack(&mut self, _ctx: &mut BaseContext, sender: Ipv4Addr) {
			self.calls.push(Call::ReplyAck(sender));
		}

		fn process_hello(
			&mut self, _ctx: &mut BaseContext, rrep: &RrepHeader, _receiver: InterfaceAddress,
		) -> Result<(), AodvError> {
			self.calls.push(Call::Hello(rrep.destination, rrep.hop_count));
			Ok(())
		}

		fn send_reply_ack(
			&mut self, _ctx: &mut BaseContext, neighbour: Ipv4Addr,
		) -> Result<(), AodvError> {
			self.calls.push(Call::SendReplyAck(neighbour));
			Ok(())
		}

		fn send_packet_from_queue(
			&mut self, _ctx: &mut BaseContext, destination: Ipv4Addr, route: Ipv4Route,
		) {
			self.calls.push(Call::FlushQueue(destination, route.gateway));
		}

		fn cancel_route_request(&mut self, destination: Ipv4Addr) {
			self.calls.push(Call::Cancel(destination));
		}

		fn route_input(
			&mut self, ctx: &mut BaseContext, packet: Packet, header: Ipv4Header, interface: u32,
		) -> Result<bool, AodvError> {
			let forwarding = ctx.ipv4.is_forwarding(interface);
			self.calls.push(Call::RouteInput(forwarding));
			if ctx.sockets.is_my_own_address(header.destination) {
				ctx.ipv4.local_deliver(packet, header, interface);
				return Ok(true);
			}
			Ok(forwarding)
		}

		fn send(
			&mut self, _ctx: &mut BaseContext, _packet: Packet, _destination: Ipv4Addr,
		) -> Result<(), AodvError> {
			Ok(())
		}
	}

	struct Harness {
		engine: RoutingProtocol<RecordingBase, TestIpv4>,
		socket: QueueSocket,
		id: SocketId,
		clock: VirtualClock,
	}

	impl Harness {
		fn new(config: ProtocolConfig, draws: &[f64], trust: Option<Arc<dyn TrustProvider>>) -> Self {
			let socket = QueueSocket::default();
			let mut sockets = SocketRegistry::new();
			let iface = InterfaceAddress::new(OWN, 24);
			let id = sockets.register_unicast(Box::new(socket.clone()), iface);
			sockets.register_subnet_broadcast(Box::new(QueueSocket::default()), iface);

			let clock = VirtualClock::new();
			let ipv4 = TestIpv4 { forwarding: true, ..Default::default() };
			let engine = RoutingProtocol::new(
				config,
				RecordingBase::default(),
				ipv4,
				sockets,
				Box::new(FixedDraws(draws.iter().copied().collect())),
				Box::new(clock.clone()),
				trust,
			)
			.unwrap();

			Self { engine, socket, id, clock }
		}

		fn receive(&mut self, from: Ipv4Addr, packet: Packet) -> Outcome {
			self.socket.inbox.borrow_mut().push_back((packet, SocketAddrV4::new(from, AODV_PORT)));
			self.engine.recv_aodv(self.id).unwrap().unwrap()
		}

		fn install(&mut self, destination: Ipv4Addr, next_hop: Ipv4Addr, hops: u8, seq_no: u32) {
			let mut route = RouteEntry {
				hop_count: hops,
				seq_no,
				valid_seq_no: true,
				..RouteEntry::new(
					destination,
					next_hop,
					0,
					InterfaceAddress::new(OWN, 24),
					self.clock.now(),
				)
			};
			route.set_lifetime(Duration::from_secs(1), self.clock.now());
			self.engine.routing_table_mut().add_route(route);
		}

		fn sent(&self) -> Vec<(Packet, SocketAddrV4)> {
			self.socket.outbox.borrow().clone()
		}
	}

	fn rrep(destination: Ipv4Addr, origin: Ipv4Addr, hops: u8, seq_no: u32, ttl: u8) -> Packet {
		let header = RrepHeader {
			repair: false,
			ack_required: false,
			prefix_size: 0,
			hop_count: hops,
			destination,
			dst_seqno: seq_no,
			origin,
			lifetime_ms: 3000,
		};
		Packet::control(MessageType::RouteReply, &header.encode(), ttl)
	}

	fn rreq(destination: Ipv4Addr) -> Packet {
		let header = RreqHeader {
			join: false,
			repair: false,
			gratuitous: false,
			destination_only: true,
			unknown_seqno: true,
			hop_count: 1,
			request_id: 1,
			destination,
			dst_seqno: 0,
			origin: ORIGIN,
			origin_seqno: 1,
		};
		Packet::control(MessageType::RouteRequest, &header.encode(), 10)
	}

	fn data_header() -> Ipv4Header {
		Ipv4Header { source: ORIGIN, destination: DST, ttl: 10 }
	}

	#[test]
	fn test_reply_is_forwarded_towards_origin() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		h.install(ORIGIN, TOWARDS_ORIGIN, 2, 1);
		h.install(TOWARDS_ORIGIN, TOWARDS_ORIGIN, 1, 0);

		let outcome = h.receive(SENDER, rrep(DST, ORIGIN, 2, 5, 5));
		assert_eq!(outcome, Outcome::ReplyForwarded { next_hop: TOWARDS_ORIGIN });

		let table = h.engine.routing_table();
		let to_dst = table.lookup_valid_route(DST).unwrap();
		assert_eq!(to_dst.next_hop, SENDER);
		assert_eq!(to_dst.hop_count, 3);
		assert_eq!(to_dst.seq_no, 5);
		assert!(to_dst.valid_seq_no);

		let sent = h.sent();
		assert_eq!(sent.len(), 1);
		let (packet, destination) = &sent[0];
		assert_eq!(*destination, SocketAddrV4::new(TOWARDS_ORIGIN, AODV_PORT));
		assert_eq!(packet.ttl(), 4);
		let (kind, body) = packet.split_type().unwrap();
		assert_eq!(kind, MessageType::RouteReply as u8);
		assert_eq!(RrepHeader::decode(body.payload()).unwrap().hop_count, 3);

		// Precursors on both sides of the path
		assert!(to_dst.precursors.contains(&TOWARDS_ORIGIN));
		assert!(table.lookup_route(SENDER).unwrap().precursors.contains(&TOWARDS_ORIGIN));
		let to_origin = table.lookup_route(ORIGIN).unwrap();
		assert!(to_origin.precursors.contains(&SENDER));
		assert!(table.lookup_route(TOWARDS_ORIGIN).unwrap().precursors.contains(&SENDER));
		assert_eq!(to_origin.lifetime(h.clock.now()), Duration::from_millis(3000));

		assert_eq!(h.engine.stats().replies_forwarded, 1);
	}

	#[test]
	fn test_untrusted_sender_vetoes_reply() {
		let mut table = TrustTable::new();
		table.update_record(TrustEntry::new(SENDER, 0.3, Duration::ZERO));
		table.update_record(TrustEntry::new(NEXT_HOP, 0.9, Duration::ZERO));
		let mut h = Harness::new(ProtocolConfig::honest(), &[], Some(Arc::new(table)));
		h.install(ORIGIN, TOWARDS_ORIGIN, 2, 1);
		h.install(DST, NEXT_HOP, 5, 1);
		let before = h.engine.routing_table().lookup_route(DST).cloned();

		let outcome = h.receive(SENDER, rrep(DST, ORIGIN, 1, 9, 5));
		assert_eq!(outcome, Outcome::Dropped(DropReason::TrustVeto));
		assert_eq!(h.engine.routing_table().lookup_route(DST).cloned(), before);
		assert!(h.sent().is_empty());
		assert_eq!(h.engine.stats().trust_vetoes, 1);
	}

	#[test]
	fn test_untrusted_next_hop_vetoes_reply() {
		let mut table = TrustTable::new();
		table.update_record(TrustEntry::new(SENDER, 0.9, Duration::ZERO));
		table.update_record(TrustEntry::new(NEXT_HOP, 0.1, Duration::ZERO));
		let mut h = Harness::new(ProtocolConfig::honest(), &[], Some(Arc::new(table)));
		h.install(ORIGIN, TOWARDS_ORIGIN, 2, 1);
		h.install(DST, NEXT_HOP, 5, 1);

		let outcome = h.receive(SENDER, rrep(DST, ORIGIN, 1, 9, 5));
		assert_eq!(outcome, Outcome::Dropped(DropReason::TrustVeto));
		assert_eq!(h.engine.routing_table().lookup_route(DST).unwrap().next_hop, NEXT_HOP);
	}

	#[test]
	fn test_unknown_trust_does_not_veto() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], Some(Arc::new(TrustTable::new())));
		h.install(ORIGIN, TOWARDS_ORIGIN, 2, 1);
		h.install(DST, NEXT_HOP, 5, 1);

		let outcome = h.receive(SENDER, rrep(DST, ORIGIN, 1, 9, 5));
		assert_eq!(outcome, Outcome::ReplyForwarded { next_hop: TOWARDS_ORIGIN });
		assert_eq!(h.engine.routing_table().lookup_route(DST).unwrap().next_hop, SENDER);
	}

	#[test]
	fn test_selfish_requests_are_dropped() {
		let mut config = ProtocolConfig::honest();
		config.rreq_drop_probability = 100.0;
		let mut h = Harness::new(config, &[0.0, 50.0, 99.9], None);

		for _ in 0..3 {
			let outcome = h.receive(SENDER, rreq(DST));
			assert_eq!(outcome, Outcome::Dropped(DropReason::SelfishRequest));
		}
		assert!(h.engine.base().calls.is_empty());

		// Requests for this node are always answered
		assert_eq!(h.receive(SENDER, rreq(OWN)), Outcome::Processed);
		assert_eq!(h.engine.base().calls, vec![Call::Request(OWN)]);
		assert_eq!(h.engine.stats().selfish_drops, 3);
	}

	#[test]
	fn test_honest_requests_are_processed() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[0.0, 50.0, 99.9], None);

		for _ in 0..3 {
			assert_eq!(h.receive(SENDER, rreq(DST)), Outcome::Processed);
		}
		assert_eq!(h.engine.base().calls.len(), 3);
	}

	#[test]
	fn test_selfish_reply_is_dropped_after_route_update() {
		let mut config = ProtocolConfig::honest();
		config.rrep_drop_probability = 100.0;
		let mut h = Harness::new(config, &[], None);
		h.install(ORIGIN, TOWARDS_ORIGIN, 2, 1);

		let outcome = h.receive(SENDER, rrep(DST, ORIGIN, 2, 5, 5));
		assert_eq!(outcome, Outcome::Dropped(DropReason::SelfishReply));
		assert!(h.engine.routing_table().lookup_valid_route(DST).is_some());
		assert!(h.sent().is_empty());
	}

	#[test]
	fn test_hello_is_handed_to_base() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);

		let outcome = h.receive(SENDER, rrep(SENDER, SENDER, 0, 3, 1));
		assert_eq!(outcome, Outcome::Hello);
		assert_eq!(h.engine.base().calls, vec![Call::Hello(SENDER, 1)]);
		assert_eq!(h.engine.stats().hellos, 1);
	}

	#[test]
	fn test_reply_completes_own_discovery() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		let pending = RouteEntry {
			flag: RouteFlag::InSearch,
			..RouteEntry::new(DST, DST, 0, InterfaceAddress::new(OWN, 24), Duration::ZERO)
		};
		h.engine.routing_table_mut().add_route(pending);

		let outcome = h.receive(SENDER, rrep(DST, OWN, 1, 4, 5));
		assert_eq!(outcome, Outcome::ReplyConsumed);

		let route = h.engine.routing_table().lookup_valid_route(DST).unwrap();
		assert_eq!(route.next_hop, SENDER);
		assert_eq!(route.hop_count, 2);
		assert_eq!(
			h.engine.base().calls,
			vec![Call::Cancel(DST), Call::FlushQueue(DST, SENDER)]
		);
		assert!(h.sent().is_empty());
	}

	#[test]
	fn test_ack_is_sent_and_cleared() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		h.install(ORIGIN, TOWARDS_ORIGIN, 2, 1);
		let header = RrepHeader {
			repair: false,
			ack_required: true,
			prefix_size: 0,
			hop_count: 0,
			destination: DST,
			dst_seqno: 2,
			origin: ORIGIN,
			lifetime_ms: 1000,
		};

		let outcome = h.receive(SENDER, Packet::control(MessageType::RouteReply, &header.encode(), 3));
		assert_eq!(outcome, Outcome::ReplyForwarded { next_hop: TOWARDS_ORIGIN });
		assert_eq!(h.engine.base().calls, vec![Call::SendReplyAck(SENDER)]);

		let (_, body) = h.sent()[0].0.split_type().unwrap();
		assert!(!RrepHeader::decode(body.payload()).unwrap().ack_required);
	}

	#[test]
	fn test_reply_dropped_without_return_route_or_ttl() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		let outcome = h.receive(SENDER, rrep(DST, ORIGIN, 2, 5, 5));
		assert_eq!(outcome, Outcome::Dropped(DropReason::NoReturnRoute));

		h.install(ORIGIN, TOWARDS_ORIGIN, 2, 1);
		let outcome = h.receive(SENDER, rrep(DST, ORIGIN, 2, 6, 1));
		assert_eq!(outcome, Outcome::Dropped(DropReason::TtlExceeded));
		assert!(h.sent().is_empty());

		let stats = h.engine.stats();
		assert_eq!((stats.no_route, stats.ttl_drops), (1, 1));
	}

	#[test]
	fn test_invalid_packets_are_dropped() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);

		assert_eq!(
			h.receive(SENDER, Packet::new(vec![9, 0, 0], 1)),
			Outcome::Dropped(DropReason::UnknownType)
		);
		assert_eq!(h.receive(SENDER, Packet::new(vec![], 1)), Outcome::Dropped(DropReason::Malformed));
		assert_eq!(
			h.receive(SENDER, Packet::new(vec![2, 0, 0], 1)),
			Outcome::Dropped(DropReason::Malformed)
		);
		assert_eq!(h.engine.stats().invalid, 3);
		// The neighbour route is refreshed even for dropped packets
		assert!(h.engine.routing_table().lookup_valid_route(SENDER).is_some());
	}

	#[test]
	fn test_error_and_ack_are_processed() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		let rerr = RerrHeader { no_delete: false, unreachable: vec![(DST, 3)] };

		assert_eq!(
			h.receive(SENDER, Packet::control(MessageType::RouteError, &rerr.encode(), 1)),
			Outcome::Processed
		);
		assert_eq!(
			h.receive(SENDER, Packet::control(MessageType::RouteReplyAck, &[0], 1)),
			Outcome::Processed
		);
		assert_eq!(h.engine.base().calls, vec![Call::Error(SENDER), Call::ReplyAck(SENDER)]);
	}

	#[test]
	fn test_unknown_socket_is_fatal() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		assert!(matches!(h.engine.recv_aodv(SocketId(99)), Err(AodvError::ConsistencyError(_))));
		assert!(h.engine.recv_aodv(h.id).unwrap().is_none());
	}

	#[test]
	fn test_selfish_data_restores_forwarding() {
		let mut config = ProtocolConfig::honest();
		config.data_drop_probability = 100.0;
		let mut h = Harness::new(config, &[99.9], None);

		let outcome = h.engine.route_input(Packet::new(vec![1], 10), data_header(), DeviceId(0));
		assert_eq!(outcome.unwrap(), DataOutcome::Sabotaged);
		assert!(h.engine.ipv4().is_forwarding(0));
		assert_eq!(h.engine.base().calls, vec![Call::RouteInput(false)]);
		assert_eq!(h.engine.stats().data_sabotaged, 1);

		h.engine.set_data_drop_probability(0.0).unwrap();
		let outcome = h.engine.route_input(Packet::new(vec![1], 10), data_header(), DeviceId(0));
		assert_eq!(outcome.unwrap(), DataOutcome::Accepted);
		assert!(h.engine.set_data_drop_probability(120.0).is_err());
	}

	#[test]
	fn test_selfish_node_still_accepts_own_data() {
		let mut config = ProtocolConfig::honest();
		config.data_drop_probability = 100.0;
		let mut h = Harness::new(config, &[0.0], None);
		let header = Ipv4Header { source: ORIGIN, destination: OWN, ttl: 10 };

		let outcome = h.engine.route_input(Packet::new(vec![5], 10), header, DeviceId(0));
		assert_eq!(outcome.unwrap(), DataOutcome::Accepted);
		assert_eq!(h.engine.ipv4().delivered.len(), 1);
		assert_eq!(h.engine.stats().data_sabotaged, 0);
		assert!(h.engine.ipv4().is_forwarding(0));
	}

	#[test]
	fn test_disabled_forwarding_is_kept() {
		let mut config = ProtocolConfig::honest();
		config.data_drop_probability = 100.0;
		let mut h = Harness::new(config, &[], None);
		h.engine.ipv4_mut().set_forwarding(0, false);

		// Forwarding was already off, so the selfish draw blocked nothing
		let outcome = h.engine.route_input(Packet::new(vec![1], 10), data_header(), DeviceId(0));
		assert_eq!(outcome.unwrap(), DataOutcome::Refused);
		assert_eq!(h.engine.stats().data_sabotaged, 0);
		assert!(!h.engine.ipv4().is_forwarding(0));
		assert!(matches!(
			h.engine.route_input(Packet::new(vec![1], 10), data_header(), DeviceId(7)),
			Err(AodvError::ConsistencyError(_))
		));
	}

	#[test]
	fn test_receiver_without_interface_is_fatal() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		h.engine.ipv4_mut().detached = true;
		h.socket.inbox.borrow_mut().push_back((rreq(DST), SocketAddrV4::new(SENDER, AODV_PORT)));

		assert!(matches!(h.engine.recv_aodv(h.id), Err(AodvError::ConsistencyError(_))));
		assert!(h.engine.base().calls.is_empty());
	}

	#[test]
	fn test_return_route_without_socket_is_fatal() {
		let mut h = Harness::new(ProtocolConfig::honest(), &[], None);
		let elsewhere = InterfaceAddress::new(Ipv4Addr::new(10, 0, 1, 2), 24);
		let mut to_origin = RouteEntry {
			hop_count: 2,
			seq_no: 1,
			valid_seq_no: true,
			..RouteEntry::new(ORIGIN, TOWARDS_ORIGIN, 0, elsewhere, Duration::ZERO)
		};
		to_origin.set_lifetime(Duration::from_secs(1), Duration::ZERO);
		h.engine.routing_table_mut().add_route(to_origin);

		let reply = rrep(DST, ORIGIN, 1, 5, 10);
		h.socket.inbox.borrow_mut().push_back((reply, SocketAddrV4::new(SENDER, AODV_PORT)));

		assert!(matches!(h.engine.recv_aodv(h.id), Err(AodvError::ConsistencyError(_))));
		assert!(h.sent().is_empty());
	}
}
