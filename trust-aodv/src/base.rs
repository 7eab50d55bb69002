//! # Base Module.
//!
//! `BasicAodv`, a small on-demand distance-vector base the trust-aware engine
//! can run on. It covers what a simulation needs: route discovery answered by
//! the destination only, reverse routes, route errors, hellos, reply
//! acknowledgements and a packet queue per destination. A discovery left
//! unanswered for a network traversal time is restarted by the next packet
//! for that destination. Expanding ring search and local repair are left out.

use crate::{
	error::AodvError,
	net::InterfaceAddress,
	packet::{
		Ipv4Header, MessageType, Packet, RerrHeader, RreqHeader, RrepHeader, AODV_PORT,
	},
	protocol::{BaseContext, BaseProtocol},
	route::{seq_newer, should_replace, Ipv4Route, RouteEntry, RouteFlag},
};
use log::{debug, trace, warn};
use std::{
	collections::{BTreeMap, HashMap, HashSet, VecDeque},
	net::{Ipv4Addr, SocketAddrV4},
	time::Duration,
};

/// Network diameter in hops.
pub const NET_DIAMETER: u8 = 35;
/// Conservative estimate of the per-hop traversal time, in milliseconds.
pub const NODE_TRAVERSAL_TIME_MS: u64 = 40;
/// Lifetime advertised in replies for this node's own routes, in milliseconds.
pub const MY_ROUTE_TIMEOUT_MS: u32 = 6000;
/// Hello interval in milliseconds.
pub const HELLO_INTERVAL_MS: u64 = 1000;
/// Hellos that may be missed before a neighbour is considered gone.
pub const ALLOWED_HELLO_LOSS: u64 = 2;
/// Time-to-live of originated data packets.
pub const DEFAULT_TTL: u8 = 64;
/// Packets buffered per destination while a discovery is pending.
pub const MAX_QUEUE_LEN: usize = 64;

/// Time a route discovery may stay unanswered before it is started again.
pub fn net_traversal_time() -> Duration {
	Duration::from_millis(2 * NODE_TRAVERSAL_TIME_MS * u64::from(NET_DIAMETER))
}

/// Minimal AODV base protocol.
#[derive(Debug, Default)]
pub struct BasicAodv {
	seq_no: u32,
	request_id: u32,
	/// Requests already handled, by (origin, request id).
	seen_requests: HashSet<(Ipv4Addr, u32)>,
	/// Destinations being searched and when the last request went out.
	pending: BTreeMap<Ipv4Addr, Duration>,
	queue: HashMap<Ipv4Addr, VecDeque<(Packet, Ipv4Header)>>,
	acks_received: u64,
}

impl BasicAodv {
	/// Creates a base with fresh counters.
	pub fn new() -> Self {
		Self::default()
	}

	/// This node's sequence number.
	pub fn seq_no(&self) -> u32 {
		self.seq_no
	}

	/// Whether a discovery for the destination is pending.
	pub fn is_searching(&self, destination: Ipv4Addr) -> bool {
		self.pending.contains_key(&destination)
	}

	/// Packets waiting for a route to the destination.
	pub fn queued(&self, destination: Ipv4Addr) -> usize {
		self.queue.get(&destination).map_or(0, VecDeque::len)
	}

	/// Route reply acknowledgements received so far.
	pub fn acks_received(&self) -> u64 {
		self.acks_received
	}

	fn broadcast(
		&self, ctx: &mut BaseContext, kind: MessageType, body: &[u8], ttl: u8,
	) -> Result<(), AodvError> {
		for (socket, interface) in ctx.sockets.unicast_interfaces() {
			let packet = Packet::control(kind, body, ttl);
			ctx.sockets.send_to(socket, packet, SocketAddrV4::new(interface.broadcast, AODV_PORT))?;
		}
		Ok(())
	}

	fn unicast(
		&self, ctx: &mut BaseContext, local: InterfaceAddress, to: Ipv4Addr, packet: Packet,
	) -> Result<(), AodvError> {
		let socket = ctx.sockets.find_socket_with_interface_address(local).ok_or_else(|| {
			AodvError::ConsistencyError(format!("No socket bound to {}", local.local))
		})?;
		ctx.sockets.send_to(socket, packet, SocketAddrV4::new(to, AODV_PORT))
	}

	fn send_request(
		&mut self, ctx: &mut BaseContext, destination: Ipv4Addr,
	) -> Result<(), AodvError> {
		let origin = match ctx.sockets.unicast_interfaces().first() {
			Some((_, interface)) => interface.local,
			None => return Err(AodvError::ConsistencyError("No unicast socket".to_string())),
		};
		let known = ctx.routing_table.lookup_route(destination).filter(|r| r.valid_seq_no);

		self.request_id = self.request_id.wrapping_add(1);
		self.seq_no = self.seq_no.wrapping_add(1);
		let rreq = RreqHeader {
			join: false,
			repair: false,
			gratuitous: false,
			destination_only: true,
			unknown_seqno: known.is_none(),
			hop_count: 0,
			request_id: self.request_id,
			destination,
			dst_seqno: known.map_or(0, |r| r.seq_no),
			origin,
			origin_seqno: self.seq_no,
		};
		self.seen_requests.insert((origin, self.request_id));
		self.pending.insert(destination, ctx.now);

		debug!("{} starts route discovery for {}", origin, destination);
		self.broadcast(ctx, MessageType::RouteRequest, &rreq.encode(), NET_DIAMETER)
	}

	fn send_error(
		&self, ctx: &mut BaseContext, unreachable: Vec<(Ipv4Addr, u32)>,
	) -> Result<(), AodvError> {
		let rerr = RerrHeader { no_delete: false, unreachable };
		self.broadcast(ctx, MessageType::RouteError, &rerr.encode(), 1)
	}
}

impl BaseProtocol for BasicAodv {
	fn recv_request(
		&mut self, ctx: &mut BaseContext, mut rreq: RreqHeader, ttl: u8,
		receiver: InterfaceAddress, sender: Ipv4Addr,
	) -> Result<(), AodvError> {
		trace!("recv_request {} -> {} via {}", rreq.origin, rreq.destination, sender);
		if ctx.sockets.is_my_own_address(rreq.origin)
			|| !self.seen_requests.insert((rreq.origin, rreq.request_id))
		{
			debug!("Ignoring duplicate RREQ {} from {}", rreq.request_id, rreq.origin);
			return Ok(());
		}

		rreq.hop_count = rreq.hop_count.saturating_add(1);

		// Reverse route to the originator
		let interface = ctx.ipv4.interface_for_address(receiver.local).ok_or_else(|| {
			AodvError::ConsistencyError(format!("No interface for {}", receiver.local))
		})?;
		let mut reverse = RouteEntry {
			hop_count: rreq.hop_count,
			seq_no: rreq.origin_seqno,
			valid_seq_no: true,
			..RouteEntry::new(rreq.origin, sender, interface, receiver, ctx.now)
		};
		reverse.set_lifetime(ctx.active_route_timeout, ctx.now);
		let reverse_was_searching = match ctx.routing_table.lookup_route(rreq.origin) {
			None => {
				ctx.routing_table.add_route(reverse.clone());
				false
			},
			Some(existing) if should_replace(existing, &reverse) => {
				let searching = existing.flag == RouteFlag::InSearch;
				reverse.precursors = existing.precursors.clone();
				ctx.routing_table.update(reverse.clone());
				searching
			},
			Some(_) => {
				if let Some(existing) = ctx.routing_table.lookup_route_mut(rreq.origin) {
					let lifetime = ctx.active_route_timeout.max(existing.lifetime(ctx.now));
					existing.set_lifetime(lifetime, ctx.now);
				}
				false
			},
		};
		if reverse_was_searching {
			self.cancel_route_request(rreq.origin);
			self.send_packet_from_queue(ctx, rreq.origin, reverse.route());
		}

		if ctx.sockets.is_my_own_address(rreq.destination) {
			if !rreq.unknown_seqno && rreq.dst_seqno == self.seq_no.wrapping_add(1) {
				self.seq_no = rreq.dst_seqno;
			}
			let to_origin_hops = ctx
				.routing_table
				.lookup_route(rreq.origin)
				.map_or(rreq.hop_count, |r| r.hop_count);
			let rrep = RrepHeader {
				repair: false,
				ack_required: false,
				prefix_size: 0,
				hop_count: 0,
				destination: rreq.destination,
				dst_seqno: self.seq_no,
				origin: rreq.origin,
				lifetime_ms: MY_ROUTE_TIMEOUT_MS,
			};
			debug!("{} answers RREQ from {}", rreq.destination, rreq.origin);
			let packet = Packet::control(MessageType::RouteReply, &rrep.encode(), to_origin_hops);
			return self.unicast(ctx, receiver, sender, packet);
		}

		if ttl <= 1 {
			debug!("TTL exceeded. Drop RREQ {} from {}", rreq.request_id, rreq.origin);
			return Ok(());
		}
		self.broadcast(ctx, MessageType::RouteRequest, &rreq.encode(), ttl - 1)
	}

	fn recv_error(
		&mut self, ctx: &mut BaseContext, rerr: RerrHeader, sender: Ipv4Addr,
	) -> Result<(), AodvError> {
		let mut unreachable = Vec::new();
		let mut has_precursors = false;

		for (destination, seq_no) in rerr.unreachable {
			if let Some(route) = ctx.routing_table.lookup_route_mut(destination) {
				if route.flag != RouteFlag::Valid || route.next_hop != sender {
					continue;
				}
				route.flag = RouteFlag::Invalid;
				if seq_newer(seq_no, route.seq_no) {
					route.seq_no = seq_no;
				}
				has_precursors |= !route.precursors.is_empty();
				unreachable.push((destination, route.seq_no));
			}
		}

		if unreachable.is_empty() {
			return Ok(());
		}
		debug!("Routes broken by {}: {:?}", sender, unreachable);
		if has_precursors {
			self.send_error(ctx, unreachable)?;
		}
		Ok(())
	}

	fn recv_reply_ack(&mut self, _ctx: &mut BaseContext, sender: Ipv4Addr) {
		debug!("RREP-ACK from {}", sender);
		self.acks_received += 1;
	}

	fn process_hello(
		&mut self, ctx: &mut BaseContext, rrep: &RrepHeader, receiver: InterfaceAddress,
	) -> Result<(), AodvError> {
		let neighbour = rrep.destination;
		let lifetime = Duration::from_millis(ALLOWED_HELLO_LOSS * HELLO_INTERVAL_MS);
		trace!("Hello from {}", neighbour);

		match ctx.routing_table.lookup_route_mut(neighbour) {
			Some(route) => {
				route.set_lifetime(lifetime.max(route.lifetime(ctx.now)), ctx.now);
				route.next_hop = neighbour;
				route.hop_count = 1;
				route.seq_no = rrep.dst_seqno;
				route.valid_seq_no = true;
				route.flag = RouteFlag::Valid;
			},
			None => {
				let interface = ctx.ipv4.interface_for_address(receiver.local).ok_or_else(|| {
					AodvError::ConsistencyError(format!("No interface for {}", receiver.local))
				})?;
				let mut route = RouteEntry {
					seq_no: rrep.dst_seqno,
					valid_seq_no: true,
					..RouteEntry::new(neighbour, neighbour, interface, receiver, ctx.now)
				};
				route.set_lifetime(lifetime, ctx.now);
				ctx.routing_table.add_route(route);
			},
		}
		Ok(())
	}

	fn send_reply_ack(
		&mut self, ctx: &mut BaseContext, neighbour: Ipv4Addr,
	) -> Result<(), AodvError> {
		let local = match ctx.routing_table.lookup_route(neighbour) {
			Some(route) => route.local,
			None => {
				warn!("No route to {}, RREP-ACK not sent", neighbour);
				return Ok(());
			},
		};
		let packet = Packet::control(MessageType::RouteReplyAck, &[0], 1);
		self.unicast(ctx, local, neighbour, packet)
	}

	fn send_packet_from_queue(
		&mut self, ctx: &mut BaseContext, destination: Ipv4Addr, route: Ipv4Route,
	) {
		self.pending.remove(&destination);
		if let Some(queued) = self.queue.remove(&destination) {
			debug!("Sending {} queued packets to {}", queued.len(), destination);
			for (packet, header) in queued {
				ctx.ipv4.unicast_forward(&route, packet, header);
			}
		}
	}

	fn cancel_route_request(&mut self, destination: Ipv4Addr) {
		self.pending.remove(&destination);
	}

	fn route_input(
		&mut self, ctx: &mut BaseContext, packet: Packet, mut header: Ipv4Header, interface: u32,
	) -> Result<bool, AodvError> {
		if ctx.sockets.is_my_own_address(header.destination) {
			ctx.ipv4.local_deliver(packet, header, interface);
			return Ok(true);
		}
		if !ctx.ipv4.is_forwarding(interface) {
			debug!("Forwarding disabled, dropping packet to {}", header.destination);
			return Ok(false);
		}
		if header.ttl <= 1 {
			debug!("TTL exceeded, dropping packet to {}", header.destination);
			return Ok(false);
		}

		ctx.routing_table.purge(ctx.now);
		let timeout = ctx.active_route_timeout;
		let now = ctx.now;
		match ctx.routing_table.lookup_route_mut(header.destination) {
			Some(route) if route.flag == RouteFlag::Valid => {
				route.set_lifetime(timeout.max(route.lifetime(now)), now);
				let route = route.route();
				header.ttl -= 1;
				ctx.ipv4.unicast_forward(&route, packet, header);
				Ok(true)
			},
			other => {
				let seq_no = other.map_or(0, |r| r.seq_no);
				debug!("No route to {}, sending RERR", header.destination);
				self.send_error(ctx, vec![(header.destination, seq_no)])?;
				Ok(false)
			},
		}
	}

	fn send(
		&mut self, ctx: &mut BaseContext, packet: Packet, destination: Ipv4Addr,
	) -> Result<(), AodvError> {
		let source = match ctx.sockets.unicast_interfaces().first() {
			Some((_, interface)) => interface.local,
			None => return Err(AodvError::ConsistencyError("No unicast socket".to_string())),
		};
		let header = Ipv4Header { source, destination, ttl: DEFAULT_TTL };

		if ctx.sockets.is_my_own_address(destination) {
			ctx.ipv4.local_deliver(packet, header, 0);
			return Ok(());
		}

		ctx.routing_table.purge(ctx.now);
		if let Some(route) = ctx.routing_table.lookup_valid_route(destination) {
			let route = route.route();
			ctx.ipv4.unicast_forward(&route, packet, header);
			return Ok(());
		}

		let queue = self.queue.entry(destination).or_default();
		if queue.len() >= MAX_QUEUE_LEN {
			warn!("Queue for {} is full, dropping packet", destination);
			return Ok(());
		}
		queue.push_back((packet, header));

		if let Some(started) = self.pending.get(&destination).copied() {
			if ctx.now.saturating_sub(started) < net_traversal_time() {
				return Ok(());
			}
			debug!("Discovery for {} timed out, sending a new RREQ", destination);
		}
		match ctx.routing_table.lookup_route_mut(destination) {
			Some(route) => route.flag = RouteFlag::InSearch,
			None => {
				let (interface, local) = match ctx.sockets.unicast_interfaces().first() {
					Some((_, local)) => {
						let interface = ctx.ipv4.interface_for_address(local.local).ok_or_else(|| {
							AodvError::ConsistencyError(format!("No interface for {}", local.local))
						})?;
						(interface, *local)
					},
					None => return Err(AodvError::ConsistencyError("No unicast socket".to_string())),
				};
				let searching = RouteEntry {
					hop_count: 0,
					flag: RouteFlag::InSearch,
					..RouteEntry::new(destination, destination, interface, local, ctx.now)
				};
				ctx.routing_table.add_route(searching);
			},
		}
		self.send_request(ctx, destination)
	}
}
