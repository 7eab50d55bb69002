//! # Socket Module.
//!
//! Socket contract and the registries binding sockets to local interface
//! addresses.

use crate::{error::AodvError, net::InterfaceAddress, packet::Packet};
use log::error;
use std::{
	collections::BTreeMap,
	net::{Ipv4Addr, SocketAddrV4},
};

/// Handle of a registered socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u32);

/// A datagram socket.
pub trait Socket {
	/// Takes the next datagram, if any, with its sender.
	fn recv_from(&mut self) -> Option<(Packet, SocketAddrV4)>;
	/// Sends a datagram. Fire and forget.
	fn send_to(&mut self, packet: Packet, destination: SocketAddrV4);
}

struct Registration {
	socket: Box<dyn Socket>,
	interface: InterfaceAddress,
}

/// Sockets the protocol opened, bound either to an interface's unicast
/// address or to its subnet broadcast address.
#[derive(Default)]
pub struct SocketRegistry {
	unicast: BTreeMap<SocketId, Registration>,
	subnet_broadcast: BTreeMap<SocketId, Registration>,
	next_id: u32,
}

impl SocketRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a socket bound to the interface's unicast address.
	pub fn register_unicast(
		&mut self, socket: Box<dyn Socket>, interface: InterfaceAddress,
	) -> SocketId {
		let id = self.allocate();
		self.unicast.insert(id, Registration { socket, interface });
		id
	}

	/// Registers a socket bound to the interface's broadcast address.
	pub fn register_subnet_broadcast(
		&mut self, socket: Box<dyn Socket>, interface: InterfaceAddress,
	) -> SocketId {
		let id = self.allocate();
		self.subnet_broadcast.insert(id, Registration { socket, interface });
		id
	}

	fn allocate(&mut self) -> SocketId {
		let id = SocketId(self.next_id);
		self.next_id += 1;
		id
	}

	/// Interface address a socket is registered against, unicast first.
	pub fn receiver_address(&self, id: SocketId) -> Option<InterfaceAddress> {
		self.unicast.get(&id).or_else(|| self.subnet_broadcast.get(&id)).map(|r| r.interface)
	}

	/// Reads from a registered socket. Reading from an unknown socket is a
	/// consistency violation.
	pub fn recv_from(&mut self, id: SocketId) -> Result<Option<(Packet, SocketAddrV4)>, AodvError> {
		let registration = match self.unicast.get_mut(&id) {
			Some(registration) => registration,
			None => self.subnet_broadcast.get_mut(&id).ok_or_else(|| unknown_socket(id))?,
		};
		Ok(registration.socket.recv_from())
	}

	/// Sends through a registered socket.
	pub fn send_to(
		&mut self, id: SocketId, packet: Packet, destination: SocketAddrV4,
	) -> Result<(), AodvError> {
		let registration = match self.unicast.get_mut(&id) {
			Some(registration) => registration,
			None => self.subnet_broadcast.get_mut(&id).ok_or_else(|| unknown_socket(id))?,
		};
		registration.socket.send_to(packet, destination);
		Ok(())
	}

	/// Unicast socket bound to the given interface address.
	pub fn find_socket_with_interface_address(&self, interface: InterfaceAddress) -> Option<SocketId> {
		self.unicast.iter().find(|(_, r)| r.interface == interface).map(|(id, _)| *id)
	}

	/// Unicast sockets and their interfaces.
	pub fn unicast_interfaces(&self) -> Vec<(SocketId, InterfaceAddress)> {
		self.unicast.iter().map(|(id, r)| (*id, r.interface)).collect()
	}

	/// Whether the address belongs to one of this node's interfaces.
	pub fn is_my_own_address(&self, address: Ipv4Addr) -> bool {
		self.unicast.values().any(|r| r.interface.local == address)
	}
}

fn unknown_socket(id: SocketId) -> AodvError {
	error!("Received a packet on unregistered socket {:?}", id);
	AodvError::ConsistencyError(format!("Socket {:?} is not registered", id))
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use std::{cell::RefCell, collections::VecDeque, rc::Rc};

	/// Socket fed and drained by the test through shared queues.
	#[derive(Clone, Default)]
	pub struct QueueSocket {
		pub inbox: Rc<RefCell<VecDeque<(Packet, SocketAddrV4)>>>,
		pub outbox: Rc<RefCell<Vec<(Packet, SocketAddrV4)>>>,
	}

	impl Socket for QueueSocket {
		fn recv_from(&mut self) -> Option<(Packet, SocketAddrV4)> {
			self.inbox.borrow_mut().pop_front()
		}

		fn send_to(&mut self, packet: Packet, destination: SocketAddrV4) {
			self.outbox.borrow_mut().push((packet, destination));
		}
	}

	#[test]
	fn test_registry_lookups() {
		let iface = InterfaceAddress::new(Ipv4Addr::new(10, 0, 0, 1), 24);
		let mut registry = SocketRegistry::new();
		let unicast = registry.register_unicast(Box::new(QueueSocket::default()), iface);
		let broadcast = registry.register_subnet_broadcast(Box::new(QueueSocket::default()), iface);

		assert_ne!(unicast, broadcast);
		assert_eq!(registry.receiver_address(broadcast), Some(iface));
		assert_eq!(registry.find_socket_with_interface_address(iface), Some(unicast));
		assert!(registry.is_my_own_address(Ipv4Addr::new(10, 0, 0, 1)));
		assert!(!registry.is_my_own_address(Ipv4Addr::new(10, 0, 0, 255)));
		assert!(registry.receiver_address(SocketId(42)).is_none());
	}

	#[test]
	fn test_unknown_socket_is_consistency_error() {
		let mut registry = SocketRegistry::new();
		let dst = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 654);

		assert!(matches!(registry.recv_from(SocketId(3)), Err(AodvError::ConsistencyError(_))));
		assert!(matches!(
			registry.send_to(SocketId(3), Packet::new(vec![1], 1), dst),
			Err(AodvError::ConsistencyError(_))
		));
	}

	#[test]
	fn test_send_and_receive() {
		let iface = InterfaceAddress::new(Ipv4Addr::new(10, 0, 0, 1), 24);
		let socket = QueueSocket::default();
		let from = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 654);
		socket.inbox.borrow_mut().push_back((Packet::new(vec![4, 0], 1), from));

		let mut registry = SocketRegistry::new();
		let id = registry.register_unicast(Box::new(socket.clone()), iface);

		let (packet, sender) = registry.recv_from(id).unwrap().unwrap();
		assert_eq!(packet.payload(), &[4, 0]);
		assert_eq!(sender, from);
		assert!(registry.recv_from(id).unwrap().is_none());

		registry.send_to(id, packet, from).unwrap();
		assert_eq!(socket.outbox.borrow().len(), 1);
	}
}
