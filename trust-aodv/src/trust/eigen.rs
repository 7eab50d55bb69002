//! EigenTrust strategy: global scores from local opinions of every peer.
//!
//! Implements the iteration of the [Eigen Trust paper](http://ilpubs.stanford.edu:8090/562/1/2002-56.pdf)
//! with pre-trusted peers:
//!
//! `t(k+1) = (1 - a) * C^T * t(k) + a * p`
//!
//! where `C` holds the row-normalised local opinions and `p` the normalised
//! pre-trust vector. Published scores are relative to the best peer, so the
//! most trusted peer gets 1.0.

use super::{TrustEntry, TrustMediator, TrustTable, TrustValue};
use crate::error::AodvError;
use log::{debug, warn};
use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

/// Default weight of the pre-trust vector.
pub const DEFAULT_PRE_TRUST_WEIGHT: f64 = 0.2;
/// Default number of power iterations.
pub const DEFAULT_NUM_ITERATIONS: usize = 20;

/// EigenTrust based trust mediator.
#[derive(Clone, Debug)]
pub struct EigenTrustMediator {
	/// The node this mediator scores for.
	owner: Ipv4Addr,
	/// Known peers, owner included.
	peers: Vec<Ipv4Addr>,
	/// Pre-trust weight of each peer, not normalised.
	pre_trust: HashMap<Ipv4Addr, f64>,
	/// Local opinions: `ops[i][j]` is how much `i` trusts `j`.
	ops: HashMap<Ipv4Addr, HashMap<Ipv4Addr, f64>>,
	pre_trust_weight: f64,
	num_iterations: usize,
	table: TrustTable,
}

impl EigenTrustMediator {
	/// Creates a mediator for `owner`, which is pre-trusted.
	pub fn new(owner: Ipv4Addr, pre_trust_weight: f64, num_iterations: usize) -> Self {
		let mut pre_trust = HashMap::new();
		pre_trust.insert(owner, 1.0);

		Self {
			owner,
			peers: vec![owner],
			pre_trust,
			ops: HashMap::new(),
			pre_trust_weight,
			num_iterations,
			table: TrustTable::new(),
		}
	}

	/// Adds a peer with its pre-trust weight.
	pub fn add_peer(&mut self, peer: Ipv4Addr, pre_trust: f64) -> Result<(), AodvError> {
		if self.peers.contains(&peer) {
			return Err(AodvError::ValidationError(format!("Peer {} already known", peer)));
		}

		self.peers.push(peer);
		self.pre_trust.insert(peer, pre_trust.max(0.0));
		Ok(())
	}

	/// Removes a peer, its opinions and the opinions about it.
	pub fn remove_peer(&mut self, peer: Ipv4Addr) -> Result<(), AodvError> {
		if peer == self.owner {
			return Err(AodvError::ValidationError("Cannot remove the owner".to_string()));
		}
		let index = self
			.peers
			.iter()
			.position(|&p| p == peer)
			.ok_or_else(|| AodvError::ValidationError(format!("Unknown peer {}", peer)))?;

		self.peers.remove(index);
		self.pre_trust.remove(&peer);
		self.ops.remove(&peer);
		for op in self.ops.values_mut() {
			op.remove(&peer);
		}
		self.table.remove_record(peer);

		Ok(())
	}

	/// Sets the local opinion of `from` about `about`.
	pub fn update_opinion(
		&mut self, from: Ipv4Addr, about: Ipv4Addr, score: f64,
	) -> Result<(), AodvError> {
		for peer in [from, about] {
			if !self.peers.contains(&peer) {
				return Err(AodvError::ValidationError(format!("Unknown peer {}", peer)));
			}
		}
		if !score.is_finite() || score < 0.0 {
			return Err(AodvError::ValidationError(format!("Invalid opinion score {}", score)));
		}

		self.ops.entry(from).or_default().insert(about, score);
		Ok(())
	}

	/// Runs the iteration and publishes the relative scores to the table.
	/// Returns the global scores in peer order; they sum to 1.
	pub fn converge(&mut self, now: Duration) -> Result<Vec<(Ipv4Addr, f64)>, AodvError> {
		let n = self.peers.len();
		if n < 2 {
			return Err(AodvError::ValidationError(
				"Insufficient peers for calculation".to_string(),
			));
		}

		let ops_norm = self.normalised_ops();
		let pre_trust = self.normalised_pre_trust();

		let mut s = pre_trust.clone();
		let mut new_s = vec![0.0; n];
		for _ in 0..self.num_iterations {
			for i in 0..n {
				let mut score_i_sum = 0.0;
				for j in 0..n {
					score_i_sum += ops_norm[j][i] * s[j];
				}
				new_s[i] = (1.0 - self.pre_trust_weight) * score_i_sum
					+ self.pre_trust_weight * pre_trust[i];
			}
			s.clone_from(&new_s);
		}

		let max = s.iter().cloned().fold(0.0, f64::max);
		for (i, peer) in self.peers.iter().enumerate() {
			if *peer == self.owner {
				continue;
			}
			let relative = if max > 0.0 { s[i] / max } else { 0.0 };
			self.table.update_record(TrustEntry::new(*peer, relative, now));
		}
		debug!("EigenTrust converged over {} peers: {:?}", n, s);

		Ok(self.peers.iter().copied().zip(s).collect())
	}

	/// Opinion matrix with self-opinions nullified and rows summing to 1.
	/// A peer without opinions distributes its trust evenly.
	fn normalised_ops(&self) -> Vec<Vec<f64>> {
		let n = self.peers.len();
		let mut ops_norm = vec![vec![0.0; n]; n];
		for (i, addr_i) in self.peers.iter().enumerate() {
			let mut row: Vec<f64> = self
				.peers
				.iter()
				.map(|addr_j| {
					if addr_j == addr_i {
						return 0.0;
					}
					self.ops.get(addr_i).and_then(|op| op.get(addr_j)).copied().unwrap_or(0.0)
				})
				.collect();

			let mut sum: f64 = row.iter().sum();
			if sum == 0.0 {
				for (j, score) in row.iter_mut().enumerate() {
					if j != i {
						*score = 1.0;
					}
				}
				sum = (n - 1) as f64;
			}

			for j in 0..n {
				ops_norm[i][j] = row[j] / sum;
			}
		}

		ops_norm
	}

	fn normalised_pre_trust(&self) -> Vec<f64> {
		let n = self.peers.len();
		let raw: Vec<f64> =
			self.peers.iter().map(|p| self.pre_trust.get(p).copied().unwrap_or(0.0)).collect();
		let sum: f64 = raw.iter().sum();
		if sum == 0.0 {
			return vec![1.0 / n as f64; n];
		}

		raw.into_iter().map(|score| score / sum).collect()
	}
}

impl TrustMediator for EigenTrustMediator {
	fn strategy(&self) -> &'static str {
		"eigentrust"
	}

	/// Stores the value as the owner's opinion about the neighbour and
	/// recomputes every published score.
	fn record_trust(&mut self, neighbour: Ipv4Addr, value: TrustValue, now: Duration) {
		if !self.peers.contains(&neighbour) {
			self.peers.push(neighbour);
			self.pre_trust.insert(neighbour, 0.0);
		}
		let owner = self.owner;
		if let Err(e) = self.update_opinion(owner, neighbour, value) {
			warn!("Ignoring opinion about {}: {}", neighbour, e);
			return;
		}
		if let Err(e) = self.converge(now) {
			warn!("EigenTrust did not run: {}", e);
		}
	}

	fn trust_table(&self) -> &TrustTable {
		&self.table
	}
}
