//! # CLI Module.
//!
//! This module contains all CLI related data handling and conversions.

use crate::fs::{load_trust_table, save_config, save_trust_table};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::{
	net::Ipv4Addr,
	str::FromStr,
	time::{Duration, SystemTime, UNIX_EPOCH},
};
use trust_aodv::{
	sim::{line_links, Network},
	trust::is_trustworthy,
	AodvError, ProtocolConfig, TrustEntry,
};

/// Rounds a single packet may take to reach its destination.
const MAX_ROUNDS_PER_PACKET: usize = 500;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
	#[command(subcommand)]
	pub mode: Mode,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Mode {
	/// Display the current configuration.
	Show,
	/// Run a line-topology simulation. Requires 'SimulateData'.
	Simulate(SimulateData),
	/// Maintain the trust table. Requires 'TrustData'.
	Trust(TrustData),
	/// Update the configuration. Requires 'UpdateData'.
	Update(UpdateData),
}

/// Configuration update subcommand input.
#[derive(Args, Debug)]
pub struct UpdateData {
	/// Route request drop probability (0-100).
	#[clap(long = "rreq-drop")]
	rreq_drop: Option<String>,
	/// Route reply drop probability (0-100).
	#[clap(long = "rrep-drop")]
	rrep_drop: Option<String>,
	/// Data packet drop probability (0-100).
	#[clap(long = "data-drop")]
	data_drop: Option<String>,
	/// Active route timeout in milliseconds.
	#[clap(long = "active-route-timeout")]
	active_route_timeout: Option<String>,
}

/// Trust table subcommand input.
#[derive(Args, Debug)]
pub struct TrustData {
	/// Desired action (add, update, remove, lookup, list).
	#[clap(long = "action")]
	action: Option<String>,
	/// Neighbour address (dotted quad).
	#[clap(long = "neighbour")]
	neighbour: Option<String>,
	/// Trust value (0-1).
	#[clap(long = "value")]
	value: Option<String>,
}

/// Simulation subcommand input.
#[derive(Args, Debug)]
pub struct SimulateData {
	/// Number of nodes in the line.
	#[clap(long = "nodes", default_value_t = 5)]
	nodes: usize,
	/// Index of the node running the configured drop probabilities.
	#[clap(long = "selfish", default_value_t = 1)]
	selfish: usize,
	/// Data packets sent from the first to the last node.
	#[clap(long = "packets", default_value_t = 10)]
	packets: usize,
	/// Random seed.
	#[clap(long = "seed", default_value_t = 42)]
	seed: u64,
	/// Simulated milliseconds between two packets.
	#[clap(long = "interval", default_value_t = 1000)]
	interval: u64,
	/// Let every node score its neighbours by their forwarding.
	#[clap(long = "trust")]
	trust: bool,
}

/// Trust table action.
#[derive(Debug, PartialEq)]
pub enum Action {
	Add,
	Update,
	Remove,
	Lookup,
	List,
}

impl FromStr for Action {
	type Err = AodvError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"add" => Ok(Action::Add),
			"update" => Ok(Action::Update),
			"remove" => Ok(Action::Remove),
			"lookup" => Ok(Action::Lookup),
			"list" => Ok(Action::List),
			_ => Err(AodvError::ParsingError("Invalid action.".to_string())),
		}
	}
}

impl TrustData {
	fn neighbour(&self) -> Result<Ipv4Addr, AodvError> {
		self.neighbour
			.as_deref()
			.ok_or_else(|| AodvError::ValidationError("Missing neighbour.".to_string()))?
			.parse()
			.map_err(|_| AodvError::ParsingError("Failed to parse neighbour address.".to_string()))
	}

	/// Builds the entry to store, stamped with the current time.
	pub fn to_trust_entry(&self) -> Result<TrustEntry, AodvError> {
		let neighbour = self.neighbour()?;
		let value = self
			.value
			.as_ref()
			.ok_or_else(|| AodvError::ValidationError("Missing value.".to_string()))
			.and_then(|value| {
				value.parse::<f64>().map_err(|e| AodvError::ParsingError(e.to_string()))
			})?;
		if !(0.0..=1.0).contains(&value) {
			return Err(AodvError::ValidationError(format!(
				"Trust value {} is outside [0, 1].",
				value
			)));
		}
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_err(|e| AodvError::UnknownError(e.to_string()))?;

		Ok(TrustEntry::new(neighbour, value, now))
	}
}

fn parse_probability(value: &str) -> Result<f64, AodvError> {
	value.parse::<f64>().map_err(|e| AodvError::ParsingError(e.to_string()))
}

/// Handles the CLI project configuration update.
pub fn handle_update(config: &mut ProtocolConfig, data: UpdateData) -> Result<(), AodvError> {
	if let Some(rreq_drop) = data.rreq_drop {
		config.set_rreq_drop_probability(parse_probability(&rreq_drop)?)?;
	}

	if let Some(rrep_drop) = data.rrep_drop {
		config.set_rrep_drop_probability(parse_probability(&rrep_drop)?)?;
	}

	if let Some(data_drop) = data.data_drop {
		config.set_data_drop_probability(parse_probability(&data_drop)?)?;
	}

	if let Some(timeout) = data.active_route_timeout {
		config.active_route_timeout_ms =
			timeout.parse::<u64>().map_err(|e| AodvError::ParsingError(e.to_string()))?;
	}

	save_config(config.clone())
}

/// Handles the trust subcommand.
pub fn handle_trust(data: TrustData) -> Result<(), AodvError> {
	let action: Action = data
		.action
		.as_deref()
		.ok_or(AodvError::ValidationError("Missing action.".to_string()))?
		.parse()?;
	let mut table = load_trust_table()?;

	match action {
		Action::Add => table.add_record(data.to_trust_entry()?)?,
		Action::Update => table.update_record(data.to_trust_entry()?),
		Action::Remove => {
			let neighbour = data.neighbour()?;
			if table.remove_record(neighbour).is_none() {
				warn!("No trust entry for {}.", neighbour);
				return Ok(());
			}
		},
		Action::Lookup => {
			let neighbour = data.neighbour()?;
			match table.lookup_trust_entry(neighbour) {
				Some(entry) => info!(
					"{}: {} ({})",
					neighbour,
					entry.trust_value(),
					if is_trustworthy(entry.trust_value()) { "trusted" } else { "untrusted" }
				),
				None => info!("{}: unknown", neighbour),
			}
			return Ok(());
		},
		Action::List => {
			for entry in table.iter() {
				info!("{}: {}", entry.neighbour_address(), entry.trust_value());
			}
			info!("{} trust entries.", table.len());
			return Ok(());
		},
	}

	let filepath = save_trust_table(&table)?;
	info!("Trust table saved at \"{}\".", filepath.display());
	Ok(())
}

/// Builds one configuration per node: the selfish node runs `config`, every
/// other node never drops.
pub fn simulation_configs(
	config: &ProtocolConfig, nodes: usize, selfish: usize,
) -> Result<Vec<ProtocolConfig>, AodvError> {
	if nodes < 2 {
		return Err(AodvError::ValidationError("A simulation needs at least 2 nodes.".to_string()));
	}
	if selfish >= nodes {
		return Err(AodvError::ValidationError(format!(
			"Selfish node {} is not in a line of {} nodes.",
			selfish, nodes
		)));
	}

	let honest = ProtocolConfig {
		active_route_timeout_ms: config.active_route_timeout_ms,
		..ProtocolConfig::honest()
	};
	let mut configs = vec![honest; nodes];
	configs[selfish] = config.clone();
	Ok(configs)
}

/// Handles the simulate subcommand.
pub fn handle_simulate(config: &ProtocolConfig, data: SimulateData) -> Result<(), AodvError> {
	let configs = simulation_configs(config, data.nodes, data.selfish)?;
	let mut network = Network::new(&line_links(data.nodes), configs, data.seed, data.trust)?;

	let last = data.nodes - 1;
	for i in 0..data.packets {
		if i > 0 {
			network.clock().advance(Duration::from_millis(data.interval));
		}
		network.send_data(0, last, i.to_le_bytes().to_vec())?;
		network.run(MAX_ROUNDS_PER_PACKET)?;
	}

	let report = network.report();
	let json =
		serde_json::to_string_pretty(&report).map_err(|e| AodvError::ParsingError(e.to_string()))?;
	info!("Simulation report:\n{}", json);
	info!("Delivered {}/{} packets.", report.delivered, report.sent);

	Ok(())
}
