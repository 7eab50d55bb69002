//! # Filesystem Actions Module.
//!
//! This module provides functionalities for filesystem actions.

use log::warn;
use std::{env::current_dir, path::PathBuf};
use trust_aodv::{
	storage::{CSVFileStorage, JSONFileStorage, Storage, TrustRecord},
	AodvError, ProtocolConfig, TrustTable,
};

/// Library configuration file name.
pub const CONFIG_FILENAME: &str = "config";
/// Trust table file name.
pub const TRUST_FILENAME: &str = "trust";

/// Enum representing the possible file extensions.
pub enum FileType {
	/// CSV file.
	Csv,
	/// JSON file.
	Json,
}

impl FileType {
	/// Converts the enum variant into its corresponding file extension.
	fn as_str(&self) -> &'static str {
		match self {
			FileType::Csv => "csv",
			FileType::Json => "json",
		}
	}
}

/// Retrieves the path to the `assets` directory.
pub fn get_assets_path() -> Result<PathBuf, AodvError> {
	current_dir().map_err(AodvError::IOError).map(|current_dir| {
		// Tests run inside the crate directory.
		#[cfg(test)]
		{
			current_dir.join("assets")
		}

		#[cfg(not(test))]
		{
			current_dir.join("trust-aodv-cli/assets")
		}
	})
}

/// Helper function to get the path of a file in the `assets` directory.
pub fn get_file_path(file_name: &str, file_type: FileType) -> Result<PathBuf, AodvError> {
	let assets_path = get_assets_path()?;
	Ok(assets_path.join(format!("{}.{}", file_name, file_type.as_str())))
}

/// Loads the configuration file.
pub fn load_config() -> Result<ProtocolConfig, AodvError> {
	let filepath = get_file_path(CONFIG_FILENAME, FileType::Json)?;
	let config = JSONFileStorage::<ProtocolConfig>::new(filepath).load()?;
	config.validate()?;
	Ok(config)
}

/// Saves the configuration file.
pub fn save_config(config: ProtocolConfig) -> Result<(), AodvError> {
	let filepath = get_file_path(CONFIG_FILENAME, FileType::Json)?;
	JSONFileStorage::<ProtocolConfig>::new(filepath).save(config)
}

/// Loads the trust table. A missing file is an empty table.
pub fn load_trust_table() -> Result<TrustTable, AodvError> {
	let filepath = get_file_path(TRUST_FILENAME, FileType::Csv)?;
	if !filepath.exists() {
		warn!("No trust table at \"{}\", starting empty.", filepath.display());
		return Ok(TrustTable::new());
	}

	let records = CSVFileStorage::<TrustRecord>::new(filepath).load()?;
	TrustTable::from_records(records)
}

/// Saves the trust table.
pub fn save_trust_table(table: &TrustTable) -> Result<PathBuf, AodvError> {
	let filepath = get_file_path(TRUST_FILENAME, FileType::Csv)?;
	let mut storage = CSVFileStorage::<TrustRecord>::new(filepath);
	storage.save(table.to_records())?;
	Ok(storage.filepath().clone())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_load_bundled_config() {
		let config = load_config().unwrap();
		assert_eq!(config, ProtocolConfig::default());
	}

	#[test]
	fn test_file_paths() {
		let path = get_file_path(TRUST_FILENAME, FileType::Csv).unwrap();
		assert!(path.ends_with("assets/trust.csv"));
	}
}
