//! # Storage Module.
//!
//! This module contains generic storage traits and implementations, and the
//! flat record a trust entry is persisted as.

use crate::{error::AodvError, trust::TrustEntry};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{from_reader, to_string_pretty};
use std::{
	fs::File,
	io::{BufReader, Write},
	marker::PhantomData,
	net::Ipv4Addr,
	path::PathBuf,
	time::Duration,
};

/// The main trait to be implemented by different storage types.
pub trait Storage<T> {
	/// The error type.
	type Err;

	/// Loads data from storage.
	fn load(&self) -> Result<T, Self::Err>;
	/// Saves data to storage.
	fn save(&mut self, data: T) -> Result<(), Self::Err>;
}

/// Persists a list of records as rows of a CSV file with a header line.
pub struct CSVFileStorage<T> {
	filepath: PathBuf,
	phantom: PhantomData<T>,
}

impl<T> CSVFileStorage<T> {
	/// Creates a new CSVFileStorage.
	pub fn new(filepath: PathBuf) -> Self {
		Self { filepath, phantom: PhantomData }
	}

	/// Returns the path to the file.
	pub fn filepath(&self) -> &PathBuf {
		&self.filepath
	}
}

impl<T: Serialize + DeserializeOwned> Storage<Vec<T>> for CSVFileStorage<T> {
	type Err = AodvError;

	fn load(&self) -> Result<Vec<T>, AodvError> {
		let file = File::open(&self.filepath).map_err(AodvError::IOError)?;
		let mut reader = ReaderBuilder::new().from_reader(BufReader::new(file));

		reader
			.deserialize()
			.map(|result| result.map_err(|e| AodvError::FileIOError(e.to_string())))
			.collect()
	}

	fn save(&mut self, data: Vec<T>) -> Result<(), AodvError> {
		let mut writer = WriterBuilder::new()
			.from_path(&self.filepath)
			.map_err(|e| AodvError::FileIOError(e.to_string()))?;

		for record in &data {
			writer.serialize(record).map_err(|e| AodvError::FileIOError(e.to_string()))?;
		}

		writer.flush().map_err(|e| AodvError::FileIOError(e.to_string()))?;

		Ok(())
	}
}

/// Persists a single value as a JSON document.
pub struct JSONFileStorage<T> {
	filepath: PathBuf,
	phantom: PhantomData<T>,
}

impl<T> JSONFileStorage<T> {
	/// Creates a new JSONFileStorage.
	pub fn new(filepath: PathBuf) -> Self {
		Self { filepath, phantom: PhantomData }
	}

	/// Returns the path to the file.
	pub fn filepath(&self) -> &PathBuf {
		&self.filepath
	}
}

impl<T: Serialize + DeserializeOwned> Storage<T> for JSONFileStorage<T> {
	type Err = AodvError;

	fn load(&self) -> Result<T, Self::Err> {
		let file = File::open(&self.filepath).map_err(AodvError::IOError)?;
		from_reader(BufReader::new(file)).map_err(|e| AodvError::ParsingError(e.to_string()))
	}

	fn save(&mut self, data: T) -> Result<(), Self::Err> {
		let json_str =
			to_string_pretty(&data).map_err(|e| AodvError::ParsingError(e.to_string()))?;

		let mut file = File::create(&self.filepath).map_err(AodvError::IOError)?;
		file.write_all(json_str.as_bytes()).map_err(AodvError::IOError)
	}
}

/// Trust record, one CSV row per neighbour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
	/// Dotted-quad neighbour address.
	neighbour_address: String,
	/// Trust value in `[0, 1]`.
	trust_value: String,
	/// Last update, in milliseconds since the start of the run.
	timestamp: String,
}

impl TrustRecord {
	/// Creates a new trust record.
	pub fn new(neighbour_address: String, trust_value: String, timestamp: String) -> Self {
		Self { neighbour_address, trust_value, timestamp }
	}

	/// Returns the neighbour address.
	pub fn neighbour_address(&self) -> &String {
		&self.neighbour_address
	}

	/// Returns the trust value.
	pub fn trust_value(&self) -> &String {
		&self.trust_value
	}

	/// Returns the timestamp.
	pub fn timestamp(&self) -> &String {
		&self.timestamp
	}
}

impl From<TrustEntry> for TrustRecord {
	fn from(entry: TrustEntry) -> Self {
		Self {
			neighbour_address: entry.neighbour_address().to_string(),
			trust_value: entry.trust_value().to_string(),
			timestamp: entry.timestamp().as_millis().to_string(),
		}
	}
}

impl TryFrom<TrustRecord> for TrustEntry {
	type Error = AodvError;

	fn try_from(record: TrustRecord) -> Result<Self, Self::Error> {
		let TrustRecord { neighbour_address, trust_value, timestamp } = record;

		let address = neighbour_address.parse::<Ipv4Addr>().map_err(|_| {
			AodvError::ConversionError(format!("Failed to parse address '{}'", neighbour_address))
		})?;
		let value = trust_value
			.parse::<f64>()
			.map_err(|_| AodvError::ConversionError("Failed to parse 'trust_value'".to_string()))?;
		if !(0.0..=1.0).contains(&value) {
			return Err(AodvError::ValidationError(format!(
				"Trust value {} of {} is outside [0, 1]",
				value, address
			)));
		}
		let millis = timestamp
			.parse::<u64>()
			.map_err(|_| AodvError::ConversionError("Failed to parse 'timestamp'".to_string()))?;

		Ok(TrustEntry::new(address, value, Duration::from_millis(millis)))
	}
}

#[cfg(test)]
mod tests {
	use crate::storage::*;
	use std::{env::current_dir, fs};

	#[derive(Debug, Deserialize, PartialEq, Clone, Serialize)]
	struct Record {
		neighbour_address: String,
		hops: u32,
	}

	#[test]
	fn test_csv_file_storage() {
		let filepath = current_dir().unwrap().join("test_storage.csv");
		let mut csv_storage = CSVFileStorage::<Record>::new(filepath.clone());

		let content = vec![
			Record { neighbour_address: "10.0.0.2".to_string(), hops: 1 },
			Record { neighbour_address: "10.0.0.3".to_string(), hops: 2 },
		];

		assert!(csv_storage.save(content.clone()).is_ok());

		let records: Vec<Record> = csv_storage.load().unwrap();
		assert_eq!(records, content);

		// Clean up
		fs::remove_file(filepath).unwrap();
	}

	#[test]
	fn test_json_file_storage() {
		let filepath = current_dir().unwrap().join("test_storage.json");
		let mut json_storage = JSONFileStorage::<Record>::new(filepath.clone());

		let content = Record { neighbour_address: "10.0.0.9".to_string(), hops: 4 };

		assert!(json_storage.save(content.clone()).is_ok());
		assert_eq!(json_storage.load().unwrap(), content);

		// Clean up
		fs::remove_file(filepath).unwrap();
	}

	#[test]
	fn test_missing_file_fails() {
		let filepath = current_dir().unwrap().join("does_not_exist.csv");
		let storage = CSVFileStorage::<Record>::new(filepath);
		assert!(matches!(storage.load(), Err(AodvError::IOError(_))));
	}

	#[test]
	fn test_trust_record_conversion() {
		let entry =
			TrustEntry::new(Ipv4Addr::new(10, 0, 0, 4), 0.75, Duration::from_millis(1500));
		let record = TrustRecord::from(entry);
		assert_eq!(record.neighbour_address(), "10.0.0.4");
		assert_eq!(record.timestamp(), "1500");
		assert_eq!(TrustEntry::try_from(record).unwrap(), entry);

		let bad_address = TrustRecord::new("10.0.0".into(), "0.5".into(), "0".into());
		assert!(TrustEntry::try_from(bad_address).is_err());

		let out_of_range = TrustRecord::new("10.0.0.1".into(), "1.5".into(), "0".into());
		assert!(matches!(TrustEntry::try_from(out_of_range), Err(AodvError::ValidationError(_))));
	}
}
