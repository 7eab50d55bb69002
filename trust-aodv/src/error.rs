//! # Error Module.
//!
//! This module features the `AodvError` enum for error handling throughout the project.

use thiserror::Error;

/// The crate-wide error variants.
#[derive(Debug, Error)]
pub enum AodvError {
	/// Configuration error
	#[error("ConfigurationError: {0}")]
	ConfigurationError(String),

	/// Protocol state is inconsistent with what the engine registered
	#[error("ConsistencyError: {0}")]
	ConsistencyError(String),

	/// Conversion error
	#[error("ConversionError: {0}")]
	ConversionError(String),

	/// File read/write error
	#[error("FileIOError: {0}")]
	FileIOError(String),

	/// Input/output error
	#[error("IOError: {0}")]
	IOError(std::io::Error),

	/// Parsing error
	#[error("ParsingError: {0}")]
	ParsingError(String),

	/// Validation error
	#[error("ValidationError: {0}")]
	ValidationError(String),

	/// Unknown error
	#[error("UnknownError: {0}")]
	UnknownError(String),
}
