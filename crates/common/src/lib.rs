//! Common types and capability traits shared across MCU session components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for the injected media engine and network capabilities
pub mod engine;
