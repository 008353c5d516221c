//! Coverfetch - a concurrent cache for remote cover images.
//!
//! Requests go through memory, an optional on-disk thumbnail store and a
//! deduplicated network fetch. Each display target only ever receives the
//! image it asked for last.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "coverfetch";
