//! Glucosync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the glucosync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`GlucoError`] and the crate-wide [`Result`] alias
//! - **Types**: samples, stream keys and insert modes shared by the import
//!   pipeline and the sync engine
//! - **Logging**: tracing subscriber setup driven by `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use glucosync_common::types::{coalesce, Sample};
//!
//! let samples = coalesce(vec![Sample::numeric(10.0, 100.0), Sample::numeric(10.0, 120.0)]);
//! assert_eq!(samples.len(), 1);
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{GlucoError, Result};
pub use types::{InsertMode, Sample, SampleValue, StreamKey};
