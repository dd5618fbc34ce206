//! # shareport Common
//!
//! Shared utilities for the shareport components.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use shareport_common::init_logging;
//!
//! init_logging("info").unwrap();
//! tracing::info!(volume = "vol1", "Attaching volume");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, LogFormat};
