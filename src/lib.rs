//! Harborview: a terminal dashboard for the Docker containers and system
//! metrics of one remote host, kept live by polling, push updates and
//! optimistic actions reconciled into a single store.
//!
//! This library exposes the core modules for use by the binary and by tests.

pub mod app;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod model;
pub mod store;
pub mod sync;
