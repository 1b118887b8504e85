//! Test utilities for storebench and its management client.
//!
//! This crate provides an in-process fake of a storage array's management API and an in-memory
//! data connector, so that complete benchmark runs can be exercised without an array. See the
//! modules for all available utilities.

pub mod connector;
pub mod server;
pub mod tracing;
