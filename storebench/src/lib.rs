//! Throughput benchmark for storage arrays.
//!
//! A run provisions a transient file share and bucket per subnet of the array via
//! [`storebench_mgmt`], drives concurrent write and read load against each of them through a
//! [`LoadGenerator`](loadgen::LoadGenerator), and collects the measured rates into a
//! [`Report`](report::Report).

pub mod cli;
pub mod config;
pub mod connector;
pub mod loadgen;
pub mod observability;
mod payload;
pub mod report;
pub mod run;
