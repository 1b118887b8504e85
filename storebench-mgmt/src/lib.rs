//! # Storage Array Management Client
//!
//! This crate talks to the REST control plane of a storage array. It negotiates the API version,
//! logs in with a static API token, and exposes the create/destroy primitives needed to provision
//! the transient file shares, buckets and object-store identities a benchmark run depends on.
//!
//! ## Usage
//!
//! ```no_run
//! use storebench_mgmt::{
//!     ManagementSession, ResourceLedger, ResourceProvisioner, TransientResource,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = ManagementSession::builder("array-mgmt.example.com")
//!     .api_token("T-1234")
//!     .connect()
//!     .await?;
//!
//! let provisioner = ResourceProvisioner::new(&session);
//! let endpoints = provisioner.discover_data_endpoints().await?;
//!
//! let mut ledger = ResourceLedger::default();
//! provisioner.create_object_account("scratch").await?;
//! ledger.record(TransientResource::ObjectAccount("scratch".into()));
//!
//! for error in ledger.teardown(&provisioner).await {
//!     eprintln!("leaked resource: {error}");
//! }
//! session.close().await;
//! # let _ = endpoints;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod error;
mod ledger;
pub mod models;
mod provisioner;
mod session;
pub mod version;

pub use error::*;
pub use ledger::*;
pub use provisioner::*;
pub use session::*;
