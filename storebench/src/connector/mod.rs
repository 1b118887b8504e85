//! The protocol-specific capability a [`LoadGenerator`](crate::loadgen::LoadGenerator) drives.
//!
//! A [`DataConnector`] describes one target (an address plus a file share or bucket on it). Every
//! load worker asks it for its own [`Connection`], so the underlying client never has to be safe
//! for concurrent use by multiple workers.

use std::fmt;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

pub mod fileshare;
pub mod object;

pub use fileshare::{FileShareConnector, FileShareSettings};
pub use object::{ObjectConnector, ObjectSettings, S3Credentials};

/// A byte stream of an object or file opened for reading. Yields `0` bytes at end-of-stream.
pub type Reader = Pin<Box<dyn AsyncRead + Send>>;

/// The protocols a target can be benchmarked over.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Protocol {
    /// Files on an NFS-exported file share.
    FileShare,
    /// Objects in an S3 bucket.
    Object,
}

impl Protocol {
    /// Short protocol name as it appears in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileShare => "nfs",
            Self::Object => "s3",
        }
    }

    /// The deterministic name of the file or object worker `index` writes and reads.
    ///
    /// Worker indices start at `1`.
    pub fn target_name(self, index: usize) -> String {
        match self {
            Self::FileShare => format!("filename{index}"),
            Self::Object => format!("objname{index}"),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors opening a data connection, a file, or an object.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Mounting the file share failed.
    #[error("unable to mount {source_path}: {message}")]
    Mount {
        /// The `host:/export` that was mounted.
        source_path: String,
        /// Diagnostic output of the mount attempt.
        message: String,
    },
    /// The connector has to be verified (and thereby mounted) before connecting.
    #[error("{0} is not mounted")]
    NotMounted(String),
    /// The object store client rejected the request.
    #[error("{operation} failed")]
    Object {
        /// What was attempted, e.g. `listing bucket b1`.
        operation: String,
        /// The underlying client error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// IO errors related to files on a mounted share.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnectError {
    pub(crate) fn object<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Object {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

/// A file or object opened for repeated writes of a fixed payload.
#[async_trait]
pub trait Writable: Send {
    /// Writes the full payload.
    ///
    /// For files, consecutive writes append. For objects, every write replaces the object.
    async fn write(&mut self, payload: &Bytes) -> io::Result<()>;

    /// Flushes and closes the handle.
    async fn finish(self: Box<Self>) -> io::Result<()>;
}

/// A single worker's independent connection to a target.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Opens (creating or truncating) the named file or object for writing.
    async fn open_for_write(&mut self, name: &str) -> Result<Box<dyn Writable>, ConnectError>;

    /// Opens the named file or object for reading from the start.
    async fn open_for_read(&mut self, name: &str) -> Result<Reader, ConnectError>;
}

/// A benchmark target reachable over one protocol.
#[async_trait]
pub trait DataConnector: Send + Sync + 'static {
    /// The per-worker connection type.
    type Connection: Connection;

    /// The protocol this connector speaks.
    fn protocol(&self) -> Protocol;

    /// The address of the target, for reports and logs.
    fn target(&self) -> &str;

    /// Pre-flight check that the target resource is reachable and usable, run once before any
    /// test. May log a warning if the target is not empty.
    async fn verify_reachable(&self) -> Result<(), ConnectError>;

    /// Opens a new connection that is used by exactly one worker.
    async fn connect(&self) -> Result<Self::Connection, ConnectError>;

    /// Releases whatever [`verify_reachable`](Self::verify_reachable) acquired, such as a mount.
    async fn release(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_names_are_per_protocol() {
        assert_eq!(Protocol::FileShare.target_name(1), "filename1");
        assert_eq!(Protocol::Object.target_name(12), "objname12");
        assert_eq!(Protocol::FileShare.to_string(), "nfs");
        assert_eq!(Protocol::Object.to_string(), "s3");
    }
}
