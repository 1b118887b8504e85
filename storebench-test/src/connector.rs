//! In-memory data connectors.
//!
//! [`MemoryConnectors`] plugs into [`storebench::run::run`] in place of the live NFS and S3
//! connectors. Every target keeps its files in a map that only holds the latest payload per name,
//! so a write loop running for a few seconds never grows beyond one payload per worker.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use storebench::connector::{
    ConnectError, Connection, DataConnector, Protocol, Reader, S3Credentials, Writable,
};
use storebench::run::Connectors;

type Store = Arc<Mutex<HashMap<String, Bytes>>>;

/// I/O failures a [`MemoryConnector`] injects into its connections.
#[derive(Clone, Copy, Debug, Default)]
struct Faults {
    /// Successful writes per writer before every further write fails.
    writes_before_failure: Option<usize>,
    fail_reads: bool,
}

/// A connector created by [`MemoryConnectors`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedConnector {
    /// The protocol of the connector.
    pub protocol: Protocol,
    /// The data endpoint it was created for.
    pub address: String,
    /// The export or bucket it was created for.
    pub resource: String,
}

/// Creates [`MemoryConnector`]s and remembers every connector it handed out.
#[derive(Debug, Default)]
pub struct MemoryConnectors {
    unreachable: BTreeSet<String>,
    created: Mutex<Vec<CreatedConnector>>,
}

impl MemoryConnectors {
    /// Creates connectors that can reach every address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the pre-flight check of every connector for `address` fail.
    pub fn unreachable(mut self, address: &str) -> Self {
        self.unreachable.insert(address.to_owned());
        self
    }

    /// All connectors created so far, in creation order.
    pub fn created(&self) -> Vec<CreatedConnector> {
        self.created.lock().unwrap().clone()
    }

    fn create(&self, protocol: Protocol, address: &str, resource: &str) -> MemoryConnector {
        self.created.lock().unwrap().push(CreatedConnector {
            protocol,
            address: address.to_owned(),
            resource: resource.to_owned(),
        });

        let connector = MemoryConnector::new(protocol, address);
        if self.unreachable.contains(address) {
            connector.make_unreachable()
        } else {
            connector
        }
    }
}

impl Connectors for MemoryConnectors {
    type FileShare = MemoryConnector;
    type Object = MemoryConnector;

    fn file_share(&self, address: &str, export: &str) -> Self::FileShare {
        self.create(Protocol::FileShare, address, export)
    }

    fn object(&self, address: &str, bucket: &str, _credentials: &S3Credentials) -> Self::Object {
        self.create(Protocol::Object, address, bucket)
    }
}

/// A target that keeps its files or objects in memory.
#[derive(Debug)]
pub struct MemoryConnector {
    protocol: Protocol,
    target: String,
    reachable: bool,
    faults: Faults,
    store: Store,
    connections: Arc<Mutex<usize>>,
    released: Arc<Mutex<bool>>,
}

impl MemoryConnector {
    /// Creates an empty, reachable target.
    pub fn new(protocol: Protocol, target: &str) -> Self {
        Self {
            protocol,
            target: target.to_owned(),
            reachable: true,
            faults: Faults::default(),
            store: Arc::default(),
            connections: Arc::default(),
            released: Arc::default(),
        }
    }

    /// Makes [`DataConnector::verify_reachable`] fail.
    pub fn make_unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Makes every writer fail once it has written `writes` payloads.
    ///
    /// With `0`, the first write of every worker fails.
    pub fn fail_writes_after(mut self, writes: usize) -> Self {
        self.faults.writes_before_failure = Some(writes);
        self
    }

    /// Makes opening a file or object for reading fail.
    pub fn fail_reads(mut self) -> Self {
        self.faults.fail_reads = true;
        self
    }

    /// A handle to inspect the connector after it was moved into a load generator.
    pub fn probe(&self) -> MemoryProbe {
        MemoryProbe {
            store: Arc::clone(&self.store),
            connections: Arc::clone(&self.connections),
            released: Arc::clone(&self.released),
        }
    }
}

#[async_trait]
impl DataConnector for MemoryConnector {
    type Connection = MemoryConnection;

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn verify_reachable(&self) -> Result<(), ConnectError> {
        if !self.reachable {
            let error = io::Error::new(io::ErrorKind::ConnectionRefused, "target is unreachable");
            return Err(error.into());
        }

        let files = self.store.lock().unwrap().len();
        if files > 0 {
            ::tracing::warn!(target_address = %self.target, files, "memory target is not empty");
        }
        Ok(())
    }

    async fn connect(&self) -> Result<Self::Connection, ConnectError> {
        *self.connections.lock().unwrap() += 1;
        Ok(MemoryConnection {
            store: Arc::clone(&self.store),
            faults: self.faults,
        })
    }

    async fn release(&self) {
        *self.released.lock().unwrap() = true;
    }
}

/// Shared view into a [`MemoryConnector`].
#[derive(Clone, Debug)]
pub struct MemoryProbe {
    store: Store,
    connections: Arc<Mutex<usize>>,
    released: Arc<Mutex<bool>>,
}

impl MemoryProbe {
    /// Names of all stored files or objects, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.store.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// The latest payload written under `name`.
    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.store.lock().unwrap().get(name).cloned()
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    /// Whether [`DataConnector::release`] was called.
    pub fn released(&self) -> bool {
        *self.released.lock().unwrap()
    }
}

/// A worker's connection to a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: Store,
    faults: Faults,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_for_write(&mut self, name: &str) -> Result<Box<dyn Writable>, ConnectError> {
        self.store
            .lock()
            .unwrap()
            .insert(name.to_owned(), Bytes::new());
        Ok(Box::new(MemoryWriter {
            store: Arc::clone(&self.store),
            name: name.to_owned(),
            remaining: self.faults.writes_before_failure,
        }))
    }

    async fn open_for_read(&mut self, name: &str) -> Result<Reader, ConnectError> {
        tokio::task::yield_now().await;
        if self.faults.fail_reads {
            return Err(io::Error::other(format!("injected read failure on {name}")).into());
        }
        let payload = self.store.lock().unwrap().get(name).cloned();
        match payload {
            Some(payload) => Ok(Box::pin(io::Cursor::new(payload))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, name.to_owned()).into()),
        }
    }
}

struct MemoryWriter {
    store: Store,
    name: String,
    remaining: Option<usize>,
}

#[async_trait]
impl Writable for MemoryWriter {
    async fn write(&mut self, payload: &Bytes) -> io::Result<()> {
        tokio::task::yield_now().await;
        match &mut self.remaining {
            Some(0) => return Err(io::Error::other("injected write failure")),
            Some(remaining) => *remaining -= 1,
            None => {}
        }
        self.store
            .lock()
            .unwrap()
            .insert(self.name.clone(), payload.clone());
        Ok(())
    }

    async fn finish(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
