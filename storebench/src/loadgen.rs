//! The time-boxed, concurrent throughput benchmark shared by all protocols.
//!
//! A [`LoadGenerator`] drives `concurrency` workers against a single [`DataConnector`], first
//! writing a fixed payload in a tight loop, then reading the written files or objects back. Every
//! worker has its own connection and its own file or object, so workers never coordinate with each
//! other. The coordinator starts the workers, sleeps for the test window, raises the stop signal
//! and joins them.
//!
//! Workers only observe the stop signal between operations: an operation in flight when the window
//! closes completes and is still counted. Throughput is always computed over the nominal window,
//! so the measured [`wall_time`](PhaseMetrics::wall_time) may slightly exceed it. There is no
//! timeout on individual operations; a hung connection stalls the whole phase.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use bytesize::ByteSize;
use sketches_ddsketch::DDSketch;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::connector::{ConnectError, Connection, DataConnector, Protocol};
use crate::payload;

/// Payload written per operation to file shares.
pub const DEFAULT_FILE_PAYLOAD: ByteSize = ByteSize::mib(1);
/// Payload written per operation to objects.
pub const DEFAULT_OBJECT_PAYLOAD: ByteSize = ByteSize::mib(8);
/// Size of the buffer used to drain files and objects in the read phase.
pub const DEFAULT_READ_BUFFER: ByteSize = ByteSize::kib(512);

/// The phase a [`LoadGenerator`] is in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// No test is running.
    Idle,
    /// Workers are writing.
    Writing,
    /// Workers are reading.
    Reading,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Writing => "write",
            Self::Reading => "read",
        })
    }
}

/// The target did not pass its pre-flight check.
///
/// This is a per-target failure: the run records it and continues with the next target.
#[derive(Debug, thiserror::Error)]
#[error("{protocol} target {target} is unreachable")]
pub struct UnreachableTargetError {
    /// The address of the target.
    pub target: String,
    /// The protocol the target was tested with.
    pub protocol: Protocol,
    /// What went wrong.
    #[source]
    pub source: ConnectError,
}

/// Sizing of a load test.
#[derive(Clone, Debug)]
pub struct LoadSettings {
    /// Number of parallel workers.
    pub concurrency: usize,
    /// Bytes written per write operation.
    pub payload_size: usize,
    /// Bytes requested per read call.
    pub read_buffer_size: usize,
}

impl LoadSettings {
    /// Default sizing for `protocol` with the given number of workers.
    pub fn for_protocol(protocol: Protocol, concurrency: usize) -> Self {
        let payload = match protocol {
            Protocol::FileShare => DEFAULT_FILE_PAYLOAD,
            Protocol::Object => DEFAULT_OBJECT_PAYLOAD,
        };

        Self {
            concurrency,
            payload_size: payload.as_u64() as usize,
            read_buffer_size: DEFAULT_READ_BUFFER.as_u64() as usize,
        }
    }
}

/// The outcome of a single write or read phase.
pub struct PhaseMetrics {
    /// Which phase was run.
    pub phase: Phase,
    /// Number of workers that were started.
    pub workers: usize,
    /// Total bytes transferred by all workers.
    pub bytes: u64,
    /// Completed writes, or completely drained files and objects for reads.
    pub operations: u64,
    /// Workers that stopped early because of an error.
    pub failures: u64,
    /// The nominal test window.
    pub duration: Duration,
    /// Time from starting the first worker until the last one exited.
    pub wall_time: Duration,
    /// Latency of every completed operation, in seconds.
    pub timing: DDSketch,
}

impl PhaseMetrics {
    fn empty(phase: Phase, duration: Duration) -> Self {
        Self {
            phase,
            workers: 0,
            bytes: 0,
            operations: 0,
            failures: 0,
            duration,
            wall_time: Duration::ZERO,
            timing: DDSketch::default(),
        }
    }

    /// Aggregate throughput over the nominal test window.
    pub fn bytes_per_second(&self) -> f64 {
        throughput(self.bytes, self.duration)
    }
}

impl fmt::Debug for PhaseMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseMetrics")
            .field("phase", &self.phase)
            .field("workers", &self.workers)
            .field("bytes", &self.bytes)
            .field("operations", &self.operations)
            .field("failures", &self.failures)
            .field("duration", &self.duration)
            .field("wall_time", &self.wall_time)
            .field("timed_operations", &self.timing.count())
            .finish()
    }
}

/// Bytes per second transferred over `duration`.
pub fn throughput(bytes: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        bytes as f64 / seconds
    } else {
        0.0
    }
}

/// Totals of one phase. Every worker adds to them exactly once, when it exits.
#[derive(Debug, Default)]
struct PhaseCounters {
    bytes: AtomicU64,
    operations: AtomicU64,
    failures: AtomicU64,
}

impl PhaseCounters {
    fn add(&self, tally: &Tally) {
        self.bytes.fetch_add(tally.bytes, Ordering::Relaxed);
        self.operations.fetch_add(tally.operations, Ordering::Relaxed);
        self.failures.fetch_add(tally.failures, Ordering::Relaxed);
    }
}

/// A worker's private counters, kept out of shared memory during the hot loop.
#[derive(Default)]
struct Tally {
    bytes: u64,
    operations: u64,
    failures: u64,
    timing: DDSketch,
}

/// Runs write and read tests against one target.
#[derive(Debug)]
pub struct LoadGenerator<C> {
    connector: Arc<C>,
    settings: LoadSettings,
    phase: Phase,
    objects_written: usize,
}

impl<C: DataConnector> LoadGenerator<C> {
    /// Verifies that the target is reachable and prepares a load generator for it.
    ///
    /// If verification fails, everything the connector acquired is released again.
    pub async fn new(connector: C, settings: LoadSettings) -> Result<Self, UnreachableTargetError> {
        if let Err(source) = connector.verify_reachable().await {
            connector.release().await;
            return Err(UnreachableTargetError {
                target: connector.target().to_owned(),
                protocol: connector.protocol(),
                source,
            });
        }

        Ok(Self {
            connector: Arc::new(connector),
            settings,
            phase: Phase::Idle,
            objects_written: 0,
        })
    }

    /// The connector driven by this load generator.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The phase currently running.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The number of files or objects available to the read phase.
    pub fn objects_written(&self) -> usize {
        self.objects_written
    }

    /// Writes to `concurrency` files or objects for `duration`.
    pub async fn run_write_test(&mut self, duration: Duration) -> PhaseMetrics {
        let metrics = self
            .run_phase(Phase::Writing, self.settings.concurrency, duration)
            .await;

        self.objects_written = if metrics.operations > 0 {
            self.settings.concurrency
        } else {
            0
        };

        metrics
    }

    /// Reads back everything the write phase produced for `duration`.
    ///
    /// Without a successful write phase there is nothing to read. In that case no worker is
    /// started and the returned metrics report a rate of zero.
    pub async fn run_read_test(&mut self, duration: Duration) -> PhaseMetrics {
        if self.objects_written == 0 {
            tracing::warn!(
                target_address = self.connector.target(),
                protocol = %self.connector.protocol(),
                "unable to run read test, nothing was written"
            );
            return PhaseMetrics::empty(Phase::Reading, duration);
        }

        self.run_phase(Phase::Reading, self.objects_written, duration)
            .await
    }

    /// Releases the connector, e.g. unmounting the share.
    pub async fn release(self) {
        self.connector.release().await;
    }

    async fn run_phase(&mut self, phase: Phase, workers: usize, duration: Duration) -> PhaseMetrics {
        self.phase = phase;
        let protocol = self.connector.protocol();
        tracing::debug!(
            target_address = self.connector.target(),
            %protocol,
            %phase,
            workers,
            ?duration,
            "starting phase"
        );

        let stop = CancellationToken::new();
        let counters = Arc::new(PhaseCounters::default());
        let start = Instant::now();

        let tasks: Vec<_> = (1..=workers)
            .map(|index| {
                let worker = Worker {
                    connector: Arc::clone(&self.connector),
                    name: protocol.target_name(index),
                    stop: stop.clone(),
                    counters: Arc::clone(&counters),
                };
                match phase {
                    Phase::Reading => tokio::spawn(worker.read(self.settings.read_buffer_size)),
                    _ => tokio::spawn(worker.write(self.settings.payload_size)),
                }
            })
            .collect();

        tokio::time::sleep(duration).await;
        stop.cancel();

        let finished = futures::future::join_all(tasks).await;
        let wall_time = start.elapsed();

        let mut timing = DDSketch::default();
        for result in finished {
            match result {
                Ok(sketch) => {
                    if let Err(error) = timing.merge(&sketch) {
                        tracing::warn!(%error, "failed to merge worker timings");
                    }
                }
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        "load worker panicked"
                    );
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.phase = Phase::Idle;
        PhaseMetrics {
            phase,
            workers,
            bytes: counters.bytes.load(Ordering::Relaxed),
            operations: counters.operations.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            duration,
            wall_time,
            timing,
        }
    }
}

struct Worker<C> {
    connector: Arc<C>,
    name: String,
    stop: CancellationToken,
    counters: Arc<PhaseCounters>,
}

impl<C: DataConnector> Worker<C> {
    async fn write(self, payload_size: usize) -> DDSketch {
        let payload = payload::random(payload_size);
        let mut tally = Tally::default();
        let result = self.write_loop(&payload, &mut tally).await;
        self.finish(Phase::Writing, result, tally)
    }

    async fn write_loop(&self, payload: &Bytes, tally: &mut Tally) -> Result<(), ConnectError> {
        let mut connection = self.connector.connect().await?;
        let mut writer = connection.open_for_write(&self.name).await?;

        while !self.stop.is_cancelled() {
            let start = Instant::now();
            writer.write(payload).await?;
            tally.bytes += payload.len() as u64;
            tally.operations += 1;
            tally.timing.add(start.elapsed().as_secs_f64());
        }

        writer.finish().await?;
        Ok(())
    }

    async fn read(self, buffer_size: usize) -> DDSketch {
        let mut tally = Tally::default();
        let result = self.read_loop(buffer_size, &mut tally).await;
        self.finish(Phase::Reading, result, tally)
    }

    async fn read_loop(&self, buffer_size: usize, tally: &mut Tally) -> Result<(), ConnectError> {
        let mut connection = self.connector.connect().await?;
        let mut buffer = vec![0; buffer_size.max(1)];

        while !self.stop.is_cancelled() {
            let start = Instant::now();
            let mut reader = connection.open_for_read(&self.name).await?;

            loop {
                if self.stop.is_cancelled() {
                    return Ok(());
                }
                let read = reader.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                tally.bytes += read as u64;
            }

            tally.operations += 1;
            tally.timing.add(start.elapsed().as_secs_f64());
        }

        Ok(())
    }

    fn finish(&self, phase: Phase, result: Result<(), ConnectError>, mut tally: Tally) -> DDSketch {
        if let Err(error) = result {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                target_address = self.connector.target(),
                name = %self.name,
                %phase,
                "load worker failed"
            );
            tally.failures += 1;
        }

        self.counters.add(&tally);
        tally.timing
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use crate::connector::{Reader, Writable};

    #[derive(Default)]
    struct CountingConnector {
        connections: AtomicUsize,
    }

    struct Sink;

    #[async_trait]
    impl Writable for Sink {
        async fn write(&mut self, _payload: &Bytes) -> io::Result<()> {
            tokio::task::yield_now().await;
            Ok(())
        }

        async fn finish(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    struct SinkConnection;

    #[async_trait]
    impl Connection for SinkConnection {
        async fn open_for_write(&mut self, _name: &str) -> Result<Box<dyn Writable>, ConnectError> {
            Ok(Box::new(Sink))
        }

        async fn open_for_read(&mut self, _name: &str) -> Result<Reader, ConnectError> {
            tokio::task::yield_now().await;
            Ok(Box::pin(&b"0123456789"[..]))
        }
    }

    #[async_trait]
    impl DataConnector for CountingConnector {
        type Connection = SinkConnection;

        fn protocol(&self) -> Protocol {
            Protocol::Object
        }

        fn target(&self) -> &str {
            "counting"
        }

        async fn verify_reachable(&self) -> Result<(), ConnectError> {
            Ok(())
        }

        async fn connect(&self) -> Result<Self::Connection, ConnectError> {
            self.connections.fetch_add(1, Ordering::Relaxed);
            Ok(SinkConnection)
        }
    }

    fn settings(concurrency: usize) -> LoadSettings {
        LoadSettings {
            concurrency,
            payload_size: 16,
            read_buffer_size: 4,
        }
    }

    #[test]
    fn throughput_is_bytes_over_duration() {
        let counts = [3_000_u64, 0, 17, 1_000_000];
        let counters = PhaseCounters::default();
        for bytes in counts {
            counters.add(&Tally {
                bytes,
                ..Default::default()
            });
        }

        let total = counters.bytes.load(Ordering::Relaxed);
        assert_eq!(total, counts.iter().sum::<u64>());
        assert_eq!(
            throughput(total, Duration::from_secs(4)),
            1_003_017.0 / 4.0
        );
        assert_eq!(throughput(total, Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn read_before_write_starts_no_workers() {
        let mut generator = LoadGenerator::new(CountingConnector::default(), settings(4))
            .await
            .unwrap();

        let metrics = generator.run_read_test(Duration::from_millis(10)).await;

        assert_eq!(metrics.bytes_per_second(), 0.0);
        assert_eq!(metrics.workers, 0);
        assert_eq!(generator.connector().connections.load(Ordering::Relaxed), 0);
        assert_eq!(generator.phase(), Phase::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_then_read() {
        let mut generator = LoadGenerator::new(CountingConnector::default(), settings(3))
            .await
            .unwrap();

        let written = generator.run_write_test(Duration::from_millis(50)).await;
        assert_eq!(written.workers, 3);
        assert_eq!(written.failures, 0);
        assert!(written.operations > 0);
        assert_eq!(written.bytes, written.operations * 16);
        assert_eq!(written.timing.count() as u64, written.operations);
        assert!(written.wall_time >= written.duration);
        assert_eq!(generator.objects_written(), 3);

        let read = generator.run_read_test(Duration::from_millis(50)).await;
        assert_eq!(read.workers, 3);
        assert_eq!(read.failures, 0);
        assert!(read.bytes > 0);
        assert_eq!(generator.connector().connections.load(Ordering::Relaxed), 6);
    }
}
