use std::time::Duration;

use storebench::connector::{DataConnector, Protocol};
use storebench::loadgen::{LoadGenerator, LoadSettings, Phase};
use storebench_test::connector::MemoryConnector;

fn settings(concurrency: usize) -> LoadSettings {
    LoadSettings {
        concurrency,
        payload_size: 64 * 1024,
        read_buffer_size: 16 * 1024,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_one_file_per_worker_and_reads_them_back() {
    storebench_test::tracing::init();
    let connector = MemoryConnector::new(Protocol::FileShare, "10.0.1.5");
    let probe = connector.probe();
    let mut generator = LoadGenerator::new(connector, settings(4)).await.unwrap();

    let written = generator.run_write_test(Duration::from_millis(100)).await;
    assert_eq!(written.phase, Phase::Writing);
    assert_eq!(written.workers, 4);
    assert_eq!(written.failures, 0);
    assert!(written.operations > 0);
    assert_eq!(written.bytes, written.operations * 64 * 1024);
    assert!(written.bytes_per_second() > 0.0);
    assert_eq!(
        probe.names(),
        ["filename1", "filename2", "filename3", "filename4"]
    );
    assert_eq!(probe.get("filename1").map(|b| b.len()), Some(64 * 1024));

    let read = generator.run_read_test(Duration::from_millis(100)).await;
    assert_eq!(read.phase, Phase::Reading);
    assert_eq!(read.workers, 4);
    assert_eq!(read.failures, 0);
    assert!(read.operations > 0);
    assert!(read.bytes >= read.operations * 64 * 1024);
    assert!(read.wall_time >= read.duration);
    assert_eq!(probe.connections(), 8);

    assert!(!probe.released());
    generator.release().await;
    assert!(probe.released());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn objects_are_named_per_worker() {
    let connector = MemoryConnector::new(Protocol::Object, "10.0.2.5");
    let probe = connector.probe();
    let mut generator = LoadGenerator::new(connector, settings(2)).await.unwrap();

    generator.run_write_test(Duration::from_millis(50)).await;

    assert_eq!(probe.names(), ["objname1", "objname2"]);
    assert_eq!(generator.objects_written(), 2);
    assert_eq!(generator.phase(), Phase::Idle);
}

#[tokio::test]
async fn unreachable_targets_are_released() {
    let connector = MemoryConnector::new(Protocol::FileShare, "10.9.9.9").make_unreachable();
    let probe = connector.probe();

    let error = LoadGenerator::new(connector, settings(2)).await.unwrap_err();

    assert_eq!(error.target, "10.9.9.9");
    assert_eq!(error.protocol, Protocol::FileShare);
    assert_eq!(error.to_string(), "nfs target 10.9.9.9 is unreachable");
    assert!(probe.released());
    assert_eq!(probe.connections(), 0);
}

#[tokio::test]
async fn zero_duration_reports_zero_rate() {
    let connector = MemoryConnector::new(Protocol::Object, "10.0.2.5");
    assert!(connector.verify_reachable().await.is_ok());
    let mut generator = LoadGenerator::new(connector, settings(1)).await.unwrap();

    let written = generator.run_write_test(Duration::ZERO).await;

    assert_eq!(written.bytes_per_second(), 0.0);
    assert_eq!(written.failures, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_writers_keep_the_bytes_they_wrote() {
    let connector = MemoryConnector::new(Protocol::FileShare, "10.0.1.5").fail_writes_after(3);
    let mut generator = LoadGenerator::new(connector, settings(4)).await.unwrap();

    let written = generator.run_write_test(Duration::from_millis(200)).await;

    assert_eq!(written.workers, 4);
    assert_eq!(written.failures, 4);
    assert_eq!(written.operations, 4 * 3);
    assert_eq!(written.bytes, 4 * 3 * 64 * 1024);
    assert_eq!(generator.objects_written(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_write_phase_skips_reading() {
    let connector = MemoryConnector::new(Protocol::Object, "10.0.2.5").fail_writes_after(0);
    let probe = connector.probe();
    let mut generator = LoadGenerator::new(connector, settings(3)).await.unwrap();

    let written = generator.run_write_test(Duration::from_millis(50)).await;
    assert_eq!(written.failures, 3);
    assert_eq!(written.operations, 0);
    assert_eq!(written.bytes, 0);
    assert_eq!(generator.objects_written(), 0);
    assert_eq!(probe.connections(), 3);

    let read = generator.run_read_test(Duration::from_millis(50)).await;
    assert_eq!(read.phase, Phase::Reading);
    assert_eq!(read.workers, 0);
    assert_eq!(read.failures, 0);
    assert_eq!(read.bytes_per_second(), 0.0);
    // No reader ever connected.
    assert_eq!(probe.connections(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_readers_are_counted_once_each() {
    let connector = MemoryConnector::new(Protocol::Object, "10.0.2.5").fail_reads();
    let mut generator = LoadGenerator::new(connector, settings(2)).await.unwrap();

    let written = generator.run_write_test(Duration::from_millis(50)).await;
    assert_eq!(written.failures, 0);

    let read = generator.run_read_test(Duration::from_millis(50)).await;
    assert_eq!(read.workers, 2);
    assert_eq!(read.failures, 2);
    assert_eq!(read.operations, 0);
    assert_eq!(read.bytes, 0);
}
