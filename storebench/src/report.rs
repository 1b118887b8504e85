//! Per-target results and their presentation.

use std::fmt::{self, Write as _};
use std::time::Duration;

use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::connector::Protocol;
use crate::loadgen::PhaseMetrics;

/// A throughput in bytes per second, displayed with SI (base 1000) units.
///
/// ```
/// use storebench::report::ByteRate;
///
/// assert_eq!(ByteRate(1_500_000.0).to_string(), "1.5 MB/s");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct ByteRate(pub f64);

impl fmt::Display for ByteRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNIT: f64 = 1000.0;
        const PREFIXES: [char; 6] = ['k', 'M', 'G', 'T', 'P', 'E'];

        let rate = self.0;
        if rate < UNIT {
            return write!(f, "{rate:.1} B/s");
        }

        let mut divisor = UNIT;
        let mut exponent = 0;
        while rate / divisor >= UNIT && exponent < PREFIXES.len() - 1 {
            divisor *= UNIT;
            exponent += 1;
        }

        write!(f, "{:.1} {}B/s", rate / divisor, PREFIXES[exponent])
    }
}

/// How testing a single target ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Both phases ran.
    Success,
    /// The object endpoint could not be reached.
    ConnectFailed,
    /// The file share could not be mounted.
    MountFailed,
}

impl Outcome {
    /// The outcome for a target that failed its pre-flight check.
    pub fn unreachable(protocol: Protocol) -> Self {
        match protocol {
            Protocol::FileShare => Self::MountFailed,
            Protocol::Object => Self::ConnectFailed,
        }
    }

    /// The outcome as printed in the report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::ConnectFailed => "FAILED TO CONNECT",
            Self::MountFailed => "MOUNT FAILED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of testing one target over one protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRecord {
    /// The data endpoint that was tested.
    pub target: String,
    /// The protocol it was tested with.
    pub protocol: Protocol,
    /// How the test ended.
    pub outcome: Outcome,
    /// Write throughput, if the test ran.
    pub write_rate: Option<ByteRate>,
    /// Read throughput, if the test ran.
    pub read_rate: Option<ByteRate>,
}

impl ResultRecord {
    /// A record of a completed test.
    pub fn success(
        target: impl Into<String>,
        protocol: Protocol,
        write_rate: ByteRate,
        read_rate: ByteRate,
    ) -> Self {
        Self {
            target: target.into(),
            protocol,
            outcome: Outcome::Success,
            write_rate: Some(write_rate),
            read_rate: Some(read_rate),
        }
    }

    /// A record of a target that could not be tested.
    pub fn failed(target: impl Into<String>, protocol: Protocol, outcome: Outcome) -> Self {
        Self {
            target: target.into(),
            protocol,
            outcome,
            write_rate: None,
            read_rate: None,
        }
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rate = |rate: Option<ByteRate>| match rate {
            Some(rate) => rate.to_string(),
            None => "-".to_owned(),
        };

        write!(
            f,
            "{},{},{},{},{}",
            self.target,
            self.protocol,
            self.outcome,
            rate(self.write_rate),
            rate(self.read_rate)
        )
    }
}

/// All results of a run, in the order targets were tested.
#[derive(Debug, Default)]
pub struct Report {
    records: Vec<ResultRecord>,
    teardown_errors: Vec<String>,
}

impl Report {
    /// The CSV header of [`to_csv`](Self::to_csv).
    pub const HEADER: &'static str = "target,protocol,result,write_tput,read_tput";

    /// Appends a result.
    pub fn record(&mut self, record: ResultRecord) {
        self.records.push(record);
    }

    /// Notes a resource that could not be torn down.
    pub fn record_teardown_error(&mut self, error: impl fmt::Display) {
        self.teardown_errors.push(error.to_string());
    }

    /// All results so far.
    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Results for one protocol.
    pub fn records_for(&self, protocol: Protocol) -> impl Iterator<Item = &ResultRecord> {
        self.records.iter().filter(move |r| r.protocol == protocol)
    }

    /// Descriptions of everything that could not be cleaned up.
    pub fn teardown_errors(&self) -> &[String] {
        &self.teardown_errors
    }

    /// Renders the header and one line per result.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from(Self::HEADER);
        csv.push('\n');
        for record in &self.records {
            let _ = writeln!(csv, "{record}");
        }
        csv
    }

    /// Prints the results to stdout, followed by teardown failures.
    pub fn print(&self) {
        println!();
        println!("{}", "## RESULTS".bold());
        print!("{}", self.to_csv());

        if !self.teardown_errors.is_empty() {
            println!();
            println!("{}", "## LEAKED RESOURCES".bold().red());
            for error in &self.teardown_errors {
                println!("  {error}");
            }
        }
    }
}

/// Prints a human-readable summary of one phase.
pub fn print_phase(target: &str, protocol: Protocol, metrics: &PhaseMetrics) {
    let title = format!("{}:", metrics.phase.to_string().to_uppercase());
    print!(
        "{} {} {} ({} ops, {} workers",
        title.bold().green(),
        target.bold().blue(),
        protocol,
        metrics.operations.bold(),
        metrics.workers
    );
    if metrics.failures > 0 {
        print!(", {}", format!("{} FAILURES", metrics.failures).bold().red());
    }
    println!(")");

    print_ops(metrics.operations, metrics.duration);
    println!(", {}", ByteRate(metrics.bytes_per_second()).bold());
    if metrics.wall_time > metrics.duration {
        println!(
            "  wall time: {:.2?} (window {:.2?})",
            metrics.wall_time, metrics.duration
        );
    }
    print_percentiles(&metrics.timing);
}

fn print_ops(operations: u64, duration: Duration) {
    let ops_ps = operations as f64 / duration.as_secs_f64().max(f64::EPSILON);
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_percentiles(sketch: &DDSketch) {
    let ops = sketch.count();
    if ops == 0 {
        return;
    }

    let quantile = |q| {
        let seconds = sketch.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(seconds.max(0.0))
    };
    let avg = Duration::from_secs_f64(sketch.sum().unwrap_or_default().max(0.0) / ops as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn si_byte_rates() {
        assert_eq!(ByteRate(0.0).to_string(), "0.0 B/s");
        assert_eq!(ByteRate(999.0).to_string(), "999.0 B/s");
        assert_eq!(ByteRate(1000.0).to_string(), "1.0 kB/s");
        assert_eq!(ByteRate(1_500_000.0).to_string(), "1.5 MB/s");
        assert_eq!(ByteRate(2.4e9).to_string(), "2.4 GB/s");
        assert_eq!(ByteRate(3e21).to_string(), "3000.0 EB/s");
    }

    #[test]
    fn unreachable_outcome_depends_on_protocol() {
        assert_eq!(
            Outcome::unreachable(Protocol::FileShare).as_str(),
            "MOUNT FAILED"
        );
        assert_eq!(
            Outcome::unreachable(Protocol::Object).as_str(),
            "FAILED TO CONNECT"
        );
    }

    #[test]
    fn renders_csv() {
        let mut report = Report::default();
        report.record(ResultRecord::success(
            "10.0.1.5",
            Protocol::FileShare,
            ByteRate(2_000_000_000.0),
            ByteRate(3_100_000_000.0),
        ));
        report.record(ResultRecord::failed(
            "10.0.2.5",
            Protocol::Object,
            Outcome::ConnectFailed,
        ));

        assert_eq!(
            report.to_csv(),
            "target,protocol,result,write_tput,read_tput\n\
             10.0.1.5,nfs,SUCCESS,2.0 GB/s,3.1 GB/s\n\
             10.0.2.5,s3,FAILED TO CONNECT,-,-\n"
        );
        assert_eq!(report.records_for(Protocol::Object).count(), 1);
    }
}
