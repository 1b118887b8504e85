use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;

use crate::config::Config;
use crate::observability;
use crate::run::{self, LiveConnectors};

/// Measures sustained NFS and S3 throughput of a storage array.
///
/// Without --target, transient file shares and buckets are provisioned through the management API
/// configured in STOREBENCH__MANAGEMENT__ENDPOINT and STOREBENCH__MANAGEMENT__API_TOKEN, and torn
/// down again after the run.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// skip the NFS tests
    #[argh(switch)]
    skip_nfs: bool,

    /// skip the S3 tests
    #[argh(switch)]
    skip_s3: bool,

    /// length of each write and read phase, e.g. `60s` or `2m`
    #[argh(option, from_str_fn(parse_duration))]
    duration: Option<Duration>,

    /// number of parallel workers per target
    #[argh(option)]
    concurrency: Option<usize>,

    /// data endpoint to test directly, bypassing provisioning
    #[argh(option)]
    target: Option<String>,

    /// NFS export to test on the explicit target
    #[argh(option)]
    export: Option<String>,

    /// bucket to test on the explicit target
    #[argh(option)]
    bucket: Option<String>,

    /// directory where the explicit target's export is already mounted
    #[argh(option)]
    mount_path: Option<PathBuf>,
}

impl Args {
    /// Applies flags on top of the loaded configuration.
    fn apply(self, config: &mut Config) {
        config.skip_file_share |= self.skip_nfs;
        config.skip_object |= self.skip_s3;

        if let Some(duration) = self.duration {
            config.duration = duration;
        }
        if self.concurrency.is_some() {
            config.concurrency = self.concurrency;
        }
        if self.target.is_some() {
            config.target.address = self.target;
        }
        if self.export.is_some() {
            config.target.export = self.export;
        }
        if self.bucket.is_some() {
            config.target.bucket = self.bucket;
        }
        if self.mount_path.is_some() {
            config.target.mount_path = self.mount_path;
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

/// Bootstrap the runtime and execute the benchmark.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("storebench")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing();
    tracing::debug!(?config);

    let connectors = LiveConnectors::from_config(&config);
    let report = runtime.block_on(run::run(&config, &connectors))?;
    report.print();

    Ok(())
}

#[cfg(test)]
mod tests {
    use argh::FromArgs;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["storebench"], args).unwrap()
    }

    #[test]
    fn flags_override_config() {
        let mut config = Config::default();
        config.concurrency = Some(8);

        parse(&[
            "--skip-s3",
            "--duration",
            "90s",
            "--target",
            "10.0.0.7",
            "--export",
            "/bench",
        ])
        .apply(&mut config);

        assert!(!config.skip_file_share);
        assert!(config.skip_object);
        assert_eq!(config.duration, Duration::from_secs(90));
        assert_eq!(config.concurrency, Some(8));
        assert_eq!(config.target.address.as_deref(), Some("10.0.0.7"));
        assert_eq!(config.target.export.as_deref(), Some("/bench"));
    }

    #[test]
    fn rejects_invalid_durations() {
        assert!(Args::from_args(&["storebench"], &["--duration", "soon"]).is_err());
    }
}
