use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

/// Directives for the crates a benchmark run talks through. Lowered to the configured level by
/// the output layer.
const DEFAULT_DIRECTIVES: &str = "INFO,\
    aws_smithy_runtime=WARN,\
    aws_config=WARN,\
    hyper_util=WARN,\
    storebench=TRACE,\
    storebench_mgmt=TRACE";

/// Logs to stderr, so that stdout only carries phase summaries and the report.
///
/// `RUST_LOG` may be a plain level such as `debug`, or a full filter that is used verbatim.
pub fn init_tracing() {
    let rust_log = env::var(EnvFilter::DEFAULT_ENV).ok();
    let (level, env_filter) = log_filter(rust_log.as_deref());
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

fn log_filter(rust_log: Option<&str>) -> (LevelFilter, EnvFilter) {
    let Some(value) = rust_log else {
        return (LevelFilter::INFO, EnvFilter::new(DEFAULT_DIRECTIVES));
    };

    match value.trim().parse::<LevelFilter>() {
        Ok(level) => (level, EnvFilter::new(DEFAULT_DIRECTIVES)),
        Err(_) => (LevelFilter::TRACE, EnvFilter::new(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info() {
        let (level, _) = log_filter(None);
        assert_eq!(level, LevelFilter::INFO);
    }

    #[test]
    fn plain_level_keeps_default_directives() {
        let (level, filter) = log_filter(Some("debug"));
        assert_eq!(level, LevelFilter::DEBUG);
        assert!(filter.to_string().contains("hyper_util"));
    }

    #[test]
    fn directives_are_used_verbatim() {
        let (level, filter) = log_filter(Some("reqwest=debug"));
        assert_eq!(level, LevelFilter::TRACE);
        let filter = filter.to_string();
        assert!(filter.contains("reqwest"));
        assert!(!filter.contains("hyper_util"));
    }
}
