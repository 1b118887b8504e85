//! Configuration for a benchmark run.
//!
//! Configuration is merged from the following sources, later ones overriding earlier ones:
//!
//! 1. Defaults
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Environment variables (prefixed with `STOREBENCH__`)
//! 4. Command line flags
//!
//! # Environment Variables
//!
//! Environment variables use `STOREBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `STOREBENCH__MANAGEMENT__ENDPOINT=array-mgmt.example.com`
//! - `STOREBENCH__MANAGEMENT__API_TOKEN=T-1234`
//! - `STOREBENCH__DURATION=30s`
//!
//! # YAML Configuration File
//!
//! ```yaml
//! management:
//!   endpoint: array-mgmt.example.com
//!   api_token: T-1234
//! duration: 30s
//! file_share:
//!   mount_options: vers=3,nolock
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};

use crate::connector::{FileShareSettings, ObjectSettings, Protocol};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "STOREBENCH__";

/// Below this many cores, the client is likely the bottleneck of the benchmark.
pub const RECOMMENDED_CORES: usize = 12;

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// The secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Access to the management API of the array.
///
/// Required unless an explicit [`Target`] is configured.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Management {
    /// Host name or URL of the management endpoint.
    ///
    /// # Environment Variables
    ///
    /// - `STOREBENCH__MANAGEMENT__ENDPOINT`
    pub endpoint: Option<String>,

    /// Static API token exchanged for a session on login.
    ///
    /// # Environment Variables
    ///
    /// - `STOREBENCH__MANAGEMENT__API_TOKEN`
    pub api_token: Option<SecretBox<ConfigSecret>>,

    /// Whether to validate the TLS certificate of the management endpoint.
    ///
    /// # Default
    ///
    /// `false`, since arrays commonly use self-signed certificates.
    pub verify_certificates: bool,

    /// Timeout for every management request.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Management {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            verify_certificates: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Naming and sizing of the transient resources created for a run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Resources {
    /// Prefix of every resource name. The short host name and a per-target suffix are appended.
    ///
    /// # Default
    ///
    /// `"deleteme-storebench"`
    pub prefix: String,

    /// Provisioned size of benchmark file shares. The array default applies when unset.
    pub file_share_size: Option<ByteSize>,

    /// NFS export rules of benchmark file shares. The array default applies when unset.
    pub export_rules: Option<String>,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            prefix: "deleteme-storebench".into(),
            file_share_size: None,
            export_rules: None,
        }
    }
}

/// An explicit target that bypasses provisioning.
///
/// If [`address`](Self::address) is set, no management session is opened. The file share is
/// tested if [`export`](Self::export) or [`mount_path`](Self::mount_path) is set, the bucket if
/// [`bucket`](Self::bucket) is set.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Target {
    /// Data endpoint address.
    pub address: Option<String>,
    /// NFS export path on the target, e.g. `/bench`.
    pub export: Option<String>,
    /// Directory where the export is already mounted.
    pub mount_path: Option<PathBuf>,
    /// Bucket to benchmark.
    pub bucket: Option<String>,
    /// S3 access key id.
    ///
    /// # Environment Variables
    ///
    /// - `STOREBENCH__TARGET__ACCESS_KEY_ID`
    pub access_key_id: Option<String>,
    /// S3 secret access key.
    ///
    /// # Environment Variables
    ///
    /// - `STOREBENCH__TARGET__SECRET_ACCESS_KEY`
    pub secret_access_key: Option<SecretBox<ConfigSecret>>,
}

/// Runtime configuration of a benchmark run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Management API access.
    pub management: Management,

    /// Length of each write and read phase.
    ///
    /// # Default
    ///
    /// `60s`
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Number of parallel workers. Defaults per protocol when unset, see
    /// [`concurrency`](Self::concurrency).
    pub concurrency: Option<usize>,

    /// Skip file share tests.
    pub skip_file_share: bool,

    /// Skip object tests.
    pub skip_object: bool,

    /// Transient resources.
    pub resources: Resources,

    /// How file shares are mounted.
    pub file_share: FileShareSettings,

    /// How object endpoints are addressed.
    pub object: ObjectSettings,

    /// Explicit target, bypassing provisioning.
    pub target: Target,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            management: Management::default(),
            duration: Duration::from_secs(60),
            concurrency: None,
            skip_file_share: false,
            skip_object: false,
            resources: Resources::default(),
            file_share: FileShareSettings::default(),
            object: ObjectSettings::default(),
            target: Target::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, the optional YAML file at `path`, and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }

    /// The protocols to test, in test order.
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols = Vec::with_capacity(2);
        if !self.skip_file_share {
            protocols.push(Protocol::FileShare);
        }
        if !self.skip_object {
            protocols.push(Protocol::Object);
        }
        protocols
    }

    /// Number of workers for `protocol`.
    ///
    /// Unless configured explicitly, file shares get two workers per core and objects one.
    pub fn concurrency(&self, protocol: Protocol) -> usize {
        if let Some(concurrency) = self.concurrency {
            return concurrency.max(1);
        }

        let cores = num_cpus::get();
        match protocol {
            Protocol::FileShare => cores * 2,
            Protocol::Object => cores,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("STOREBENCH__MANAGEMENT__ENDPOINT", "array.example.com");
            jail.set_env("STOREBENCH__MANAGEMENT__API_TOKEN", "T-1234");
            jail.set_env("STOREBENCH__DURATION", "5s");
            jail.set_env("STOREBENCH__SKIP_OBJECT", "true");
            jail.set_env("STOREBENCH__FILE_SHARE__MOUNT_OPTIONS", "vers=4.1");

            let config = Config::load(None).unwrap();

            assert_eq!(
                config.management.endpoint.as_deref(),
                Some("array.example.com")
            );
            let token = config.management.api_token.as_ref().unwrap();
            assert_eq!(token.expose_secret().as_str(), "T-1234");
            assert_eq!(config.duration, Duration::from_secs(5));
            assert_eq!(config.protocols(), [Protocol::FileShare]);
            assert_eq!(config.file_share.mount_options, "vers=4.1");
            assert_eq!(config.file_share.mount_command, "mount");

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            duration: 2m
            concurrency: 4
            resources:
                prefix: bench
                file_share_size: 10 GiB
            target:
                address: 10.0.0.5
                bucket: b1
                access_key_id: AKID
                secret_access_key: hunter2
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.duration, Duration::from_secs(120));
            assert_eq!(config.concurrency(Protocol::Object), 4);
            assert_eq!(config.resources.prefix, "bench");
            assert_eq!(config.resources.file_share_size, Some(ByteSize::gib(10)));
            assert_eq!(config.target.address.as_deref(), Some("10.0.0.5"));
            assert_eq!(config.target.bucket.as_deref(), Some("b1"));

            let secret = config.target.secret_access_key.as_ref().unwrap();
            assert_eq!(secret.expose_secret().as_str(), "hunter2");
            assert!(!format!("{config:?}").contains("hunter2"));

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(b"management:\n  endpoint: from-file\n")
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("STOREBENCH__MANAGEMENT__ENDPOINT", "from-env");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.management.endpoint.as_deref(), Some("from-env"));

            Ok(())
        });
    }

    #[test]
    fn default_concurrency_per_protocol() {
        let config = Config::default();
        let cores = num_cpus::get();

        assert_eq!(config.concurrency(Protocol::FileShare), cores * 2);
        assert_eq!(config.concurrency(Protocol::Object), cores);
        assert_eq!(config.protocols(), [Protocol::FileShare, Protocol::Object]);
    }
}
