//! Orchestration of a complete benchmark run.
//!
//! In the default, provisioned mode the run connects to the management API, discovers one data
//! endpoint per subnet, and creates a fresh file share and bucket for every endpoint it tests.
//! Everything it creates is recorded in a [`ResourceLedger`] and torn down again, whether the tests
//! succeed or not. With an explicit [`Target`](crate::config::Target), the given address is tested
//! directly and no management session is opened.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::ExposeSecret;
use storebench_mgmt::{
    FileShareOptions, ManagementSession, ResourceLedger, ResourceProvisioner, SubnetEndpoints,
    TransientResource,
};

use crate::config::{Config, Management, RECOMMENDED_CORES};
use crate::connector::{
    DataConnector, FileShareConnector, FileShareSettings, ObjectConnector, ObjectSettings,
    Protocol, S3Credentials,
};
use crate::loadgen::{LoadGenerator, LoadSettings};
use crate::report::{self, ByteRate, Outcome, Report, ResultRecord};

/// Creates the [`DataConnector`]s for the targets of a run.
pub trait Connectors: Send + Sync {
    /// Connector for file shares.
    type FileShare: DataConnector;
    /// Connector for buckets.
    type Object: DataConnector;

    /// A connector for `export` on the data endpoint `address`.
    fn file_share(&self, address: &str, export: &str) -> Self::FileShare;

    /// A connector for `bucket` on the data endpoint `address`.
    fn object(&self, address: &str, bucket: &str, credentials: &S3Credentials) -> Self::Object;
}

/// Connects to real arrays over NFS and S3.
#[derive(Debug, Default)]
pub struct LiveConnectors {
    file_share: FileShareSettings,
    object: ObjectSettings,
    mount_path: Option<PathBuf>,
}

impl LiveConnectors {
    /// Creates connectors with the settings of `config`.
    ///
    /// A configured mount path is only honored for an explicit target.
    pub fn from_config(config: &Config) -> Self {
        let mount_path = match config.target.address {
            Some(_) => config.target.mount_path.clone(),
            None => None,
        };

        Self {
            file_share: config.file_share.clone(),
            object: config.object.clone(),
            mount_path,
        }
    }
}

impl Connectors for LiveConnectors {
    type FileShare = FileShareConnector;
    type Object = ObjectConnector;

    fn file_share(&self, address: &str, export: &str) -> Self::FileShare {
        match &self.mount_path {
            Some(path) => FileShareConnector::premounted(address, path),
            None => FileShareConnector::new(address, export, self.file_share.clone()),
        }
    }

    fn object(&self, address: &str, bucket: &str, credentials: &S3Credentials) -> Self::Object {
        ObjectConnector::new(address, bucket, credentials.clone(), self.object.clone())
    }
}

/// Names of the transient resources of a run.
///
/// Per-target resources carry the index of their target, so a share or bucket that failed to tear
/// down never blocks the next target.
#[derive(Clone, Debug)]
pub struct ResourceNames {
    base: String,
}

impl ResourceNames {
    /// Derives names from `prefix` and `host`.
    pub fn new(prefix: &str, host: &str) -> Self {
        Self {
            base: format!("{prefix}-{host}").to_lowercase(),
        }
    }

    /// Derives names from `prefix` and the short name of this host.
    pub fn for_this_host(prefix: &str) -> Self {
        Self::new(prefix, &short_hostname())
    }

    /// The file share for the target with the given 1-based index.
    pub fn file_share(&self, index: usize) -> String {
        format!("{}-fs{index}", self.base)
    }

    /// The object store account.
    pub fn account(&self) -> String {
        format!("{}-account", self.base)
    }

    /// The object store user.
    pub fn user(&self) -> String {
        format!("{}-user", self.base)
    }

    /// The bucket for the target with the given 1-based index.
    pub fn bucket(&self, index: usize) -> String {
        format!("{}-bucket{index}", self.base)
    }
}

/// The host name up to the first dot, or `null` if it cannot be determined.
///
/// Dots are not valid in resource names.
pub fn short_hostname() -> String {
    let hostname = match hostname::get() {
        Ok(hostname) => hostname.to_string_lossy().into_owned(),
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "unable to determine host name"
            );
            return "null".to_owned();
        }
    };

    match hostname.split('.').next() {
        Some(short) if !short.is_empty() => short.to_owned(),
        _ => "null".to_owned(),
    }
}

/// Runs all configured tests and returns their results.
///
/// # Errors
///
/// Fails if the management session cannot be established, if no data endpoint is found, or if a
/// resource cannot be created. Per-target connection failures are part of the report instead.
pub async fn run<C: Connectors>(config: &Config, connectors: &C) -> Result<Report> {
    let cores = num_cpus::get();
    if cores < RECOMMENDED_CORES {
        tracing::warn!(
            cores,
            recommended = RECOMMENDED_CORES,
            "few cores available, the client may become the bottleneck"
        );
    }

    let runner = Runner {
        config,
        connectors,
        names: ResourceNames::for_this_host(&config.resources.prefix),
    };

    match config.target.address.as_deref() {
        Some(address) => runner.run_explicit(address).await,
        None => runner.run_provisioned().await,
    }
}

struct Runner<'a, C> {
    config: &'a Config,
    connectors: &'a C,
    names: ResourceNames,
}

impl<C: Connectors> Runner<'_, C> {
    fn load_settings(&self, protocol: Protocol) -> LoadSettings {
        LoadSettings::for_protocol(protocol, self.config.concurrency(protocol))
    }

    async fn run_explicit(&self, address: &str) -> Result<Report> {
        let target = &self.config.target;
        let duration = self.config.duration;
        let mut report = Report::default();

        for protocol in self.config.protocols() {
            match protocol {
                Protocol::FileShare => {
                    if target.export.is_some() || target.mount_path.is_some() {
                        let export = target.export.as_deref().unwrap_or_default();
                        let connector = self.connectors.file_share(address, export);
                        let settings = self.load_settings(Protocol::FileShare);
                        report.record(test_target(connector, settings, duration).await);
                    } else {
                        tracing::info!("no export or mount path given, skipping file share test");
                    }
                }
                Protocol::Object => {
                    if let Some(bucket) = &target.bucket {
                        let access_key_id = target
                            .access_key_id
                            .clone()
                            .context("an S3 access key id is required to test a bucket")?;
                        let secret_access_key = target
                            .secret_access_key
                            .as_ref()
                            .context("an S3 secret access key is required to test a bucket")?
                            .expose_secret()
                            .as_str()
                            .to_owned();
                        let credentials = S3Credentials {
                            access_key_id,
                            secret_access_key,
                        };

                        let connector = self.connectors.object(address, bucket, &credentials);
                        let settings = self.load_settings(Protocol::Object);
                        report.record(test_target(connector, settings, duration).await);
                    } else {
                        tracing::info!("no bucket given, skipping object test");
                    }
                }
            }
        }

        if report.records().is_empty() {
            bail!("nothing to test on {address}: configure an export, a mount path or a bucket");
        }
        Ok(report)
    }

    async fn run_provisioned(&self) -> Result<Report> {
        let mut session = connect_session(&self.config.management).await?;
        tracing::info!(
            endpoint = session.target(),
            version = session.version(),
            "connected to management endpoint"
        );

        let mut report = Report::default();
        let result = {
            let provisioner = ResourceProvisioner::new(&session);
            let mut ledger = ResourceLedger::default();

            let result = self
                .provisioned_tests(&provisioner, &mut ledger, &mut report)
                .await;

            for error in ledger.teardown(&provisioner).await {
                report.record_teardown_error(error);
            }
            result
        };

        session.close().await;
        result.map(|()| report)
    }

    async fn provisioned_tests(
        &self,
        provisioner: &ResourceProvisioner<'_>,
        ledger: &mut ResourceLedger,
        report: &mut Report,
    ) -> Result<()> {
        let endpoints = provisioner
            .discover_data_endpoints()
            .await
            .context("failed to discover data endpoints")?;
        if endpoints.is_empty() {
            bail!("found no data endpoints, unable to proceed");
        }

        tracing::info!(
            subnets = endpoints.len(),
            "found subnets with data endpoints, testing one endpoint per subnet"
        );
        for (subnet, candidates) in endpoints.iter() {
            tracing::debug!(subnet, candidates = candidates.len(), "data endpoints");
        }

        for protocol in self.config.protocols() {
            match protocol {
                Protocol::FileShare => {
                    self.file_share_tests(provisioner, &endpoints, ledger, report)
                        .await?
                }
                Protocol::Object => {
                    self.object_tests(provisioner, &endpoints, ledger, report)
                        .await?
                }
            }
        }

        Ok(())
    }

    async fn file_share_tests(
        &self,
        provisioner: &ResourceProvisioner<'_>,
        endpoints: &SubnetEndpoints,
        ledger: &mut ResourceLedger,
        report: &mut Report,
    ) -> Result<()> {
        let resources = &self.config.resources;
        let options = FileShareOptions {
            provisioned: resources.file_share_size.map(|size| size.as_u64()),
            export_rules: resources.export_rules.clone(),
            ..Default::default()
        };
        let settings = self.load_settings(Protocol::FileShare);

        for (index, endpoint) in endpoints.one_per_subnet().enumerate() {
            let name = self.names.file_share(index + 1);
            provisioner
                .create_file_share(&name, &options)
                .await
                .with_context(|| format!("failed to create file share {name}"))?;
            let share = TransientResource::FileShare(name.clone());
            ledger.record(share.clone());

            tracing::info!(
                subnet = %endpoint.subnet,
                address = %endpoint.address,
                share = %name,
                "testing file share"
            );
            let connector = self.connectors.file_share(&endpoint.address, &format!("/{name}"));
            let record = test_target(connector, settings.clone(), self.config.duration).await;
            report.record(record);

            release(provisioner, ledger, &share, report).await;
        }

        Ok(())
    }

    async fn object_tests(
        &self,
        provisioner: &ResourceProvisioner<'_>,
        endpoints: &SubnetEndpoints,
        ledger: &mut ResourceLedger,
        report: &mut Report,
    ) -> Result<()> {
        let account = self.names.account();
        provisioner
            .create_object_account(&account)
            .await
            .with_context(|| format!("failed to create object store account {account}"))?;
        ledger.record(TransientResource::ObjectAccount(account.clone()));

        let user = self.names.user();
        provisioner
            .create_object_user(&user, &account)
            .await
            .with_context(|| format!("failed to create object store user {user}"))?;
        ledger.record(TransientResource::ObjectUser {
            name: user.clone(),
            account: account.clone(),
        });

        let key = provisioner
            .create_credential(&user, &account)
            .await
            .with_context(|| format!("failed to create access key for {user}"))?;
        ledger.record(TransientResource::ObjectCredential(key.name.clone()));
        let credentials = S3Credentials::from(key);

        let settings = self.load_settings(Protocol::Object);
        for (index, endpoint) in endpoints.one_per_subnet().enumerate() {
            let name = self.names.bucket(index + 1);
            provisioner
                .create_bucket(&name, &account)
                .await
                .with_context(|| format!("failed to create bucket {name}"))?;
            let bucket = TransientResource::Bucket(name.clone());
            ledger.record(bucket.clone());

            tracing::info!(
                subnet = %endpoint.subnet,
                address = %endpoint.address,
                bucket = %name,
                "testing bucket"
            );
            let connector = self
                .connectors
                .object(&endpoint.address, &name, &credentials);
            let record = test_target(connector, settings.clone(), self.config.duration).await;
            report.record(record);

            release(provisioner, ledger, &bucket, report).await;
        }

        Ok(())
    }
}

async fn connect_session(management: &Management) -> Result<ManagementSession> {
    let endpoint = management
        .endpoint
        .as_deref()
        .context("no management endpoint configured (STOREBENCH__MANAGEMENT__ENDPOINT)")?;
    let api_token = management
        .api_token
        .as_ref()
        .context("no management API token configured (STOREBENCH__MANAGEMENT__API_TOKEN)")?;

    ManagementSession::builder(endpoint)
        .api_token(api_token.expose_secret().as_str())
        .verify_certificates(management.verify_certificates)
        .timeout(management.timeout)
        .connect()
        .await
        .with_context(|| format!("failed to connect to management endpoint {endpoint}"))
}

/// Tears down a per-target resource right after its test. Failures end up in the report.
async fn release(
    provisioner: &ResourceProvisioner<'_>,
    ledger: &mut ResourceLedger,
    resource: &TransientResource,
    report: &mut Report,
) {
    if let Err(error) = ledger.release(provisioner, resource).await {
        tracing::error!(
            error = &error as &dyn std::error::Error,
            %resource,
            "failed to tear down transient resource"
        );
        report.record_teardown_error(error);
    }
}

/// Runs the write and read phases against a single target.
///
/// An unreachable target is not an error, it is recorded as a failed outcome.
pub async fn test_target<D: DataConnector>(
    connector: D,
    settings: LoadSettings,
    duration: Duration,
) -> ResultRecord {
    let target = connector.target().to_owned();
    let protocol = connector.protocol();

    let mut generator = match LoadGenerator::new(connector, settings).await {
        Ok(generator) => generator,
        Err(error) => {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                "skipping unreachable target"
            );
            return ResultRecord::failed(target, protocol, Outcome::unreachable(protocol));
        }
    };

    let message = format!("Running {protocol} write test on {target}:");
    let written = with_spinner(message, generator.run_write_test(duration)).await;
    report::print_phase(&target, protocol, &written);

    let message = format!("Running {protocol} read test on {target}:");
    let read = with_spinner(message, generator.run_read_test(duration)).await;
    report::print_phase(&target, protocol, &read);

    generator.release().await;

    ResultRecord::success(
        target,
        protocol,
        ByteRate(written.bytes_per_second()),
        ByteRate(read.bytes_per_second()),
    )
}

async fn with_spinner<F: Future>(message: String, future: F) -> F::Output {
    let bar = ProgressBar::new_spinner().with_message(message);
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {elapsed}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));

    let output = future.await;
    bar.finish_and_clear();
    output
}
