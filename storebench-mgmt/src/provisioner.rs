use std::collections::BTreeMap;
use std::fmt;

use reqwest::Method;
use serde_json::json;

use crate::models::{
    AccessKey, AccessKeyPost, BucketPatch, BucketPost, FileSystem, ItemsResponse,
    NetworkInterface, NfsRule, Reference,
};
use crate::{DiscoveryError, ManagementSession, ProvisioningError, RequestError, ResourceKind};

const NETWORK_INTERFACES: &str = "network-interfaces";
const FILE_SYSTEMS: &str = "file-systems";
const OBJECT_STORE_ACCOUNTS: &str = "object-store-accounts";
const OBJECT_STORE_USERS: &str = "object-store-users";
const OBJECT_STORE_ACCESS_KEYS: &str = "object-store-access-keys";
const BUCKETS: &str = "buckets";

/// The service an interface advertises, as far as benchmarking is concerned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointRole {
    /// Carries client I/O traffic.
    Data,
    /// Carries management traffic only.
    Control,
}

/// A network address of the array, along with its subnet and role.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkEndpoint {
    /// IP address or host name to connect to.
    pub address: String,
    /// Name of the subnet the address belongs to.
    pub subnet: String,
    /// The service this endpoint serves.
    pub role: EndpointRole,
}

impl From<NetworkInterface> for NetworkEndpoint {
    fn from(interface: NetworkInterface) -> Self {
        let role = if interface.services.iter().any(|service| service == "data") {
            EndpointRole::Data
        } else {
            EndpointRole::Control
        };
        Self {
            address: interface.address,
            subnet: interface.subnet.name,
            role,
        }
    }
}

/// Data endpoints grouped by subnet, ordered by subnet name.
///
/// Endpoints within a subnet keep the order in which the array listed them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SubnetEndpoints(BTreeMap<String, Vec<NetworkEndpoint>>);

impl SubnetEndpoints {
    /// Groups the data endpoints among `endpoints` by subnet, dropping all others.
    pub fn from_endpoints(endpoints: impl IntoIterator<Item = NetworkEndpoint>) -> Self {
        let mut subnets = BTreeMap::<String, Vec<NetworkEndpoint>>::new();
        for endpoint in endpoints {
            if endpoint.role == EndpointRole::Data {
                subnets
                    .entry(endpoint.subnet.clone())
                    .or_default()
                    .push(endpoint);
            }
        }
        Self(subnets)
    }

    /// Returns `true` if no subnet has a data endpoint.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of subnets with at least one data endpoint.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over subnets and their data endpoints.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[NetworkEndpoint])> {
        self.0
            .iter()
            .map(|(subnet, endpoints)| (subnet.as_str(), endpoints.as_slice()))
    }

    /// Picks the single endpoint to test per subnet: the first one listed.
    pub fn one_per_subnet(&self) -> impl Iterator<Item = &NetworkEndpoint> {
        self.0.values().filter_map(|endpoints| endpoints.first())
    }
}

/// Options to create a file share with.
#[derive(Clone, Debug)]
pub struct FileShareOptions {
    /// Enable NFSv3 on the export.
    pub nfs_v3: bool,
    /// Enable NFSv4.1 on the export.
    pub nfs_v4_1: bool,
    /// Provisioned (quota) size in bytes. The array picks its default when unset.
    pub provisioned: Option<u64>,
    /// NFS export rules. The array picks its default when unset.
    pub export_rules: Option<String>,
}

impl Default for FileShareOptions {
    fn default() -> Self {
        Self {
            nfs_v3: true,
            nfs_v4_1: false,
            provisioned: None,
            export_rules: None,
        }
    }
}

/// Creates and destroys the transient resources of a benchmark run.
///
/// Every method issues its remote calls sequentially on the shared [`ManagementSession`]. None of
/// them retry on failure.
pub struct ResourceProvisioner<'a> {
    session: &'a ManagementSession,
}

impl fmt::Debug for ResourceProvisioner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceProvisioner")
            .field("target", &self.session.target())
            .finish_non_exhaustive()
    }
}

impl<'a> ResourceProvisioner<'a> {
    /// Creates a provisioner that issues its calls over `session`.
    pub fn new(session: &'a ManagementSession) -> Self {
        Self { session }
    }

    /// Lists all network interfaces and groups those advertising the `data` service by subnet.
    ///
    /// An array without data endpoints yields an empty grouping rather than an error.
    pub async fn discover_data_endpoints(&self) -> Result<SubnetEndpoints, DiscoveryError> {
        let interfaces: Vec<NetworkInterface> =
            self.session.list_all(NETWORK_INTERFACES, &[]).await?;
        tracing::debug!(count = interfaces.len(), "listed network interfaces");

        Ok(SubnetEndpoints::from_endpoints(
            interfaces.into_iter().map(NetworkEndpoint::from),
        ))
    }

    /// Checks whether a file share of the given name exists, destroyed or not.
    pub async fn file_share_exists(&self, name: &str) -> Result<bool, RequestError> {
        let result = self
            .session
            .request_json::<ItemsResponse<FileSystem>>(
                Method::GET,
                FILE_SYSTEMS,
                &[("names", name)],
                None,
            )
            .await;

        match result {
            Ok(page) => Ok(!page.items.is_empty()),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Creates an NFS-exported file share.
    ///
    /// A name collision is a caller error: the existing share is left untouched. If the lookup
    /// itself fails, creation is attempted anyway and the array decides.
    pub async fn create_file_share(
        &self,
        name: &str,
        options: &FileShareOptions,
    ) -> Result<(), ProvisioningError> {
        let kind = ResourceKind::FileShare;
        let exists = match self.file_share_exists(name).await {
            Ok(exists) => exists,
            Err(error) => {
                tracing::warn!(
                    name,
                    error = &error as &dyn std::error::Error,
                    "file share lookup failed, creating anyway"
                );
                false
            }
        };
        if exists {
            return Err(ProvisioningError::AlreadyExists {
                kind,
                name: name.to_owned(),
            });
        }

        let file_system = FileSystem {
            name: Some(name.to_owned()),
            provisioned: options.provisioned,
            destroyed: None,
            nfs: Some(NfsRule {
                enabled: true,
                v3_enabled: Some(options.nfs_v3),
                v4_1_enabled: Some(options.nfs_v4_1),
                rules: options.export_rules.clone(),
            }),
        };

        self.call(Method::POST, FILE_SYSTEMS, &[], Some(encode(&file_system)))
            .await
            .map_err(|err| ProvisioningError::request("create", kind, name, err))?;
        tracing::info!(name, "created file share");
        Ok(())
    }

    /// Tears down a file share in three irreversible steps: disable the NFS export, destroy
    /// (soft-delete), and eradicate (hard-delete).
    ///
    /// If disabling or destroying fails, eradication is skipped and the error is returned. There
    /// is no automatic retry.
    pub async fn destroy_file_share(&self, name: &str) -> Result<(), ProvisioningError> {
        let kind = ResourceKind::FileShare;
        let query = [("names", name)];

        let disable = FileSystem {
            nfs: Some(NfsRule::default()),
            ..Default::default()
        };
        self.call(Method::PATCH, FILE_SYSTEMS, &query, Some(encode(&disable)))
            .await
            .map_err(|err| ProvisioningError::request("disable the export of", kind, name, err))?;

        let destroy = FileSystem {
            destroyed: Some(true),
            ..Default::default()
        };
        self.call(Method::PATCH, FILE_SYSTEMS, &query, Some(encode(&destroy)))
            .await
            .map_err(|err| ProvisioningError::request("destroy", kind, name, err))?;

        self.call(Method::DELETE, FILE_SYSTEMS, &query, None)
            .await
            .map_err(|err| ProvisioningError::request("eradicate", kind, name, err))?;

        tracing::info!(name, "eradicated file share");
        Ok(())
    }

    /// Creates an object store account.
    pub async fn create_object_account(&self, name: &str) -> Result<(), ProvisioningError> {
        self.call(Method::POST, OBJECT_STORE_ACCOUNTS, &[("names", name)], None)
            .await
            .map_err(|err| {
                ProvisioningError::request("create", ResourceKind::ObjectAccount, name, err)
            })?;
        tracing::info!(name, "created object store account");
        Ok(())
    }

    /// Deletes an object store account.
    pub async fn destroy_object_account(&self, name: &str) -> Result<(), ProvisioningError> {
        self.call(Method::DELETE, OBJECT_STORE_ACCOUNTS, &[("names", name)], None)
            .await
            .map_err(|err| {
                ProvisioningError::request("delete", ResourceKind::ObjectAccount, name, err)
            })?;
        tracing::info!(name, "deleted object store account");
        Ok(())
    }

    /// Creates an object store user within `account`.
    pub async fn create_object_user(
        &self,
        name: &str,
        account: &str,
    ) -> Result<(), ProvisioningError> {
        let qualified = qualified_user(name, account);
        self.call(Method::POST, OBJECT_STORE_USERS, &[("names", qualified.as_str())], None)
            .await
            .map_err(|err| {
                ProvisioningError::request("create", ResourceKind::ObjectUser, &qualified, err)
            })?;
        tracing::info!(user = %qualified, "created object store user");
        Ok(())
    }

    /// Deletes an object store user within `account`.
    pub async fn destroy_object_user(
        &self,
        name: &str,
        account: &str,
    ) -> Result<(), ProvisioningError> {
        let qualified = qualified_user(name, account);
        self.call(Method::DELETE, OBJECT_STORE_USERS, &[("names", qualified.as_str())], None)
            .await
            .map_err(|err| {
                ProvisioningError::request("delete", ResourceKind::ObjectUser, &qualified, err)
            })?;
        tracing::info!(user = %qualified, "deleted object store user");
        Ok(())
    }

    /// Creates an access key pair for the user `name` within `account`.
    ///
    /// The secret is only ever returned by this call.
    pub async fn create_credential(
        &self,
        name: &str,
        account: &str,
    ) -> Result<AccessKey, ProvisioningError> {
        let qualified = qualified_user(name, account);
        let post = AccessKeyPost {
            user: Reference::named(qualified.as_str()),
        };

        let response: ItemsResponse<AccessKey> = self
            .session
            .request_json(
                Method::POST,
                OBJECT_STORE_ACCESS_KEYS,
                &[],
                Some(encode(&post)),
            )
            .await
            .map_err(|err| {
                let kind = ResourceKind::ObjectCredential;
                ProvisioningError::request("create", kind, &qualified, err)
            })?;

        let key = response
            .items
            .into_iter()
            .next()
            .ok_or(ProvisioningError::MissingCredential { user: qualified })?;
        tracing::info!(key = %key.name, "created object store access key");
        Ok(key)
    }

    /// Deletes the access key with the given key id.
    pub async fn destroy_credential(&self, name: &str) -> Result<(), ProvisioningError> {
        self.call(Method::DELETE, OBJECT_STORE_ACCESS_KEYS, &[("names", name)], None)
            .await
            .map_err(|err| {
                ProvisioningError::request("delete", ResourceKind::ObjectCredential, name, err)
            })?;
        tracing::info!(key = name, "deleted object store access key");
        Ok(())
    }

    /// Creates a bucket owned by the account `owner`.
    pub async fn create_bucket(&self, name: &str, owner: &str) -> Result<(), ProvisioningError> {
        let post = BucketPost {
            account: Reference::named(owner),
        };
        self.call(Method::POST, BUCKETS, &[("names", name)], Some(encode(&post)))
            .await
            .map_err(|err| ProvisioningError::request("create", ResourceKind::Bucket, name, err))?;
        tracing::info!(name, owner, "created bucket");
        Ok(())
    }

    /// Tears down a bucket in two steps: destroy (soft-delete), then eradicate.
    ///
    /// If destroying fails, eradication is skipped and the error is returned.
    pub async fn destroy_bucket(&self, name: &str) -> Result<(), ProvisioningError> {
        let kind = ResourceKind::Bucket;
        let query = [("names", name)];
        let patch = BucketPatch {
            destroyed: Some(true),
        };

        self.call(Method::PATCH, BUCKETS, &query, Some(encode(&patch)))
            .await
            .map_err(|err| ProvisioningError::request("destroy", kind, name, err))?;
        self.call(Method::DELETE, BUCKETS, &query, None)
            .await
            .map_err(|err| ProvisioningError::request("eradicate", kind, name, err))?;

        tracing::info!(name, "eradicated bucket");
        Ok(())
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<(), RequestError> {
        self.session.request(method, path, query, body).await?;
        Ok(())
    }
}

fn qualified_user(name: &str, account: &str) -> String {
    format!("{account}/{name}")
}

fn encode<T: serde::Serialize>(body: &T) -> serde_json::Value {
    // Request bodies only hold strings, bools and integers, which always serialize.
    serde_json::to_value(body).unwrap_or_else(|_| json!({}))
}
