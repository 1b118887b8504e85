//! Request and response bodies of the management API.
//!
//! Only the attributes this client reads or writes are modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// Response of the version discovery endpoint.
#[derive(Debug, Deserialize)]
pub struct SupportedVersions {
    /// All REST API versions the target supports.
    pub versions: Vec<String>,
}

/// Pagination metadata attached to list responses.
#[derive(Debug, Default, Deserialize)]
pub struct PaginationInfo {
    /// Total number of items across all pages.
    #[serde(default)]
    pub total_item_count: Option<u64>,
    /// Token to request the next page with, if there is one.
    #[serde(default)]
    pub continuation_token: Option<String>,
}

/// A page of items returned by a list or create call.
#[derive(Debug, Deserialize)]
pub struct ItemsResponse<T> {
    /// Pagination metadata, if the target sent any.
    #[serde(default)]
    pub pagination_info: Option<PaginationInfo>,
    /// The items on this page.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> ItemsResponse<T> {
    /// Returns the token of the next page, ignoring empty tokens.
    pub fn continuation_token(&self) -> Option<&str> {
        self.pagination_info
            .as_ref()
            .and_then(|info| info.continuation_token.as_deref())
            .filter(|token| !token.is_empty())
    }
}

/// A reference to another resource by name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Reference {
    /// Name of the referenced resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Identifier of the referenced resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

impl Reference {
    /// Creates a reference to the resource with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: String::new(),
        }
    }
}

/// A network interface of the array.
#[derive(Clone, Debug, Deserialize)]
pub struct NetworkInterface {
    /// Interface name.
    #[serde(default)]
    pub name: String,
    /// IP address of the interface.
    pub address: String,
    /// The services offered on this interface, e.g. `data` or `management`.
    #[serde(default)]
    pub services: Vec<String>,
    /// The subnet this interface belongs to.
    #[serde(default)]
    pub subnet: Reference,
}

/// NFS export settings of a file system.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NfsRule {
    /// Whether the file system is exported over NFS at all.
    pub enabled: bool,
    /// Whether NFSv3 is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v3_enabled: Option<bool>,
    /// Whether NFSv4.1 is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4_1_enabled: Option<bool>,
    /// Export rules, e.g. `*(rw,no_root_squash)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
}

/// A file system, used both to create and to patch file systems.
///
/// Every field is optional so that a patch only carries the attributes it changes.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FileSystem {
    /// Name of the file system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Provisioned size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned: Option<u64>,
    /// Soft-delete marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroyed: Option<bool>,
    /// NFS export settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs: Option<NfsRule>,
}

/// Body to create an access key for a user.
#[derive(Debug, Serialize)]
pub struct AccessKeyPost {
    /// The user, addressed as `<account>/<user>`.
    pub user: Reference,
}

/// An object store access key.
#[derive(Clone, Deserialize)]
pub struct AccessKey {
    /// The access key id, which is also the name of the resource.
    pub name: String,
    /// The secret key. Only returned once, on creation.
    #[serde(default)]
    pub secret_access_key: String,
    /// The user owning this key.
    #[serde(default)]
    pub user: Reference,
    /// Whether the key is active.
    #[serde(default)]
    pub enabled: bool,
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey")
            .field("name", &self.name)
            .field("secret_access_key", &"[redacted]")
            .field("user", &self.user)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Body to create a bucket.
#[derive(Debug, Serialize)]
pub struct BucketPost {
    /// The account owning the bucket.
    pub account: Reference,
}

/// Body to patch a bucket.
#[derive(Debug, Default, Serialize)]
pub struct BucketPatch {
    /// Soft-delete marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destroyed: Option<bool>,
}
