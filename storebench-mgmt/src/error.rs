use std::fmt;

use reqwest::{Method, StatusCode};

/// Errors establishing an authenticated [`ManagementSession`](crate::ManagementSession).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The management endpoint could not be turned into a URL.
    #[error("invalid management endpoint `{endpoint}`")]
    InvalidEndpoint {
        /// The endpoint as given by the caller.
        endpoint: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The target did not answer the version discovery request.
    #[error("failed to query supported API versions from {target}")]
    VersionDiscovery {
        /// The management endpoint.
        target: String,
        /// The underlying transport or decoding error.
        #[source]
        source: reqwest::Error,
    },
    /// None of the versions offered by the target are supported by this client.
    #[error("{target} is incompatible with all supported REST API versions (offered: {offered:?})")]
    NoCommonVersion {
        /// The management endpoint.
        target: String,
        /// The versions the target advertised.
        offered: Vec<String>,
    },
    /// The login handshake returned a non-success status.
    #[error("login to {target} failed with status {status}")]
    Rejected {
        /// The management endpoint.
        target: String,
        /// The HTTP status returned by the login call.
        status: StatusCode,
    },
    /// The login handshake succeeded but did not hand out a session token.
    #[error("login to {target} returned no session token")]
    MissingToken {
        /// The management endpoint.
        target: String,
    },
    /// Any other error emitted from the underlying [`reqwest`] client.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// A single authenticated call to the management API failed.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// There is no session token, either because login never happened or the session was closed.
    #[error("not logged in to {target}, unable to send requests")]
    NotConnected {
        /// The management endpoint.
        target: String,
    },
    /// The resource path could not be joined onto the endpoint URL.
    #[error("invalid resource path `{path}`")]
    InvalidPath {
        /// The resource path.
        path: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The request never produced a response.
    #[error("{method} {path} did not complete")]
    Transport {
        /// HTTP method of the failed call.
        method: Method,
        /// Resource path of the failed call.
        path: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The response status was outside of the success range.
    #[error("{method} {path} did not succeed: {status}{}", Body(.body))]
    Status {
        /// HTTP method of the failed call.
        method: Method,
        /// Resource path of the failed call.
        path: String,
        /// The HTTP status returned.
        status: StatusCode,
        /// The (possibly empty) response body, for diagnostics.
        body: String,
    },
    /// The response body did not match the expected schema.
    #[error("failed to decode response of {path}")]
    Decode {
        /// Resource path of the failed call.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl RequestError {
    /// Returns the HTTP status if the remote answered with a non-success status.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if the target answered that the addressed resource does not exist.
    ///
    /// Lookups by name report an unknown name as `400 Bad Request` rather than `404`.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST)
        )
    }
}

struct Body<'a>(&'a str);

impl fmt::Display for Body<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.trim() {
            "" => Ok(()),
            body => write!(f, " ({body})"),
        }
    }
}

/// Listing network interfaces failed, so no data endpoints can be discovered.
#[derive(Debug, thiserror::Error)]
#[error("failed to list network interfaces")]
pub struct DiscoveryError(#[from] pub RequestError);

/// The kinds of transient resources a benchmark run creates.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    /// An NFS-exported file system.
    FileShare,
    /// An object store account.
    ObjectAccount,
    /// An object store user within an account.
    ObjectUser,
    /// An access key pair of an object store user.
    ObjectCredential,
    /// An object store bucket.
    Bucket,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FileShare => "file share",
            Self::ObjectAccount => "object store account",
            Self::ObjectUser => "object store user",
            Self::ObjectCredential => "object store access key",
            Self::Bucket => "bucket",
        })
    }
}

/// Creating or destroying a transient resource failed.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    /// A resource with the requested name already exists.
    #[error("{kind} `{name}` already exists")]
    AlreadyExists {
        /// Kind of the colliding resource.
        kind: ResourceKind,
        /// Name of the colliding resource.
        name: String,
    },
    /// A remote call of the given provisioning step failed.
    #[error("failed to {step} {kind} `{name}`")]
    Request {
        /// The step that failed, e.g. `create` or `eradicate`.
        step: &'static str,
        /// Kind of the affected resource.
        kind: ResourceKind,
        /// Name of the affected resource.
        name: String,
        /// The underlying request error.
        #[source]
        source: RequestError,
    },
    /// Creating an access key succeeded but the response held no key.
    #[error("creating access keys for `{user}` returned no credentials")]
    MissingCredential {
        /// The user the key was created for.
        user: String,
    },
}

impl ProvisioningError {
    pub(crate) fn request(
        step: &'static str,
        kind: ResourceKind,
        name: &str,
        source: RequestError,
    ) -> Self {
        if step == "create" && source.status() == Some(StatusCode::CONFLICT) {
            return Self::AlreadyExists {
                kind,
                name: name.to_owned(),
            };
        }

        Self::Request {
            step,
            kind,
            name: name.to_owned(),
            source,
        }
    }
}
