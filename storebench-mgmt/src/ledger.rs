use std::fmt;

use crate::{ProvisioningError, ResourceKind, ResourceProvisioner};

/// A resource created for the duration of a single benchmark run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransientResource {
    /// An NFS-exported file share.
    FileShare(String),
    /// An object store account.
    ObjectAccount(String),
    /// An object store user within an account.
    ObjectUser {
        /// The user name, without the account.
        name: String,
        /// The account the user belongs to.
        account: String,
    },
    /// An access key, identified by its key id.
    ObjectCredential(String),
    /// A bucket.
    Bucket(String),
}

impl TransientResource {
    /// The kind of this resource.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::FileShare(_) => ResourceKind::FileShare,
            Self::ObjectAccount(_) => ResourceKind::ObjectAccount,
            Self::ObjectUser { .. } => ResourceKind::ObjectUser,
            Self::ObjectCredential(_) => ResourceKind::ObjectCredential,
            Self::Bucket(_) => ResourceKind::Bucket,
        }
    }

    /// Runs the teardown sequence matching this resource's kind.
    pub async fn destroy(
        &self,
        provisioner: &ResourceProvisioner<'_>,
    ) -> Result<(), ProvisioningError> {
        match self {
            Self::FileShare(name) => provisioner.destroy_file_share(name).await,
            Self::ObjectAccount(name) => provisioner.destroy_object_account(name).await,
            Self::ObjectUser { name, account } => {
                provisioner.destroy_object_user(name, account).await
            }
            Self::ObjectCredential(name) => provisioner.destroy_credential(name).await,
            Self::Bucket(name) => provisioner.destroy_bucket(name).await,
        }
    }
}

impl fmt::Display for TransientResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileShare(name)
            | Self::ObjectAccount(name)
            | Self::ObjectCredential(name)
            | Self::Bucket(name) => write!(f, "{} `{name}`", self.kind()),
            Self::ObjectUser { name, account } => write!(f, "{} `{account}/{name}`", self.kind()),
        }
    }
}

/// Keeps track of every transient resource that still has to be torn down.
///
/// Resources are recorded right after they were created. Teardown happens in reverse creation
/// order so that dependents (keys, users, buckets) go before what they depend on (accounts).
#[derive(Debug, Default)]
pub struct ResourceLedger {
    resources: Vec<TransientResource>,
}

impl ResourceLedger {
    /// Records a freshly created resource.
    pub fn record(&mut self, resource: TransientResource) {
        tracing::trace!(%resource, "recorded transient resource");
        self.resources.push(resource);
    }

    /// The resources that are still alive, in creation order.
    pub fn resources(&self) -> &[TransientResource] {
        &self.resources
    }

    /// Returns `true` if there is nothing left to tear down.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Destroys a single resource right away and forgets about it.
    ///
    /// The teardown is attempted exactly once. On failure the resource is forgotten as well, so it
    /// is not retried by [`teardown`](Self::teardown); the error is handed back for reporting.
    pub async fn release(
        &mut self,
        provisioner: &ResourceProvisioner<'_>,
        resource: &TransientResource,
    ) -> Result<(), ProvisioningError> {
        if let Some(position) = self.resources.iter().rposition(|r| r == resource) {
            self.resources.remove(position);
        }
        resource.destroy(provisioner).await
    }

    /// Destroys every remaining resource in reverse creation order.
    ///
    /// Every resource is attempted, regardless of earlier failures. All errors are logged and
    /// returned; the ledger is empty afterwards.
    pub async fn teardown(
        &mut self,
        provisioner: &ResourceProvisioner<'_>,
    ) -> Vec<ProvisioningError> {
        let mut errors = Vec::new();

        while let Some(resource) = self.resources.pop() {
            if let Err(error) = resource.destroy(provisioner).await {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    %resource,
                    "failed to tear down transient resource"
                );
                errors.push(error);
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_kind_and_name() {
        let user = TransientResource::ObjectUser {
            name: "bench".into(),
            account: "acct".into(),
        };
        assert_eq!(user.to_string(), "object store user `acct/bench`");
        assert_eq!(
            TransientResource::FileShare("fs1".into()).to_string(),
            "file share `fs1`"
        );
    }

    #[test]
    fn records_in_creation_order() {
        let mut ledger = ResourceLedger::default();
        assert!(ledger.is_empty());

        ledger.record(TransientResource::ObjectAccount("acct".into()));
        ledger.record(TransientResource::Bucket("b1".into()));

        assert_eq!(
            ledger.resources(),
            [
                TransientResource::ObjectAccount("acct".into()),
                TransientResource::Bucket("b1".into()),
            ]
        );
    }
}
