//! S3 data connector, using the AWS SDK against an S3-compatible data endpoint.

use std::fmt;
use std::io;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Builder as ConfigBuilder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use storebench_mgmt::models::AccessKey;

use super::{ConnectError, Connection, DataConnector, Protocol, Reader, Writable};

/// Static S3 credentials.
#[derive(Clone)]
pub struct S3Credentials {
    /// The access key id.
    pub access_key_id: String,
    /// The secret access key.
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[redacted]")
            .finish()
    }
}

impl From<AccessKey> for S3Credentials {
    fn from(key: AccessKey) -> Self {
        Self {
            access_key_id: key.name,
            secret_access_key: key.secret_access_key,
        }
    }
}

/// Settings shared by all object connectors of a run.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ObjectSettings {
    /// URL scheme of the data endpoint, usually `http`.
    pub scheme: String,
    /// Region to sign requests for. S3-compatible arrays generally ignore it.
    pub region: String,
}

impl Default for ObjectSettings {
    fn default() -> Self {
        Self {
            scheme: "http".into(),
            region: "us-east-1".into(),
        }
    }
}

/// Benchmarks a single bucket behind a data endpoint.
#[derive(Debug)]
pub struct ObjectConnector {
    address: String,
    bucket: String,
    credentials: S3Credentials,
    settings: ObjectSettings,
}

impl ObjectConnector {
    /// Creates a connector for `bucket` on the data endpoint `address`.
    pub fn new(
        address: impl Into<String>,
        bucket: impl Into<String>,
        credentials: S3Credentials,
        settings: ObjectSettings,
    ) -> Self {
        Self {
            address: address.into(),
            bucket: bucket.into(),
            credentials,
            settings,
        }
    }

    fn endpoint_url(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("{}://{}", self.settings.scheme, self.address)
        }
    }

    /// Builds a fresh client with its own connection pool.
    fn client(&self) -> Client {
        let credentials = Credentials::new(
            &self.credentials.access_key_id,
            &self.credentials.secret_access_key,
            None,
            None,
            "storebench",
        );

        let config = ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(self.endpoint_url())
            .region(Region::new(self.settings.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Client::from_conf(config)
    }
}

#[async_trait]
impl DataConnector for ObjectConnector {
    type Connection = ObjectConnection;

    fn protocol(&self) -> Protocol {
        Protocol::Object
    }

    fn target(&self) -> &str {
        &self.address
    }

    async fn verify_reachable(&self) -> Result<(), ConnectError> {
        let client = self.client();
        let mut pages = client
            .list_objects_v2()
            .bucket(&self.bucket)
            .into_paginator()
            .send();

        let mut count = 0;
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| {
                ConnectError::object(format!("listing bucket {}", self.bucket), err)
            })?;
            count += page.contents().len();
        }

        if count != 0 {
            tracing::warn!(
                bucket = %self.bucket,
                count,
                "expected zero objects in new bucket"
            );
        }
        Ok(())
    }

    async fn connect(&self) -> Result<Self::Connection, ConnectError> {
        Ok(ObjectConnection {
            client: self.client(),
            bucket: self.bucket.clone(),
        })
    }
}

/// A worker's own S3 client, bound to the benchmark bucket.
#[derive(Debug)]
pub struct ObjectConnection {
    client: Client,
    bucket: String,
}

#[async_trait]
impl Connection for ObjectConnection {
    async fn open_for_write(&mut self, name: &str) -> Result<Box<dyn Writable>, ConnectError> {
        Ok(Box::new(ObjectWriter {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: name.to_owned(),
        }))
    }

    async fn open_for_read(&mut self, name: &str) -> Result<Reader, ConnectError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|err| ConnectError::object(format!("fetching object {name}"), err))?;

        Ok(Box::pin(object.body.into_async_read()))
    }
}

/// Uploads the payload as a whole object on every write.
struct ObjectWriter {
    client: Client,
    bucket: String,
    key: String,
}

#[async_trait]
impl Writable for ObjectWriter {
    async fn write(&mut self, payload: &Bytes) -> io::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(payload.clone()))
            .send()
            .await
            .map_err(io::Error::other)?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}
