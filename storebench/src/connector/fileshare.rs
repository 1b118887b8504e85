//! NFS data connector.
//!
//! The share is mounted through the operating system once per target, on a temporary directory.
//! Every worker then opens its own file handles below the mount point, so the kernel client does
//! the protocol work and the connector only deals with regular files.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{ConnectError, Connection, DataConnector, Protocol, Reader, Writable};

/// Options passed to `mount -t nfs -o <options>`.
pub const DEFAULT_MOUNT_OPTIONS: &str = "vers=3,nolock,rsize=524288,wsize=524288";

/// How file shares are mounted.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FileShareSettings {
    /// The mount command to invoke.
    pub mount_command: String,
    /// The unmount command to invoke with the mount point.
    pub umount_command: String,
    /// Comma separated NFS mount options.
    pub mount_options: String,
}

impl Default for FileShareSettings {
    fn default() -> Self {
        Self {
            mount_command: "mount".into(),
            umount_command: "umount".into(),
            mount_options: DEFAULT_MOUNT_OPTIONS.into(),
        }
    }
}

#[derive(Debug)]
enum Source {
    Remote {
        host: String,
        export: String,
        settings: FileShareSettings,
    },
    Premounted(PathBuf),
}

#[derive(Debug)]
struct MountPoint {
    path: PathBuf,
    /// Whether this connector mounted the share and has to unmount it again.
    owned: bool,
}

/// Benchmarks a single exported file share.
#[derive(Debug)]
pub struct FileShareConnector {
    target: String,
    source: Source,
    mount: Mutex<Option<MountPoint>>,
}

impl FileShareConnector {
    /// Creates a connector that mounts `host:export` when verified.
    pub fn new(
        host: impl Into<String>,
        export: impl Into<String>,
        settings: FileShareSettings,
    ) -> Self {
        let host = host.into();
        Self {
            target: host.clone(),
            source: Source::Remote {
                host,
                export: export.into(),
                settings,
            },
            mount: Mutex::new(None),
        }
    }

    /// Creates a connector for a share that is already mounted at `path`.
    ///
    /// The share is never unmounted by this connector.
    pub fn premounted(target: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            source: Source::Premounted(path.into()),
            mount: Mutex::new(None),
        }
    }

    async fn mount(&self) -> Result<MountPoint, ConnectError> {
        let (host, export, settings) = match &self.source {
            Source::Premounted(path) => {
                tokio::fs::metadata(path).await?;
                return Ok(MountPoint {
                    path: path.clone(),
                    owned: false,
                });
            }
            Source::Remote {
                host,
                export,
                settings,
            } => (host, export, settings),
        };

        let source_path = format!("{host}:{export}");
        let path = tempfile::Builder::new()
            .prefix("storebench-")
            .tempdir()?
            .keep();

        tracing::debug!(%source_path, path = %path.display(), "mounting file share");
        let output = Command::new(&settings.mount_command)
            .args(["-t", "nfs", "-o", &settings.mount_options])
            .arg(&source_path)
            .arg(&path)
            .output()
            .await;

        let message = match output {
            Ok(output) if output.status.success() => {
                return Ok(MountPoint { path, owned: true });
            }
            Ok(output) => String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            Err(error) => error.to_string(),
        };

        let _ = tokio::fs::remove_dir(&path).await;
        Err(ConnectError::Mount {
            source_path,
            message,
        })
    }

    async fn unmount(&self, mount: MountPoint) {
        let Source::Remote { settings, .. } = &self.source else {
            return;
        };
        if !mount.owned {
            return;
        }

        let status = Command::new(&settings.umount_command)
            .arg(&mount.path)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                // Only ever remove the directory once nothing is mounted on it anymore.
                if let Err(error) = tokio::fs::remove_dir(&mount.path).await {
                    tracing::debug!(
                        error = &error as &dyn std::error::Error,
                        path = %mount.path.display(),
                        "failed to remove mount point"
                    );
                }
            }
            Ok(status) => {
                tracing::warn!(
                    path = %mount.path.display(),
                    %status,
                    "failed to unmount file share"
                );
            }
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    path = %mount.path.display(),
                    "failed to unmount file share"
                );
            }
        }
    }
}

#[async_trait]
impl DataConnector for FileShareConnector {
    type Connection = FileShareConnection;

    fn protocol(&self) -> Protocol {
        Protocol::FileShare
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn verify_reachable(&self) -> Result<(), ConnectError> {
        let mut guard = self.mount.lock().await;
        if guard.is_none() {
            *guard = Some(self.mount().await?);
        }
        let Some(mount) = guard.as_ref() else {
            return Err(ConnectError::NotMounted(self.target.clone()));
        };

        let mut entries = tokio::fs::read_dir(&mount.path).await?;
        let mut count = 0usize;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        if count != 0 {
            tracing::warn!(
                target_address = %self.target,
                count,
                "expected zero files in new file share"
            );
        }

        Ok(())
    }

    async fn connect(&self) -> Result<Self::Connection, ConnectError> {
        match self.mount.lock().await.as_ref() {
            Some(mount) => Ok(FileShareConnection {
                root: mount.path.clone(),
            }),
            None => Err(ConnectError::NotMounted(self.target.clone())),
        }
    }

    async fn release(&self) {
        let mount = self.mount.lock().await.take();
        if let Some(mount) = mount {
            self.unmount(mount).await;
        }
    }
}

/// A worker's view of the mounted share.
#[derive(Debug)]
pub struct FileShareConnection {
    root: PathBuf,
}

impl FileShareConnection {
    /// The directory all files of this connection live in.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Connection for FileShareConnection {
    async fn open_for_write(&mut self, name: &str) -> Result<Box<dyn Writable>, ConnectError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.root.join(name))
            .await?;
        Ok(Box::new(FileWriter { file }))
    }

    async fn open_for_read(&mut self, name: &str) -> Result<Reader, ConnectError> {
        let file = File::open(self.root.join(name)).await?;
        Ok(Box::pin(file))
    }
}

/// Appends the payload to a file on every write.
struct FileWriter {
    file: File,
}

#[async_trait]
impl Writable for FileWriter {
    async fn write(&mut self, payload: &Bytes) -> io::Result<()> {
        self.file.write_all(payload).await
    }

    async fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush().await
    }
}
