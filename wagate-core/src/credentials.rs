// ABOUTME: File-system credential storage, one directory per transport.
// ABOUTME: Wiped on forced logout or a credential-wiping restart; preserved otherwise.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use wagate_transport::TransportKind;

const CREDS_FILE: &str = "creds.json";

#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Store rooted at `root`; transports get `root/<kind>`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: TransportKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    /// Create the transport's directory if needed and return it
    pub async fn ensure(&self, kind: TransportKind) -> Result<PathBuf> {
        let dir = self.dir(kind);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create credential directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Whether the transport has any stored credential material
    pub async fn has_credentials(&self, kind: TransportKind) -> bool {
        let Ok(mut entries) = tokio::fs::read_dir(self.dir(kind)).await else {
            return false;
        };
        matches!(entries.next_entry().await, Ok(Some(_)))
    }

    /// Persist credential material reported by the transport
    pub async fn save(&self, kind: TransportKind, creds: &Value) -> Result<()> {
        let dir = self.ensure(kind).await?;
        let path = dir.join(CREDS_FILE);
        let tmp = dir.join(format!("{}.tmp", CREDS_FILE));

        let body = serde_json::to_vec_pretty(creds).context("Failed to serialize credentials")?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move credentials into {}", path.display()))?;

        tracing::debug!(transport = %kind, path = %path.display(), "Credentials saved");
        Ok(())
    }

    pub async fn load(&self, kind: TransportKind) -> Result<Option<Value>> {
        let path = self.dir(kind).join(CREDS_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt credentials in {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Delete one transport's credentials; a missing directory is fine
    pub async fn wipe(&self, kind: TransportKind) -> Result<()> {
        let dir = self.dir(kind);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(transport = %kind, dir = %dir.display(), "Credentials wiped");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to wipe {}", dir.display())),
        }
    }

    /// Delete every transport's credentials, attempting all even if one fails
    pub async fn wipe_all(&self) -> Result<()> {
        let mut first_error = None;
        for kind in TransportKind::ALL {
            if let Err(e) = self.wipe(kind).await {
                tracing::warn!(transport = %kind, error = %e, "Failed to wipe credentials");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
