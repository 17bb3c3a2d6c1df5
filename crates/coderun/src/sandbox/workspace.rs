//! Per-execution scratch directories
//!
//! Every execution gets a private directory that holds its source file,
//! compiled artifacts, and anything the program writes. The directory is
//! removed when the execution ends, whatever the outcome.

use std::fmt::Display;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::sandbox::SandboxError;

/// A private scratch directory owned by one execution
///
/// # Cleanup
///
/// Call [`release()`](Self::release) once the execution is over. Dropping a
/// workspace that was never released falls back to a synchronous removal and
/// logs a warning, which covers cancelled futures and panics.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    /// Create a fresh workspace under `root`
    ///
    /// The directory name combines `label` with a random suffix, and creation
    /// fails rather than reuse an existing directory.
    #[instrument(skip_all, fields(root = %root.display(), label = %label))]
    pub async fn provision(root: &Path, label: impl Display) -> Result<Self, SandboxError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: root.to_path_buf(),
                source,
            })?;

        let path = root.join(format!("coderun-{label}-{}", Uuid::new_v4().simple()));
        let mut builder = tokio::fs::DirBuilder::new();
        builder.mode(0o700);
        builder
            .create(&path)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: path.clone(),
                source,
            })?;

        debug!(?path, "workspace provisioned");
        Ok(Self {
            path,
            released: false,
        })
    }

    /// Absolute path of the workspace directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the host path to a file inside the workspace
    ///
    /// Returns an error if the name could escape the workspace.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(SandboxError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.path.join(name))
    }

    /// Write a file into the workspace
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SandboxError> {
        let path = self.file_path(name)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(())
    }

    /// Check if a file exists in the workspace
    pub async fn file_exists(&self, name: &str) -> Result<bool, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Remove the workspace and everything in it
    ///
    /// A workspace that is already gone counts as released.
    #[must_use = "release errors should be handled"]
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn release(mut self) -> Result<(), SandboxError> {
        self.released = true;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || remove_tree(&path))
            .await
            .map_err(|e| SandboxError::WorkspaceRelease {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| SandboxError::WorkspaceRelease {
                path: self.path.clone(),
                source,
            })?;
        debug!("workspace released");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(
            path = %self.path.display(),
            "workspace dropped without release, removing synchronously"
        );
        if let Err(e) = remove_tree(&self.path) {
            warn!(path = %self.path.display(), error = %e, "best-effort workspace removal failed");
        }
    }
}

/// Remove a directory tree, restoring owner permissions where a program
/// locked itself out of its own files.
fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            restore_permissions(path);
            match std::fs::remove_dir_all(path) {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
        Err(e) => Err(e),
    }
}

fn restore_permissions(path: &Path) {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return;
    };
    if !meta.is_dir() {
        return;
    }
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            restore_permissions(&entry.path());
        }
    }
}
