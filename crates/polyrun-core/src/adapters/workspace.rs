//! Private scratch directory of a host.

use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

use crate::core_types::SourceFile;
use crate::host::GuestFailure;

/// Removed from disk when the owning adapter is dropped.
pub struct HostWorkspace {
    dir: TempDir,
}

impl HostWorkspace {
    pub fn new(prefix: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        log::debug!("Created host workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Writes auxiliary files relative to the workspace root.
    pub async fn stage(&self, files: &[SourceFile]) -> Result<(), GuestFailure> {
        for file in files {
            let target = self.staged_path(&file.name)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    GuestFailure::new(format!("Failed to create directory for {}: {}", file.name, e))
                })?;
            }
            tokio::fs::write(&target, &file.code)
                .await
                .map_err(|e| GuestFailure::new(format!("Failed to write {}: {}", file.name, e)))?;
        }
        Ok(())
    }

    pub fn staged_path(&self, name: &str) -> Result<PathBuf, GuestFailure> {
        let relative = Path::new(name);
        let valid = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !valid {
            return Err(GuestFailure::new(format!(
                "Invalid file name '{}': only relative paths inside the project are allowed",
                name
            )));
        }
        Ok(self.dir.path().join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_writes_nested_files() {
        let workspace = HostWorkspace::new("polyrun-test-").unwrap();
        workspace
            .stage(&[
                SourceFile::new("util.py", "X = 1"),
                SourceFile::new("pkg/mod.py", "Y = 2"),
            ])
            .await
            .unwrap();
        let nested = std::fs::read_to_string(workspace.join("pkg/mod.py")).unwrap();
        assert_eq!(nested, "Y = 2");
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        let workspace = HostWorkspace::new("polyrun-test-").unwrap();
        assert!(workspace.staged_path("../evil.py").is_err());
        assert!(workspace.staged_path("/etc/passwd").is_err());
        assert!(workspace.staged_path("").is_err());
        assert!(workspace.staged_path("./ok.py").is_ok());
    }

    #[test]
    fn test_directory_is_removed_on_drop() {
        let workspace = HostWorkspace::new("polyrun-test-").unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.exists());
        drop(workspace);
        assert!(!path.exists());
    }
}
