use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::core::errors::SandboxError;
use crate::core::language::LanguageConfig;

/// Per-execution directory under the workspace root, named by the execution
/// id. Holds the source file, the compiled artifact and stdin files.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: PathBuf,
}

impl Workspace {
    #[tracing::instrument]
    pub async fn create(root: &Path, id: Uuid) -> Result<Self, SandboxError> {
        let dir = root.join(id.to_string());

        fs::create_dir_all(root)
            .await
            .map_err(|e| SandboxError::Workspace {
                msg: format!("Failed to create workspace root {}: {}", root.display(), e),
            })?;
        fs::create_dir(&dir)
            .await
            .map_err(|e| SandboxError::Workspace {
                msg: format!("Failed to create workspace {}: {}", dir.display(), e),
            })?;

        tracing::debug!("Workspace created: {}", dir.display());
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub async fn write_source(
        &self,
        language: &LanguageConfig,
        code: &str,
    ) -> Result<PathBuf, SandboxError> {
        self.write_file(&language.source_file_name(), code).await
    }

    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, SandboxError> {
        let path = self.dir.join(name);
        fs::write(&path, contents)
            .await
            .map_err(|e| SandboxError::Workspace {
                msg: format!("Failed to write {}: {}", path.display(), e),
            })?;
        Ok(path)
    }

    /// Best-effort teardown: every entry is removed independently and a
    /// failure is logged, never returned.
    #[tracing::instrument(skip(self), fields(workspace = %self.dir.display()))]
    pub async fn cleanup(&self) {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!("Failed to list workspace: {}", e);
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read workspace entry: {}", e);
                    break;
                }
            };

            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            let removed = if is_dir {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };

            if let Err(e) = removed {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }

        match fs::remove_dir(&self.dir).await {
            Ok(()) => tracing::debug!("Workspace removed"),
            Err(e) => tracing::warn!("Failed to remove workspace directory: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Language;
    use crate::core::language::default_config;

    #[tokio::test]
    async fn test_create_write_and_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();

        let workspace = Workspace::create(root.path(), id).await.unwrap();
        assert_eq!(workspace.path(), root.path().join(id.to_string()));

        let source = workspace
            .write_source(&default_config(Language::Python), "print(1)")
            .await
            .unwrap();
        assert_eq!(source.file_name().unwrap(), "main.py");
        assert_eq!(fs::read_to_string(&source).await.unwrap(), "print(1)");

        fs::create_dir(workspace.path().join("classes")).await.unwrap();
        workspace.write_file("classes/Main.class", "x").await.unwrap();

        workspace.cleanup().await;
        assert!(!workspace.path().exists());
    }

    #[tokio::test]
    async fn test_cleanup_of_missing_directory_is_silent() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), Uuid::new_v4()).await.unwrap();

        workspace.cleanup().await;
        workspace.cleanup().await;
        assert!(!workspace.path().exists());
    }

    #[tokio::test]
    async fn test_create_fails_on_readonly_root() {
        // /proc is a read-only filesystem
        let root = PathBuf::from(format!("/proc/execbox_{}", Uuid::new_v4()));
        let result = Workspace::create(&root, Uuid::new_v4()).await;
        assert!(matches!(result, Err(SandboxError::Workspace { .. })));
    }

    #[tokio::test]
    async fn test_ids_never_share_a_directory() {
        let root = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let _first = Workspace::create(root.path(), id).await.unwrap();
        let second = Workspace::create(root.path(), id).await;
        assert!(matches!(second, Err(SandboxError::Workspace { .. })));
    }
}
