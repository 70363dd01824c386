use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub path: PathBuf,
    pub url: String,
}

/// Storage contract for adapters that receive inline binary or remote
/// assets that must be re-hosted before the adapter returns.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn save_image(
        &self,
        project_id: Uuid,
        image_id: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredImage>;

    async fn delete_image(&self, project_id: Uuid, image_id: &str) -> anyhow::Result<bool>;
}

/// Filesystem store: `<base>/images/<project>/<image>.<ext>`, served
/// under `/storage/`.
pub struct LocalMediaStore {
    base_path: PathBuf,
}

impl LocalMediaStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("EASEL_STORAGE_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "./storage".to_string());
        Self::new(base)
    }

    fn project_dir(&self, project_id: Uuid) -> PathBuf {
        self.base_path.join("images").join(project_id.to_string())
    }

    fn serving_url(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.base_path)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        format!("/storage/{relative}")
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn save_image(
        &self,
        project_id: Uuid,
        image_id: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredImage> {
        let dir = self.project_dir(project_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{image_id}.{extension}"));
        tokio::fs::write(&path, bytes).await?;
        info!(path = %path.display(), "image persisted locally");
        Ok(StoredImage {
            url: self.serving_url(&path),
            path,
        })
    }

    async fn delete_image(&self, project_id: Uuid, image_id: &str) -> anyhow::Result<bool> {
        let dir = self.project_dir(project_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(false),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|stem| stem.to_str()) == Some(image_id) {
                tokio::fs::remove_file(&path).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_writes_bytes_and_maps_serving_url() {
        let temp = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(temp.path());
        let project_id = Uuid::new_v4();

        let stored = store
            .save_image(project_id, "img-1", "png", b"not-actually-a-png")
            .await
            .unwrap();

        assert!(stored.path.exists());
        assert_eq!(
            stored.url,
            format!("/storage/images/{project_id}/img-1.png")
        );
        let bytes = tokio::fs::read(&stored.path).await.unwrap();
        assert_eq!(bytes, b"not-actually-a-png");
    }

    #[tokio::test]
    async fn delete_removes_the_file_regardless_of_extension() {
        let temp = tempfile::tempdir().unwrap();
        let store = LocalMediaStore::new(temp.path());
        let project_id = Uuid::new_v4();

        let stored = store
            .save_image(project_id, "img-1", "webp", b"x")
            .await
            .unwrap();
        assert!(store.delete_image(project_id, "img-1").await.unwrap());
        assert!(!stored.path.exists());
        assert!(!store.delete_image(project_id, "img-1").await.unwrap());
    }
}
