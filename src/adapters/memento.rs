use crate::domain::model::NavigationMemento;
use crate::domain::ports::MementoStore;
use crate::utils::error::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// MementoStore backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileMementoStore {
    path: PathBuf,
}

impl FileMementoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MementoStore for FileMementoStore {
    async fn load(&self) -> Result<Option<NavigationMemento>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let memento = serde_json::from_slice(&data)?;
        Ok(Some(memento))
    }

    async fn save(&self, memento: &NavigationMemento) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(memento)?)?;
        tracing::debug!("Wrote navigation memento to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = FileMementoStore::new(dir.path().join("nested").join("memento.json"));

        assert_eq!(store.load().await.unwrap(), None);

        let memento = NavigationMemento::new("southwest-florida", "collier");
        store.save(&memento).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(memento));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        // clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memento.json");
        fs::write(&path, b"{not json").unwrap();

        let store = FileMementoStore::new(&path);
        assert!(store.load().await.is_err());
    }
}
