//! File-backed key/value store.
//!
//! Each key is one `<key>.json` file under the data directory. Characters
//! outside `[A-Za-z0-9._-]` are replaced with `_` so keys cannot escape it.

use std::fs;
use std::path::{Path, PathBuf};
use whiteboard_core::storage::{KeyValueStore, Result};

/// Native key/value store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_path.join(format!("{}.json", name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);

        // Create the data directory on first write
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_missing_key() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("whiteboard_r1").unwrap().is_none());
    }

    #[test]
    fn test_set_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        store.set("whiteboard_r1", r#"{"pages":[]}"#).unwrap();
        assert!(dir.path().join("nested/whiteboard_r1.json").exists());
        assert_eq!(store.get("whiteboard_r1").unwrap().as_deref(), Some(r#"{"pages":[]}"#));

        store.remove("whiteboard_r1").unwrap();
        assert!(store.get("whiteboard_r1").unwrap().is_none());
        // Removing again is fine
        store.remove("whiteboard_r1").unwrap();
    }

    #[test]
    fn test_keys_cannot_escape_base_path() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        let path = store.path_for("whiteboard_../../etc/passwd");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.file_name().unwrap(), "whiteboard_.._.._etc_passwd.json");
    }
}
