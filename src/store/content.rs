use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::atomic::{temp_and_move, TMP_PREFIX};
use crate::hash::ContentHash;
use crate::store::validate_path;
use crate::{AvatarError, Result};

/// Persistent, hash-keyed blob cache: one file per blob at
/// `<root>/<hex-hash>`.
///
/// Byte-identical images share one entry. Writes go through a temporary
/// file and a rename, so concurrent readers and same-hash writers are
/// safe without further locking.
#[derive(Debug, Clone)]
pub struct ContentStore {
    /// Label for logging
    label: String,
    /// Directory where blobs are persisted
    path: PathBuf,
}

impl ContentStore {
    /// Opens the store rooted at an existing directory.
    pub fn new(label: String, path: &Path) -> Result<Self> {
        validate_path(path, &label)?;
        log::debug!("cache/{}: opened at {}", label, path.display());
        Ok(Self {
            label,
            path: PathBuf::from(path),
        })
    }

    pub fn root(&self) -> &Path {
        &self.path
    }

    /// Location of the blob for `hash`, whether or not it exists.
    pub fn path(&self, hash: &ContentHash) -> PathBuf {
        self.path.join(hash.as_str())
    }

    pub fn has(&self, hash: &ContentHash) -> bool {
        self.path(hash).is_file()
    }

    pub fn load(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        match fs::read(self.path(hash)) {
            Ok(bytes) => {
                log::trace!(
                    "cache/{}: loaded {} bytes for {}",
                    self.label,
                    bytes.len(),
                    hash
                );
                Ok(bytes)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(AvatarError::NotFound(format!(
                    "cache/{}: no blob for {}",
                    self.label, hash
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Create or overwrite the blob for `hash`.
    ///
    /// Identical hashes imply identical content, so calling this again for
    /// a cached hash is redundant but harmless.
    pub fn store(&self, hash: &ContentHash, bytes: &[u8]) -> Result<()> {
        log::debug!(
            "cache/{}: writing {} bytes for {}",
            self.label,
            bytes.len(),
            hash
        );

        temp_and_move(bytes, &self.path, hash.as_str()).map_err(|err| {
            AvatarError::Storage(
                self.label.clone(),
                format!("Failed to write blob {}: {}", hash, err),
            )
        })
    }

    /// All hashes currently persisted, in no particular order.
    pub fn hashes(&self) -> Result<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        for entry in WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
        {
            let entry = entry.map_err(|err| {
                AvatarError::Storage(self.label.clone(), err.to_string())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            match name.parse() {
                Ok(hash) => hashes.push(hash),
                Err(_) => log::warn!(
                    "cache/{}: ignoring foreign file {}",
                    self.label,
                    name
                ),
            }
        }
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::initialize;
    use rstest::rstest;
    use tempdir::TempDir;

    fn create_test_store(temp_dir: &TempDir) -> ContentStore {
        ContentStore::new("test".to_string(), temp_dir.path())
            .expect("Failed to create store")
    }

    #[test]
    fn missing_directory() {
        let temp_dir = TempDir::new("store_test").unwrap();
        let result = ContentStore::new(
            "test".to_string(),
            &temp_dir.path().join("absent"),
        );
        assert!(matches!(result, Err(AvatarError::Storage(_, _))));
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![0])]
    #[case(vec![1, 2, 3, 4])]
    #[case((0..=255).collect())]
    fn store_then_load(#[case] bytes: Vec<u8>) {
        initialize();
        let temp_dir = TempDir::new("store_test").unwrap();
        let store = create_test_store(&temp_dir);
        let hash = ContentHash::from_bytes(&bytes);

        assert!(!store.has(&hash));
        store.store(&hash, &bytes).unwrap();
        assert!(store.has(&hash));
        assert_eq!(store.load(&hash).unwrap(), bytes);
    }

    #[test]
    fn store_is_idempotent() {
        let temp_dir = TempDir::new("store_test").unwrap();
        let store = create_test_store(&temp_dir);
        let bytes = vec![9, 9, 9];
        let hash = ContentHash::from_bytes(&bytes);

        store.store(&hash, &bytes).unwrap();
        store.store(&hash, &bytes).unwrap();
        assert_eq!(store.load(&hash).unwrap(), bytes);
        assert_eq!(store.hashes().unwrap(), vec![hash]);
    }

    #[test]
    fn load_missing_is_not_found() {
        let temp_dir = TempDir::new("store_test").unwrap();
        let store = create_test_store(&temp_dir);
        let hash = ContentHash::from_bytes(b"absent");
        assert!(matches!(store.load(&hash), Err(AvatarError::NotFound(_))));
    }

    #[test]
    fn hashes_skip_foreign_files() {
        let temp_dir = TempDir::new("store_test").unwrap();
        let store = create_test_store(&temp_dir);
        let hash = ContentHash::from_bytes(b"one");
        store.store(&hash, b"one").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(temp_dir.path().join(format!("{TMP_PREFIX}abc")), b"x")
            .unwrap();
        fs::create_dir(temp_dir.path().join("abcdef")).unwrap();

        assert_eq!(store.hashes().unwrap(), vec![hash]);
    }

    #[test]
    fn persistence() {
        let temp_dir = TempDir::new("store_test").unwrap();
        let hash = ContentHash::from_bytes(b"persist");
        {
            let store = create_test_store(&temp_dir);
            store.store(&hash, b"persist").unwrap();
        }
        let store = create_test_store(&temp_dir);
        assert_eq!(store.load(&hash).unwrap(), b"persist");
    }

    #[test]
    fn concurrent_same_hash_writes() {
        use std::thread;

        let temp_dir = TempDir::new("store_test").unwrap();
        let store = create_test_store(&temp_dir);
        let bytes = vec![7u8; 64 * 1024];
        let hash = ContentHash::from_bytes(&bytes);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let bytes = bytes.clone();
                let hash = hash.clone();
                thread::spawn(move || store.store(&hash, &bytes))
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked").unwrap();
        }

        assert_eq!(store.load(&hash).unwrap(), bytes);
    }

    #[cfg(unix)]
    #[test]
    fn write_failure_is_storage_error() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new("store_test").unwrap();
        let store = create_test_store(&temp_dir);
        fs::set_permissions(temp_dir.path(), fs::Permissions::from_mode(0o555))
            .unwrap();

        let hash = ContentHash::from_bytes(b"ro");
        let result = store.store(&hash, b"ro");

        fs::set_permissions(temp_dir.path(), fs::Permissions::from_mode(0o755))
            .unwrap();
        // Root ignores directory permissions.
        if result.is_ok() {
            return;
        }
        assert!(matches!(result, Err(AvatarError::Storage(_, _))));
        assert!(!store.has(&hash));
    }
}
