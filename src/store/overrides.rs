use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::atomic::{temp_and_move, TMP_PREFIX};
use crate::identity::BareIdentity;
use crate::raster::Rasterizer;
use crate::store::validate_path;
use crate::Result;

/// User-imported avatars, one file per bare identity at
/// `<root>/<sanitized-identity>`. Keyed by identity, not by hash.
#[derive(Clone)]
pub struct OverrideStore {
    label: String,
    path: PathBuf,
    rasterizer: Rasterizer,
}

impl OverrideStore {
    pub fn new(label: String, path: &Path, rasterizer: Rasterizer) -> Result<Self> {
        validate_path(path, &label)?;
        Ok(Self {
            label,
            path: PathBuf::from(path),
            rasterizer,
        })
    }

    pub fn path(&self, identity: &BareIdentity) -> PathBuf {
        self.path.join(identity.sanitized())
    }

    pub fn exists(&self, identity: &BareIdentity) -> bool {
        self.path(identity).is_file()
    }

    /// Scale `bytes` to the stored edge and write them as the override of
    /// `identity`. Returns the bytes actually stored.
    ///
    /// Bytes that do not decode are rejected and nothing is written.
    pub fn import(&self, identity: &BareIdentity, bytes: &[u8]) -> Result<Vec<u8>> {
        let data = self.rasterizer.scale_for_storage(bytes)?;
        temp_and_move(&data, &self.path, &identity.sanitized())?;
        log::info!(
            "overrides/{}: imported {} bytes for {}",
            self.label,
            data.len(),
            identity
        );
        Ok(data)
    }

    /// Read the override of `identity` with its modification time.
    pub fn read(
        &self,
        identity: &BareIdentity,
    ) -> Result<Option<(Vec<u8>, SystemTime)>> {
        let path = self.path(identity);
        let modified = match fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(Some((bytes, modified))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Modification time of the override file, `None` when absent.
    pub fn modified(&self, identity: &BareIdentity) -> Result<Option<SystemTime>> {
        match fs::metadata(self.path(identity)) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns whether a file was removed.
    pub fn remove(&self, identity: &BareIdentity) -> Result<bool> {
        match fs::remove_file(self.path(identity)) {
            Ok(()) => {
                log::info!("overrides/{}: removed {}", self.label, identity);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Number of stored overrides.
    pub fn len(&self) -> usize {
        WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                !entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TMP_PREFIX)
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
