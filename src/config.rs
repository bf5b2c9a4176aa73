use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::temp_and_move;
use crate::raster::{MAX_DISPLAY_EDGE, MAX_STORED_EDGE};
use crate::{AvatarError, Result};

pub const AVATARS_FOLDER: &str = "avatars";
/// Hash-addressed blobs fetched from remote sources.
pub const CACHE_FOLDER: &str = "cache";
/// User-imported per-identity overrides.
pub const OVERRIDES_FOLDER: &str = "pictures";

/// Locations and size limits of the avatar engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarConfig {
    pub cache_dir: PathBuf,
    pub override_dir: PathBuf,
    #[serde(default = "default_stored_edge")]
    pub max_stored_edge: u32,
    #[serde(default = "default_display_edge")]
    pub max_display_edge: u32,
}

fn default_stored_edge() -> u32 {
    MAX_STORED_EDGE
}

fn default_display_edge() -> u32 {
    MAX_DISPLAY_EDGE
}

impl AvatarConfig {
    /// Default layout under a data root:
    /// `<root>/avatars/cache` and `<root>/avatars/pictures`.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let base = root.as_ref().join(AVATARS_FOLDER);
        Self {
            cache_dir: base.join(CACHE_FOLDER),
            override_dir: base.join(OVERRIDES_FOLDER),
            max_stored_edge: MAX_STORED_EDGE,
            max_display_edge: MAX_DISPLAY_EDGE,
        }
    }

    /// Read a configuration previously written with [`AvatarConfig::store`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AvatarError::NotFound(format!(
                "config file {}",
                path.display()
            )));
        }
        let file = fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let (dir, name) = match (path.parent(), path.file_name()) {
            (Some(dir), Some(name)) => (dir, name.to_string_lossy()),
            _ => {
                return Err(AvatarError::Storage(
                    "config".to_owned(),
                    format!("invalid config path {}", path.display()),
                ))
            }
        };
        fs::create_dir_all(dir)?;
        let data = serde_json::to_vec_pretty(self)?;
        temp_and_move(&data, dir, &name)?;
        Ok(())
    }

    /// Create both directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        fs::create_dir_all(&self.override_dir)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_stored_edge == 0 || self.max_display_edge == 0 {
            return Err(AvatarError::Storage(
                "config".to_owned(),
                "avatar edge limits must be positive".to_owned(),
            ));
        }
        if self.cache_dir == self.override_dir {
            return Err(AvatarError::Storage(
                "config".to_owned(),
                "cache and override directories must differ".to_owned(),
            ));
        }
        Ok(())
    }
}
