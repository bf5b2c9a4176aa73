mod content;
mod overrides;

use std::path::Path;

pub use content::ContentStore;
pub use overrides::OverrideStore;

use crate::{AvatarError, Result};

/// Validates that a store root exists and is a directory.
///
/// # Arguments
/// * `path` - The path to validate
/// * `label` - Identifier used in logs
fn validate_path(path: &Path, label: &str) -> Result<()> {
    if !path.exists() {
        return Err(AvatarError::Storage(
            label.to_owned(),
            "Folder does not exist".to_owned(),
        ));
    }

    if !path.is_dir() {
        return Err(AvatarError::Storage(
            label.to_owned(),
            "Path is not a directory".to_owned(),
        ));
    }

    Ok(())
}
