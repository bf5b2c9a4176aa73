use std::fs::File;
use std::io::{Result, Write};
use std::path::{Path, PathBuf};

/// Prefix of in-progress writes. Readers listing a store directory skip
/// entries carrying it.
pub const TMP_PREFIX: &str = ".tmp-";

/// Temporary file living next to its destination, so the final rename
/// never crosses a filesystem boundary. Removed on drop unless persisted.
pub struct TmpFile {
    file: File,
    path: PathBuf,
    persisted: bool,
}

impl TmpFile {
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self> {
        let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
            .take(10)
            .collect();
        let path = dir
            .as_ref()
            .join(format!("{TMP_PREFIX}{suffix}"));
        let file = File::create(&path)?;
        Ok(Self {
            file,
            path,
            persisted: false,
        })
    }

    /// Flush to disk and move into place, replacing any existing file.
    pub fn persist(mut self, dest: impl AsRef<Path>) -> Result<()> {
        self.file.sync_all()?;
        std::fs::rename(&self.path, dest.as_ref())?;
        self.persisted = true;
        Ok(())
    }
}

impl std::io::Write for &TmpFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (&self.file).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (&self.file).flush()
    }
}

impl Drop for TmpFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write data to a temporary file in `dest_dir` and move it to
/// `dest_dir/filename`. A concurrent reader sees either the old content,
/// the new content, or no file, never a partial write.
pub fn temp_and_move(
    data: &[u8],
    dest_dir: impl AsRef<Path>,
    filename: &str,
) -> Result<()> {
    let tmp = TmpFile::create_in(dest_dir.as_ref())?;
    (&tmp).write_all(data)?;
    (&tmp).flush()?;
    tmp.persist(dest_dir.as_ref().join(filename))
}
