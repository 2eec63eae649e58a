use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

/// Timestamped copies written before anything destructive. Nothing here ever
/// overwrites an existing file.
#[derive(Debug, Clone)]
pub struct BackupDir {
    dir: PathBuf,
}

impl BackupDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        BackupDir { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to `memo_backup_YYYYMMDD_HHMMSS.txt`, synced to disk.
    pub fn save_text(&self, content: &str, now: NaiveDateTime) -> io::Result<PathBuf> {
        let (path, mut file) = self.reserve("memo_backup", "txt", now)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        info!(path = %path.display(), bytes = content.len(), "source backed up");
        Ok(path)
    }

    /// Move `src` into the backup directory as `<prefix>_YYYYMMDD_HHMMSS.<ext>`.
    pub fn archive_file(
        &self,
        src: &Path,
        prefix: &str,
        ext: &str,
        now: NaiveDateTime,
    ) -> io::Result<PathBuf> {
        let (target, file) = self.reserve(prefix, ext, now)?;
        drop(file);
        if fs::rename(src, &target).is_err() {
            // across filesystems
            fs::copy(src, &target)?;
            fs::remove_file(src)?;
        }
        info!(from = %src.display(), to = %target.display(), "archived");
        Ok(target)
    }

    /// Create a fresh, empty file for `now`, adding `_1`, `_2`, ... on clashes.
    fn reserve(&self, prefix: &str, ext: &str, now: NaiveDateTime) -> io::Result<(PathBuf, File)> {
        fs::create_dir_all(&self.dir)?;
        let stamp = now.format("%Y%m%d_%H%M%S");
        let mut n = 0u32;
        loop {
            let name = if n == 0 {
                format!("{prefix}_{stamp}.{ext}")
            } else {
                format!("{prefix}_{stamp}_{n}.{ext}")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }
}
