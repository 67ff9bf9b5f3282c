//! Destination file shared by all range workers
//!
//! The file is created (or truncated) and sized once, then written through
//! positional writes only. Workers hold disjoint byte ranges, so the handle is
//! shared without a lock: no two writes ever target the same offset.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::{Error, Result};

/// Pre-sized destination file, cheap to clone into worker tasks
#[derive(Debug, Clone)]
pub struct SharedFile {
    file: Arc<File>,
    path: PathBuf,
    len: u64,
}

impl SharedFile {
    /// Create or truncate `path` and size it to exactly `len` bytes.
    ///
    /// Truncation keeps stale bytes of an older, longer file from surviving
    /// past the new end.
    pub async fn create(path: &Path, len: u64) -> Result<Self> {
        let owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || -> io::Result<File> {
            let file = File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&owned)?;
            preallocate(&file, len)?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::TaskFailed(format!("file creation task: {e}")))?
        .map_err(|e| {
            Error::IoError(io::Error::new(
                e.kind(),
                format!("cannot create {}: {e}", path.display()),
            ))
        })?;

        Ok(Self::from_std(file, path.to_path_buf(), len))
    }

    pub(crate) fn from_std(file: File, path: PathBuf, len: u64) -> Self {
        Self {
            file: Arc::new(file),
            path,
            len,
        }
    }

    /// Destination path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size the file was created with
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file was created empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write the first `filled` bytes of `buffer` at `offset`.
    ///
    /// The blocking `pwrite` runs on the blocking pool; the buffer is handed
    /// back so the caller can reuse it for the next chunk.
    pub async fn write_at(&self, offset: u64, buffer: Vec<u8>, filled: usize) -> Result<Vec<u8>> {
        debug_assert!(filled <= buffer.len());
        if offset + filled as u64 > self.len {
            return Err(Error::WriteFailed {
                offset,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "write of {filled} bytes would pass the end of the file ({} bytes)",
                        self.len
                    ),
                ),
            });
        }

        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            write_all_at(&file, &buffer[..filled], offset).map(|()| buffer)
        })
        .await
        .map_err(|e| Error::TaskFailed(format!("write task: {e}")))?
        .map_err(|source| Error::WriteFailed { offset, source })
    }

    /// Flush data to disk and check the file still has its created size.
    ///
    /// Workers must all have been joined; only this handle's clone is closed.
    pub async fn finish(self) -> Result<()> {
        let file = self.file;
        let len = self.len;
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            file.sync_all()?;
            let actual = file.metadata()?.len();
            if actual != len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file is {actual} bytes after download, expected {len}"),
                ));
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::TaskFailed(format!("sync task: {e}")))??;
        Ok(())
    }

    /// Close the handle and delete the incomplete file
    pub async fn discard(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::IoError(e)),
        }
    }
}

/// Reserve `len` bytes. Tries `posix_fallocate` for real block allocation on
/// Linux and falls back to `set_len`.
fn preallocate(file: &File, len: u64) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;

        if let Ok(size) = libc::off_t::try_from(len) {
            if size > 0 {
                // SAFETY: the descriptor is owned by `file`, which outlives the call
                let r = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size) };
                if r == 0 {
                    return Ok(());
                }
                log::debug!("posix_fallocate failed (errno {r}), falling back to set_len");
            }
        }
    }

    file.set_len(len)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            n => {
                buf = &buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}
