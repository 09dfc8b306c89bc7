//! `tail -f` over a growing file.
//!
//! [`LineFollower`] starts at the current end of the file and yields every
//! complete line appended afterwards. At end of file it sleeps for the poll
//! interval and retries. A file that shrinks is treated as truncated and read
//! again from the start. A file that disappears, or whose path now names a
//! different file, ends the stream.
//!
//! `next_line` is safe to race in `tokio::select!`: bytes read before a
//! cancellation stay in the follower's buffer and are returned with the rest
//! of their line on the next call.

use std::fs::Metadata;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, warn};

pub struct LineFollower {
    path: PathBuf,
    reader: BufReader<File>,
    /// File offset of the first byte in `pending`.
    position: u64,
    pending: Vec<u8>,
    poll_interval: Duration,
}

impl LineFollower {
    /// Open `path` and position the follower at its current end.
    pub async fn open(path: impl Into<PathBuf>, poll_interval: Duration) -> anyhow::Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)
            .await
            .with_context(|| format!("open {} for following", path.display()))?;
        let position = file
            .seek(SeekFrom::End(0))
            .await
            .with_context(|| format!("seek to end of {}", path.display()))?;

        debug!(path = %path.display(), offset = position, "following file");

        Ok(Self {
            path,
            reader: BufReader::new(file),
            position,
            pending: Vec::new(),
            poll_interval,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next complete line, terminator included.
    ///
    /// Returns `Ok(None)` once the file has been removed or replaced. A
    /// trailing partial line left at that point is returned first.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            self.reader.read_until(b'\n', &mut self.pending).await?;
            if self.pending.last() == Some(&b'\n') {
                return Ok(Some(self.take_pending()));
            }

            let followed = self.reader.get_ref().metadata().await?;
            match tokio::fs::metadata(&self.path).await {
                Ok(current) if !same_file(&followed, &current) => {
                    debug!(path = %self.path.display(), "input replaced; end of stream");
                    return Ok(self.finish());
                }
                Ok(current) if current.len() < self.position + self.pending.len() as u64 => {
                    warn!(
                        path = %self.path.display(),
                        previous_offset = self.position + self.pending.len() as u64,
                        current_size = current.len(),
                        "input truncated; reading from start"
                    );
                    self.reopen().await?;
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "input removed; end of stream");
                    return Ok(self.finish());
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Last partial line if there is one, otherwise end of stream.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_pending())
        }
    }

    fn take_pending(&mut self) -> String {
        self.position += self.pending.len() as u64;
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }

    async fn reopen(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        self.reader = BufReader::new(file);
        self.position = 0;
        self.pending.clear();
        Ok(())
    }
}

/// Whether the open file and the file at the path are still the same inode.
#[cfg(unix)]
fn same_file(followed: &Metadata, current: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    followed.nlink() > 0 && followed.dev() == current.dev() && followed.ino() == current.ino()
}

#[cfg(not(unix))]
fn same_file(_followed: &Metadata, _current: &Metadata) -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
