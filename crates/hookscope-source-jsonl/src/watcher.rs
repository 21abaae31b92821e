//! Tailer for a single append-only JSONL event file.
//!
//! Tracks a byte offset, buffers a trailing partial line until its newline
//! arrives, and detects rotation via inode changes or truncation.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use hookscope_core::types::EventRecord;
use tracing::{debug, warn};

/// Largest unterminated tail kept while waiting for its newline.
const MAX_PARTIAL_LINE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct EventFileWatcher {
    path: PathBuf,
    /// Current byte offset into the file.
    seek_pos: u64,
    /// Inode number (for rotation detection).
    inode: u64,
    /// Bytes after the last newline seen so far.
    incomplete_buffer: Vec<u8>,
    partial_limit: usize,
    /// Set once an oversized partial line was dropped; its remainder is
    /// skipped up to the next newline.
    discarding: bool,
}

impl EventFileWatcher {
    /// Attach to `path`, positioned at its current end.
    ///
    /// Content already on disk is never read. A file that does not exist
    /// yet is read from its first byte once it appears.
    pub fn new(path: PathBuf) -> Self {
        let (seek_pos, inode) = match file_metadata(&path) {
            Some((size, ino)) => (size, ino),
            None => {
                debug!(path = %path.display(), "event file does not exist yet");
                (0, 0)
            }
        };

        Self {
            path,
            seek_pos,
            inode,
            incomplete_buffer: Vec::new(),
            partial_limit: MAX_PARTIAL_LINE_BYTES,
            discarding: false,
        }
    }

    /// Create a watcher starting from position 0 (for testing).
    #[cfg(test)]
    pub fn new_from_start(path: PathBuf) -> Self {
        let inode = file_metadata(&path).map(|(_, ino)| ino).unwrap_or(0);
        Self {
            path,
            seek_pos: 0,
            inode,
            incomplete_buffer: Vec::new(),
            partial_limit: MAX_PARTIAL_LINE_BYTES,
            discarding: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.seek_pos
    }

    /// Read and parse every complete line appended since the last poll.
    ///
    /// Lines that are not valid JSON are logged and skipped; they never
    /// abort the batch and are never re-read.
    pub fn poll_new_records(&mut self) -> Vec<EventRecord> {
        self.poll_new_lines()
            .into_iter()
            .filter_map(|line| match EventRecord::from_json_line(&line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        line = %truncate(&line, 100),
                        "failed to parse event line, skipping"
                    );
                    None
                }
            })
            .collect()
    }

    /// Return complete, nonblank lines appended since the last poll.
    ///
    /// A missing file or a failed read yields an empty batch.
    pub fn poll_new_lines(&mut self) -> Vec<String> {
        let Some((len, new_inode)) = file_metadata(&self.path) else {
            debug!(path = %self.path.display(), "event file missing, nothing to read");
            return Vec::new();
        };

        let rotated = self.inode != 0 && new_inode != self.inode;
        if rotated || len < self.seek_pos {
            debug!(
                path = %self.path.display(),
                previous_offset = self.seek_pos,
                len,
                "event file rotated or truncated, rereading from start"
            );
            self.seek_pos = 0;
            self.incomplete_buffer.clear();
            self.discarding = false;
        }
        self.inode = new_inode;

        if len == self.seek_pos {
            return Vec::new();
        }

        match self.read_from_offset() {
            Ok(lines) => lines,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    offset = self.seek_pos,
                    error = %e,
                    "failed to read event file"
                );
                Vec::new()
            }
        }
    }

    fn read_from_offset(&mut self) -> io::Result<Vec<String>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.seek_pos))?;

        let mut lines = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = match reader.read_until(b'\n', &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "error reading event file"
                    );
                    break;
                }
            };
            if read == 0 {
                break;
            }

            if buf.ends_with(b"\n") {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let mut raw = std::mem::take(&mut self.incomplete_buffer);
                raw.extend_from_slice(&buf);
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if !line.is_empty() {
                    lines.push(line.to_owned());
                }
            } else if !self.discarding {
                // Partial line at EOF, completed by a later poll.
                self.incomplete_buffer.extend_from_slice(&buf);
                if self.incomplete_buffer.len() > self.partial_limit {
                    warn!(
                        path = %self.path.display(),
                        bytes = self.incomplete_buffer.len(),
                        "unterminated line too long, dropping it"
                    );
                    self.incomplete_buffer.clear();
                    self.discarding = true;
                }
            }
        }

        self.seek_pos = reader.stream_position()?;
        Ok(lines)
    }
}

fn truncate(line: &str, max_chars: usize) -> &str {
    match line.char_indices().nth(max_chars) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Get file size and inode for rotation detection.
fn file_metadata(path: &Path) -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(path).ok().map(|m| (m.len(), m.ino()))
    }
    #[cfg(not(unix))]
    {
        fs::metadata(path).ok().map(|m| (m.len(), 0))
    }
}
