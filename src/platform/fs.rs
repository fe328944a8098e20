// Tailgate - platform/fs.rs
//
// Blocking local-file primitives used by the local tail session. Callers run
// them on the blocking pool; nothing here touches the async runtime.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// The trailing window of a file, read once for backlog replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailingWindow {
    pub bytes: Vec<u8>,
    /// File offset of `bytes[0]`.
    pub start: u64,
    /// File offset just past the last byte read; the tail cursor starts here.
    pub end: u64,
}

impl TrailingWindow {
    /// True when the window does not begin at the start of the file, so its
    /// first line may be cut.
    pub fn is_clipped(&self) -> bool {
        self.start > 0
    }
}

/// Read at most `window` bytes from the end of `path`.
///
/// The size is sampled once; if the file grows while reading, the extra bytes
/// are not included and `end` still reflects exactly what was read.
pub fn read_trailing_window(path: &Path, window: u64) -> io::Result<TrailingWindow> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let len = size.min(window);
    let start = size - len;

    file.seek(SeekFrom::Start(start))?;
    let mut bytes = Vec::with_capacity(len as usize);
    file.take(len).read_to_end(&mut bytes)?;

    let end = start + bytes.len() as u64;
    Ok(TrailingWindow { bytes, start, end })
}

/// Read up to `limit` bytes from `path` starting at byte position `offset`.
///
/// Returns fewer bytes than `limit` if the file ends before `limit` is reached.
pub fn read_bytes_at(path: &Path, offset: u64, limit: usize) -> io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    file.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Truncate an existing file to zero length. A missing file is an error;
/// this never creates files.
pub fn truncate_existing(path: &Path) -> io::Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map(|_| ())
}
