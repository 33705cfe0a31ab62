//! Sample counting over a chain's `.trace` file.
//!
//! The sampler appends one line per sample. Only newline-terminated lines are
//! counted, so a line that is still being written is picked up next time.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Incremental, monotonic sample counter for one trace file
#[derive(Debug, Clone)]
pub struct TraceCounter {
    path: PathBuf,
    /// Byte offset just past the last complete line counted
    offset: u64,
    /// Samples counted since `offset` was last reset
    samples: u64,
    high_water: u64,
}

impl TraceCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            samples: 0,
            high_water: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last value returned by [`TraceCounter::refresh`]
    pub const fn samples(&self) -> u64 {
        self.high_water
    }

    /// Read whatever was appended since the last call and return the sample count.
    ///
    /// A missing file counts as zero samples. The returned value never decreases,
    /// even if the file is truncated or replaced.
    pub async fn refresh(&mut self) -> std::io::Result<u64> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(self.high_water),
            Err(err) => return Err(err),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            // Replaced underneath us; recount from scratch.
            self.offset = 0;
            self.samples = 0;
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut appended = Vec::new();
        file.read_to_end(&mut appended).await?;

        let (samples, consumed) = count_samples(&appended);
        self.offset += consumed;
        self.samples += samples;
        self.high_water = self.high_water.max(self.samples);

        Ok(self.high_water)
    }
}

/// Count complete sample lines in `buf`.
///
/// Returns the number of sample lines and the number of bytes up to and
/// including the last newline. Header lines (starting with `#`) and blank
/// lines are not samples.
pub fn count_samples(buf: &[u8]) -> (u64, u64) {
    let mut samples = 0;
    let mut consumed = 0;

    for (start, line) in complete_lines(buf) {
        consumed = start + line.len() + 1;
        let content = line.strip_suffix(b"\r").unwrap_or(line);
        if content.is_empty() || content.starts_with(b"#") {
            continue;
        }
        samples += 1;
    }

    (samples, consumed as u64)
}

/// Newline-terminated lines of `buf` with their starting offsets
fn complete_lines(buf: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    let mut start = 0;
    std::iter::from_fn(move || {
        let end = buf[start..].iter().position(|b| *b == b'\n')? + start;
        let line = (start, &buf[start..end]);
        start = end + 1;
        Some(line)
    })
}

/// True when `path` is empty or ends with a newline, i.e. no line is half written.
pub async fn ends_on_line_boundary(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(true);
    }

    file.seek(SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}
