//! Chain identity, lifecycle and output naming.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Zero-based chain index. Output files use the one-based ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub usize);

impl ChainId {
    pub const fn index(self) -> usize {
        self.0
    }

    /// One-based number used in output names (`_chain1`, `_chain2`, ...)
    pub const fn ordinal(self) -> usize {
        self.0 + 1
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain{}", self.ordinal())
    }
}

/// Lifecycle of a supervised chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum ChainState {
    Starting,
    Running,
    /// Exited on its own with the given code (signal deaths map to `128 + signo`)
    Exited(i32),
    /// Stopped by the supervisor
    Killed,
}

impl ChainState {
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Exited(code) => write!(f, "exited({code})"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// Result of polling a chain's liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Exited(i32),
    /// Liveness could not be determined this time
    Unknown,
}

/// Everything a launcher needs to start one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub chain: ChainId,
    pub input: PathBuf,
    pub sampler_args: String,
    pub processes: usize,
    /// Output base passed to the sampler; every chain file is `<base>.<ext>`
    pub output_base: PathBuf,
}

/// Output file naming shared by the launcher, the collector and the status file.
///
/// The base is `<dir>/<stem><args>_<processes>`, where `<args>` are the sampler
/// arguments with whitespace removed and `-` replaced by `_`. Chains append
/// `_chain<k>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    base: PathBuf,
}

impl OutputLayout {
    pub fn new(input: &Path, sampler_args: &str, processes: usize) -> Self {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let postfix: String = sampler_args
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c == '-' { '_' } else { c })
            .collect();

        let name = format!("{stem}{postfix}_{processes}");
        let base = match input.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => PathBuf::from(name),
        };

        Self { base }
    }

    /// Base shared by the cross-chain comparison outputs
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn chain_base(&self, chain: ChainId) -> PathBuf {
        with_suffix(&self.base, &format!("_chain{}", chain.ordinal()))
    }
}

/// Append `suffix` to the final path component without treating dots as extensions.
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = base.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// `<base>.trace`: one line per sample
pub fn trace_path(base: &Path) -> PathBuf {
    with_suffix(base, ".trace")
}

/// `<base>.run`: the sampler keeps running while this holds `1`
pub fn run_flag_path(base: &Path) -> PathBuf {
    with_suffix(base, ".run")
}

/// `<base>.out`: redirected stdout and stderr of the chain
pub fn log_path(base: &Path) -> PathBuf {
    with_suffix(base, ".out")
}
