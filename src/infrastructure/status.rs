//! Per-cycle JSON status document next to the chain outputs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::models::chain::with_suffix;
use crate::domain::ports::{StatusReport, StatusSink};

/// Writes every report to `<base>.governor.json`, replacing the previous one.
///
/// The document is written to a temporary sibling and renamed into place so
/// readers never see a partial file.
pub struct JsonStatusFile {
    path: PathBuf,
}

impl JsonStatusFile {
    pub fn new(output_base: &Path) -> Self {
        Self {
            path: with_suffix(output_base, ".governor.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, report: &StatusReport) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(report)?;
        let tmp = with_suffix(&self.path, ".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[async_trait]
impl StatusSink for JsonStatusFile {
    async fn publish(&self, report: &StatusReport) {
        match self.write(report).await {
            Ok(()) => debug!(path = %self.path.display(), cycle = report.cycle, "Status written"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "Failed to write status"),
        }
    }
}
