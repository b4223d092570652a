//! JSON-lines persistence for auto-store snapshots.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use airq_core::{PersistRequest, PersistSink};

/// Appends every persist request as one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: W,
    path: Option<PathBuf>,
    written: u64,
}

impl JsonLinesSink<BufWriter<File>> {
    /// Open `path` for appending, creating it and its directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: Some(path.to_path_buf()),
            written: 0,
        })
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            path: None,
            written: 0,
        }
    }

    /// Number of requests written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn write_request(&mut self, request: &PersistRequest) -> Result<()> {
        serde_json::to_writer(&mut self.writer, request)
            .context("Failed to serialize snapshot")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> PersistSink for JsonLinesSink<W> {
    fn persist(&mut self, request: PersistRequest) {
        match self.write_request(&request) {
            Ok(()) => {
                self.written += 1;
                debug!(sensor = %request.sensor_id, path = ?self.path, "Snapshot persisted");
            }
            Err(e) => warn!(path = ?self.path, "Failed to persist snapshot: {:#}", e),
        }
    }
}
