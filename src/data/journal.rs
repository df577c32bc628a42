/// Append-only JSONL journal with replay and gzip-archived compaction
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// One JSON document per line; later lines win on replay
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Journal { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry in write order. Malformed lines are skipped and logged.
    pub async fn replay<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!("No journal at {}", self.path.display());
            return Ok(Vec::new());
        }

        let file = tokio::fs::File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(entry) => entries.push(entry),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                "⚠️  Skipped {} malformed lines while replaying {}",
                skipped,
                self.path.display()
            );
        }
        debug!("Replayed {} entries from {}", entries.len(), self.path.display());

        Ok(entries)
    }

    /// Append a batch with a single write followed by fsync.
    ///
    /// A torn last line left by a crash is terminated first so the batch
    /// starts on its own line.
    pub async fn append<T: Serialize>(&self, entries: &[T]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        ensure_parent(&self.path).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut buf = String::new();
        if ends_with_torn_line(&mut file).await? {
            warn!("⚠️  Terminating torn last line in {}", self.path.display());
            buf.push('\n');
        }
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }

        file.write_all(buf.as_bytes()).await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Rewrite the journal with only `entries`, archiving the old file as gzip.
    ///
    /// Returns the archive path when a previous journal existed.
    pub async fn compact<T: Serialize>(&self, entries: &[T]) -> Result<Option<PathBuf>> {
        ensure_parent(&self.path).await?;

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            for entry in entries {
                let line = serde_json::to_string(entry)?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.sync_all().await?;
        }

        let archive = if tokio::fs::try_exists(&self.path).await? {
            let archive = PathBuf::from(format!(
                "{}.{}.gz",
                self.path.display(),
                chrono::Utc::now().format("%Y%m%d_%H%M%S")
            ));
            gzip_file(self.path.clone(), archive.clone()).await?;
            Some(archive)
        } else {
            None
        };

        tokio::fs::rename(&tmp, &self.path).await?;

        info!(
            "🗜️  Compacted {} to {} entries",
            self.path.display(),
            entries.len()
        );
        Ok(archive)
    }
}

/// True when the file is non-empty and its last byte is not a newline
async fn ends_with_torn_line(file: &mut tokio::fs::File) -> Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

async fn gzip_file(source: PathBuf, target: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut input = std::fs::File::open(&source)?;
        let output = std::fs::File::create(&target)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        std::io::copy(&mut input, &mut encoder)?;
        encoder.finish()?.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| SyncError::InternalError(format!("Archive task failed: {}", e)))?
}

/// Write a JSON document via temp file + rename
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path).await?;
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
