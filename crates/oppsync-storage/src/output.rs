//! Local run artifacts: directory purge, JSON dumps, and CSV exports.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Artifact timestamp, e.g. `20260224_120000`.
pub fn run_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// A directory exclusively owned by one run.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn ensure(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating {}", self.root.display()))
    }

    /// Deletes regular files (not subdirectories). Files that cannot be removed
    /// are skipped and not counted. A missing directory counts as empty.
    pub async fn clear_files(&self) -> usize {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut deleted = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %self.root.display(), error = %err, "stopped listing output dir");
                    break;
                }
            };
            let is_file = entry
                .file_type()
                .await
                .map(|ft| ft.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => deleted += 1,
                Err(err) => {
                    warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "skipping undeletable file"
                    );
                }
            }
        }
        deleted
    }

    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> anyhow::Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serializing {name}"))?;
        let path = self.join(name);
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    /// Writes a header row of `columns` followed by `rows`, each already laid
    /// out in column order.
    pub async fn write_csv<I>(
        &self,
        name: &str,
        columns: &[&str],
        rows: I,
    ) -> anyhow::Result<PathBuf>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(columns)
            .with_context(|| format!("writing {name} header"))?;
        for row in rows {
            writer
                .write_record(&row)
                .with_context(|| format!("writing {name} row"))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing {name}: {}", e.error()))?;
        let path = self.join(name);
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }
}

/// Temp-file write followed by rename, so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    let mut file = fs::File::create(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "renaming temp file {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}
