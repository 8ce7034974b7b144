//! File-backed experiment store: one pretty-printed JSON document per run.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hop_core::{HopError, Result};

use crate::record::{ExperimentRecord, ExperimentSummary};

/// Directory of `<id>.json` experiment records.
///
/// Writes go through a temporary file and a rename, serialized by a
/// store-wide lock; reads need no lock.
pub struct ExperimentStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ExperimentStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            HopError::persistence(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        info!("Opened experiment store at {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush directory metadata and release the store.
    pub fn close(self) -> Result<()> {
        #[cfg(unix)]
        std::fs::File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| HopError::persistence(format!("Failed to sync {}: {}", self.dir.display(), e)))?;

        debug!("Closed experiment store at {}", self.dir.display());
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty()
            || id.contains(['/', '\\'])
            || id.contains("..")
            || id.starts_with('.')
        {
            return Err(HopError::invalid_argument(format!("Invalid experiment id: {:?}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// Persist a new record. Fails if the id is already stored.
    pub async fn save(&self, record: &ExperimentRecord) -> Result<()> {
        let path = self.path_for(&record.id)?;
        let bytes = serde_json::to_vec_pretty(record)?;

        let _guard = self.write_lock.lock().await;

        if tokio::fs::try_exists(&path).await? {
            return Err(HopError::persistence(format!(
                "Experiment {} already exists",
                record.id
            )));
        }

        let tmp = self.dir.join(format!("{}.json.tmp", record.id));
        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &path).await
        };

        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(HopError::persistence(format!(
                "Failed to write {}: {}",
                path.display(),
                e
            )));
        }

        info!("Saved experiment {} ({} results)", record.id, record.results.len());
        Ok(())
    }

    /// Load a record by id.
    pub async fn get(&self, id: &str) -> Result<ExperimentRecord> {
        let path = self.path_for(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HopError::ExperimentNotFound { id: id.to_string() })
            }
            Err(e) => {
                return Err(HopError::persistence(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            HopError::persistence(format!("Corrupt experiment {}: {}", path.display(), e))
        })
    }

    /// Summaries of all stored records, newest first.
    ///
    /// Unreadable files are skipped with a warning.
    pub async fn list(&self) -> Result<Vec<ExperimentSummary>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut summaries = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let parsed = tokio::fs::read(&path)
                .await
                .map_err(HopError::from)
                .and_then(|bytes| serde_json::from_slice::<ExperimentRecord>(&bytes).map_err(HopError::from));

            match parsed {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => warn!("Skipping unreadable experiment {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(summaries)
    }

    /// Resolve an id or, failing that, the newest record with that name.
    pub async fn find(&self, name_or_id: &str) -> Result<Option<ExperimentRecord>> {
        match self.get(name_or_id).await {
            Ok(record) => return Ok(Some(record)),
            Err(HopError::ExperimentNotFound { .. }) | Err(HopError::InvalidArgument { .. }) => {}
            Err(e) => return Err(e),
        }

        let newest = self
            .list()
            .await?
            .into_iter()
            .find(|s| s.name == name_or_id);

        match newest {
            Some(summary) => Ok(Some(self.get(&summary.id).await?)),
            None => Ok(None),
        }
    }
}
