//! Persisting resolved views.
//!
//! [`ViewSink`] is the `saveView` side of a refresh pass. [`DirectorySink`] writes
//! one JSON file per view and leaves files whose content has not changed alone, so
//! repeated passes over an unchanged dashboard touch nothing. [`MemorySink`] keeps
//! views in memory for tests and embedding.

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::Format;
use crate::core::CardtplError;

/// What saving a view did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The view was written
    Written,
    /// The stored view already matched
    Unchanged,
}

/// Accepts resolved views for storage.
pub trait ViewSink {
    /// Store `view` under `name`.
    fn save_view(&self, name: &str, view: &Value) -> impl Future<Output = Result<SaveOutcome>> + Send;
}

/// Writes each view to `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// A sink writing into `dir`, created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }

    /// File a view named `name` is written to.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl ViewSink for DirectorySink {
    async fn save_view(&self, name: &str, view: &Value) -> Result<SaveOutcome> {
        let path = self.path_for(name);
        let content = Format::Json.render(view)?;

        if let Ok(existing) = tokio::fs::read_to_string(&path).await
            && existing == content
        {
            tracing::debug!("View '{}' unchanged at {}", name, path.display());
            return Ok(SaveOutcome::Unchanged);
        }

        atomic_write(&path, &content).await.map_err(|e| CardtplError::SaveFailed {
            view: name.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!("Wrote view '{}' to {}", name, path.display());
        Ok(SaveOutcome::Written)
    }
}

/// Writes through a temporary file and renames it into place.
async fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await
}

/// Keeps saved views in memory, keyed by name.
#[derive(Debug, Default)]
pub struct MemorySink {
    views: Mutex<BTreeMap<String, Value>>,
}

impl MemorySink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every stored view.
    #[must_use]
    pub fn views(&self) -> BTreeMap<String, Value> {
        self.views.lock().map(|views| views.clone()).unwrap_or_default()
    }
}

impl ViewSink for MemorySink {
    async fn save_view(&self, name: &str, view: &Value) -> Result<SaveOutcome> {
        let mut views = self.views.lock().map_err(|_| CardtplError::SaveFailed {
            view: name.to_string(),
            reason: "view store is poisoned".to_string(),
        })?;
        if views.get(name) == Some(view) {
            return Ok(SaveOutcome::Unchanged);
        }
        views.insert(name.to_string(), view.clone());
        Ok(SaveOutcome::Written)
    }
}
