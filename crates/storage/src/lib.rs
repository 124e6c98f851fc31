use chrono::Utc;
use directories::ProjectDirs;
use doc_model::{Bookmark, DocumentSet, ViewerPreferences};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const PREFS_SCHEMA_VERSION: u32 = 1;
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("document set {0} not found")]
    NotFound(String),
    #[error("document set name must not be empty")]
    InvalidName,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Filesystem-backed registry of document sets plus viewer preferences.
///
/// Each set lives in `<root>/sets/<id>/` holding `original.pdf`,
/// `translated.pdf` and `metadata.json`.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferencesEnvelope {
    version: u32,
    preferences: ViewerPreferences,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs = ProjectDirs::from("dev", "twinpage", "twinpage")
            .ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All stored sets, oldest first, with document paths resolved to
    /// absolute paths inside each set directory.
    pub fn list(&self) -> Result<Vec<DocumentSet>, StorageError> {
        let sets_dir = self.sets_dir()?;
        if !sets_dir.exists() {
            return Ok(Vec::new());
        }

        let mut sets = Vec::new();
        for entry in fs::read_dir(&sets_dir)? {
            let path = entry?.path();
            if !path.is_dir() || !path.join(METADATA_FILE).exists() {
                continue;
            }

            let Some(id) = path.file_name().and_then(|name| name.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping set directory with invalid name");
                continue;
            };

            sets.push(self.read_set(&sets_dir, id)?);
        }

        sets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sets)
    }

    pub fn get(&self, id: &str) -> Result<DocumentSet, StorageError> {
        let sets_dir = self.sets_dir()?;
        if !is_valid_id(id) || !sets_dir.join(id).join(METADATA_FILE).exists() {
            return Err(StorageError::NotFound(id.to_owned()));
        }

        self.read_set(&sets_dir, id)
    }

    /// Copy both documents into a new set directory and record it.
    ///
    /// On failure the partially created directory is removed.
    pub fn create(
        &self,
        name: &str,
        original_path: &Path,
        translated_path: &Path,
    ) -> Result<DocumentSet, StorageError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::InvalidName);
        }

        let sets_dir = self.sets_dir()?;
        let set = DocumentSet::new(name, &sets_dir);
        let set_dir = sets_dir.join(&set.id);
        fs::create_dir_all(&set_dir)?;

        let copied = fs::copy(original_path, &set.original_path)
            .and_then(|_| fs::copy(translated_path, &set.translated_path));
        if let Err(err) = copied {
            let _ = fs::remove_dir_all(&set_dir);
            return Err(err.into());
        }

        if let Err(err) = write_metadata(&set_dir, &set) {
            let _ = fs::remove_dir_all(&set_dir);
            return Err(err);
        }

        tracing::info!(id = %set.id, name = %set.name, "created document set");
        Ok(set)
    }

    /// Remove a set and its documents. Unknown ids fail with `NotFound`.
    pub fn delete(&self, id: &str) -> Result<(), StorageError> {
        let sets_dir = self.sets_dir()?;
        let set_dir = sets_dir.join(id);
        if !is_valid_id(id) || !set_dir.is_dir() {
            return Err(StorageError::NotFound(id.to_owned()));
        }

        fs::remove_dir_all(&set_dir)?;
        tracing::info!(id, "deleted document set");
        Ok(())
    }

    /// Stamp `last_opened_at` with the current time.
    pub fn mark_opened(&self, id: &str) -> Result<DocumentSet, StorageError> {
        self.update(id, |set| set.last_opened_at = Some(Utc::now()))
    }

    pub fn set_bookmark(
        &self,
        id: &str,
        bookmark: Option<Bookmark>,
    ) -> Result<DocumentSet, StorageError> {
        self.update(id, |set| set.bookmark = bookmark)
    }

    pub fn load_preferences(&self) -> Result<ViewerPreferences, StorageError> {
        let path = self.preferences_path();
        if !path.exists() {
            return Ok(ViewerPreferences::default());
        }

        let bytes = fs::read(path)?;
        let envelope: PreferencesEnvelope = serde_json::from_slice(&bytes)?;

        Ok(envelope.preferences.sanitized())
    }

    pub fn save_preferences(&self, preferences: &ViewerPreferences) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope =
            PreferencesEnvelope { version: PREFS_SCHEMA_VERSION, preferences: *preferences };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.preferences_path(), bytes)?;
        Ok(())
    }

    fn update(
        &self,
        id: &str,
        apply: impl FnOnce(&mut DocumentSet),
    ) -> Result<DocumentSet, StorageError> {
        let mut set = self.get(id)?;
        apply(&mut set);

        let set_dir = self.sets_dir()?.join(id);
        write_metadata(&set_dir, &set)?;
        Ok(set)
    }

    fn read_set(&self, sets_dir: &Path, id: &str) -> Result<DocumentSet, StorageError> {
        let set_dir = sets_dir.join(id);
        let json = fs::read(set_dir.join(METADATA_FILE))?;
        let mut set: DocumentSet = serde_json::from_slice(&json)?;

        // Metadata may have been written under a different root.
        set.id = id.to_owned();
        set.original_path = set_dir.join(DocumentSet::ORIGINAL_FILE);
        set.translated_path = set_dir.join(DocumentSet::TRANSLATED_FILE);
        Ok(set)
    }

    fn sets_dir(&self) -> Result<PathBuf, StorageError> {
        Ok(std::path::absolute(&self.root)?.join("sets"))
    }

    fn preferences_path(&self) -> PathBuf {
        self.root.join("preferences.json")
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}

fn write_metadata(set_dir: &Path, set: &DocumentSet) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(set)?;
    let tmp = set_dir.join(format!("{METADATA_FILE}.tmp"));
    fs::write(&tmp, json)?;
    fs::rename(tmp, set_dir.join(METADATA_FILE))?;
    Ok(())
}
