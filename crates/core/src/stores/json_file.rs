use crate::models::STATE_FORMAT_VERSION;
use crate::traits::ProgressStore;
use crate::{SearchState, StoreError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Pretty-printed JSON snapshot, replaced atomically on every save.
///
/// Each save goes to `<path>.tmp`, is synced, and is then renamed over
/// `<path>`, so `load` only ever sees a complete snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn corrupt(&self, details: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            path: self.path.display().to_string(),
            details: details.into(),
        }
    }
}

#[async_trait]
impl ProgressStore for JsonFileStore {
    async fn save(&self, state: &SearchState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let temp_path = self.temp_path();

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), completed = state.completed, "search state saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<SearchState>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let state: SearchState =
            serde_json::from_str(&raw).map_err(|error| self.corrupt(error.to_string()))?;
        if state.format_version != STATE_FORMAT_VERSION {
            return Err(self.corrupt(format!(
                "format version {} is not {}",
                state.format_version, STATE_FORMAT_VERSION
            )));
        }

        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Assignment, CaseRecord, FilterParam};
    use tempfile::tempdir;
    use uuid::Uuid;

    #[tokio::test]
    async fn missing_file_loads_as_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonFileStore::new(dir.path().join("results.json"));
        assert!(store.load().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn saved_state_is_loaded_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonFileStore::new(dir.path().join("nested").join("results.json"));

        let mut state = SearchState::fresh("ANA PEREZ", "fingerprint");
        let assignment = Assignment::new(vec![0, 2]);
        let params = vec![FilterParam {
            field: "department".to_string(),
            value: "BOGOTA".to_string(),
        }];
        state.record_matches(&assignment, &params, vec![CaseRecord::with_id("123")], Uuid::new_v4());
        state.record_pruned(Assignment::new(vec![1]));
        state.mark_completed(assignment.clone());

        store.save(&state).await?;
        let loaded = store.load().await?.ok_or("snapshot missing")?;

        assert_eq!(loaded, state);
        assert!(!store.temp_path().exists());
        Ok(())
    }

    #[tokio::test]
    async fn garbage_snapshot_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("results.json");
        std::fs::write(&path, b"{\"search_name\": \"ANA")?;

        let result = JsonFileStore::new(&path).load().await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn leftover_temp_file_is_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonFileStore::new(dir.path().join("results.json"));

        let state = SearchState::fresh("ANA PEREZ", "fingerprint");
        store.save(&state).await?;
        std::fs::write(store.temp_path(), b"{ half written")?;

        assert_eq!(store.load().await?, Some(state));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_format_version_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonFileStore::new(dir.path().join("results.json"));

        let mut state = SearchState::fresh("ANA PEREZ", "fingerprint");
        state.format_version = STATE_FORMAT_VERSION + 1;
        store.save(&state).await?;

        assert!(matches!(store.load().await, Err(StoreError::Corrupt { .. })));
        Ok(())
    }
}
