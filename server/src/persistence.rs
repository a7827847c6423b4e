//! Snapshot-then-write persistence helpers.
//!
//! The run loop serializes state into a [`PersistJob`] while it owns the data,
//! then hands the job to a blocking thread. Writes go to a sibling temp file
//! and are renamed over the target, so a crash never leaves a torn file.

use crate::error::ServerError;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Serialized state waiting to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistJob {
    pub path: PathBuf,
    pub contents: String,
    /// Number of records in `contents`, for logging.
    pub records: usize,
}

impl PersistJob {
    pub fn write(self) -> Result<usize, ServerError> {
        let start = Instant::now();
        write_atomic(&self.path, &self.contents)?;
        info!(
            "Saved {} records to {} in {:.1}ms",
            self.records,
            self.path.display(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(self.records)
    }
}

/// Writes `contents` to `path` through a temp file and rename, creating the
/// parent directory if needed.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), ServerError> {
    let persist_err = |source| ServerError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(persist_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).map_err(persist_err)?;
    fs::rename(&tmp, path).map_err(persist_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("world.json");

        write_atomic(&path, "{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!dir.path().join("a").join("b").join("world.json.tmp").exists());
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("world.json");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_job_reports_record_count() {
        let dir = tempdir().unwrap();
        let job = PersistJob {
            path: dir.path().join("world.json"),
            contents: "{\"1,1\":{\"x\":1,\"y\":1,\"blockId\":\"dirt\"}}".to_string(),
            records: 1,
        };
        assert_eq!(job.write().unwrap(), 1);
    }

    #[test]
    fn test_unwritable_target_is_persist_error() {
        let dir = tempdir().unwrap();
        // a directory cannot be replaced by a file rename
        let path = dir.path().join("taken");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), "x").unwrap();

        match write_atomic(&path, "{}") {
            Err(ServerError::Persist { .. }) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
