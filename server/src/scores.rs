//! Persistent high-score table and the fire-and-forget reporter feeding it.

use crate::error::ServerError;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Entries kept in the table.
pub const MAX_SCORES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub nickname: String,
    pub length: u64,
    pub timestamp: DateTime<Utc>,
}

/// Score table backed by a JSON file, sorted by length descending.
#[derive(Debug)]
pub struct ScoreStore {
    path: PathBuf,
    entries: Vec<ScoreEntry>,
}

pub type SharedScores = Arc<Mutex<ScoreStore>>;

impl ScoreStore {
    /// Loads the table, starting empty when the file is missing or unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<ScoreEntry>>(&contents) {
                Ok(mut entries) => {
                    entries.sort_by(|a, b| b.length.cmp(&a.length));
                    entries.truncate(MAX_SCORES);
                    info!("Loaded {} scores from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    warn!("Ignoring unreadable score file {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Could not read score file {}: {}", path.display(), e);
                Vec::new()
            }
        };

        Self { path, entries }
    }

    pub fn shared(self) -> SharedScores {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ScoreEntry] {
        &self.entries
    }

    /// Records a score and writes the table back.
    ///
    /// Returns the 1-based rank of the new entry, or `None` when it did not
    /// make the table. Equal lengths rank in submission order.
    pub fn submit(
        &mut self,
        nickname: &str,
        length: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<usize>, ServerError> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.length < length)
            .unwrap_or(self.entries.len());

        let rank = if position < MAX_SCORES {
            self.entries.insert(
                position,
                ScoreEntry {
                    nickname: nickname.to_string(),
                    length,
                    timestamp,
                },
            );
            self.entries.truncate(MAX_SCORES);
            Some(position + 1)
        } else {
            None
        };

        self.save()?;
        Ok(rank)
    }

    fn save(&self) -> Result<(), ServerError> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| ServerError::Scores(e.to_string()))?;
        crate::persistence::write_atomic(&self.path, &json)
    }
}

/// A finished run handed to the score table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreReport {
    pub nickname: String,
    pub length: u64,
}

/// Non-blocking handle used by the run loop to report scores.
#[derive(Debug, Clone)]
pub struct ScoreReporter {
    tx: Option<mpsc::UnboundedSender<ScoreReport>>,
}

impl ScoreReporter {
    pub fn new(tx: mpsc::UnboundedSender<ScoreReport>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A reporter that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, nickname: &str, length: usize) {
        let Some(tx) = &self.tx else {
            return;
        };
        let report = ScoreReport {
            nickname: nickname.to_string(),
            length: length as u64,
        };
        if tx.send(report).is_err() {
            warn!("Score writer is gone, dropping score for {}", nickname);
        }
    }
}

/// Spawns the task that writes reported scores, returning its reporter.
pub fn spawn_score_writer(store: SharedScores) -> (ScoreReporter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ScoreReport>();

    let handle = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            let store = Arc::clone(&store);
            let result = tokio::task::spawn_blocking(move || {
                let mut store = store
                    .lock()
                    .map_err(|_| ServerError::Scores("score store lock poisoned".to_string()))?;
                store.submit(&report.nickname, report.length, Utc::now())
            })
            .await;

            match result {
                Ok(Ok(Some(rank))) => info!("Recorded score at rank {}", rank),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("Failed to record score: {}", e),
                Err(e) => warn!("Score writer task failed: {}", e),
            }
        }
    });

    (ScoreReporter::new(tx), handle)
}
