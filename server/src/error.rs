use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures outside the hot path.
///
/// `Bind` and `WorldLoad` stop the process at startup. The others are logged
/// by whoever ran the background job.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to load world file {}: {reason}", .path.display())]
    WorldLoad { path: PathBuf, reason: String },
    #[error("failed to persist {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("score store error: {0}")]
    Scores(String),
    #[error("http server stopped: {0}")]
    Serve(#[source] io::Error),
}
