//! Error types for each layer of the anchoring stack.

use std::path::PathBuf;

use smilebin_core::StoreError;

/// A subprocess could not be started or did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable could not be started at all. Never retried.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The process exited unsuccessfully, was killed by a signal, or timed out.
    #[error("{program} failed (exit code {exit_code:?}): {stderr}")]
    Failure {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// Failure of a history query.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("unrecognized blame output: {0:?}")]
    MalformedBlame(String),
    #[error("blame returned no lines for {path} at {range}")]
    EmptyBlame { path: String, range: String },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure locating the repository that owns a file.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{0} is not inside a git working tree")]
    NotARepository(PathBuf),
    #[error("repository at {0} has no working directory")]
    Bare(PathBuf),
    #[error("resolving {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("repository discovery task failed: {0}")]
    Join(String),
}

/// Diff text could not be turned into a line-translation table.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("malformed hunk header: {0:?}")]
    MalformedHunk(String),
    #[error("hunk at old line {old_start} ends early")]
    TruncatedHunk { old_start: u32 },
}

/// Failure of an anchoring operation.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Transport(#[from] StoreError),
    #[error("invalid line range {start}..={end}")]
    InvalidRange { start: u32, end: u32 },
    /// A blamed line could not be located in its anchoring revision.
    #[error("line {line} has no counterpart in revision {revision}")]
    TranslationMiss { revision: String, line: u32 },
    /// The annotation row exists but not every address was persisted.
    #[error("annotation {annotation_id} was created with {persisted} of {expected} addresses")]
    IncompleteChain {
        annotation_id: String,
        persisted: usize,
        expected: usize,
        #[source]
        source: StoreError,
    },
}

impl AnchorError {
    /// Returns `true` when the failure came from the annotation store.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::IncompleteChain { .. })
    }
}
