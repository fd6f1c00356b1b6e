//! Errors raised by the annotation store.

/// Failure to reach or use the annotation store.
///
/// Every variant is a transport failure from the resolver's point of view. A
/// single-file fetch returns it as an error; only the batch fetch degrades a
/// failing file to an empty entry carrying the failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("annotation store: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("annotation store unavailable: {0}")]
    Unavailable(String),
    #[error("annotation {0:?} not found")]
    MissingAnnotation(String),
}
