//! The annotation store seam.
//!
//! The anchoring layer only ever talks to [`AnnotationStore`]. [`SqliteStore`]
//! is the bundled implementation over a WAL-mode SQLite file; a remote
//! query/mutation transport can implement the same trait.

use std::future::Future;

use tokio_rusqlite::Connection;

use crate::db;
use crate::error::StoreError;
use crate::types::{Annotation, DeleteOutcome, FileFingerprint, NewAddress, NewAnnotation};

/// Persistence operations the anchoring layer needs.
///
/// `fetch` must distinguish "no results" (`Ok(vec![])`) from a failure
/// (`Err`). Only annotations whose first address fingerprint is in
/// `fingerprints` are returned.
pub trait AnnotationStore {
    /// Returns the id of the repo keyed by `url`, creating it if absent.
    fn lookup_or_create_repo(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Returns annotations in `repo_url` anchored at any of `fingerprints`.
    fn fetch(
        &self,
        repo_url: &str,
        fingerprints: &[FileFingerprint],
    ) -> impl Future<Output = Result<Vec<Annotation>, StoreError>> + Send;

    /// Persists an annotation row and returns its id.
    fn create_annotation(
        &self,
        annotation: &NewAnnotation,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Persists one address of an existing annotation and returns its id.
    fn create_address(
        &self,
        address: &NewAddress,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Deletes an annotation and, by contract, its addresses.
    fn delete_annotation(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<DeleteOutcome, StoreError>> + Send;
}

/// [`AnnotationStore`] backed by a local SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the store at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let conn = db::open_db(path).await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl AnnotationStore for SqliteStore {
    async fn lookup_or_create_repo(&self, url: &str) -> Result<String, StoreError> {
        let repo = db::lookup_or_create_repo(&self.conn, url).await?;
        Ok(repo.id)
    }

    async fn fetch(
        &self,
        repo_url: &str,
        fingerprints: &[FileFingerprint],
    ) -> Result<Vec<Annotation>, StoreError> {
        Ok(db::fetch_annotations(&self.conn, repo_url, fingerprints).await?)
    }

    async fn create_annotation(&self, annotation: &NewAnnotation) -> Result<String, StoreError> {
        let id = db::create_annotation(&self.conn, annotation).await?;
        tracing::debug!(annotation_id = %id, "annotation row created");
        Ok(id)
    }

    async fn create_address(&self, address: &NewAddress) -> Result<String, StoreError> {
        db::create_address(&self.conn, address)
            .await?
            .ok_or_else(|| StoreError::MissingAnnotation(address.annotation_id.clone()))
    }

    async fn delete_annotation(&self, id: &str) -> Result<DeleteOutcome, StoreError> {
        Ok(db::delete_annotation(&self.conn, id).await?)
    }
}
