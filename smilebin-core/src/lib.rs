//! Persistence for smilebin annotations.
//!
//! Holds the entity types shared with the anchoring layer, the SQLite schema,
//! and the [`store::AnnotationStore`] seam the anchoring layer writes through.
pub mod db;
pub mod error;
pub mod schema;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::{AnnotationStore, SqliteStore};
pub use types::{
    Annotation, AnnotationAddress, DeleteOutcome, FileFingerprint, NewAddress, NewAnnotation,
    Repo,
};
