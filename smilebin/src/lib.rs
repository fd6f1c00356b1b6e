//! Anchors annotations to lines of git-tracked files.
//!
//! An annotation is stored against the revisions that own its lines, not
//! against line numbers in a working copy, and is re-positioned in the
//! current buffer on every fetch by translating through `git diff`.
//!
//! - [`git`]: subprocess-backed history queries and repository discovery.
//! - [`translate`]: diff text to line-translation tables.
//! - [`anchor`]: create, fetch, toggle and delete over an annotation store.
//! - [`config`]: user configuration.
pub mod anchor;
pub mod config;
pub mod error;
pub mod git;
pub mod translate;

pub use anchor::{
    AnnotationResolver, CreateOutcome, FileAnnotations, Placement, RangeCheck,
    ResolvedAnnotation, ToggleOutcome,
};
pub use config::Config;
pub use error::AnchorError;
pub use translate::{DiffTranslator, LineTranslations, UnifiedDiffTranslator};
