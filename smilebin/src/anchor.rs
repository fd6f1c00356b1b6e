//! Anchoring annotations to revisions and resolving them back to the buffer.
//!
//! An annotation is stored as an ordered chain of addresses, one per revision
//! span its range crossed when it was created. Each address records lines
//! relative to its own revision. On read, the first address's start and the
//! last address's end are translated forward through the diff between their
//! revision and the working tree to give the current position.
//!
//! Intermediate addresses are not re-validated on read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use smilebin_core::{
    Annotation, AnnotationStore, DeleteOutcome, FileFingerprint, NewAddress, NewAnnotation,
};

use crate::error::AnchorError;
use crate::git::history::{count_lines, snippet, HistoryInspector, InspectorCache};
use crate::git::repository::RepoContext;
use crate::git::types::{LineRange, Revision, RevisionSpan};
use crate::translate::{DiffTranslator, LineTranslations};

/// Upper bound on concurrently running `git` subprocesses within one operation.
const MAX_CONCURRENT_GIT: usize = 8;

/// Where an annotation sits in the current buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Both ends translated to current lines.
    Current(LineRange),
    /// The anchored start or end line no longer exists. Must not be rendered.
    Deleted,
    /// The position could not be computed; the annotation is kept with a reason.
    Unresolved { reason: String },
}

/// A fetched annotation with its position in the current buffer.
#[derive(Debug, Clone)]
pub struct ResolvedAnnotation {
    pub annotation: Annotation,
    pub placement: Placement,
}

impl ResolvedAnnotation {
    pub fn current_range(&self) -> Option<LineRange> {
        match self.placement {
            Placement::Current(range) => Some(range),
            _ => None,
        }
    }
}

/// Annotations for one file of a batch fetch, or the reason there are none.
#[derive(Debug)]
pub struct FileAnnotations {
    pub path: PathBuf,
    pub annotations: Vec<ResolvedAnnotation>,
    pub failure: Option<AnchorError>,
}

/// Provenance of a candidate range, as reported by [`AnnotationResolver::check_range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCheck {
    pub spans: Vec<RevisionSpan>,
}

impl RangeCheck {
    /// Lines in the range that have never been committed.
    pub fn uncommitted_lines(&self) -> Vec<u32> {
        self.spans
            .iter()
            .filter(|s| s.is_uncommitted())
            .flat_map(|s| s.start_line..=s.end_line)
            .collect()
    }

    pub fn is_committed(&self) -> bool {
        !self.spans.iter().any(RevisionSpan::is_uncommitted)
    }
}

/// Result of a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { id: String, addresses: usize },
    /// The range includes uncommitted lines; nothing was written.
    Declined { uncommitted_lines: Vec<u32> },
}

/// Result of toggling a single-line annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Removed { id: String },
    Created { id: String },
    Declined { uncommitted_lines: Vec<u32> },
}

/// One address computed before anything is persisted.
#[derive(Debug, Clone)]
struct AddressPlan {
    sequence: u32,
    revision: Revision,
    checksum: String,
    start_line: u32,
    end_line: u32,
}

/// The anchoring protocol over an [`AnnotationStore`] and a [`DiffTranslator`].
pub struct AnnotationResolver<S, T> {
    store: S,
    translator: T,
    inspectors: Arc<InspectorCache>,
    user_id: String,
}

impl<S, T> AnnotationResolver<S, T>
where
    S: AnnotationStore,
    T: DiffTranslator,
{
    pub fn new(
        store: S,
        translator: T,
        inspectors: Arc<InspectorCache>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            translator,
            inspectors,
            user_id: user_id.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn locate(&self, path: &Path) -> Result<(RepoContext, Arc<HistoryInspector>), AnchorError> {
        let ctx = RepoContext::discover(path).await?;
        let inspector = self.inspectors.for_working_directory(&ctx.working_directory);
        Ok((ctx, inspector))
    }

    /// Reports which revisions own each line of `range` without writing anything.
    ///
    /// Every line of a file with no committed history is reported uncommitted.
    ///
    /// # Errors
    ///
    /// [`AnchorError::InvalidRange`] when `range` runs past the end of the file.
    pub async fn check_range(&self, path: &Path, range: LineRange) -> Result<RangeCheck, AnchorError> {
        let (ctx, inspector) = self.locate(path).await?;
        let rel = ctx.relative_path.as_str();
        let line_count = inspector.line_count(rel).await?;
        provenance(&inspector, rel, range, line_count).await
    }

    /// Fingerprints of every historical state of `path`, newest first.
    pub async fn fingerprints(&self, path: &Path) -> Result<Vec<FileFingerprint>, AnchorError> {
        let (ctx, inspector) = self.locate(path).await?;
        fingerprints_for(&inspector, &ctx.relative_path).await
    }

    /// Fetches the annotations anchored in `path`'s history and positions them
    /// in the current buffer.
    ///
    /// With `skip` set, returns an empty list without touching git or the store.
    /// Annotations anchored at revisions no longer in the file's history are
    /// silently absent. A failure positioning one annotation is reported in its
    /// [`Placement`] and does not affect the others.
    ///
    /// # Errors
    ///
    /// Repository, history or store failures for the file as a whole. A store
    /// failure is [`AnchorError::Transport`].
    pub async fn fetch_annotations(
        &self,
        path: &Path,
        skip: bool,
    ) -> Result<Vec<ResolvedAnnotation>, AnchorError> {
        if skip {
            tracing::debug!(path = %path.display(), "fetch skipped");
            return Ok(Vec::new());
        }

        let (ctx, inspector) = self.locate(path).await?;
        let rel = ctx.relative_path.as_str();

        let fingerprints = fingerprints_for(&inspector, rel).await?;
        if fingerprints.is_empty() {
            return Ok(Vec::new());
        }

        let annotations = self.store.fetch(&ctx.repo_key(), &fingerprints).await?;
        if annotations.is_empty() {
            return Ok(Vec::new());
        }

        let line_count = inspector.line_count(rel).await?;
        let tables = self
            .tables_for(&inspector, rel, &annotations, line_count)
            .await;

        let resolved = annotations
            .into_iter()
            .map(|annotation| {
                let placement = place(&annotation, &tables);
                if let Placement::Unresolved { reason } = &placement {
                    tracing::warn!(annotation_id = %annotation.id, %reason, "annotation not positioned");
                }
                ResolvedAnnotation {
                    annotation,
                    placement,
                }
            })
            .collect();
        Ok(resolved)
    }

    /// Fetches several files concurrently.
    ///
    /// Each file gets its own entry; a failure for one file is recorded in that
    /// entry's `failure` and leaves the others untouched.
    pub async fn fetch_many(&self, paths: &[PathBuf], skip: bool) -> Vec<FileAnnotations> {
        futures::future::join_all(paths.iter().map(|path| async move {
            match self.fetch_annotations(path, skip).await {
                Ok(annotations) => FileAnnotations {
                    path: path.clone(),
                    annotations,
                    failure: None,
                },
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "fetch failed");
                    FileAnnotations {
                        path: path.clone(),
                        annotations: Vec::new(),
                        failure: Some(err),
                    }
                }
            }
        }))
        .await
    }

    /// Creates an annotation over lines `start..=end` of `path`.
    ///
    /// The range is declined, with nothing written, if any line in it is
    /// uncommitted. Otherwise one address is computed per revision span
    /// (concurrently), the annotation row is persisted, and then the addresses
    /// are persisted in sequence order.
    ///
    /// # Errors
    ///
    /// [`AnchorError::InvalidRange`] unless `1 <= start <= end <= line count`.
    /// [`AnchorError::IncompleteChain`] if the annotation row was written but an
    /// address was not; the partial chain is left for readers to detect.
    pub async fn create_annotation(
        &self,
        path: &Path,
        text: &str,
        emoticon: &str,
        start: u32,
        end: u32,
    ) -> Result<CreateOutcome, AnchorError> {
        let range = LineRange::new(start, end).ok_or(AnchorError::InvalidRange { start, end })?;
        let (ctx, inspector) = self.locate(path).await?;
        let rel = ctx.relative_path.as_str();

        let content = inspector.read_worktree(rel).await?;
        let line_count = count_lines(&content);

        let check = provenance(&inspector, rel, range, line_count).await?;
        if !check.is_committed() {
            let uncommitted_lines = check.uncommitted_lines();
            tracing::debug!(path = rel, ?uncommitted_lines, "range includes uncommitted lines; declined");
            return Ok(CreateOutcome::Declined { uncommitted_lines });
        }

        let history: &HistoryInspector = &inspector;
        let plans: Vec<AddressPlan> = futures::stream::iter(check.spans.iter().enumerate())
            .map(move |(sequence, span)| {
                self.plan_address(history, rel, sequence as u32, span, line_count)
            })
            .buffered(MAX_CONCURRENT_GIT)
            .try_collect()
            .await?;
        let (Some(first), Some(last)) = (plans.first(), plans.last()) else {
            return Err(AnchorError::InvalidRange { start, end });
        };

        let repo_id = self.store.lookup_or_create_repo(&ctx.repo_key()).await?;
        let annotation_id = self
            .store
            .create_annotation(&NewAnnotation {
                repo_id,
                user_id: self.user_id.clone(),
                text: text.to_owned(),
                emoticon: emoticon.to_owned(),
                start_line: first.start_line,
                end_line: last.end_line,
                code_snippet: snippet(&content, range),
                address_count: plans.len() as u32,
            })
            .await?;

        // Addresses reference the annotation id, so they strictly follow it.
        for (persisted, plan) in plans.iter().enumerate() {
            let address = NewAddress {
                annotation_id: annotation_id.clone(),
                sequence: plan.sequence,
                revision: plan.revision.to_string(),
                file_checksum: plan.checksum.clone(),
                start_line: plan.start_line,
                end_line: plan.end_line,
            };
            if let Err(source) = self.store.create_address(&address).await {
                return Err(AnchorError::IncompleteChain {
                    annotation_id,
                    persisted,
                    expected: plans.len(),
                    source,
                });
            }
        }

        tracing::info!(
            annotation_id = %annotation_id,
            path = rel,
            %range,
            addresses = plans.len(),
            "annotation created"
        );
        Ok(CreateOutcome::Created {
            id: annotation_id,
            addresses: plans.len(),
        })
    }

    /// Deletes annotation `id`. Unknown ids yield [`DeleteOutcome::NotFound`].
    pub async fn delete_annotation(&self, id: &str) -> Result<DeleteOutcome, AnchorError> {
        let outcome = self.store.delete_annotation(id).await?;
        tracing::info!(annotation_id = id, ?outcome, "annotation delete");
        Ok(outcome)
    }

    /// Removes the annotation covering `line`, or creates a single-line one there.
    pub async fn toggle_annotation(
        &self,
        path: &Path,
        line: u32,
        text: &str,
        emoticon: &str,
    ) -> Result<ToggleOutcome, AnchorError> {
        if LineRange::single(line).is_none() {
            return Err(AnchorError::InvalidRange { start: line, end: line });
        }

        let existing = self.fetch_annotations(path, false).await?;
        let covering = existing
            .iter()
            .find(|a| a.current_range().is_some_and(|r| r.contains(line)));
        if let Some(hit) = covering {
            let id = hit.annotation.id.clone();
            self.delete_annotation(&id).await?;
            return Ok(ToggleOutcome::Removed { id });
        }

        match self.create_annotation(path, text, emoticon, line, line).await? {
            CreateOutcome::Created { id, .. } => Ok(ToggleOutcome::Created { id }),
            CreateOutcome::Declined { uncommitted_lines } => {
                Ok(ToggleOutcome::Declined { uncommitted_lines })
            }
        }
    }

    /// Checksum and revision-relative lines for one blame span.
    ///
    /// Blame reports current-buffer lines; the stored lines must be relative to
    /// `span.revision`, so they are recovered by inverting that revision's
    /// translation table.
    async fn plan_address(
        &self,
        inspector: &HistoryInspector,
        rel: &str,
        sequence: u32,
        span: &RevisionSpan,
        line_count: u32,
    ) -> Result<AddressPlan, AnchorError> {
        let (checksum, table) = futures::try_join!(
            async {
                inspector
                    .checksum(rel, &span.revision)
                    .await
                    .map_err(AnchorError::from)
            },
            self.translation_table(inspector, rel, &span.revision, line_count),
        )?;

        let miss = |line: u32| AnchorError::TranslationMiss {
            revision: span.revision.to_string(),
            line,
        };
        let start_line = table.invert(span.start_line).ok_or_else(|| miss(span.start_line))?;
        let end_line = table.invert(span.end_line).ok_or_else(|| miss(span.end_line))?;

        Ok(AddressPlan {
            sequence,
            revision: span.revision.clone(),
            checksum,
            start_line,
            end_line,
        })
    }

    async fn translation_table(
        &self,
        inspector: &HistoryInspector,
        rel: &str,
        revision: &Revision,
        line_count: u32,
    ) -> Result<LineTranslations, AnchorError> {
        let diff = inspector.diff(rel, revision).await?;
        Ok(self.translator.translate(&diff, line_count)?)
    }

    /// Translation tables for every revision that anchors the first or last
    /// address of a fetched annotation, each computed once.
    async fn tables_for(
        &self,
        inspector: &HistoryInspector,
        rel: &str,
        annotations: &[Annotation],
        line_count: u32,
    ) -> HashMap<String, Result<LineTranslations, String>> {
        let mut revisions: Vec<&str> = annotations
            .iter()
            .filter(|a| a.has_complete_chain())
            .flat_map(|a| [a.addresses.first(), a.addresses.last()])
            .flatten()
            .map(|address| address.revision.as_str())
            .collect();
        revisions.sort_unstable();
        revisions.dedup();

        futures::stream::iter(revisions)
            .map(move |revision| async move {
                let table = self
                    .translation_table(inspector, rel, &Revision::new(revision), line_count)
                    .await
                    .map_err(|err| err.to_string());
                (revision.to_owned(), table)
            })
            .buffer_unordered(MAX_CONCURRENT_GIT)
            .collect()
            .await
    }
}

/// Attributes each line of `range` to a revision, refusing ranges that run
/// past the `line_count` lines of the working tree. Blame would silently clip
/// such a range to the end of the file.
async fn provenance(
    inspector: &HistoryInspector,
    rel: &str,
    range: LineRange,
    line_count: u32,
) -> Result<RangeCheck, AnchorError> {
    if range.end > line_count {
        return Err(AnchorError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    let spans = inspector.provenance(rel, range).await?;
    Ok(RangeCheck { spans })
}

/// Fingerprints for every revision that touched `rel`, newest first.
///
/// A revision whose checksum cannot be computed (typically the revision that
/// deleted or renamed the path) contributes no fingerprint.
async fn fingerprints_for(
    inspector: &HistoryInspector,
    rel: &str,
) -> Result<Vec<FileFingerprint>, AnchorError> {
    let revisions = inspector
        .list_revisions(rel)
        .await
        .map_err(|err| AnchorError::History(err.into()))?;

    let fingerprints: Vec<FileFingerprint> = futures::stream::iter(revisions)
        .map(move |revision| async move {
            match inspector.checksum(rel, &revision).await {
                Ok(checksum) => Some(FileFingerprint::new(revision.as_str(), &checksum)),
                Err(err) => {
                    tracing::debug!(%revision, error = %err, "no content at revision; skipped");
                    None
                }
            }
        })
        .buffered(MAX_CONCURRENT_GIT)
        .filter_map(|fingerprint| async move { fingerprint })
        .collect()
        .await;
    Ok(fingerprints)
}

/// Positions one annotation using precomputed translation tables.
fn place(annotation: &Annotation, tables: &HashMap<String, Result<LineTranslations, String>>) -> Placement {
    if !annotation.has_complete_chain() {
        return Placement::Unresolved {
            reason: "address chain is incomplete".to_owned(),
        };
    }
    let (Some(first), Some(last)) = (annotation.addresses.first(), annotation.addresses.last())
    else {
        return Placement::Unresolved {
            reason: "annotation has no addresses".to_owned(),
        };
    };

    let forward = |revision: &str, line: u32| -> Result<Option<u32>, String> {
        match tables.get(revision) {
            Some(Ok(table)) => Ok(table.forward(line)),
            Some(Err(reason)) => Err(reason.clone()),
            None => Err(format!("no translation for revision {revision}")),
        }
    };

    let start = match forward(&first.revision, first.start_line) {
        Ok(line) => line,
        Err(reason) => return Placement::Unresolved { reason },
    };
    let end = match forward(&last.revision, last.end_line) {
        Ok(line) => line,
        Err(reason) => return Placement::Unresolved { reason },
    };

    match (start, end) {
        (Some(start), Some(end)) => match LineRange::new(start, end) {
            Some(range) => Placement::Current(range),
            None => Placement::Unresolved {
                reason: format!("translated range {start}..={end} is inverted"),
            },
        },
        _ => Placement::Deleted,
    }
}
