//! History queries built from `git` subprocess calls and text parsing.
//!
//! All paths passed to [`HistoryInspector`] are relative to the working
//! directory it was created for (the repository root).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{HistoryError, ProcessError};
use crate::git::process::ProcessRunner;
use crate::git::types::{LineRange, Revision, RevisionSpan};

/// Answers history questions about files in one working directory.
#[derive(Debug, Clone)]
pub struct HistoryInspector {
    runner: ProcessRunner,
    git: String,
}

impl HistoryInspector {
    pub fn new(runner: ProcessRunner, git: impl Into<String>) -> Self {
        Self {
            runner,
            git: git.into(),
        }
    }

    pub fn working_directory(&self) -> &Path {
        self.runner.working_directory()
    }

    /// Lists every revision that touched `path`, newest first.
    ///
    /// A failing `git log` (for example an untracked path or a repository with
    /// no commits) means "no history" and yields an empty list. Only a spawn
    /// failure is propagated.
    pub async fn list_revisions(&self, path: &str) -> Result<Vec<Revision>, ProcessError> {
        match self
            .runner
            .run(
                &self.git,
                &["log", "--no-show-signature", "--pretty=format:%H", "--", path],
            )
            .await
        {
            Ok(out) => Ok(out
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(Revision::new)
                .collect()),
            Err(err @ ProcessError::Spawn { .. }) => Err(err),
            Err(err) => {
                tracing::warn!(path, error = %err, "listing revisions failed; treating as no history");
                Ok(Vec::new())
            }
        }
    }

    /// Hex SHA-256 of `path`'s content as of `revision`.
    ///
    /// # Errors
    ///
    /// Fails if `revision` does not contain `path`; an empty checksum would be
    /// indistinguishable from a real one.
    pub async fn checksum(&self, path: &str, revision: &Revision) -> Result<String, HistoryError> {
        let object = format!("{}:{}", revision, path);
        let content = self.runner.run_bytes(&self.git, &["show", &object]).await?;
        Ok(hex::encode(Sha256::digest(&content)))
    }

    /// Attributes each line of `range` to the revision that last touched it and
    /// merges consecutive lines with the same revision into one span.
    ///
    /// Line numbers are those of the current working tree. Uncommitted lines
    /// carry the all-zero sentinel revision.
    pub async fn blame_spans(
        &self,
        path: &str,
        range: LineRange,
    ) -> Result<Vec<RevisionSpan>, HistoryError> {
        let range_arg = range.to_string();
        let out = self
            .runner
            .run(&self.git, &["blame", "--porcelain", "-L", &range_arg, "--", path])
            .await?;
        let spans = parse_blame_porcelain(&out)?;
        if spans.is_empty() {
            return Err(HistoryError::EmptyBlame {
                path: path.to_owned(),
                range: range_arg,
            });
        }
        Ok(spans)
    }

    /// Like [`blame_spans`](Self::blame_spans), but a path without committed
    /// history (untracked, only staged, or in a repository with no commits)
    /// yields one uncommitted span over all of `range` instead of a blame failure.
    pub async fn provenance(
        &self,
        path: &str,
        range: LineRange,
    ) -> Result<Vec<RevisionSpan>, HistoryError> {
        if self.list_revisions(path).await?.is_empty() {
            return Ok(vec![RevisionSpan {
                revision: Revision::uncommitted(),
                start_line: range.start,
                end_line: range.end,
            }]);
        }
        self.blame_spans(path, range).await
    }

    /// Unified diff of `path` between `revision` and the working tree.
    ///
    /// The text is returned untrimmed: a trailing context line for an empty
    /// source line is a lone space and must survive.
    pub async fn diff(&self, path: &str, revision: &Revision) -> Result<String, HistoryError> {
        let out = self
            .runner
            .run_bytes(
                &self.git,
                &["diff", "--no-color", "--no-ext-diff", revision.as_str(), "--", path],
            )
            .await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Reads the working-tree content of `path`.
    pub async fn read_worktree(&self, path: &str) -> Result<String, HistoryError> {
        let full = self.working_directory().join(path);
        let bytes = tokio::fs::read(&full)
            .await
            .map_err(|source| HistoryError::Io { path: full, source })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Total number of lines currently in `path`.
    pub async fn line_count(&self, path: &str) -> Result<u32, HistoryError> {
        Ok(count_lines(&self.read_worktree(path).await?))
    }
}

/// Counts lines the way an editor does: a final line without a trailing
/// newline still counts.
pub fn count_lines(content: &str) -> u32 {
    content.lines().count() as u32
}

/// Extracts lines `range` (1-based, inclusive) from `content`.
pub fn snippet(content: &str, range: LineRange) -> String {
    content
        .lines()
        .skip(range.start as usize - 1)
        .take(range.len() as usize)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses `git blame --porcelain` output into merged spans.
///
/// Each blamed line starts with a header `<hash> <orig-line> <final-line>
/// [<group-size>]`, optionally followed by metadata lines, and ends with the
/// content line prefixed by a tab.
pub fn parse_blame_porcelain(output: &str) -> Result<Vec<RevisionSpan>, HistoryError> {
    let mut spans: Vec<RevisionSpan> = Vec::new();

    for line in output.lines() {
        if line.starts_with('\t') || line.is_empty() {
            continue;
        }
        let Some((hash, final_line)) = parse_blame_header(line) else {
            if looks_like_header(line) {
                return Err(HistoryError::MalformedBlame(line.to_owned()));
            }
            continue;
        };

        match spans.last_mut() {
            Some(last) if last.revision.as_str() == hash && last.end_line + 1 == final_line => {
                last.end_line = final_line;
            }
            _ => spans.push(RevisionSpan {
                revision: Revision::new(hash),
                start_line: final_line,
                end_line: final_line,
            }),
        }
    }

    Ok(spans)
}

fn is_object_id(token: &str) -> bool {
    matches!(token.len(), 40 | 64) && token.bytes().all(|b| b.is_ascii_hexdigit())
}

fn looks_like_header(line: &str) -> bool {
    line.split(' ').next().is_some_and(is_object_id)
}

fn parse_blame_header(line: &str) -> Option<(&str, u32)> {
    let mut parts = line.split(' ');
    let hash = parts.next().filter(|t| is_object_id(t))?;
    let _orig_line: u32 = parts.next()?.parse().ok()?;
    let final_line: u32 = parts.next()?.parse().ok()?;
    Some((hash, final_line))
}

/// Per-working-directory cache of [`HistoryInspector`]s.
///
/// Constructed once per session and passed to every call that needs history.
/// The lock is held only to look up or insert an entry, never across a spawn.
#[derive(Debug)]
pub struct InspectorCache {
    git: String,
    timeout: Duration,
    inspectors: Mutex<HashMap<PathBuf, Arc<HistoryInspector>>>,
}

impl InspectorCache {
    pub fn new(git: impl Into<String>, timeout: Duration) -> Self {
        Self {
            git: git.into(),
            timeout,
            inspectors: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the inspector for `working_directory`, creating it on first use.
    pub fn for_working_directory(&self, working_directory: &Path) -> Arc<HistoryInspector> {
        let mut inspectors = self.inspectors.lock().unwrap_or_else(PoisonError::into_inner);
        inspectors
            .entry(working_directory.to_path_buf())
            .or_insert_with(|| {
                Arc::new(HistoryInspector::new(
                    ProcessRunner::new(working_directory, self.timeout),
                    self.git.clone(),
                ))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inspectors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const ZERO: &str = "0000000000000000000000000000000000000000";

    fn porcelain(entries: &[(&str, u32, u32, bool)]) -> String {
        let mut out = String::new();
        for (hash, orig, fin, first) in entries {
            if *first {
                out.push_str(&format!("{hash} {orig} {fin} 1\n"));
                out.push_str("author Ada\nauthor-mail <ada@example.com>\nsummary wip\n");
                out.push_str(&format!("previous {B} src/lib.rs\nfilename src/lib.rs\n"));
            } else {
                out.push_str(&format!("{hash} {orig} {fin}\n"));
            }
            out.push_str("\tlet x = 1;\n");
        }
        out
    }

    #[test]
    fn single_revision_range_is_one_span() {
        let out = porcelain(&[(A, 3, 5, true), (A, 4, 6, false), (A, 5, 7, false)]);
        let spans = parse_blame_porcelain(&out).unwrap();
        assert_eq!(
            spans,
            vec![RevisionSpan { revision: Revision::new(A), start_line: 5, end_line: 7 }]
        );
    }

    #[test]
    fn revision_boundaries_split_spans_in_line_order() {
        let out = porcelain(&[
            (A, 4, 4, true),
            (A, 5, 5, false),
            (B, 2, 6, true),
            (B, 3, 7, false),
            (ZERO, 8, 8, true),
        ]);
        let spans = parse_blame_porcelain(&out).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!((spans[0].start_line, spans[0].end_line), (4, 5));
        assert_eq!((spans[1].start_line, spans[1].end_line), (6, 7));
        assert_eq!(spans[1].revision.as_str(), B);
        assert!(spans[2].is_uncommitted());
        assert!(!spans[0].is_uncommitted());
    }

    #[test]
    fn same_revision_separated_by_another_is_two_spans() {
        let out = porcelain(&[(A, 1, 1, true), (B, 1, 2, true), (A, 2, 3, false)]);
        let spans = parse_blame_porcelain(&out).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].revision, spans[2].revision);
    }

    #[test]
    fn content_lines_that_look_like_headers_are_ignored() {
        let out = format!("{A} 1 1 1\nsummary x\n\t{B} 1 2\n");
        let spans = parse_blame_porcelain(&out).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].revision.as_str(), A);
    }

    #[test]
    fn uncommitted_sentinel_matches_blame_output() {
        let out = porcelain(&[(ZERO, 1, 1, true)]);
        let spans = parse_blame_porcelain(&out).unwrap();
        assert_eq!(spans[0].revision, Revision::uncommitted());
        assert!(Revision::uncommitted().is_uncommitted());
    }

    #[test]
    fn truncated_header_is_malformed() {
        let out = format!("{A} 1\n\tx\n");
        assert!(matches!(
            parse_blame_porcelain(&out),
            Err(HistoryError::MalformedBlame(_))
        ));
    }

    #[test]
    fn line_counting_and_snippets() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a\nb\n"), 2);
        assert_eq!(count_lines("a\nb"), 2);
        let range = LineRange::new(2, 3).unwrap();
        assert_eq!(snippet("one\ntwo\nthree\nfour\n", range), "two\nthree");
    }

    #[test]
    fn cache_reuses_inspectors_per_directory() {
        let cache = InspectorCache::new("git", Duration::from_secs(1));
        let a = cache.for_working_directory(Path::new("/tmp/one"));
        let again = cache.for_working_directory(Path::new("/tmp/one"));
        let b = cache.for_working_directory(Path::new("/tmp/two"));
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
        assert_eq!(b.working_directory(), Path::new("/tmp/two"));
    }
}
