//! Owned value types produced by the history layer.
//!
//! Everything here is derived fresh per query and never cached beyond one
//! operation, so all types are plain owned data that can move between tasks.

use std::fmt;

/// Full (non-abbreviated) identifier of a commit.
///
/// The all-zero identifier is reserved by the provenance query for lines that
/// have never been committed; see [`Revision::is_uncommitted`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision(String);

impl Revision {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The all-zero sentinel, for lines no commit has touched.
    pub fn uncommitted() -> Self {
        Self("0".repeat(40))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the all-zero sentinel used for uncommitted lines.
    pub fn is_uncommitted(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b == b'0')
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An inclusive, 1-based range of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    /// Builds a range, returning `None` unless `1 <= start <= end`.
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }

    pub fn single(line: u32) -> Option<Self> {
        Self::new(line, line)
    }

    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }

    pub(crate) fn len(&self) -> u32 {
        self.end - self.start + 1
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.start, self.end)
    }
}

/// A contiguous run of current-buffer lines attributed to one revision.
///
/// Spans returned for one query are ordered by ascending line and never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSpan {
    pub revision: Revision,
    pub start_line: u32,
    pub end_line: u32,
}

impl RevisionSpan {
    pub fn is_uncommitted(&self) -> bool {
        self.revision.is_uncommitted()
    }

    pub fn range(&self) -> LineRange {
        LineRange {
            start: self.start_line,
            end: self.end_line,
        }
    }
}
