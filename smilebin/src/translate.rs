//! Diff-based line translation.
//!
//! A [`DiffTranslator`] turns the unified diff between a historical revision
//! and the working tree into a [`LineTranslations`] table: for every line of
//! the historical file, the line it occupies now, or `None` if it is gone.
//! [`UnifiedDiffTranslator`] is the bundled implementation.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::TranslateError;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .expect("hunk header pattern is valid")
});

/// Produces a line-translation table from diff text.
///
/// `line_count` is the current length of the file; the table must cover every
/// historical line up to it, not only the lines inside hunks.
pub trait DiffTranslator: Send + Sync {
    fn translate(&self, diff: &str, line_count: u32) -> Result<LineTranslations, TranslateError>;
}

/// Mapping from historical line numbers to current line numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTranslations {
    /// `table[n - 1]` is the current position of historical line `n`.
    table: Vec<Option<u32>>,
}

impl LineTranslations {
    /// The table for a file that has not changed.
    pub fn identity(line_count: u32) -> Self {
        Self {
            table: (1..=line_count).map(Some).collect(),
        }
    }

    /// Current line of historical line `historical`, or `None` if it was
    /// deleted or lies outside the table.
    pub fn forward(&self, historical: u32) -> Option<u32> {
        let index = (historical as usize).checked_sub(1)?;
        self.table.get(index).copied().flatten()
    }

    /// Historical line whose content now sits at `current`, if any.
    pub fn invert(&self, current: u32) -> Option<u32> {
        self.table
            .iter()
            .position(|mapped| *mapped == Some(current))
            .map(|index| index as u32 + 1)
    }

    /// Number of historical lines covered.
    pub fn historical_len(&self) -> u32 {
        self.table.len() as u32
    }
}

/// The kind of one body line in a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineKind {
    Added,
    Removed,
    Context,
}

/// One `@@` hunk, reduced to what translation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLineKind>,
}

impl DiffHunk {
    /// First historical line the hunk body touches.
    ///
    /// A pure insertion (`-n,0`) names the line *after which* it inserts.
    fn first_old_line(&self) -> u32 {
        if self.old_lines == 0 {
            self.old_start + 1
        } else {
            self.old_start
        }
    }
}

/// Parses unified diff text (with any file headers) into hunks.
pub fn parse_hunks(diff: &str) -> Result<Vec<DiffHunk>, TranslateError> {
    let mut hunks = Vec::new();
    let mut lines = diff.lines();

    while let Some(line) = lines.next() {
        if !line.starts_with("@@") {
            continue;
        }
        let mut hunk = parse_hunk_header(line)?;
        let mut old_left = hunk.old_lines;
        let mut new_left = hunk.new_lines;
        let truncated = TranslateError::TruncatedHunk {
            old_start: hunk.old_start,
        };

        while old_left > 0 || new_left > 0 {
            let Some(body) = lines.next() else {
                return Err(truncated);
            };
            let kind = match body.as_bytes().first() {
                Some(b'\\') => continue,
                Some(b'+') => DiffLineKind::Added,
                Some(b'-') => DiffLineKind::Removed,
                // Some tools strip the lone space of an empty context line.
                Some(b' ') | None => DiffLineKind::Context,
                Some(_) => return Err(truncated),
            };
            let (old_step, new_step) = match kind {
                DiffLineKind::Added => (0, 1),
                DiffLineKind::Removed => (1, 0),
                DiffLineKind::Context => (1, 1),
            };
            old_left = old_left.checked_sub(old_step).ok_or(TranslateError::TruncatedHunk {
                old_start: hunk.old_start,
            })?;
            new_left = new_left.checked_sub(new_step).ok_or(TranslateError::TruncatedHunk {
                old_start: hunk.old_start,
            })?;
            hunk.lines.push(kind);
        }

        hunks.push(hunk);
    }

    Ok(hunks)
}

fn parse_hunk_header(line: &str) -> Result<DiffHunk, TranslateError> {
    let malformed = || TranslateError::MalformedHunk(line.to_owned());
    let caps = HUNK_HEADER.captures(line).ok_or_else(malformed)?;
    let number = |i: usize, default: u32| -> Result<u32, TranslateError> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().map_err(|_| malformed()),
            None => Ok(default),
        }
    };
    Ok(DiffHunk {
        old_start: number(1, 0)?,
        old_lines: number(2, 1)?,
        new_start: number(3, 0)?,
        new_lines: number(4, 1)?,
        lines: Vec::new(),
    })
}

/// Builds the translation table by walking hunks in order.
///
/// Lines between hunks shift by the running offset; removed lines map to
/// `None`; the tail after the last hunk continues until `line_count`.
pub fn build_translations(hunks: &[DiffHunk], line_count: u32) -> LineTranslations {
    let mut table: Vec<Option<u32>> = Vec::new();
    let mut current = 1u32;

    for hunk in hunks {
        while (table.len() as u32) + 1 < hunk.first_old_line() {
            table.push(Some(current));
            current += 1;
        }
        for kind in &hunk.lines {
            match kind {
                DiffLineKind::Context => {
                    table.push(Some(current));
                    current += 1;
                }
                DiffLineKind::Removed => table.push(None),
                DiffLineKind::Added => current += 1,
            }
        }
    }

    while current <= line_count {
        table.push(Some(current));
        current += 1;
    }

    LineTranslations { table }
}

/// Translator for `git diff` style unified diffs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnifiedDiffTranslator;

impl DiffTranslator for UnifiedDiffTranslator {
    fn translate(&self, diff: &str, line_count: u32) -> Result<LineTranslations, TranslateError> {
        let hunks = parse_hunks(diff)?;
        Ok(build_translations(&hunks, line_count))
    }
}
