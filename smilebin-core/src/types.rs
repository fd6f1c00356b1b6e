/// A repository that annotations belong to.
///
/// Keyed by the normalized origin URL (`host/owner/repo`). Created lazily the
/// first time an annotation is written for that repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub id: String,           // UUID v4 text
    pub url: String,
    pub created_at: i64,      // Unix timestamp seconds
}

/// The key used to look up annotations for one historical state of a file.
///
/// A fingerprint is the revision identifier immediately followed by the
/// checksum of the file's content as of that revision. Binding both makes it
/// specific to "this exact file content introduced at this exact revision":
/// one revision touches many files, and one file's content can recur across
/// non-adjacent revisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileFingerprint(String);

impl FileFingerprint {
    pub fn new(revision: &str, checksum: &str) -> Self {
        let mut key = String::with_capacity(revision.len() + checksum.len());
        key.push_str(revision);
        key.push_str(checksum);
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted annotation ("smile") together with its address chain.
///
/// `start_line` and `end_line` are relative to the revisions recorded in
/// `addresses`, never to a later working tree. `addresses` is ordered by
/// `sequence` ascending; a well-formed chain is contiguous from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub id: String,           // UUID v4 text
    pub repo_id: String,
    pub user_id: String,
    pub text: String,
    pub emoticon: String,
    pub start_line: u32,
    pub end_line: u32,
    pub code_snippet: String,
    pub address_count: u32,   // addresses written at creation
    pub created_at: i64,
    pub addresses: Vec<AnnotationAddress>,
}

impl Annotation {
    /// Returns `true` when all `address_count` addresses are present and their
    /// sequence numbers run 0, 1, 2, … without a gap.
    ///
    /// An incomplete chain means address persistence failed part-way through
    /// creation; such annotations cannot be positioned reliably.
    pub fn has_complete_chain(&self) -> bool {
        !self.addresses.is_empty()
            && self.addresses.len() == self.address_count as usize
            && self
                .addresses
                .iter()
                .enumerate()
                .all(|(i, a)| a.sequence as usize == i)
    }
}

/// One revision-relative slice of an annotation's span.
///
/// Immutable once created: a file's history up to `revision` cannot change
/// without rewriting revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationAddress {
    pub id: String,           // UUID v4 text
    pub annotation_id: String,
    pub sequence: u32,
    pub revision: String,
    pub file_checksum: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl AnnotationAddress {
    pub fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint::new(&self.revision, &self.file_checksum)
    }
}

/// Fields supplied by the caller when creating an annotation row.
#[derive(Debug, Clone)]
pub struct NewAnnotation {
    pub repo_id: String,
    pub user_id: String,
    pub text: String,
    pub emoticon: String,
    pub start_line: u32,
    pub end_line: u32,
    pub code_snippet: String,
    /// Number of addresses the caller will write for this annotation.
    pub address_count: u32,
}

/// Fields supplied by the caller when creating one address of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAddress {
    pub annotation_id: String,
    pub sequence: u32,
    pub revision: String,
    pub file_checksum: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Result of a delete request. Deleting an id that does not exist is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}
