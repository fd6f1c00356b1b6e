/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every DB open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the full v1 schema.
///
/// Contains three tables:
/// - `repos`: one row per normalized origin URL.
/// - `annotations`: the annotation text, emoticon and revision-relative range.
/// - `annotation_addresses`: the ordered per-revision chain of each annotation.
///
/// `annotation_addresses.fingerprint` stores `revision || file_checksum` so the
/// fetch query can match the first address of each chain against a set of
/// fingerprints with an index lookup.
///
/// `annotations.start_line`/`end_line` come from the first and last address,
/// which may be relative to different revisions, so no ordering is enforced
/// between them; within one address it is.
///
/// `annotations.address_count` records how many addresses creation intended
/// to write, so a chain truncated at its tail is as detectable as one with a gap.
///
/// All tables use `STRICT` mode. Deleting an annotation cascades to its addresses.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS repos (
        id          TEXT    PRIMARY KEY,
        url         TEXT    NOT NULL UNIQUE,
        created_at  INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS annotations (
        id           TEXT    PRIMARY KEY,
        repo_id      TEXT    NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
        user_id      TEXT    NOT NULL,
        body         TEXT    NOT NULL,
        emoticon     TEXT    NOT NULL,
        start_line   INTEGER NOT NULL CHECK(start_line >= 1),
        end_line     INTEGER NOT NULL,
        code_snippet TEXT    NOT NULL DEFAULT '',
        address_count INTEGER NOT NULL CHECK(address_count >= 1),
        created_at   INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS annotation_addresses (
        id            TEXT    PRIMARY KEY,
        annotation_id TEXT    NOT NULL REFERENCES annotations(id) ON DELETE CASCADE,
        sequence      INTEGER NOT NULL CHECK(sequence >= 0),
        revision      TEXT    NOT NULL,
        file_checksum TEXT    NOT NULL,
        fingerprint   TEXT    NOT NULL,
        start_line    INTEGER NOT NULL CHECK(start_line >= 1),
        end_line      INTEGER NOT NULL,
        CHECK(end_line >= start_line),
        UNIQUE (annotation_id, sequence)
    ) STRICT;

    CREATE INDEX IF NOT EXISTS idx_addresses_fingerprint
        ON annotation_addresses(fingerprint, sequence);
";

/// Runs forward-only schema migration to migrate the DB to the latest version.
///
/// Idempotent: safe to call on every startup regardless of whether the schema
/// has already been applied.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the DDL fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if version < 1 {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(SCHEMA_V1_SQL)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
        tracing::debug!("applied annotation store schema v1");
    }

    Ok(())
}
