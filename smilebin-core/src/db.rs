use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::types::{
    Annotation, AnnotationAddress, DeleteOutcome, FileFingerprint, NewAddress, NewAnnotation,
    Repo,
};

/// Upper bound on fingerprints bound into a single `IN (...)` clause.
///
/// Files with long histories are queried in chunks so the statement stays well
/// below SQLite's host-parameter limit.
const MAX_FINGERPRINTS_PER_QUERY: usize = 500;

/// Opens (or creates) the SQLite database at `path`, configures WAL mode,
/// and applies schema migrations via the `schema_version` table.
///
/// This function is the single entry point for all database connections.
/// It sets `busy_timeout` via the `Connection` method (not a PRAGMA string) to
/// ensure the setting takes effect regardless of pragma caching.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL configuration
/// fails, or schema DDL fails.
pub async fn open_db(path: &str) -> Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path).await?;
    configure(&conn).await?;
    Ok(conn)
}

/// Applies connection pragmas, checkpoints leftover WAL and migrates the schema.
async fn configure(conn: &Connection) -> Result<(), tokio_rusqlite::Error> {
    conn.call(|db| {
        // Foreign keys are per-connection; cascade deletes of addresses rely on them.
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(Duration::from_secs(5))?;
        db.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        crate::schema::migrate(db)?;
        Ok(())
    })
    .await
}

/// Returns the current Unix timestamp in seconds.
fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Finds the repo row for `url`, or creates one.
///
/// The insert uses `ON CONFLICT DO NOTHING` inside `BEGIN IMMEDIATE`, so two
/// concurrent first annotations for the same repository converge on one row.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the query or write transaction fails.
pub async fn lookup_or_create_repo(
    conn: &Connection,
    url: &str,
) -> Result<Repo, tokio_rusqlite::Error> {
    let url = url.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO repos (id, url, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO NOTHING",
            rusqlite::params![uuid::Uuid::new_v4().to_string(), &url, now_secs()],
        )?;
        let repo = tx.query_row(
            "SELECT id, url, created_at FROM repos WHERE url = ?1",
            rusqlite::params![&url],
            |r| {
                Ok(Repo {
                    id: r.get(0)?,
                    url: r.get(1)?,
                    created_at: r.get(2)?,
                })
            },
        )?;
        tx.commit()?;
        Ok(repo)
    })
    .await
}

/// Inserts one annotation row and returns its new UUID.
///
/// Addresses are written separately with [`create_address`] once the id is known.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the insert fails (unknown repo, invalid range).
pub async fn create_annotation(
    conn: &Connection,
    annotation: &NewAnnotation,
) -> Result<String, tokio_rusqlite::Error> {
    let annotation = annotation.clone();

    conn.call(move |db| {
        let id = uuid::Uuid::new_v4().to_string();
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO annotations
                 (id, repo_id, user_id, body, emoticon, start_line, end_line, code_snippet,
                  address_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                &id,
                &annotation.repo_id,
                &annotation.user_id,
                &annotation.text,
                &annotation.emoticon,
                annotation.start_line,
                annotation.end_line,
                &annotation.code_snippet,
                annotation.address_count,
                now_secs(),
            ],
        )?;
        tx.commit()?;
        Ok(id)
    })
    .await
}

/// Inserts one address of an annotation's chain and returns its new UUID.
///
/// Returns `Ok(None)` when `address.annotation_id` does not name an existing
/// annotation (for example, it was deleted between the two requests).
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the insert fails, including a duplicate
/// `(annotation_id, sequence)` pair.
pub async fn create_address(
    conn: &Connection,
    address: &NewAddress,
) -> Result<Option<String>, tokio_rusqlite::Error> {
    let address = address.clone();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM annotations WHERE id = ?1",
                rusqlite::params![&address.annotation_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Ok(None);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let fingerprint = FileFingerprint::new(&address.revision, &address.file_checksum);
        tx.execute(
            "INSERT INTO annotation_addresses
                 (id, annotation_id, sequence, revision, file_checksum, fingerprint,
                  start_line, end_line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &id,
                &address.annotation_id,
                address.sequence,
                &address.revision,
                &address.file_checksum,
                fingerprint.as_str(),
                address.start_line,
                address.end_line,
            ],
        )?;
        tx.commit()?;
        Ok(Some(id))
    })
    .await
}

/// Loads every annotation in the repo keyed by `repo_url` whose *first*
/// address (`sequence = 0`) carries one of `fingerprints`.
///
/// Each returned annotation has its full address chain attached, ordered by
/// `sequence`. An empty fingerprint set, or an unknown repo, yields an empty
/// `Vec` rather than an error.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if a query fails.
pub async fn fetch_annotations(
    conn: &Connection,
    repo_url: &str,
    fingerprints: &[FileFingerprint],
) -> Result<Vec<Annotation>, tokio_rusqlite::Error> {
    if fingerprints.is_empty() {
        return Ok(Vec::new());
    }
    let repo_url = repo_url.to_owned();
    let keys: Vec<String> = fingerprints.iter().map(|f| f.as_str().to_owned()).collect();

    conn.call(move |db| {
        let mut seen: HashSet<String> = HashSet::new();
        let mut annotations: Vec<Annotation> = Vec::new();

        for chunk in keys.chunks(MAX_FINGERPRINTS_PER_QUERY) {
            let placeholders = (0..chunk.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT a.id, a.repo_id, a.user_id, a.body, a.emoticon,
                        a.start_line, a.end_line, a.code_snippet, a.address_count, a.created_at
                 FROM annotations a
                 JOIN repos r ON r.id = a.repo_id
                 JOIN annotation_addresses h ON h.annotation_id = a.id AND h.sequence = 0
                 WHERE r.url = ?1 AND h.fingerprint IN ({placeholders})
                 ORDER BY a.created_at, a.id"
            );

            let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() + 1);
            params.push(&repo_url);
            for key in chunk {
                params.push(key);
            }

            let mut stmt = db.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), |r| {
                    Ok(Annotation {
                        id: r.get(0)?,
                        repo_id: r.get(1)?,
                        user_id: r.get(2)?,
                        text: r.get(3)?,
                        emoticon: r.get(4)?,
                        start_line: r.get(5)?,
                        end_line: r.get(6)?,
                        code_snippet: r.get(7)?,
                        address_count: r.get(8)?,
                        created_at: r.get(9)?,
                        addresses: Vec::new(),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for annotation in rows {
                if seen.insert(annotation.id.clone()) {
                    annotations.push(annotation);
                }
            }
        }

        let mut stmt = db.prepare(
            "SELECT id, annotation_id, sequence, revision, file_checksum, start_line, end_line
             FROM annotation_addresses
             WHERE annotation_id = ?1
             ORDER BY sequence",
        )?;
        for annotation in &mut annotations {
            annotation.addresses = stmt
                .query_map(rusqlite::params![&annotation.id], |r| {
                    Ok(AnnotationAddress {
                        id: r.get(0)?,
                        annotation_id: r.get(1)?,
                        sequence: r.get(2)?,
                        revision: r.get(3)?,
                        file_checksum: r.get(4)?,
                        start_line: r.get(5)?,
                        end_line: r.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
        }

        annotations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(annotations)
    })
    .await
}

/// Deletes the annotation `id`; its addresses cascade.
///
/// Deleting an id that does not exist returns [`DeleteOutcome::NotFound`].
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the `BEGIN IMMEDIATE` transaction fails.
pub async fn delete_annotation(
    conn: &Connection,
    id: &str,
) -> Result<DeleteOutcome, tokio_rusqlite::Error> {
    let id = id.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM annotations WHERE id = ?1",
            rusqlite::params![&id],
        )?;
        tx.commit()?;
        Ok(if removed > 0 {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    })
    .await
}
