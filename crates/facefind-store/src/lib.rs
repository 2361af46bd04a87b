//! facefind-store — Durable storage for registered persons.
//!
//! Two SQLite tables back the system: `persons` (the identity registry) and
//! `person_images` (embedding records, each referencing a person). Face
//! images themselves live in a flat directory managed by [`ImageDir`].
//!
//! Every operation opens its own connection and drops it before returning,
//! on success and error paths alike. Enrollment writes both tables inside a
//! single transaction.

use facefind_core::{Embedding, IdentityId, PersonMetadata};
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod embeddings;
pub mod images;
pub mod registry;

pub use embeddings::EmbeddingStore;
pub use images::ImageDir;
pub use registry::IdentityRegistry;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("embedding write failed for identity {identity_id}, enrollment rolled back: {source}")]
    EmbeddingWrite {
        identity_id: IdentityId,
        source: Box<StoreError>,
    },
}

/// Handle to the SQLite database file. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self { path };
        let conn = db.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        init_schema(&conn)?;

        tracing::info!(path = %db.path.display(), journal_mode = %mode, "database opened");
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection. Closed when the returned value is dropped.
    ///
    /// Registers `casefold(text)`, a Unicode lowercase fold used for name
    /// lookups; SQLite's `NOCASE` only folds ASCII.
    pub fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.create_scalar_function(
            "casefold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
        )?;
        Ok(conn)
    }

    /// Insert a person and their first embedding record as one unit.
    ///
    /// If the embedding insert fails the whole transaction is rolled back and
    /// [`StoreError::EmbeddingWrite`] is returned, so no unmatchable identity
    /// is left behind.
    pub fn enroll(
        &self,
        metadata: &PersonMetadata,
        image_path: &str,
        embedding: &Embedding,
    ) -> Result<IdentityId, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let identity_id = registry::insert_person(&tx, metadata)?;
        embeddings::insert_embedding(&tx, identity_id, image_path, embedding).map_err(|e| {
            StoreError::EmbeddingWrite {
                identity_id,
                source: Box::new(e),
            }
        })?;

        tx.commit()?;
        tracing::debug!(identity_id, image_path, "enrollment committed");
        Ok(identity_id)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS persons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            state TEXT,
            district TEXT,
            police_station TEXT,
            dd_date TEXT,
            place_of_missing TEXT,
            tracing_status TEXT,
            report_date TEXT,
            missing_from TEXT,
            reporting_date TEXT,
            year_of_birth TEXT,
            sex TEXT,
            religion TEXT,
            name TEXT,
            guardian_name TEXT,
            address TEXT,
            height TEXT,
            mobile_no TEXT,
            other_details TEXT
        );
        CREATE TABLE IF NOT EXISTS person_images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person_id INTEGER NOT NULL REFERENCES persons(id),
            image_path TEXT NOT NULL,
            face_encoding TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS person_images_person_idx ON person_images(person_id);
        COMMIT;",
    )?;
    Ok(())
}
