//! Embedding records over the `person_images` table.
//!
//! Vectors are stored as decimal JSON arrays next to the path of the face
//! image they came from.

use crate::{Database, StoreError};
use chrono::Utc;
use facefind_core::{Embedding, EmbeddingRecord, IdentityId};
use rusqlite::{params, Connection};

#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    db: Database,
}

impl EmbeddingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Attach another embedding to an existing identity. Returns the record id.
    pub fn put(
        &self,
        identity_id: IdentityId,
        image_path: &str,
        embedding: &Embedding,
    ) -> Result<i64, StoreError> {
        let conn = self.db.connect()?;
        insert_embedding(&conn, identity_id, image_path, embedding)
    }

    /// Load every stored embedding in insertion order.
    ///
    /// Rows whose vector cannot be decoded are skipped with a warning; they
    /// never abort the load.
    pub fn all_embeddings(&self) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, person_id, image_path, face_encoding FROM person_images ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, IdentityId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3),
            ))
        })?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            let (record_id, identity_id, image_path, encoded) = row?;
            let decoded = encoded
                .map_err(|e| e.to_string())
                .and_then(|raw| decode_embedding(&raw));
            match decoded {
                Ok(embedding) => records.push(EmbeddingRecord {
                    record_id,
                    identity_id,
                    image_path,
                    embedding,
                }),
                Err(reason) => {
                    skipped += 1;
                    tracing::warn!(record_id, identity_id, %reason, "skipping corrupt embedding record");
                }
            }
        }

        tracing::debug!(loaded = records.len(), skipped, "embeddings loaded");
        Ok(records)
    }

    /// Number of embedding records owned by `identity_id`.
    pub fn count_for(&self, identity_id: IdentityId) -> Result<usize, StoreError> {
        let conn = self.db.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM person_images WHERE person_id = ?1",
            [identity_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

pub(crate) fn insert_embedding(
    conn: &Connection,
    identity_id: IdentityId,
    image_path: &str,
    embedding: &Embedding,
) -> Result<i64, StoreError> {
    if !embedding.is_well_formed() {
        return Err(StoreError::InvalidEmbedding(format!(
            "{}-dim vector is empty or has non-finite values",
            embedding.dim()
        )));
    }

    let encoded = serde_json::to_string(embedding)?;
    conn.execute(
        "INSERT INTO person_images (person_id, image_path, face_encoding, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![identity_id, image_path, encoded, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn decode_embedding(raw: &str) -> Result<Embedding, String> {
    let embedding: Embedding = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if !embedding.is_well_formed() {
        return Err(format!(
            "{}-dim vector is empty or has non-finite values",
            embedding.dim()
        ));
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_embedding() {
        let e = decode_embedding("[0.25, -1.5, 3]").unwrap();
        assert_eq!(e.values, vec![0.25, -1.5, 3.0]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_embedding("[0.1, 0.2").is_err());
        assert!(decode_embedding("\"hello\"").is_err());
        assert!(decode_embedding("[]").is_err());
    }
}
