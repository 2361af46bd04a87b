//! Identity registry over the `persons` table.

use crate::{Database, StoreError};
use facefind_core::{Identity, IdentityId, PersonMetadata, RegisteredPerson};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

/// Lookup and insert operations on registered persons.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    db: Database,
}

impl IdentityRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a person without any embedding. The id is assigned by SQLite.
    pub fn insert(&self, metadata: &PersonMetadata) -> Result<IdentityId, StoreError> {
        let conn = self.db.connect()?;
        insert_person(&conn, metadata)
    }

    pub fn get_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let conn = self.db.connect()?;
        let sql = format!("SELECT {} FROM persons WHERE id = ?1", columns(""));
        let identity = conn.query_row(&sql, [id], identity_from_row).optional()?;
        Ok(identity)
    }

    /// Persons whose name equals `name`, ignoring case (Unicode lowercase
    /// folding). Ordered by id.
    pub fn get_by_name(&self, name: &str) -> Result<Vec<Identity>, StoreError> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT {} FROM persons WHERE casefold(name) = casefold(?1) ORDER BY id",
            columns("")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([name.trim()], identity_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every person exactly once, with the image path of their earliest
    /// embedding record (or `None` when they have none).
    pub fn list_all(&self) -> Result<Vec<RegisteredPerson>, StoreError> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT {}, (SELECT i.image_path FROM person_images i
                         WHERE i.person_id = p.id ORDER BY i.id LIMIT 1)
             FROM persons p ORDER BY p.id",
            columns("p.")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(RegisteredPerson {
                identity: identity_from_row(row)?,
                image: row.get(PersonMetadata::FIELDS.len() + 1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

pub(crate) fn insert_person(
    conn: &Connection,
    metadata: &PersonMetadata,
) -> Result<IdentityId, StoreError> {
    let placeholders = (1..=PersonMetadata::FIELDS.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO persons ({}) VALUES ({placeholders})",
        PersonMetadata::FIELDS.join(", ")
    );
    conn.execute(&sql, params_from_iter(metadata.values()))?;
    Ok(conn.last_insert_rowid())
}

/// `id` followed by the metadata columns, optionally table-qualified.
fn columns(prefix: &str) -> String {
    std::iter::once("id")
        .chain(PersonMetadata::FIELDS)
        .map(|c| format!("{prefix}{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let mut metadata = PersonMetadata::default();
    for (i, field) in PersonMetadata::FIELDS.iter().enumerate() {
        let value: Option<String> = row.get(i + 1)?;
        if let Some(value) = value {
            metadata.set(field, &value);
        }
    }
    Ok(Identity {
        id: row.get(0)?,
        metadata,
    })
}
