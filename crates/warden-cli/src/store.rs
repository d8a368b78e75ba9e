//! SQLite-backed registration records.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use warden_core::{IdentityError, IdentityRecord, IdentityStore, SubjectId, SubjectMetadata};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS subjects (
    id          TEXT PRIMARY KEY,
    full_name   TEXT NOT NULL,
    reg_no      TEXT,
    year        INTEGER,
    created_at  TEXT NOT NULL
);
";

pub struct SqliteIdentityStore {
    conn: Connection,
}

impl SqliteIdentityStore {
    pub fn open(path: &Path) -> Result<Self, IdentityError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| IdentityError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, IdentityError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, IdentityError> {
        conn.pragma_update(None, "journal_mode", "WAL").map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self { conn })
    }
}

fn backend(e: rusqlite::Error) -> IdentityError {
    IdentityError::Backend(e.to_string())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, Option<String>, Option<u16>, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record(
    (id, full_name, reg_no, year, created_at): (String, String, Option<String>, Option<u16>, String),
) -> Result<IdentityRecord, IdentityError> {
    let id = id
        .parse::<SubjectId>()
        .map_err(|e| IdentityError::Backend(format!("bad subject id {id:?}: {e}")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| IdentityError::Backend(format!("bad timestamp {created_at:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(IdentityRecord {
        id,
        full_name,
        metadata: SubjectMetadata { reg_no, year },
        created_at,
    })
}

impl IdentityStore for SqliteIdentityStore {
    fn create_subject(
        &mut self,
        name: &str,
        metadata: &SubjectMetadata,
    ) -> Result<SubjectId, IdentityError> {
        let id = SubjectId::new();
        let result = self.conn.execute(
            "INSERT INTO subjects (id, full_name, reg_no, year, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.to_string(),
                name,
                metadata.reg_no,
                metadata.year,
                Utc::now().to_rfc3339()
            ],
        );
        match result {
            Ok(_) => {
                tracing::info!(%id, name, "subject registered");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(IdentityError::AlreadyRegistered(id))
            }
            Err(e) => Err(backend(e)),
        }
    }

    fn remove(&mut self, id: SubjectId) -> Result<(), IdentityError> {
        let deleted = self
            .conn
            .execute("DELETE FROM subjects WHERE id = ?1", params![id.to_string()])
            .map_err(backend)?;
        if deleted == 0 {
            return Err(IdentityError::NotFound(id));
        }
        tracing::info!(%id, "subject registration removed");
        Ok(())
    }

    fn get(&self, id: SubjectId) -> Result<Option<IdentityRecord>, IdentityError> {
        self.conn
            .query_row(
                "SELECT id, full_name, reg_no, year, created_at FROM subjects WHERE id = ?1",
                params![id.to_string()],
                record_from_row,
            )
            .optional()
            .map_err(backend)?
            .map(into_record)
            .transpose()
    }

    fn list(&self) -> Result<Vec<IdentityRecord>, IdentityError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, full_name, reg_no, year, created_at FROM subjects ORDER BY created_at, full_name")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], record_from_row)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        rows.into_iter().map(into_record).collect()
    }
}
