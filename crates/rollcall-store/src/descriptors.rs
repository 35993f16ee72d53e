//! Face descriptor persistence: one row per person, embeddings as JSON.

use crate::db::{format_datetime, parse_datetime, Database};
use crate::error::{DbError, Result};
use rollcall_core::{DescriptorRecord, DescriptorStore, Embedding, PersonName, StoreError};
use rusqlite::{params, OptionalExtension};

type Row = (String, String, Option<String>, String, String, String);

fn decode(row: Row) -> Result<DescriptorRecord> {
    let (person_id, first, middle, last, embeddings, created_at) = row;
    let embeddings: Vec<Embedding> = serde_json::from_str(&embeddings)?;
    Ok(DescriptorRecord {
        person_id,
        name: PersonName { first, middle, last },
        embeddings,
        created_at: parse_datetime(&created_at)?,
    })
}

impl Database {
    /// Insert unless a record already exists for the person.
    pub fn insert_descriptor(&self, record: &DescriptorRecord) -> Result<bool> {
        let embeddings = serde_json::to_string(&record.embeddings)?;
        let inserted = self.conn().execute(
            "INSERT INTO face_descriptors
                 (person_id, first_name, middle_name, last_name, embeddings, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (person_id) DO NOTHING",
            params![
                record.person_id,
                record.name.first,
                record.name.middle,
                record.name.last,
                embeddings,
                format_datetime(record.created_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn get_descriptor(&self, person_id: &str) -> Result<Option<DescriptorRecord>> {
        let row: Option<Row> = self
            .conn()
            .query_row(
                "SELECT person_id, first_name, middle_name, last_name, embeddings, created_at
                 FROM face_descriptors WHERE person_id = ?1",
                params![person_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .optional()?;
        row.map(decode).transpose()
    }

    /// Every decodable record, ordered by person id.
    pub fn list_descriptors(&self) -> Result<Vec<DescriptorRecord>> {
        let rows: Vec<Row> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT person_id, first_name, middle_name, last_name, embeddings, created_at
                 FROM face_descriptors ORDER BY person_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let person_id = row.0.clone();
            match decode(row) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(person_id = %person_id, error = %err, "skipping undecodable face descriptor");
                }
            }
        }
        Ok(records)
    }

    pub fn delete_descriptor(&self, person_id: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM face_descriptors WHERE person_id = ?1", params![person_id])?;
        Ok(removed > 0)
    }

    pub fn descriptor_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM face_descriptors", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| DbError::InvalidValue(format!("descriptor count {count}")))
    }
}

impl DescriptorStore for Database {
    fn create_if_absent(&self, record: &DescriptorRecord) -> std::result::Result<bool, StoreError> {
        Ok(self.insert_descriptor(record)?)
    }

    fn exists(&self, person_id: &str) -> std::result::Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM face_descriptors WHERE person_id = ?1",
                params![person_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(DbError::from)?;
        Ok(found.is_some())
    }

    fn load_all(&self) -> std::result::Result<Vec<DescriptorRecord>, StoreError> {
        Ok(self.list_descriptors()?)
    }

    fn remove(&self, person_id: &str) -> std::result::Result<bool, StoreError> {
        Ok(self.delete_descriptor(person_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(id: &str, values: Vec<f32>) -> DescriptorRecord {
        DescriptorRecord {
            person_id: id.into(),
            name: PersonName::new("Ana", "Reyes"),
            embeddings: vec![Embedding::new(values.clone()), Embedding::new(values)],
            created_at: NaiveDate::from_ymd_opt(2026, 10, 19)
                .unwrap()
                .and_hms_opt(7, 45, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_create_if_absent_is_conditional() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_if_absent(&record("S100", vec![0.1, 0.2])).unwrap());
        assert!(!db.create_if_absent(&record("S100", vec![0.9, 0.9])).unwrap());

        let stored = db.get_descriptor("S100").unwrap().unwrap();
        assert_eq!(stored.embeddings[0].values, vec![0.1, 0.2]);
        assert_eq!(stored.created_at, record("S100", vec![]).created_at);
        assert!(DescriptorStore::exists(&db, "S100").unwrap());
    }

    #[test]
    fn test_load_all_is_ordered_and_skips_corrupt_rows() {
        let db = Database::open_in_memory().unwrap();
        db.create_if_absent(&record("S300", vec![0.3])).unwrap();
        db.create_if_absent(&record("S100", vec![0.1])).unwrap();
        db.conn()
            .execute(
                "INSERT INTO face_descriptors VALUES ('S200', 'X', NULL, 'Y', 'not json', '2026-10-19 07:45:00')",
                [],
            )
            .unwrap();

        let ids: Vec<_> = db.load_all().unwrap().into_iter().map(|r| r.person_id).collect();
        assert_eq!(ids, vec!["S100", "S300"]);
        assert_eq!(db.descriptor_count().unwrap(), 3);
    }

    #[test]
    fn test_remove() {
        let db = Database::open_in_memory().unwrap();
        db.create_if_absent(&record("S100", vec![0.1])).unwrap();
        assert!(db.remove("S100").unwrap());
        assert!(!db.remove("S100").unwrap());
        assert!(!DescriptorStore::exists(&db, "S100").unwrap());
    }
}
