use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Row, ToSql};

use super::*;
use crate::types::{Contact, ContactField, FieldValue, Phase};
use crate::util::now_rfc3339;

const CONTACT_COLUMNS: &str = "id, category_id, current_phase, sales_stage, business_name,
    contact_name, mobile_number, email, link, demo_link, output_link, lead_source,
    assigned_to, notes, demo_instructions, value, deposit, contact_count,
    last_contacted_at, created_at, updated_at";

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Number(n) => ToSqlOutput::Owned(Value::Real(*n)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl ContactDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Insert a new contact row.
    pub fn insert_contact(&self, contact: &Contact) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO contacts (
                id, category_id, current_phase, sales_stage, business_name,
                contact_name, mobile_number, email, link, demo_link, output_link,
                lead_source, assigned_to, notes, demo_instructions, value, deposit,
                contact_count, last_contacted_at, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                       ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                contact.id,
                contact.category_id,
                contact.current_phase.number(),
                contact.sales_stage,
                contact.business_name,
                contact.contact_name,
                contact.mobile_number,
                contact.email,
                contact.link,
                contact.demo_link,
                contact.output_link,
                contact.lead_source,
                contact.assigned_to,
                contact.notes,
                contact.demo_instructions,
                contact.value,
                contact.deposit,
                contact.contact_count,
                contact.last_contacted_at,
                contact.created_at,
                contact.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a contact by ID, whatever its phase or stage.
    pub fn get_contact(&self, id: &str) -> Result<Option<Contact>, DbError> {
        let sql = format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_contact_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All contacts of one category in one phase, oldest first.
    ///
    /// Includes archived stages; the active projection is the caller's job.
    pub fn get_contacts_for_phase(
        &self,
        category_id: &str,
        phase: Phase,
    ) -> Result<Vec<Contact>, DbError> {
        let sql = format!(
            "SELECT {} FROM contacts
             WHERE category_id = ?1 AND current_phase = ?2
             ORDER BY created_at ASC, rowid ASC",
            CONTACT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![category_id, phase.number()], Self::map_contact_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Write a set of fields in a single UPDATE and stamp `updated_at`.
    ///
    /// All fields land together or not at all. Returns the stored
    /// `updated_at`.
    pub fn patch_contact(
        &self,
        id: &str,
        fields: &[(ContactField, FieldValue)],
    ) -> Result<String, DbError> {
        let now = now_rfc3339();
        let mut assignments: Vec<String> = Vec::with_capacity(fields.len() + 1);
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(fields.len() + 2);
        for (i, (field, value)) in fields.iter().enumerate() {
            // Column names come from the ContactField whitelist, never from input.
            assignments.push(format!("{} = ?{}", field.column(), i + 1));
            values.push(value);
        }
        assignments.push(format!("updated_at = ?{}", fields.len() + 1));
        values.push(&now);
        values.push(&id);

        let sql = format!(
            "UPDATE contacts SET {} WHERE id = ?{}",
            assignments.join(", "),
            fields.len() + 2
        );
        let rows = self.conn.execute(&sql, values.as_slice())?;
        if rows == 0 {
            return Err(DbError::NotFound(id.to_string()));
        }
        Ok(now)
    }

    /// Hard-delete a contact. Its stage history goes with it.
    pub fn delete_contact(&self, id: &str) -> Result<(), DbError> {
        let rows = self
            .conn
            .execute("DELETE FROM contacts WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(DbError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Stage history
    // =========================================================================

    /// Apply a stage change and record it in one transaction.
    ///
    /// Either the contact moves and the history row exists, or neither.
    pub fn patch_contact_with_history(
        &self,
        id: &str,
        fields: &[(ContactField, FieldValue)],
        change: &DbStageChange,
    ) -> Result<String, DbError> {
        self.with_transaction(|db| {
            let stamp = db.patch_contact(id, fields)?;
            db.append_stage_change(change)?;
            Ok(stamp)
        })
    }

    pub fn append_stage_change(&self, change: &DbStageChange) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO stage_history (
                contact_id, from_phase, from_stage, to_phase, to_stage, note, changed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                change.contact_id,
                change.from_phase.number(),
                change.from_stage,
                change.to_phase.number(),
                change.to_stage,
                change.note,
                change.changed_at,
            ],
        )?;
        Ok(())
    }

    /// Stage history for a contact, oldest first.
    pub fn get_stage_history(&self, contact_id: &str) -> Result<Vec<DbStageChange>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id, from_phase, from_stage, to_phase, to_stage, note, changed_at
             FROM stage_history
             WHERE contact_id = ?1
             ORDER BY changed_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![contact_id], |row| {
            Ok(DbStageChange {
                contact_id: row.get(0)?,
                from_phase: phase_column(row, 1)?,
                from_stage: row.get(2)?,
                to_phase: phase_column(row, 3)?,
                to_stage: row.get(4)?,
                note: row.get(5)?,
                changed_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_contact_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
        Ok(Contact {
            id: row.get(0)?,
            category_id: row.get(1)?,
            current_phase: phase_column(row, 2)?,
            sales_stage: row.get(3)?,
            business_name: row.get(4)?,
            contact_name: row.get(5)?,
            mobile_number: row.get(6)?,
            email: row.get(7)?,
            link: row.get(8)?,
            demo_link: row.get(9)?,
            output_link: row.get(10)?,
            lead_source: row.get(11)?,
            assigned_to: row.get(12)?,
            notes: row.get(13)?,
            demo_instructions: row.get(14)?,
            value: row.get(15)?,
            deposit: row.get(16)?,
            contact_count: row.get(17)?,
            last_contacted_at: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }
}

fn phase_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Phase> {
    let raw: i64 = row.get(idx)?;
    Phase::try_from(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::contact_at;

    fn test_db() -> ContactDb {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contacts_test.db");
        std::mem::forget(dir);
        ContactDb::open_at(path).expect("open test db")
    }

    fn seeded(db: &ContactDb, id: &str, phase: Phase, stage: &str, created_at: &str) -> Contact {
        let mut contact = contact_at(id, phase, stage);
        contact.created_at = created_at.to_string();
        contact.updated_at = created_at.to_string();
        db.insert_contact(&contact).expect("insert");
        contact
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let db = test_db();
        let mut contact = contact_at("c1", Phase::Lead, "Lead");
        contact.email = Some("owner@acme.test".to_string());
        contact.value = Some(1500.0);
        db.insert_contact(&contact).unwrap();

        let loaded = db.get_contact("c1").unwrap().expect("contact exists");
        assert_eq!(loaded, contact);
        assert!(db.get_contact("missing").unwrap().is_none());
    }

    #[test]
    fn test_phase_query_scoped_and_ordered() {
        let db = test_db();
        seeded(&db, "late", Phase::Lead, "Lead", "2026-02-01T00:00:00.000000Z");
        seeded(&db, "early", Phase::Lead, "Not Interested", "2026-01-01T00:00:00.000000Z");
        seeded(&db, "other-phase", Phase::Presentation, "Undecided", "2026-01-01T00:00:00.000000Z");
        let mut foreign = contact_at("other-cat", Phase::Lead, "Lead");
        foreign.category_id = "elsewhere".to_string();
        db.insert_contact(&foreign).unwrap();

        let rows = db.get_contacts_for_phase("cat", Phase::Lead).unwrap();
        let ids: Vec<&str> = rows.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_patch_writes_only_named_fields() {
        let db = test_db();
        let mut original = seeded(&db, "c1", Phase::Lead, "Lead", "2026-01-01T00:00:00.000000Z");
        original.notes = Some("keep me".to_string());
        db.patch_contact("c1", &[(ContactField::Notes, FieldValue::text("keep me"))])
            .unwrap();

        let stamp = db
            .patch_contact(
                "c1",
                &[
                    (ContactField::CurrentPhase, FieldValue::Integer(2)),
                    (ContactField::SalesStage, FieldValue::text("Request Demo")),
                ],
            )
            .unwrap();

        let loaded = db.get_contact("c1").unwrap().unwrap();
        assert_eq!(loaded.current_phase, Phase::Presentation);
        assert_eq!(loaded.sales_stage, "Request Demo");
        assert_eq!(loaded.notes.as_deref(), Some("keep me"));
        assert_eq!(loaded.updated_at, stamp);
        assert_eq!(loaded.created_at, original.created_at);
    }

    #[test]
    fn test_patch_null_and_number() {
        let db = test_db();
        seeded(&db, "c1", Phase::Conversion, "Negotiating", "2026-01-01T00:00:00.000000Z");
        db.patch_contact(
            "c1",
            &[
                (ContactField::Value, FieldValue::Number(12000.0)),
                (ContactField::Email, FieldValue::Null),
            ],
        )
        .unwrap();
        let loaded = db.get_contact("c1").unwrap().unwrap();
        assert_eq!(loaded.value, Some(12000.0));
        assert_eq!(loaded.email, None);
    }

    #[test]
    fn test_patch_missing_contact() {
        let db = test_db();
        let err = db
            .patch_contact("ghost", &[(ContactField::Notes, FieldValue::text("x"))])
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(ref id) if id == "ghost"));
    }

    #[test]
    fn test_patch_is_atomic_on_constraint_failure() {
        let db = test_db();
        seeded(&db, "c1", Phase::Lead, "Lead", "2026-01-01T00:00:00.000000Z");
        let result = db.patch_contact(
            "c1",
            &[
                (ContactField::SalesStage, FieldValue::text("Request Demo")),
                (ContactField::CurrentPhase, FieldValue::Integer(9)),
            ],
        );
        assert!(result.is_err());
        let loaded = db.get_contact("c1").unwrap().unwrap();
        assert_eq!(loaded.sales_stage, "Lead");
        assert_eq!(loaded.current_phase, Phase::Lead);
    }

    #[test]
    fn test_delete_cascades_history() {
        let db = test_db();
        seeded(&db, "c1", Phase::Lead, "Lead", "2026-01-01T00:00:00.000000Z");
        db.append_stage_change(&DbStageChange {
            contact_id: "c1".to_string(),
            from_phase: Phase::Lead,
            from_stage: "Lead".to_string(),
            to_phase: Phase::Lead,
            to_stage: "Approached".to_string(),
            note: None,
            changed_at: "2026-01-02T00:00:00.000000Z".to_string(),
        })
        .unwrap();
        assert_eq!(db.get_stage_history("c1").unwrap().len(), 1);

        db.delete_contact("c1").unwrap();
        assert!(db.get_contact("c1").unwrap().is_none());
        assert!(db.get_stage_history("c1").unwrap().is_empty());
        assert!(matches!(db.delete_contact("c1"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_stage_history_order() {
        let db = test_db();
        seeded(&db, "c1", Phase::Lead, "Lead", "2026-01-01T00:00:00.000000Z");
        for (stage, at) in [
            ("Approached", "2026-01-02T00:00:00.000000Z"),
            ("Demo Stage", "2026-01-03T00:00:00.000000Z"),
        ] {
            db.append_stage_change(&DbStageChange {
                contact_id: "c1".to_string(),
                from_phase: Phase::Lead,
                from_stage: "Lead".to_string(),
                to_phase: Phase::Lead,
                to_stage: stage.to_string(),
                note: None,
                changed_at: at.to_string(),
            })
            .unwrap();
        }
        let history = db.get_stage_history("c1").unwrap();
        assert_eq!(history[0].to_stage, "Approached");
        assert_eq!(history[1].to_stage, "Demo Stage");
    }

    #[test]
    fn test_stage_patch_and_history_commit_together() {
        let db = test_db();
        seeded(&db, "c1", Phase::Lead, "Demo Stage", "2026-01-01T00:00:00.000000Z");
        let fields = [
            (ContactField::CurrentPhase, FieldValue::Integer(2)),
            (ContactField::SalesStage, FieldValue::text("Request Demo")),
        ];
        let mut change = DbStageChange {
            contact_id: "c1".to_string(),
            from_phase: Phase::Lead,
            from_stage: "Demo Stage".to_string(),
            to_phase: Phase::Presentation,
            to_stage: "Request Demo".to_string(),
            note: None,
            changed_at: "2026-01-02T00:00:00.000000Z".to_string(),
        };

        // History row for an unknown contact violates the foreign key.
        change.contact_id = "ghost".to_string();
        assert!(db.patch_contact_with_history("c1", &fields, &change).is_err());
        let unchanged = db.get_contact("c1").unwrap().unwrap();
        assert_eq!(unchanged.current_phase, Phase::Lead);
        assert_eq!(unchanged.sales_stage, "Demo Stage");

        change.contact_id = "c1".to_string();
        db.patch_contact_with_history("c1", &fields, &change).unwrap();
        let moved = db.get_contact("c1").unwrap().unwrap();
        assert_eq!(moved.current_phase, Phase::Presentation);
        assert_eq!(db.get_stage_history("c1").unwrap().len(), 1);
    }

    #[test]
    fn test_with_transaction_rolls_back() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.insert_contact(&contact_at("c1", Phase::Lead, "Lead"))?;
            Err(DbError::NotFound("forced".to_string()))
        });
        assert!(result.is_err());
        assert!(db.get_contact("c1").unwrap().is_none());
    }
}
