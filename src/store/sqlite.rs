use chrono::NaiveDate;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use uuid::Uuid;

use crate::model::{
    FeeComponent, FeeStructure, NewAssignment, NewObligation, Obligation, ObligationView,
    PaymentStatus, PaymentUpdate, Student, StudentStatus,
};
use crate::store::{FeeStore, ObligationQuery, StoreError, StoreResult};

pub const STUDENT_COLUMNS: &str = "id, first_name, last_name, father_name, mother_name,
    date_of_birth, phone_number, email, university_id, course_id, academic_session_id,
    status, admission_number, city, country, address, aadhaar_number, passport_number,
    twelfth_marks, seat_number, agent_id, created_at, updated_at";

pub fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    let status: String = r.get(11)?;
    Ok(Student {
        id: r.get(0)?,
        first_name: r.get(1)?,
        last_name: r.get(2)?,
        father_name: r.get(3)?,
        mother_name: r.get(4)?,
        date_of_birth: r.get(5)?,
        phone_number: r.get(6)?,
        email: r.get(7)?,
        university_id: r.get(8)?,
        course_id: r.get(9)?,
        academic_session_id: r.get(10)?,
        status: StudentStatus::parse(&status).unwrap_or(StudentStatus::Active),
        admission_number: r.get(12)?,
        city: r.get(13)?,
        country: r.get(14)?,
        address: r.get(15)?,
        aadhaar_number: r.get(16)?,
        passport_number: r.get(17)?,
        twelfth_marks: r.get(18)?,
        seat_number: r.get(19)?,
        agent_id: r.get(20)?,
        created_at: r.get(21)?,
        updated_at: r.get(22)?,
    })
}

pub const STRUCTURE_COLUMNS: &str =
    "id, name, university_id, course_id, is_active, created_at, updated_at";

pub fn structure_from_row(r: &Row<'_>) -> rusqlite::Result<FeeStructure> {
    let active: i64 = r.get(4)?;
    Ok(FeeStructure {
        id: r.get(0)?,
        name: r.get(1)?,
        university_id: r.get(2)?,
        course_id: r.get(3)?,
        is_active: active != 0,
        created_at: r.get(5)?,
        updated_at: r.get(6)?,
    })
}

pub const COMPONENT_COLUMNS: &str =
    "id, fee_structure_id, fee_type_id, amount, frequency, created_at";

pub fn component_from_row(r: &Row<'_>) -> rusqlite::Result<FeeComponent> {
    Ok(FeeComponent {
        id: r.get(0)?,
        fee_structure_id: r.get(1)?,
        fee_type_id: r.get(2)?,
        amount: r.get(3)?,
        frequency: r.get(4)?,
        created_at: r.get(5)?,
    })
}

const OBLIGATION_VIEW_SELECT: &str = "SELECT
       fp.id, fp.student_id, fp.fee_structure_component_id, fp.amount_due, fp.amount_paid,
       fp.payment_status, fp.due_date, fp.last_payment_date, fp.version, fp.created_at,
       s.first_name, s.last_name, s.admission_number, s.phone_number, s.status,
       ft.name, c.fee_structure_id, fs.name, c.amount, c.frequency,
       s.created_at, u.name, co.name, ses.session_name
     FROM fee_payments fp
     JOIN students s ON s.id = fp.student_id
     JOIN fee_structure_components c ON c.id = fp.fee_structure_component_id
     LEFT JOIN fee_types ft ON ft.id = c.fee_type_id
     LEFT JOIN fee_structures fs ON fs.id = c.fee_structure_id
     LEFT JOIN universities u ON u.id = s.university_id
     LEFT JOIN courses co ON co.id = s.course_id
     LEFT JOIN academic_sessions ses ON ses.id = s.academic_session_id";

const OBLIGATION_ORDER: &str =
    "ORDER BY fp.created_at DESC, s.last_name, s.first_name, c.sort_order, fp.id";

pub fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(s.get(..10).unwrap_or(s.as_str()), "%Y-%m-%d").ok())
}

fn obligation_view_from_row(r: &Row<'_>) -> rusqlite::Result<ObligationView> {
    let amount_due: f64 = r.get(3)?;
    let amount_paid: f64 = r.get(4)?;
    let status: String = r.get(5)?;
    let student_status: String = r.get(14)?;
    Ok(ObligationView {
        obligation: Obligation {
            id: r.get(0)?,
            student_id: r.get(1)?,
            fee_structure_component_id: r.get(2)?,
            amount_due,
            amount_paid,
            payment_status: PaymentStatus::parse(&status)
                .unwrap_or_else(|| PaymentStatus::derive(amount_paid, amount_due)),
            due_date: parse_date(r.get(6)?),
            last_payment_date: parse_date(r.get(7)?),
            version: r.get(8)?,
            created_at: r.get(9)?,
        },
        student_first_name: r.get(10)?,
        student_last_name: r.get(11)?,
        admission_number: r.get(12)?,
        phone_number: r.get(13)?,
        student_status: StudentStatus::parse(&student_status).unwrap_or(StudentStatus::Active),
        student_created_at: r.get(20)?,
        university_name: r.get(21)?,
        course_name: r.get(22)?,
        session_name: r.get(23)?,
        fee_type_name: r.get(15)?,
        fee_structure_id: r.get(16)?,
        fee_structure_name: r.get(17)?,
        component_amount: r.get(18)?,
        frequency: r.get(19)?,
    })
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

/// A locked or busy database is worth retrying; anything else is a plain
/// SQLite failure.
fn classify(e: rusqlite::Error) -> StoreError {
    let busy = matches!(
        &e,
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    );
    if busy {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Sqlite(e)
    }
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl FeeStore for SqliteStore<'_> {
    fn student(&self, id: &str) -> StoreResult<Option<Student>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, [id], student_from_row)
            .optional()?)
    }

    fn students_in_program(
        &self,
        university_id: &str,
        course_id: &str,
    ) -> StoreResult<Vec<Student>> {
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students
             WHERE university_id = ? AND course_id = ?
             ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((university_id, course_id), student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fee_structure(&self, id: &str) -> StoreResult<Option<FeeStructure>> {
        let sql = format!("SELECT {STRUCTURE_COLUMNS} FROM fee_structures WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, [id], structure_from_row)
            .optional()?)
    }

    fn active_structures_for_program(
        &self,
        university_id: &str,
        course_id: &str,
    ) -> StoreResult<Vec<FeeStructure>> {
        let sql = format!(
            "SELECT {STRUCTURE_COLUMNS} FROM fee_structures
             WHERE university_id = ? AND course_id = ? AND is_active = 1
             ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map((university_id, course_id), structure_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn components(&self, fee_structure_id: &str) -> StoreResult<Vec<FeeComponent>> {
        let sql = format!(
            "SELECT {COMPONENT_COLUMNS} FROM fee_structure_components
             WHERE fee_structure_id = ?
             ORDER BY sort_order, created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([fee_structure_id], component_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn assignment_exists(&self, student_id: &str, fee_structure_id: &str) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM student_fee_assignments
                 WHERE student_id = ? AND fee_structure_id = ?",
                (student_id, fee_structure_id),
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn assign_with_obligations(
        &self,
        assignment: &NewAssignment,
        obligations: &[NewObligation],
    ) -> StoreResult<String> {
        let tx = self.conn.unchecked_transaction().map_err(classify)?;
        let assignment_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO student_fee_assignments(id, student_id, fee_structure_id, assigned_at)
             VALUES(?, ?, ?, ?)",
            (
                &assignment_id,
                &assignment.student_id,
                &assignment.fee_structure_id,
                &assignment.assigned_at,
            ),
        ) {
            let _ = tx.rollback();
            if is_constraint_violation(&e) {
                return Err(StoreError::Duplicate {
                    entity: "student_fee_assignment",
                });
            }
            return Err(classify(e));
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO fee_payments(
                   id, student_id, fee_structure_component_id, amount_due, amount_paid,
                   payment_status, due_date, last_payment_date, version, created_at
                 ) VALUES(?, ?, ?, ?, 0, 'pending', ?, NULL, 0, ?)",
            )?;
            for o in obligations {
                stmt.execute((
                    Uuid::new_v4().to_string(),
                    &o.student_id,
                    &o.fee_structure_component_id,
                    o.amount_due,
                    o.due_date.format("%Y-%m-%d").to_string(),
                    &assignment.assigned_at,
                ))?;
            }
        }

        tx.commit().map_err(classify)?;
        Ok(assignment_id)
    }

    fn obligation(&self, id: &str) -> StoreResult<Option<ObligationView>> {
        let sql = format!("{OBLIGATION_VIEW_SELECT} WHERE fp.id = ?");
        Ok(self
            .conn
            .query_row(&sql, [id], obligation_view_from_row)
            .optional()?)
    }

    fn record_payment(
        &self,
        id: &str,
        update: &PaymentUpdate,
        expected_version: i64,
    ) -> StoreResult<i64> {
        let new_version: Option<i64> = self
            .conn
            .query_row(
                "UPDATE fee_payments
                 SET amount_paid = ?, payment_status = ?, last_payment_date = ?,
                     version = version + 1, updated_at = ?
                 WHERE id = ? AND version = ?
                 RETURNING version",
                (
                    update.amount_paid,
                    update.payment_status.as_str(),
                    update
                        .last_payment_date
                        .map(|d| d.format("%Y-%m-%d").to_string()),
                    &update.updated_at,
                    id,
                    expected_version,
                ),
                |r| r.get(0),
            )
            .optional()
            .map_err(classify)?;

        if let Some(v) = new_version {
            return Ok(v);
        }
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM fee_payments WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        match exists {
            Some(_) => Err(StoreError::Conflict {
                id: id.to_string(),
                expected: expected_version,
            }),
            None => Err(StoreError::NotFound {
                entity: "fee_payment",
                id: id.to_string(),
            }),
        }
    }

    fn obligations(&self, query: &ObligationQuery) -> StoreResult<Vec<ObligationView>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<String> = Vec::new();
        if let Some(sid) = &query.student_id {
            clauses.push("fp.student_id = ?");
            params.push(sid.clone());
        }
        if query.paid_only {
            clauses.push("fp.amount_paid > 0");
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("{OBLIGATION_VIEW_SELECT} {where_sql} {OBLIGATION_ORDER}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter()),
                obligation_view_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO universities(id, name, created_at) VALUES('u1', 'Uni One', '2026-01-01T00:00:00Z');
             INSERT INTO courses(id, name, created_at) VALUES('c1', 'MBBS', '2026-01-01T00:00:00Z');
             INSERT INTO fee_types(id, name, created_at) VALUES('ft1', 'Tuition', '2026-01-01T00:00:00Z');
             INSERT INTO students(id, first_name, last_name, university_id, course_id, created_at)
               VALUES('s1', 'Asha', 'Rao', 'u1', 'c1', '2026-01-01T00:00:00Z');
             INSERT INTO fee_structures(id, name, university_id, course_id, is_active, created_at)
               VALUES('fs1', 'MBBS 2026', 'u1', 'c1', 1, '2026-01-01T00:00:00Z');
             INSERT INTO fee_structure_components(id, fee_structure_id, fee_type_id, amount, frequency, sort_order, created_at)
               VALUES('fc1', 'fs1', 'ft1', 1000, 'yearly', 0, '2026-01-01T00:00:00Z');",
        )
        .expect("seed");
    }

    fn assign(store: &SqliteStore<'_>) -> StoreResult<String> {
        store.assign_with_obligations(
            &NewAssignment {
                student_id: "s1".into(),
                fee_structure_id: "fs1".into(),
                assigned_at: "2026-03-01T10:00:00Z".into(),
            },
            &[NewObligation {
                student_id: "s1".into(),
                fee_structure_component_id: "fc1".into(),
                amount_due: 1000.0,
                due_date: NaiveDate::from_ymd_opt(2027, 3, 1).expect("date"),
            }],
        )
    }

    #[test]
    fn duplicate_assignment_is_rejected_without_partial_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open db");
        seed(&conn);
        let store = SqliteStore::new(&conn);

        assign(&store).expect("first assignment");
        let second = assign(&store);
        assert!(matches!(second, Err(StoreError::Duplicate { .. })));

        let rows = store.obligations(&ObligationQuery::default()).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fee_type_name.as_deref(), Some("Tuition"));
        assert_eq!(rows[0].fee_structure_name.as_deref(), Some("MBBS 2026"));
        assert_eq!(rows[0].university_name.as_deref(), Some("Uni One"));
        assert_eq!(rows[0].course_name.as_deref(), Some("MBBS"));
        assert_eq!(rows[0].session_name, None);
        assert_eq!(rows[0].student_created_at, "2026-01-01T00:00:00Z");
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = db::open_db(dir.path()).expect("open db");
        seed(&conn);
        let store = SqliteStore::new(&conn);
        assign(&store).expect("assign");
        let id = store.obligations(&ObligationQuery::default()).expect("rows")[0]
            .obligation
            .id
            .clone();

        let update = PaymentUpdate {
            amount_paid: 600.0,
            payment_status: PaymentStatus::Partial,
            last_payment_date: NaiveDate::from_ymd_opt(2026, 3, 2),
            updated_at: "2026-03-02T09:00:00Z".into(),
        };
        assert_eq!(store.record_payment(&id, &update, 0).expect("write"), 1);
        let stale = store.record_payment(&id, &update, 0);
        assert!(matches!(stale, Err(StoreError::Conflict { expected: 0, .. })));
        let missing = store.record_payment("nope", &update, 0);
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));

        let row = store.obligation(&id).expect("load").expect("exists");
        assert_eq!(row.obligation.amount_paid, 600.0);
        assert_eq!(row.obligation.version, 1);
    }
}
