use chrono::Utc;
use rusqlite::{types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::fees::assign::assign_student;
use crate::ipc::helpers::{db_conn, optional_date, optional_str, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::StudentStatus;
use crate::settings::FeeSettings;
use crate::store::sqlite::{student_from_row, STUDENT_COLUMNS};
use crate::store::{FeeStore, SqliteStore};

#[derive(Clone, Copy)]
enum FieldKind {
    Required,
    Text,
    Date,
    Marks,
    Status,
    Ref(&'static str),
    OptionalRef(&'static str),
}

const FIELDS: [(&str, &str, FieldKind); 19] = [
    ("firstName", "first_name", FieldKind::Required),
    ("lastName", "last_name", FieldKind::Required),
    ("fatherName", "father_name", FieldKind::Text),
    ("motherName", "mother_name", FieldKind::Text),
    ("dateOfBirth", "date_of_birth", FieldKind::Date),
    ("phoneNumber", "phone_number", FieldKind::Text),
    ("email", "email", FieldKind::Text),
    ("universityId", "university_id", FieldKind::Ref("universities")),
    ("courseId", "course_id", FieldKind::Ref("courses")),
    (
        "academicSessionId",
        "academic_session_id",
        FieldKind::OptionalRef("academic_sessions"),
    ),
    ("status", "status", FieldKind::Status),
    ("city", "city", FieldKind::Text),
    ("country", "country", FieldKind::Text),
    ("address", "address", FieldKind::Text),
    ("aadhaarNumber", "aadhaar_number", FieldKind::Text),
    ("passportNumber", "passport_number", FieldKind::Text),
    ("twelfthMarks", "twelfth_marks", FieldKind::Marks),
    ("seatNumber", "seat_number", FieldKind::Text),
    ("agentId", "agent_id", FieldKind::OptionalRef("agents")),
];

fn ensure_exists(conn: &Connection, table: &str, id: &str, key: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", table, e))?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", format!("{key} not found"))
            .with_details(json!({ key: id })));
    }
    Ok(())
}

/// Reads one field from `params` as the SQL value to store. Text columns that
/// are NOT NULL in the schema get an empty string rather than NULL.
fn field_value(
    conn: &Connection,
    params: &Value,
    key: &str,
    column: &str,
    kind: FieldKind,
) -> Result<SqlValue, HandlerErr> {
    let not_null_text = matches!(column, "father_name" | "mother_name");
    Ok(match kind {
        FieldKind::Required => SqlValue::Text(required_str(params, key)?),
        FieldKind::Text => match optional_str(params, key)? {
            Some(s) => SqlValue::Text(s),
            None if not_null_text => SqlValue::Text(String::new()),
            None => SqlValue::Null,
        },
        FieldKind::Date => match optional_date(params, key)? {
            Some(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
            None => SqlValue::Null,
        },
        FieldKind::Marks => match params.get(key) {
            None | Some(Value::Null) => SqlValue::Null,
            Some(v) => {
                let n = v
                    .as_f64()
                    .filter(|n| (0.0..=100.0).contains(n))
                    .ok_or_else(|| {
                        HandlerErr::bad_params(format!("{key} must be a number in 0..=100"))
                    })?;
                SqlValue::Real(n)
            }
        },
        FieldKind::Status => {
            let raw = optional_str(params, key)?.unwrap_or_else(|| "active".to_string());
            let status = StudentStatus::parse(&raw).ok_or_else(|| {
                HandlerErr::bad_params("status must be one of: active, inactive, completed")
            })?;
            SqlValue::Text(status.as_str().to_string())
        }
        FieldKind::Ref(table) => {
            let id = required_str(params, key)?;
            ensure_exists(conn, table, &id, key)?;
            SqlValue::Text(id)
        }
        FieldKind::OptionalRef(table) => match optional_str(params, key)? {
            Some(id) => {
                ensure_exists(conn, table, &id, key)?;
                SqlValue::Text(id)
            }
            None => SqlValue::Null,
        },
    })
}

fn load_student(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    let student = SqliteStore::new(conn)
        .student(id)?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;
    serde_json::to_value(&student).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn students_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let status = match optional_str(params, "status")? {
        None => None,
        Some(s) if s.eq_ignore_ascii_case("all") => None,
        Some(s) => Some(StudentStatus::parse(&s).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of: all, active, inactive, completed")
        })?),
    };
    let search = optional_str(params, "search")?.map(|s| s.to_lowercase());

    let mut sql = format!("SELECT {STUDENT_COLUMNS} FROM students");
    let mut binds: Vec<String> = Vec::new();
    let mut clauses: Vec<&str> = Vec::new();
    if let Some(s) = status {
        clauses.push("status = ?");
        binds.push(s.as_str().to_string());
    }
    if let Some(q) = &search {
        clauses.push(
            "(LOWER(first_name || ' ' || last_name) LIKE ?
              OR LOWER(COALESCE(admission_number, '')) LIKE ?
              OR LOWER(COALESCE(email, '')) LIKE ?
              OR COALESCE(phone_number, '') LIKE ?)",
        );
        let like = format!("%{q}%");
        binds.extend(std::iter::repeat(like).take(4));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, id");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", "students", e))?;
    let students = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", "students", e))?;
    Ok(json!({ "students": students }))
}

fn students_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "studentId")?;
    Ok(json!({ "student": load_student(conn, &id)? }))
}

fn students_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let mut columns: Vec<&str> = vec!["id", "admission_number", "created_at"];
    let id = Uuid::new_v4().to_string();
    let mut values: Vec<SqlValue> = vec![SqlValue::Text(id.clone())];

    let mut fields = Vec::with_capacity(FIELDS.len());
    for (key, column, kind) in FIELDS {
        fields.push(field_value(conn, params, key, column, kind)?);
        columns.push(column);
    }

    let admission_number = db::next_admission_number(conn)
        .map_err(|e| HandlerErr::db("db_insert_failed", "counters", e))?;
    values.push(SqlValue::Text(admission_number.clone()));
    values.push(SqlValue::Text(db::now_rfc3339()));
    values.extend(fields);

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO students({}) VALUES({})",
        columns.join(", "),
        placeholders
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_insert_failed", "students", e))?;
    info!(student_id = %id, admission_number = %admission_number, "student created");

    // Student creation succeeds even if fee assignment does not.
    let auto_assign = match FeeSettings::load(conn) {
        Ok(settings) if settings.auto_assign_on_student_create => {
            let store = SqliteStore::new(conn);
            match assign_student(&store, &settings.policy(), &id, Utc::now()) {
                Ok(report) => serde_json::to_value(&report).unwrap_or(Value::Null),
                Err(e) => {
                    warn!(student_id = %id, error = %e, "auto-assignment failed");
                    json!({ "error": { "code": e.code(), "message": e.to_string() } })
                }
            }
        }
        Ok(_) => Value::Null,
        Err(e) => {
            warn!(student_id = %id, error = %e, "could not load fee settings; skipping auto-assignment");
            json!({ "error": { "code": "db_query_failed", "message": e.to_string() } })
        }
    };

    Ok(json!({
        "student": load_student(conn, &id)?,
        "feeAssignment": auto_assign
    }))
}

fn students_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "studentId")?;
    let patch: &Map<String, Value> = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let patch_value = Value::Object(patch.clone());

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for key in patch.keys() {
        let Some((_, column, kind)) = FIELDS.iter().find(|(k, _, _)| *k == key.as_str()) else {
            return Err(HandlerErr::bad_params(format!("unknown student field: {key}")));
        };
        values.push(field_value(conn, &patch_value, key, column, *kind)?);
        sets.push(format!("{column} = ?"));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }
    sets.push("updated_at = ?".to_string());
    values.push(SqlValue::Text(db::now_rfc3339()));
    values.push(SqlValue::Text(id.clone()));

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", "students", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "student": load_student(conn, &id)? }))
}

fn students_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "studentId")?;
    ensure_exists(conn, "students", &id, "studentId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // Dependency order; there is no ON DELETE CASCADE.
    for table in [
        "fee_payments",
        "student_fee_assignments",
        "fee_collections",
        "students",
    ] {
        let column = if table == "students" { "id" } else { "student_id" };
        let sql = format!("DELETE FROM {table} WHERE {column} = ?");
        tx.execute(&sql, [&id])
            .map_err(|e| HandlerErr::db("db_delete_failed", table, e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    info!(student_id = %id, "student deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "students.list" => students_list(state, p),
        "students.get" => students_get(state, p),
        "students.create" => students_create(state, p),
        "students.update" => students_update(state, p),
        "students.delete" => students_delete(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}
