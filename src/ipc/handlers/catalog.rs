use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db;
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_date, optional_str, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::sqlite::is_constraint_violation;

const FEE_TYPE_CATEGORIES: [&str; 6] = [
    "Tuition",
    "Hostel",
    "Mess",
    "Examination",
    "Library",
    "General",
];

fn list_named(conn: &Connection, table: &str) -> Result<Value, HandlerErr> {
    let sql = format!("SELECT id, name, created_at FROM {table} ORDER BY name");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", table, e))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", table, e))?;
    Ok(Value::Array(rows))
}

fn create_named(conn: &Connection, table: &str, params: &Value) -> Result<Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    let sql = format!("INSERT INTO {table}(id, name, created_at) VALUES(?, ?, ?)");
    conn.execute(&sql, (&id, &name, db::now_rfc3339()))
        .map_err(|e| {
            if is_constraint_violation(&e) {
                HandlerErr::new("duplicate", format!("{name} already exists"))
                    .with_details(json!({ "table": table }))
            } else {
                HandlerErr::db("db_insert_failed", table, e)
            }
        })?;
    Ok(json!({ "id": id, "name": name }))
}

fn sessions_list(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, session_name, start_date, end_date, is_active
             FROM academic_sessions
             ORDER BY COALESCE(start_date, '') DESC, session_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", "academic_sessions", e))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "startDate": r.get::<_, Option<String>>(2)?,
                "endDate": r.get::<_, Option<String>>(3)?,
                "isActive": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", "academic_sessions", e))?;
    Ok(json!({ "sessions": rows }))
}

fn sessions_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(params, "name")?;
    let start = optional_date(params, "startDate")?;
    let end = optional_date(params, "endDate")?;
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            return Err(HandlerErr::bad_params("endDate must not be before startDate"));
        }
    }
    let active = optional_bool(params, "isActive")?.unwrap_or(true);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_sessions(id, session_name, start_date, end_date, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            start.map(|d| d.to_string()),
            end.map(|d| d.to_string()),
            active as i64,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            HandlerErr::new("duplicate", format!("session {name} already exists"))
        } else {
            HandlerErr::db("db_insert_failed", "academic_sessions", e)
        }
    })?;
    Ok(json!({ "id": id, "name": name }))
}

fn fee_type_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "description": r.get::<_, Option<String>>(2)?,
        "category": r.get::<_, String>(3)?,
        "frequency": r.get::<_, String>(4)?,
        "status": r.get::<_, String>(5)?,
        "isActive": r.get::<_, i64>(6)? != 0,
        "createdAt": r.get::<_, String>(7)?,
    }))
}

const FEE_TYPE_COLUMNS: &str =
    "id, name, description, category, frequency, status, is_active, created_at";

fn fee_types_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let active_only = optional_bool(params, "activeOnly")?.unwrap_or(false);
    let sql = format!(
        "SELECT {FEE_TYPE_COLUMNS} FROM fee_types {} ORDER BY name",
        if active_only { "WHERE is_active = 1" } else { "" }
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_types", e))?;
    let rows = stmt
        .query_map([], fee_type_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_types", e))?;
    Ok(json!({ "feeTypes": rows }))
}

fn parse_category(params: &Value) -> Result<Option<String>, HandlerErr> {
    let Some(c) = optional_str(params, "category")? else {
        return Ok(None);
    };
    FEE_TYPE_CATEGORIES
        .iter()
        .find(|k| k.eq_ignore_ascii_case(&c))
        .map(|k| Some(k.to_string()))
        .ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "category must be one of: {}",
                FEE_TYPE_CATEGORIES.join(", ")
            ))
        })
}

fn fee_types_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(params, "name")?;
    let category = parse_category(params)?.unwrap_or_else(|| "General".to_string());
    let frequency = optional_str(params, "frequency")?.unwrap_or_else(|| "one-time".into());
    let description = optional_str(params, "description")?;
    let active = optional_bool(params, "isActive")?.unwrap_or(true);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_types(id, name, description, category, frequency, status, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &description,
            &category,
            &frequency,
            if active { "active" } else { "inactive" },
            active as i64,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "fee_types", e))?;
    Ok(json!({ "id": id, "name": name }))
}

fn fee_types_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "feeTypeId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let patch_value = Value::Object(patch.clone());

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for key in patch.keys() {
        match key.as_str() {
            "name" => {
                sets.push("name = ?");
                values.push(required_str(&patch_value, "name")?.into());
            }
            "description" => {
                sets.push("description = ?");
                values.push(
                    optional_str(&patch_value, "description")?
                        .map(Into::into)
                        .unwrap_or(rusqlite::types::Value::Null),
                );
            }
            "category" => {
                let c = parse_category(&patch_value)?
                    .ok_or_else(|| HandlerErr::bad_params("category must not be empty"))?;
                sets.push("category = ?");
                values.push(c.into());
            }
            "frequency" => {
                sets.push("frequency = ?");
                values.push(required_str(&patch_value, "frequency")?.into());
            }
            "isActive" => {
                let active = optional_bool(&patch_value, "isActive")?
                    .ok_or_else(|| HandlerErr::bad_params("isActive must be boolean"))?;
                sets.push("is_active = ?");
                values.push((active as i64).into());
                sets.push("status = ?");
                values.push(if active { "active" } else { "inactive" }.to_string().into());
            }
            other => {
                return Err(HandlerErr::bad_params(format!("unknown feeType field: {other}")))
            }
        }
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }
    sets.push("updated_at = ?");
    values.push(db::now_rfc3339().into());
    values.push(id.clone().into());

    let sql = format!("UPDATE fee_types SET {} WHERE id = ?", sets.join(", "));
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", "fee_types", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "fee type not found"));
    }
    Ok(json!({ "ok": true }))
}

fn fee_types_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "feeTypeId")?;
    let in_use: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM fee_structure_components WHERE fee_type_id = ?
             UNION SELECT 1 FROM fee_collections WHERE fee_type_id = ?
             LIMIT 1",
            [&id, &id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_types", e))?;
    if in_use.is_some() {
        return Err(HandlerErr::bad_params("fee type is in use")
            .with_details(json!({ "feeTypeId": id })));
    }
    let changed = conn
        .execute("DELETE FROM fee_types WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "fee_types", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "fee type not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "universities.list" => db_conn(state)
            .and_then(|c| list_named(c, "universities"))
            .map(|rows| json!({ "universities": rows })),
        "universities.create" => db_conn(state).and_then(|c| create_named(c, "universities", p)),
        "courses.list" => db_conn(state)
            .and_then(|c| list_named(c, "courses"))
            .map(|rows| json!({ "courses": rows })),
        "courses.create" => db_conn(state).and_then(|c| create_named(c, "courses", p)),
        "sessions.list" => sessions_list(state),
        "sessions.create" => sessions_create(state, p),
        "feeTypes.list" => fee_types_list(state, p),
        "feeTypes.create" => fee_types_create(state, p),
        "feeTypes.update" => fee_types_update(state, p),
        "feeTypes.delete" => fee_types_delete(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}
