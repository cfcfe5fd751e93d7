use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::fees::assign::{assign_structure, AssignError};
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_str, parse_amount, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Frequency;
use crate::settings::FeeSettings;
use crate::store::{FeeStore, SqliteStore};

struct ComponentInput {
    fee_type_id: String,
    amount: f64,
    frequency: String,
}

fn parse_component(conn: &Connection, v: &Value) -> Result<ComponentInput, HandlerErr> {
    let fee_type_id = required_str(v, "feeTypeId")?;
    let amount = parse_amount(
        v.get("amount")
            .ok_or_else(|| HandlerErr::bad_params("missing amount"))?,
        "amount",
    )?;
    // Known labels are normalized; anything else is stored as given.
    let frequency = optional_str(v, "frequency")?
        .map(|f| Frequency::from_label(&f).label().to_string())
        .unwrap_or_else(|| Frequency::OneTime.label().to_string());
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM fee_types WHERE id = ?", [&fee_type_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_types", e))?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "fee type not found")
            .with_details(json!({ "feeTypeId": fee_type_id })));
    }
    Ok(ComponentInput {
        fee_type_id,
        amount,
        frequency,
    })
}

fn insert_component(
    conn: &Connection,
    structure_id: &str,
    c: &ComponentInput,
    sort_order: i64,
) -> Result<String, HandlerErr> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_structure_components(
           id, fee_structure_id, fee_type_id, amount, frequency, sort_order, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            structure_id,
            &c.fee_type_id,
            c.amount,
            &c.frequency,
            sort_order,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "fee_structure_components", e))?;
    Ok(id)
}

fn require_program(conn: &Connection, university_id: &str, course_id: &str) -> Result<(), HandlerErr> {
    for (table, key, id) in [
        ("universities", "universityId", university_id),
        ("courses", "courseId", course_id),
    ] {
        let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
        let found: Option<i64> = conn
            .query_row(&sql, [id], |r| r.get(0))
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", table, e))?;
        if found.is_none() {
            return Err(HandlerErr::new("not_found", format!("{key} not found"))
                .with_details(json!({ key: id })));
        }
    }
    Ok(())
}

fn components_json(conn: &Connection, structure_id: &str) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.fee_type_id, ft.name, c.amount, c.frequency, c.sort_order
             FROM fee_structure_components c
             LEFT JOIN fee_types ft ON ft.id = c.fee_type_id
             WHERE c.fee_structure_id = ?
             ORDER BY c.sort_order, c.created_at",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_structure_components", e))?;
    stmt.query_map([structure_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "feeTypeId": r.get::<_, String>(1)?,
            "feeTypeName": r.get::<_, Option<String>>(2)?,
            "amount": r.get::<_, f64>(3)?,
            "frequency": r.get::<_, String>(4)?,
            "sortOrder": r.get::<_, i64>(5)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", "fee_structure_components", e))
}

fn structures_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let university = optional_str(params, "universityId")?;
    let course = optional_str(params, "courseId")?;
    let mut stmt = conn
        .prepare(
            "SELECT fs.id, fs.name, fs.university_id, u.name, fs.course_id, c.name,
                    fs.is_active, fs.created_at,
                    (SELECT COUNT(*) FROM fee_structure_components x WHERE x.fee_structure_id = fs.id),
                    (SELECT COALESCE(SUM(x.amount), 0) FROM fee_structure_components x WHERE x.fee_structure_id = fs.id),
                    (SELECT COUNT(*) FROM student_fee_assignments a WHERE a.fee_structure_id = fs.id)
             FROM fee_structures fs
             LEFT JOIN universities u ON u.id = fs.university_id
             LEFT JOIN courses c ON c.id = fs.course_id
             WHERE (?1 IS NULL OR fs.university_id = ?1)
               AND (?2 IS NULL OR fs.course_id = ?2)
             ORDER BY fs.created_at DESC, fs.name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_structures", e))?;
    let rows = stmt
        .query_map((university, course), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "universityId": r.get::<_, String>(2)?,
                "universityName": r.get::<_, Option<String>>(3)?,
                "courseId": r.get::<_, String>(4)?,
                "courseName": r.get::<_, Option<String>>(5)?,
                "isActive": r.get::<_, i64>(6)? != 0,
                "createdAt": r.get::<_, String>(7)?,
                "componentCount": r.get::<_, i64>(8)?,
                "totalAmount": r.get::<_, f64>(9)?,
                "assignedStudents": r.get::<_, i64>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_structures", e))?;
    Ok(json!({ "feeStructures": rows }))
}

fn structures_get(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "feeStructureId")?;
    let structure = SqliteStore::new(conn)
        .fee_structure(&id)?
        .ok_or_else(|| HandlerErr::new("not_found", "fee structure not found"))?;
    Ok(json!({
        "feeStructure": structure,
        "components": components_json(conn, &id)?
    }))
}

fn run_assignment(conn: &Connection, structure_id: &str) -> Result<Value, HandlerErr> {
    let settings =
        FeeSettings::load(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let store = SqliteStore::new(conn);
    let report = assign_structure(&store, &settings.policy(), structure_id, Utc::now())
        .map_err(|e| match e {
            AssignError::Store(s) => HandlerErr::from(s),
            other => HandlerErr::new(other.code(), other.to_string())
                .with_details(json!({ "feeStructureId": structure_id })),
        })?;
    serde_json::to_value(&report).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn structures_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let name = required_str(params, "name")?;
    let university_id = required_str(params, "universityId")?;
    let course_id = required_str(params, "courseId")?;
    let is_active = optional_bool(params, "isActive")?.unwrap_or(true);
    require_program(conn, &university_id, &course_id)?;

    let components = match params.get("components") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|c| parse_component(conn, c))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(HandlerErr::bad_params("components must be an array")),
    };

    let id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO fee_structures(id, name, university_id, course_id, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &university_id,
            &course_id,
            is_active as i64,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "fee_structures", e))?;
    let mut component_ids = Vec::with_capacity(components.len());
    for (i, c) in components.iter().enumerate() {
        component_ids.push(insert_component(&tx, &id, c, i as i64)?);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    info!(fee_structure_id = %id, components = component_ids.len(), "fee structure created");

    let assignment = if is_active && !component_ids.is_empty() {
        run_assignment(conn, &id)?
    } else {
        Value::Null
    };
    Ok(json!({
        "feeStructureId": id,
        "componentIds": component_ids,
        "assignment": assignment
    }))
}

fn structures_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "feeStructureId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let store = SqliteStore::new(conn);
    let mut current = store
        .fee_structure(&id)?
        .ok_or_else(|| HandlerErr::new("not_found", "fee structure not found"))?;

    let patch_value = Value::Object(patch.clone());
    for key in patch.keys() {
        match key.as_str() {
            "name" => current.name = required_str(&patch_value, "name")?,
            "universityId" => current.university_id = required_str(&patch_value, "universityId")?,
            "courseId" => current.course_id = required_str(&patch_value, "courseId")?,
            "isActive" => {
                current.is_active = optional_bool(&patch_value, "isActive")?
                    .ok_or_else(|| HandlerErr::bad_params("isActive must be boolean"))?
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown feeStructure field: {other}"
                )))
            }
        }
    }
    require_program(conn, &current.university_id, &current.course_id)?;
    conn.execute(
        "UPDATE fee_structures
         SET name = ?, university_id = ?, course_id = ?, is_active = ?, updated_at = ?
         WHERE id = ?",
        (
            &current.name,
            &current.university_id,
            &current.course_id,
            current.is_active as i64,
            db::now_rfc3339(),
            &id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "fee_structures", e))?;
    let updated = store
        .fee_structure(&id)?
        .ok_or_else(|| HandlerErr::new("not_found", "fee structure not found"))?;
    Ok(json!({ "feeStructure": updated }))
}

fn structures_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "feeStructureId")?;
    if SqliteStore::new(conn).fee_structure(&id)?.is_none() {
        return Err(HandlerErr::new("not_found", "fee structure not found"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let steps: [(&str, &str); 4] = [
        (
            "fee_payments",
            "DELETE FROM fee_payments WHERE fee_structure_component_id IN (
               SELECT id FROM fee_structure_components WHERE fee_structure_id = ?
             )",
        ),
        (
            "student_fee_assignments",
            "DELETE FROM student_fee_assignments WHERE fee_structure_id = ?",
        ),
        (
            "fee_structure_components",
            "DELETE FROM fee_structure_components WHERE fee_structure_id = ?",
        ),
        ("fee_structures", "DELETE FROM fee_structures WHERE id = ?"),
    ];
    for (table, sql) in steps {
        tx.execute(sql, [&id])
            .map_err(|e| HandlerErr::db("db_delete_failed", table, e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    info!(fee_structure_id = %id, "fee structure deleted");
    Ok(json!({ "ok": true }))
}

fn structures_assign(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "feeStructureId")?;
    Ok(json!({ "assignment": run_assignment(conn, &id)? }))
}

// Components added or edited later only affect future assignments.

fn components_add(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let structure_id = required_str(params, "feeStructureId")?;
    if SqliteStore::new(conn).fee_structure(&structure_id)?.is_none() {
        return Err(HandlerErr::new("not_found", "fee structure not found"));
    }
    let input = parse_component(conn, params)?;
    let next_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM fee_structure_components
             WHERE fee_structure_id = ?",
            [&structure_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_structure_components", e))?;
    let id = insert_component(conn, &structure_id, &input, next_order)?;
    Ok(json!({ "componentId": id }))
}

fn components_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "componentId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let current: Option<(String, f64, String)> = conn
        .query_row(
            "SELECT fee_type_id, amount, frequency FROM fee_structure_components WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_structure_components", e))?;
    let Some((fee_type_id, amount, frequency)) = current else {
        return Err(HandlerErr::new("not_found", "fee component not found"));
    };

    let mut merged = json!({
        "feeTypeId": fee_type_id,
        "amount": amount,
        "frequency": frequency,
    });
    for (k, v) in patch {
        if !matches!(k.as_str(), "feeTypeId" | "amount" | "frequency") {
            return Err(HandlerErr::bad_params(format!("unknown component field: {k}")));
        }
        merged[k.as_str()] = v.clone();
    }
    let input = parse_component(conn, &merged)?;
    conn.execute(
        "UPDATE fee_structure_components
         SET fee_type_id = ?, amount = ?, frequency = ?, updated_at = ?
         WHERE id = ?",
        (
            &input.fee_type_id,
            input.amount,
            &input.frequency,
            db::now_rfc3339(),
            &id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "fee_structure_components", e))?;
    Ok(json!({ "ok": true }))
}

fn components_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "componentId")?;
    let paid: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM fee_payments WHERE fee_structure_component_id = ? AND amount_paid > 0 LIMIT 1",
            [&id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_payments", e))?;
    if paid.is_some() {
        return Err(HandlerErr::bad_params("component has recorded payments")
            .with_details(json!({ "componentId": id })));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM fee_payments WHERE fee_structure_component_id = ?",
        [&id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", "fee_payments", e))?;
    let changed = tx
        .execute("DELETE FROM fee_structure_components WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "fee_structure_components", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "fee component not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "feeStructures.list" => structures_list(state, p),
        "feeStructures.get" => structures_get(state, p),
        "feeStructures.create" => structures_create(state, p),
        "feeStructures.update" => structures_update(state, p),
        "feeStructures.delete" => structures_delete(state, p),
        "feeStructures.assign" => structures_assign(state, p),
        "feeComponents.add" => components_add(state, p),
        "feeComponents.update" => components_update(state, p),
        "feeComponents.delete" => components_delete(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}

