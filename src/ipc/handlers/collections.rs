use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::ipc::helpers::{
    db_conn, optional_date, optional_str, parse_amount, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

const PAYMENT_METHODS: [&str; 4] = ["cash", "card", "bank_transfer", "cheque"];

fn parse_method(raw: &str) -> Result<&'static str, HandlerErr> {
    let norm = raw.trim().to_ascii_lowercase().replace(' ', "_");
    PAYMENT_METHODS
        .iter()
        .copied()
        .find(|m| *m == norm)
        .ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "paymentMethod must be one of: {}",
                PAYMENT_METHODS.join(", ")
            ))
        })
}

fn require_row(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", table, e))?;
    found
        .map(|_| ())
        .ok_or_else(|| HandlerErr::new("not_found", format!("{what} not found")))
}

fn collection_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let first: Option<String> = r.get(9)?;
    let last: Option<String> = r.get(10)?;
    let student_name = match (first, last) {
        (None, None) => None,
        (f, l) => Some(
            format!("{} {}", f.unwrap_or_default(), l.unwrap_or_default())
                .trim()
                .to_string(),
        ),
    };
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "feeTypeId": r.get::<_, String>(2)?,
        "amountPaid": r.get::<_, f64>(3)?,
        "paymentDate": r.get::<_, String>(4)?,
        "paymentMethod": r.get::<_, String>(5)?,
        "receiptNumber": r.get::<_, String>(6)?,
        "notes": r.get::<_, Option<String>>(7)?,
        "createdAt": r.get::<_, String>(8)?,
        "studentName": student_name,
        "admissionNumber": r.get::<_, Option<String>>(11)?,
        "feeTypeName": r.get::<_, Option<String>>(12)?,
    }))
}

fn list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = optional_str(params, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT fc.id, fc.student_id, fc.fee_type_id, fc.amount_paid, fc.payment_date,
                    fc.payment_method, fc.receipt_number, fc.notes, fc.created_at,
                    s.first_name, s.last_name, s.admission_number, ft.name
             FROM fee_collections fc
             LEFT JOIN students s ON s.id = fc.student_id
             LEFT JOIN fee_types ft ON ft.id = fc.fee_type_id
             WHERE (?1 IS NULL OR fc.student_id = ?1)
             ORDER BY fc.payment_date DESC, fc.created_at DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_collections", e))?;
    let rows = stmt
        .query_map([student_id], collection_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", "fee_collections", e))?;
    let total: f64 = rows
        .iter()
        .filter_map(|r| r.get("amountPaid").and_then(Value::as_f64))
        .sum();
    Ok(json!({ "collections": rows, "totalCollected": total }))
}

fn create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    let fee_type_id = required_str(params, "feeTypeId")?;
    let amount = parse_amount(
        params
            .get("amountPaid")
            .ok_or_else(|| HandlerErr::bad_params("missing amountPaid"))?,
        "amountPaid",
    )?;
    if amount == 0.0 {
        return Err(HandlerErr::bad_params("amountPaid must be greater than 0"));
    }
    let method = parse_method(&required_str(params, "paymentMethod")?)?;
    let date = optional_date(params, "paymentDate")?.unwrap_or_else(|| Utc::now().date_naive());
    let notes = optional_str(params, "notes")?;
    require_row(conn, "students", &student_id, "student")?;
    require_row(conn, "fee_types", &fee_type_id, "fee type")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let receipt = db::next_receipt_number(&tx)
        .map_err(|e| HandlerErr::db("db_insert_failed", "counters", e))?;
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO fee_collections(
           id, student_id, fee_type_id, amount_paid, payment_date, payment_method,
           receipt_number, notes, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            &fee_type_id,
            amount,
            date.format("%Y-%m-%d").to_string(),
            method,
            &receipt,
            &notes,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "fee_collections", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    info!(collection_id = %id, receipt = %receipt, amount, "fee collection recorded");
    Ok(json!({ "id": id, "receiptNumber": receipt }))
}

fn update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "collectionId")?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let patch_value = Value::Object(patch.clone());

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for key in patch.keys() {
        match key.as_str() {
            "amountPaid" => {
                let v = parse_amount(&patch[key], key)?;
                if v == 0.0 {
                    return Err(HandlerErr::bad_params("amountPaid must be greater than 0"));
                }
                sets.push("amount_paid = ?");
                values.push(v.into());
            }
            "paymentMethod" => {
                let m = parse_method(&required_str(&patch_value, key)?)?;
                sets.push("payment_method = ?");
                values.push(m.to_string().into());
            }
            "paymentDate" => {
                let d = optional_date(&patch_value, key)?
                    .ok_or_else(|| HandlerErr::bad_params("paymentDate must not be empty"))?;
                sets.push("payment_date = ?");
                values.push(d.format("%Y-%m-%d").to_string().into());
            }
            "notes" => {
                sets.push("notes = ?");
                values.push(
                    optional_str(&patch_value, key)?
                        .map(Into::into)
                        .unwrap_or(rusqlite::types::Value::Null),
                );
            }
            "feeTypeId" => {
                let ft = required_str(&patch_value, key)?;
                require_row(conn, "fee_types", &ft, "fee type")?;
                sets.push("fee_type_id = ?");
                values.push(ft.into());
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown collection field: {other}"
                )))
            }
        }
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("patch must not be empty"));
    }
    sets.push("updated_at = ?");
    values.push(db::now_rfc3339().into());
    values.push(id.into());
    let sql = format!("UPDATE fee_collections SET {} WHERE id = ?", sets.join(", "));
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| HandlerErr::db("db_update_failed", "fee_collections", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "collection not found"));
    }
    Ok(json!({ "ok": true }))
}

fn delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let id = required_str(params, "collectionId")?;
    let changed = conn
        .execute("DELETE FROM fee_collections WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "fee_collections", e))?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "collection not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "collections.list" => list(state, p),
        "collections.create" => create(state, p),
        "collections.update" => update(state, p),
        "collections.delete" => delete(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}
