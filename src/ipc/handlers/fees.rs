use chrono::Utc;
use serde_json::{json, Value};

use crate::fees::collect::{collect_payments, CollectError, PaymentItem};
use crate::fees::reports::student_balances;
use crate::ipc::helpers::{db_conn, optional_str, parse_amount, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::settings::FeeSettings;
use crate::store::{FeeStore, ObligationQuery, SqliteStore};

fn obligations(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    let store = SqliteStore::new(conn);
    if store.student(&student_id)?.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let rows = store.obligations(&ObligationQuery {
        student_id: Some(student_id),
        paid_only: false,
    })?;
    let total_due: f64 = rows.iter().map(|r| r.obligation.amount_due).sum();
    let total_paid: f64 = rows.iter().map(|r| r.obligation.amount_paid).sum();
    Ok(json!({
        "obligations": rows,
        "totalDue": total_due,
        "totalPaid": total_paid,
        "balance": total_due - total_paid
    }))
}

fn students_with_fees(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let search = optional_str(params, "search")?;
    let students = student_balances(&SqliteStore::new(conn), search.as_deref())?;
    Ok(json!({ "students": students }))
}

fn parse_items(params: &Value) -> Result<Vec<PaymentItem>, HandlerErr> {
    let Some(items) = params.get("items").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("items must be an array"));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obligation_id = required_str(item, "obligationId")?;
            let amount = parse_amount(
                item.get("amount")
                    .ok_or_else(|| HandlerErr::bad_params("missing amount"))?,
                "amount",
            )
            .map_err(|e| e.with_details(json!({ "index": i })))?;
            let expected_version = match item.get("expectedVersion") {
                None | Some(Value::Null) => None,
                Some(v) => Some(v.as_i64().ok_or_else(|| {
                    HandlerErr::bad_params("expectedVersion must be an integer")
                        .with_details(json!({ "index": i }))
                })?),
            };
            Ok(PaymentItem {
                obligation_id,
                amount,
                expected_version,
            })
        })
        .collect()
}

fn collect(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let student_id = required_str(params, "studentId")?;
    let items = parse_items(params)?;
    let settings =
        FeeSettings::load(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let store = SqliteStore::new(conn);
    let result = collect_payments(
        &store,
        &student_id,
        &items,
        &settings.collect_options(),
        Utc::now(),
    )
    .map_err(|e| match e {
        CollectError::Store(s) => HandlerErr::from(s),
        other => HandlerErr::new(other.code(), other.to_string()),
    })?;

    let receipt_text: Vec<String> = result
        .receipts()
        .map(|r| r.render_text(&settings.currency_symbol))
        .collect();
    let mut out =
        serde_json::to_value(&result).map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    out["receiptText"] = json!(receipt_text);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "fees.obligations" => obligations(state, p),
        "fees.studentsWithFees" => students_with_fees(state, p),
        "fees.collect" => collect(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}
