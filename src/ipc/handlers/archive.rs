use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use crate::fees::archive;
use crate::fees::reports::{fee_report, payment_history, ReportFilter};
use crate::ipc::helpers::{db_conn, optional_date, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStore;

fn export_ledgers(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = required_str(params, "outPath")?;
    let filter = ReportFilter {
        from: optional_date(params, "from")?,
        to: optional_date(params, "to")?,
        ..ReportFilter::default()
    };
    if let (Some(f), Some(t)) = (filter.from, filter.to) {
        if t < f {
            return Err(HandlerErr::bad_params("to must not be before from")
                .with_details(json!({ "from": f.to_string(), "to": t.to_string() })));
        }
    }

    let store = SqliteStore::new(db_conn(state)?);
    let report = fee_report(&store, &filter)?;
    let history = payment_history(&store, &filter)?;
    let summary =
        archive::write_ledger_archive(&PathBuf::from(&out_path), &report, &history, Utc::now())
            .map_err(|e| {
                HandlerErr::new("io_failed", format!("{e:#}"))
                    .with_details(json!({ "path": out_path }))
            })?;
    info!(path = %out_path, obligations = report.rows.len(), payments = history.rows.len(),
        "fee ledgers archived");
    Ok(json!({
        "ok": true,
        "path": out_path,
        "format": archive::LEDGER_FORMAT_V1,
        "entries": summary.entries,
        "totalDue": summary.total_due,
        "totalPaid": summary.total_paid
    }))
}

fn verify_ledgers(params: &Value) -> Result<Value, HandlerErr> {
    let in_path = required_str(params, "inPath")?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "archive file not found")
            .with_details(json!({ "path": in_path })));
    }
    let verified = archive::verify_ledger_archive(&src).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": in_path }))
    })?;
    Ok(json!({
        "path": in_path,
        "exportedAt": verified.exported_at,
        "entries": verified.entries,
        "checksumVerified": verified.mismatched.is_empty(),
        "mismatched": verified.mismatched
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "archive.exportLedgers" => export_ledgers(state, &req.params),
        "archive.verifyLedgers" => verify_ledgers(&req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
