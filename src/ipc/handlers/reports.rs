use serde_json::{json, Value};
use tracing::info;

use crate::fees::reports::{fee_report, payment_history, ReportFilter};
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_date, optional_str, respond, write_text_file, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::PaymentStatus;
use crate::settings::ReportSettings;
use crate::store::SqliteStore;

fn parse_filter(params: &Value, settings: &ReportSettings) -> Result<ReportFilter, HandlerErr> {
    let from = optional_date(params, "from")?;
    let to = optional_date(params, "to")?;
    if let (Some(f), Some(t)) = (from, to) {
        if t < f {
            return Err(HandlerErr::bad_params("to must not be before from")
                .with_details(json!({ "from": f.to_string(), "to": t.to_string() })));
        }
    }
    let status = match optional_str(params, "status")? {
        None => settings.default_status_filter,
        Some(s) if s.eq_ignore_ascii_case("all") => None,
        Some(s) => Some(PaymentStatus::parse(&s).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of: all, pending, partial, paid")
                .with_details(json!({ "status": s }))
        })?),
    };
    Ok(ReportFilter {
        from,
        to,
        status,
        search: optional_str(params, "search")?,
    })
}

fn load_settings(state: &AppState) -> Result<ReportSettings, HandlerErr> {
    ReportSettings::load(db_conn(state)?)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_fee_report(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(state)?;
    let filter = parse_filter(params, &settings)?;
    let report = fee_report(&SqliteStore::new(db_conn(state)?), &filter)?;
    Ok(json!({ "report": report }))
}

fn handle_payment_history(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(state)?;
    let filter = parse_filter(params, &settings)?;
    let history = payment_history(&SqliteStore::new(db_conn(state)?), &filter)?;
    Ok(json!({ "history": history }))
}

/// Writes to `outPath` when given, otherwise returns the text inline.
fn deliver_csv(params: &Value, csv: String, row_count: usize) -> Result<Value, HandlerErr> {
    match optional_str(params, "outPath")? {
        Some(path) => {
            write_text_file(&path, &csv)?;
            info!(path = %path, rows = row_count, "csv export written");
            Ok(json!({ "path": path, "rowCount": row_count }))
        }
        None => Ok(json!({ "csv": csv, "rowCount": row_count })),
    }
}

fn export_fee_report(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(state)?;
    let filter = parse_filter(params, &settings)?;
    let totals = optional_bool(params, "includeTotals")?.unwrap_or(settings.csv_include_totals);
    let report = fee_report(&SqliteStore::new(db_conn(state)?), &filter)?;
    deliver_csv(params, report.to_csv(totals), report.rows.len())
}

fn export_payment_history(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(state)?;
    let filter = parse_filter(params, &settings)?;
    let totals = optional_bool(params, "includeTotals")?.unwrap_or(settings.csv_include_totals);
    let history = payment_history(&SqliteStore::new(db_conn(state)?), &filter)?;
    deliver_csv(params, history.to_csv(totals), history.rows.len())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let result = match req.method.as_str() {
        "reports.feeReport" => handle_fee_report(state, p),
        "reports.paymentHistory" => handle_payment_history(state, p),
        "reports.exportFeeReportCsv" => export_fee_report(state, p),
        "reports.exportPaymentHistoryCsv" => export_payment_history(state, p),
        _ => return None,
    };
    Some(respond(req, result))
}
