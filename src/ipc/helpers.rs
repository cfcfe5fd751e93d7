use std::path::PathBuf;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::StoreError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn db(code: &'static str, table: &str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

pub fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => crate::ipc::error::ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

/// Absent, null or blank all read as `None`.
pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn parse_amount(v: &Value, key: &str) -> Result<f64, HandlerErr> {
    let n = v
        .as_f64()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))?;
    if !n.is_finite() || n < 0.0 {
        return Err(HandlerErr::bad_params(format!(
            "{} must be a non-negative number",
            key
        )));
    }
    Ok(n)
}

pub fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    let Some(raw) = optional_str(params, key)? else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    let out = PathBuf::from(path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("export_failed", e.to_string()).with_details(json!({ "path": path }))
        })?;
    }
    std::fs::write(&out, contents).map_err(|e| {
        HandlerErr::new("export_failed", e.to_string()).with_details(json!({ "path": path }))
    })?;
    Ok(())
}
