use serde_json::{Map, Value};

use crate::ipc::helpers::{db_conn, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::settings::{self, SetupSection, UpdateError};

fn handle_setup_get(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let v = settings::load_section(conn, section)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        out.insert(section.name().to_string(), v);
    }
    Ok(Value::Object(out))
}

fn handle_setup_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let section_raw = params
        .get("section")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing section"))?;
    let section = SetupSection::parse(section_raw)
        .ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    match settings::update_section(conn, section, patch) {
        Ok(current) => Ok(serde_json::json!({ "ok": true, section.name(): current })),
        Err(UpdateError::Invalid(msg)) => Err(HandlerErr::bad_params(msg)),
        Err(UpdateError::Storage(e)) => Err(HandlerErr::new("db_update_failed", e.to_string())),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "setup.get" => handle_setup_get(state),
        "setup.update" => handle_setup_update(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
