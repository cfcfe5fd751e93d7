use tracing::debug;

use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::catalog::try_handle,
    handlers::students::try_handle,
    handlers::fee_structures::try_handle,
    handlers::fees::try_handle,
    handlers::reports::try_handle,
    handlers::collections::try_handle,
    handlers::registry::try_handle,
    handlers::setup::try_handle,
    handlers::archive::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    debug!(id = %req.id, method = %req.method, "dispatch");
    for handle in HANDLERS {
        if let Some(resp) = handle(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
