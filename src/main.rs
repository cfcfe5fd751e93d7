mod db;
mod fees;
mod ipc;
mod model;
mod settings;
mod store;

use std::io::{self, BufRead, Write};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "feedeskd starting");

    let mut state = ipc::AppState::default();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // No id to echo back.
            Err(e) => serde_json::json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, exiting");
}
