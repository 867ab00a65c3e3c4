mod codec;
mod ipc;
mod markers;
mod progress;
mod record;
mod sheet;
mod updater;
mod workbook;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use markers::{Markers, MARKERS_ENV};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries responses; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn initial_markers() -> Markers {
    let Some(raw) = std::env::var_os(MARKERS_ENV) else {
        return Markers::default();
    };
    let path = PathBuf::from(raw);
    match Markers::load(&path) {
        Ok(m) => {
            tracing::info!(path = %path.to_string_lossy(), "marker table loaded");
            m
        }
        Err(e) => {
            tracing::warn!("{e:#}; using built-in markers");
            Markers::default()
        }
    }
}

fn main() {
    init_tracing();

    let mut state = ipc::AppState {
        markers: initial_markers(),
    };
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "reportd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{resp}");
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
