use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::markers::Markers;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "homeworkCategories": state.markers.homework_categories,
            "headerRowMarker": state.markers.header_row_marker,
        }),
    )
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match serde_json::to_value(&state.markers) {
        Ok(v) => ok(&req.id, json!({ "markers": v })),
        Err(e) => err(&req.id, "config_load_failed", e.to_string(), None),
    }
}

fn handle_config_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match Markers::load(&path) {
        Ok(m) => {
            state.markers = m;
            tracing::info!(path = %path.to_string_lossy(), "marker table loaded");
            ok(&req.id, json!({ "path": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "config_load_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "config.get" => Some(handle_config_get(state, req)),
        "config.load" => Some(handle_config_load(state, req)),
        _ => None,
    }
}
