use crate::codec::{self, Framing, LinkPayload, PayloadHeader};
use crate::ipc::error::{get_required_str, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::record::DecodedRecord;
use serde_json::json;

/// Builds the record for a request from `params.text` (clipboard export) or
/// `params.record` (already decoded JSON).
pub fn record_from_params(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<DecodedRecord, HandlerErr> {
    let value = if let Some(text) = params.get("text").and_then(|v| v.as_str()) {
        codec::decode(text, &state.markers)
            .map_err(|e| HandlerErr::new("decode_failed", e.to_string()))?
    } else if let Some(v) = params.get("record") {
        v.clone()
    } else {
        return Err(HandlerErr::new(
            "bad_params",
            "missing params.text or params.record",
        ));
    };
    DecodedRecord::from_value(value).map_err(|e| HandlerErr::new("invalid_record", e.to_string()))
}

fn handle_decode(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    get_required_str(&req.params, "text")?;
    let record = record_from_params(state, &req.params)?;
    let summary = record.summary();
    tracing::info!(
        students = summary.students,
        present = summary.present,
        assignments = summary.assignments,
        "payload decoded"
    );
    let header = json!({
        "className": record.metadata.header_class_name,
        "date": record.metadata.header_date,
    });
    let record_json = serde_json::to_value(&record)
        .map_err(|e| HandlerErr::new("invalid_record", e.to_string()))?;
    Ok(json!({
        "record": record_json,
        "header": header,
        "summary": summary,
        "reportDate": record.report_date().map(|d| d.format("%Y-%m-%d").to_string()),
    }))
}

fn handle_decode_link(_state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let text = get_required_str(&req.params, "text")?;
    Ok(match codec::decode_link(text) {
        Some(LinkPayload::Json(v)) => json!({ "kind": "json", "value": v }),
        Some(LinkPayload::Text(s)) => json!({ "kind": "text", "value": s }),
        None => json!({ "kind": "none", "value": null }),
    })
}

fn handle_encode(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(record) = req.params.get("record") else {
        return Err(HandlerErr::new("bad_params", "missing params.record"));
    };
    let framing: Framing = match req.params.get("framing") {
        None | Some(serde_json::Value::Null) => Framing::default(),
        Some(v) => serde_json::from_value(v.clone()).map_err(|_| {
            HandlerErr::new("bad_params", "framing must be \"standard\" or \"urlSafe\"")
        })?,
    };
    let header: Option<PayloadHeader> = match req.params.get("header") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|e| HandlerErr::new("bad_params", format!("invalid header: {e}")))?,
        ),
    };

    let text = match header {
        Some(h) if framing == Framing::UrlSafe => {
            return Err(HandlerErr::new("bad_params", "header requires standard framing")
                .with_details(json!({ "header": h })));
        }
        Some(h) => codec::encode_with_header(record, &h, &state.markers),
        None => codec::encode(record, framing),
    }
    .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;

    Ok(json!({ "text": text, "length": text.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "payload.decode" => handle_decode(state, req),
        "payload.decodeLink" => handle_decode_link(state, req),
        "payload.encode" => handle_encode(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
