use crate::ipc::error::{get_optional_str, get_required_str, ok, HandlerErr};
use crate::ipc::handlers::payload::record_from_params;
use crate::ipc::types::{AppState, Request};
use crate::progress::{CollectingSink, Progress};
use crate::sheet::{find_header_and_date_row, find_homework_columns, parse_date_text};
use crate::updater::{run_batch, WorkbookSheets};
use crate::workbook::{default_output_path, is_zip_file, XlsxWorkbook};
use chrono::NaiveDate;
use serde_json::json;
use std::path::{Path, PathBuf};

fn parse_target_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_date_text(raw).map(|dt| dt.date()))
        .ok_or_else(|| HandlerErr::new("bad_params", format!("unrecognised date: {raw}")))
}

fn open_workbook(path: &Path) -> Result<XlsxWorkbook, HandlerErr> {
    match is_zip_file(path) {
        Ok(true) => {}
        Ok(false) => {
            return Err(HandlerErr::new(
                "bad_workbook",
                format!("not an xlsx workbook: {}", path.to_string_lossy()),
            ))
        }
        Err(e) => return Err(HandlerErr::new("workbook_open_failed", format!("{e:#}"))),
    }
    XlsxWorkbook::open(path).map_err(|e| HandlerErr::new("workbook_open_failed", format!("{e:#}")))
}

fn handle_inspect(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(&req.params, "path")?);
    let wb = open_workbook(&path)?;
    Ok(json!({
        "path": wb.path().to_string_lossy(),
        "sheets": wb.sheets(&state.markers),
    }))
}

fn handle_locate(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(&req.params, "path")?);
    let sheet_name = get_required_str(&req.params, "sheet")?;
    let target = parse_target_date(get_required_str(&req.params, "date")?)?;

    let mut wb = open_workbook(&path)?;
    let Some(sheet) = wb.sheet_mut(sheet_name) else {
        return Err(HandlerErr::new(
            "sheet_not_found",
            format!("worksheet not found: {sheet_name}"),
        ));
    };

    let (header_row, date_row) = find_header_and_date_row(&sheet, target, &state.markers);
    let homework = header_row.map(|r| find_homework_columns(&sheet, r, &state.markers));
    let complete = date_row.is_some()
        && homework
            .as_ref()
            .map(|h| h.repetition_start.is_some())
            .unwrap_or(false);
    Ok(json!({
        "sheet": sheet_name,
        "headerRow": header_row,
        "dateRow": date_row,
        "homework": homework,
        "complete": complete,
    }))
}

fn handle_apply(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(&req.params, "path")?);
    let record = record_from_params(state, &req.params)?;

    let target = match get_optional_str(&req.params, "date") {
        Some(raw) => parse_target_date(raw)?,
        None => record.report_date().ok_or_else(|| {
            HandlerErr::new(
                "missing_date",
                "no params.date and metadata.date.raw is missing or unreadable",
            )
        })?,
    };

    let in_place = req
        .params
        .get("inPlace")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let out_path = match get_optional_str(&req.params, "outputPath") {
        Some(p) => PathBuf::from(p),
        None if in_place => path.clone(),
        None => default_output_path(&path, chrono::Local::now().naive_local()),
    };

    let mut wb = open_workbook(&path)?;
    let sink = CollectingSink::default();
    let report = {
        let progress = Progress::new(Some(&sink));
        progress.info(format!(
            "updating {} for {}",
            path.to_string_lossy(),
            target.format("%Y-%m-%d")
        ));
        let report = run_batch(&mut wb, &record, target, &state.markers, progress);
        if let Err(e) = wb.save(&out_path) {
            progress.error(format!("save failed: {e:#}"));
            return Err(HandlerErr::new("save_failed", format!("{e:#}"))
                .with_details(json!({ "log": sink.into_entries() })));
        }
        progress.info(format!("saved {}", out_path.to_string_lossy()));
        report
    };

    let reasons: serde_json::Map<String, serde_json::Value> = report
        .results
        .iter()
        .filter_map(|(name, r)| r.error().map(|e| (name.clone(), json!(e.to_string()))))
        .collect();
    let summary = json!({
        "succeeded": report.succeeded(),
        "failed": report.failed_students().len(),
        "failedStudents": report.failed_students(),
        "reasons": reasons,
        "partial": report.is_partial(),
    });
    Ok(json!({
        "results": report.results,
        "summary": summary,
        "targetDate": target.format("%Y-%m-%d").to_string(),
        "savedPath": out_path.to_string_lossy(),
        "log": sink.into_entries(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "workbook.inspect" => handle_inspect(state, req),
        "workbook.locate" => handle_locate(state, req),
        "workbook.apply" => handle_apply(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            tracing::warn!(method = %req.method, code = e.code, "{}", e.message);
            e.response(&req.id)
        }
    })
}
