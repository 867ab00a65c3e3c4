#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const HEADER_MARKER: &str = "التاريخ: السبت";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with_env(&[])
}

pub fn spawn_sidecar_with_env(env: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_reportd");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn reportd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Returns the error code of a failed request.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Workbook with one student sheet (`Ali`), a `Tabelle1` meta sheet and a
/// formula in G4 that sums the first two homework columns.
pub fn write_student_workbook(path: &Path) {
    let mut book = umya_spreadsheet::new_file();
    {
        let sheet = book.get_sheet_mut(&0).expect("first sheet");
        sheet.set_name("Ali");
        sheet.get_cell_mut("A1").set_value_string("كشف المتابعة");
        sheet.get_cell_mut("A2").set_value_string(HEADER_MARKER);
        sheet.get_cell_mut("B2").set_value_string("الحضور");
        sheet.get_cell_mut("C2").set_value_string("مراجعة قريبة");
        sheet.get_cell_mut("D2").set_value_string("حفظ");
        sheet.get_cell_mut("E2").set_value_string("مراجعة قريبة");
        sheet.get_cell_mut("F2").set_value_string("حفظ");
        sheet.get_cell_mut("G2").set_value_string("المجموع");
        sheet.get_cell_mut("A3").set_value_string("2025-01-31");
        sheet.get_cell_mut("A4").set_value_string("2025-02-01");
        sheet.get_cell_mut("G4").set_formula("C4+D4");
        sheet.get_cell_mut("A5").set_value_string("2025-02-02");
    }
    {
        let meta = book.new_sheet("Tabelle1").expect("meta sheet");
        meta.get_cell_mut("A1").set_value_string("الطلاب");
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("write fixture workbook");
}

/// Same layout as `write_student_workbook`, with column A holding
/// date-formatted serial numbers instead of text.
pub fn write_native_date_workbook(path: &Path) {
    write_student_workbook(path);
    let mut book = umya_spreadsheet::reader::xlsx::read(path).expect("read fixture");
    {
        let sheet = book.get_sheet_by_name_mut("Ali").expect("Ali sheet");
        for (coord, serial) in [("A3", 45688.0), ("A4", 45689.0), ("A5", 45690.0)] {
            sheet.get_cell_mut(coord).set_value_number(serial);
            sheet
                .get_style_mut(coord)
                .get_number_format_mut()
                .set_format_code("yyyy-mm-dd");
        }
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).expect("rewrite fixture");
}

pub fn cell_text(path: &Path, sheet: &str, col: u32, row: u32) -> String {
    let book = umya_spreadsheet::reader::xlsx::read(path).expect("read workbook");
    let ws = book.get_sheet_by_name(sheet).expect("sheet exists");
    ws.get_value((col, row))
}

pub fn cell_formula(path: &Path, sheet: &str, col: u32, row: u32) -> String {
    let book = umya_spreadsheet::reader::xlsx::read(path).expect("read workbook");
    let ws = book.get_sheet_by_name(sheet).expect("sheet exists");
    ws.get_cell((col, row))
        .map(|c| c.get_formula().to_string())
        .unwrap_or_default()
}

pub fn sample_record() -> serde_json::Value {
    json!({
        "metadata": {
            "schoolName": "Al Noor",
            "className": "الفوج الثاني",
            "date": { "raw": "2025-02-01", "formatted": "السبت ١ فبراير" }
        },
        "attendance": {
            "Ali": { "present": true, "lateMinutes": "أكثر" },
            "Omar": { "present": false, "lateMinutes": "" }
        },
        "homework": { "assignments": [
            { "type": "حفظ", "content": "الملك ١-١٠", "assignedStudents": [] }
        ]},
        "previousHomework": {
            "حفظ": { "Ali": "9", "Omar": "" },
            "مراجعة قريبة": { "Ali": 8 }
        }
    })
}
