use chrono::NaiveDate;
use serde::ser::SerializeStruct;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::markers::Markers;
use crate::progress::Progress;
use crate::record::DecodedRecord;
use crate::sheet::{locate_layout, CellWrite, MissingPart, SheetGrid, SheetLayout, SheetWriter};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateError {
    #[error("worksheet not found for student: {0}")]
    SheetNotFound(String),
    #[error("could not find {0}")]
    LayoutNotFound(MissingPart),
    #[error("grade {value:?} for {label} is not a number")]
    GradeFormat { label: String, value: String },
}

impl UpdateError {
    pub fn code(&self) -> &'static str {
        match self {
            UpdateError::SheetNotFound(_) => "sheet_not_found",
            UpdateError::LayoutNotFound(_) => "layout_not_found",
            UpdateError::GradeFormat { .. } => "grade_format",
        }
    }
}

impl Serialize for UpdateError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("UpdateError", 2)?;
        s.serialize_field("code", self.code())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub success: bool,
    pub errors: Vec<UpdateError>,
    pub cells_written: usize,
}

impl UpdateResult {
    fn failed(e: UpdateError) -> Self {
        UpdateResult {
            success: false,
            errors: vec![e],
            cells_written: 0,
        }
    }

    pub fn error(&self) -> Option<&UpdateError> {
        self.errors.first()
    }
}

/// Writes one student's attendance, previous grades and new assignments
/// into the date row. Missing data skips a step; bad grades are recorded
/// and the remaining fields are still written.
pub fn apply_update<S: SheetWriter + ?Sized>(
    sheet: &mut S,
    layout: &SheetLayout,
    student: &str,
    record: &DecodedRecord,
    markers: &Markers,
) -> UpdateResult {
    let row = layout.date_row;
    let mut result = UpdateResult::default();

    if let Some(att) = record.attendance.get(student) {
        let token = markers.attendance_token(att.present).to_string();
        sheet.write(row, 2, CellWrite::Text(token));
        result.cells_written += 1;
    }

    for (label, col) in &layout.homework.labels {
        let Some(grade) = record.grade_for(label, student) else {
            continue;
        };
        match grade.as_number() {
            Ok(Some(n)) => {
                sheet.write(row, *col, CellWrite::Number(n));
                result.cells_written += 1;
            }
            Ok(None) => {}
            Err(value) => result.errors.push(UpdateError::GradeFormat {
                label: label.clone(),
                value,
            }),
        }
    }

    for (label, col) in &layout.homework.labels {
        let Some(target) = layout.homework.assignment_column(*col) else {
            continue;
        };
        let content = record
            .assignment_for(label, student)
            .map(|a| a.content.clone())
            .unwrap_or_default();
        sheet.write(row, target, CellWrite::Text(content));
        result.cells_written += 1;
    }

    result.success = result.errors.is_empty();
    result
}

/// Workbook access needed by a batch run.
pub trait WorkbookSheets {
    type Sheet<'a>: SheetGrid + SheetWriter
    where
        Self: 'a;

    fn sheet_names(&self) -> Vec<String>;
    fn sheet_mut(&mut self, name: &str) -> Option<Self::Sheet<'_>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: BTreeMap<String, UpdateResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.success).count()
    }

    pub fn failed_students(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_students().is_empty()
    }
}

pub fn run_batch<W: WorkbookSheets + ?Sized>(
    workbook: &mut W,
    record: &DecodedRecord,
    target: NaiveDate,
    markers: &Markers,
    progress: Progress<'_>,
) -> BatchReport {
    let names = workbook.sheet_names();

    let missing: Vec<&str> = record
        .attendance
        .keys()
        .filter(|s| !names.iter().any(|n| n == *s))
        .map(|s| s.as_str())
        .collect();
    if !missing.is_empty() {
        progress.warning(format!(
            "expected student sheets not found: {}",
            missing.join(", ")
        ));
    }
    let extra: Vec<&str> = names
        .iter()
        .filter(|n| !markers.is_meta_sheet(n) && !record.attendance.contains_key(n.as_str()))
        .map(|n| n.as_str())
        .collect();
    if !extra.is_empty() {
        progress.info(format!("student sheets without attendance: {}", extra.join(", ")));
    }

    let mut report = BatchReport::default();
    for student in record.attendance.keys() {
        let result = match workbook.sheet_mut(student) {
            None => UpdateResult::failed(UpdateError::SheetNotFound(student.clone())),
            Some(mut sheet) => match locate_layout(&sheet, target, markers) {
                Err(part) => UpdateResult::failed(UpdateError::LayoutNotFound(part)),
                Ok(layout) => {
                    progress.debug(format!(
                        "{student}: header row {}, date row {}, repetition at column {:?}",
                        layout.header_row, layout.date_row, layout.homework.repetition_start
                    ));
                    apply_update(&mut sheet, &layout, student, record, markers)
                }
            },
        };

        if result.success {
            progress.info(format!("updated sheet for {student}"));
        } else {
            let reasons: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            progress.error(format!("{student}: {}", reasons.join("; ")));
        }
        report.results.insert(student.clone(), result);
    }

    progress.info(format!(
        "{} of {} students updated",
        report.succeeded(),
        report.results.len()
    ));
    report
}
