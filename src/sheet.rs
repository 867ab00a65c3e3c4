use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;

use crate::markers::Markers;

/// A cell as seen through the computed-value view of a workbook.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Calendar date carried by the cell, if any. Plain numbers are not
    /// treated as serial dates.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::DateTime(dt) => Some(dt.date()),
            CellValue::Text(s) => parse_date_text(s).map(|dt| dt.date()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellWrite {
    Text(String),
    Number(f64),
}

/// Read access, 1-based rows and columns.
pub trait SheetGrid {
    fn value(&self, row: u32, col: u32) -> CellValue;
    fn max_row(&self) -> u32;
    fn max_column(&self) -> u32;
}

pub trait SheetWriter {
    fn write(&mut self, row: u32, col: u32, value: CellWrite);
}

impl<T: SheetGrid + ?Sized> SheetGrid for &mut T {
    fn value(&self, row: u32, col: u32) -> CellValue {
        (**self).value(row, col)
    }
    fn max_row(&self) -> u32 {
        (**self).max_row()
    }
    fn max_column(&self) -> u32 {
        (**self).max_column()
    }
}

impl<T: SheetWriter + ?Sized> SheetWriter for &mut T {
    fn write(&mut self, row: u32, col: u32, value: CellWrite) {
        (**self).write(row, col, value)
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

pub fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    for f in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, f) {
            return Some(dt);
        }
    }
    for f in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, f) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    DateTime::parse_from_rfc3339(t).ok().map(|dt| dt.naive_local())
}

pub fn find_header_and_date_row<S: SheetGrid + ?Sized>(
    sheet: &S,
    target: NaiveDate,
    markers: &Markers,
) -> (Option<u32>, Option<u32>) {
    let last = sheet.max_row();
    let header_row = (1..=last).find(|&row| match sheet.value(row, 1) {
        CellValue::Text(s) => s.trim().contains(markers.header_row_marker.as_str()),
        _ => false,
    });
    let Some(header_row) = header_row else {
        return (None, None);
    };

    let date_row = (header_row + 1..=last).find(|&row| {
        let v = sheet.value(row, 1);
        !v.is_empty() && v.as_date() == Some(target)
    });
    (Some(header_row), date_row)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeworkColumns {
    /// Labels in first-seen order with the column they occupy.
    pub labels: Vec<(String, u32)>,
    pub repetition_start: Option<u32>,
}

impl HomeworkColumns {
    /// Column in the repeated block that mirrors the label at `label_col`.
    pub fn assignment_column(&self, label_col: u32) -> Option<u32> {
        let start = self.repetition_start?;
        let first = self.labels.first()?.1;
        Some(start + (label_col - first))
    }
}

pub fn find_homework_columns<S: SheetGrid + ?Sized>(
    sheet: &S,
    header_row: u32,
    markers: &Markers,
) -> HomeworkColumns {
    let mut out = HomeworkColumns::default();
    let mut seen: HashSet<String> = HashSet::new();

    for col in 3..=sheet.max_column() {
        let v = sheet.value(header_row, col);
        if v.is_empty() {
            continue;
        }
        let text = v.display().trim().to_string();
        if seen.contains(&text) {
            out.repetition_start = Some(col);
            break;
        }
        if markers.is_homework_label(&text) {
            seen.insert(text.clone());
            out.labels.push((text, col));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetLayout {
    pub header_row: u32,
    pub date_row: u32,
    pub homework: HomeworkColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MissingPart {
    HeaderRow,
    DateRow,
    RepetitionBoundary,
}

impl std::fmt::Display for MissingPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MissingPart::HeaderRow => "header row",
            MissingPart::DateRow => "target date row",
            MissingPart::RepetitionBoundary => "homework type repetition",
        };
        f.write_str(s)
    }
}

pub fn locate_layout<S: SheetGrid + ?Sized>(
    sheet: &S,
    target: NaiveDate,
    markers: &Markers,
) -> Result<SheetLayout, MissingPart> {
    let (header_row, date_row) = find_header_and_date_row(sheet, target, markers);
    let header_row = header_row.ok_or(MissingPart::HeaderRow)?;
    let date_row = date_row.ok_or(MissingPart::DateRow)?;
    let homework = find_homework_columns(sheet, header_row, markers);
    if homework.repetition_start.is_none() {
        return Err(MissingPart::RepetitionBoundary);
    }
    Ok(SheetLayout {
        header_row,
        date_row,
        homework,
    })
}

/// In-memory sheet for tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct GridSheet {
    pub cells: std::collections::BTreeMap<(u32, u32), CellValue>,
}

#[cfg(test)]
impl GridSheet {
    pub fn from_rows(rows: &[&[&str]]) -> GridSheet {
        let mut g = GridSheet::default();
        for (r, row) in rows.iter().enumerate() {
            for (c, text) in row.iter().enumerate() {
                if !text.is_empty() {
                    g.set(r as u32 + 1, c as u32 + 1, CellValue::Text(text.to_string()));
                }
            }
        }
        g
    }

    pub fn set(&mut self, row: u32, col: u32, v: CellValue) {
        self.cells.insert((row, col), v);
    }
}

#[cfg(test)]
impl SheetGrid for GridSheet {
    fn value(&self, row: u32, col: u32) -> CellValue {
        self.cells.get(&(row, col)).cloned().unwrap_or(CellValue::Empty)
    }
    fn max_row(&self) -> u32 {
        self.cells.keys().map(|k| k.0).max().unwrap_or(0)
    }
    fn max_column(&self) -> u32 {
        self.cells.keys().map(|k| k.1).max().unwrap_or(0)
    }
}

#[cfg(test)]
impl SheetWriter for GridSheet {
    fn write(&mut self, row: u32, col: u32, value: CellWrite) {
        let v = match value {
            CellWrite::Text(s) => CellValue::Text(s),
            CellWrite::Number(n) => CellValue::Number(n),
        };
        self.set(row, col, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "التاريخ: السبت ١ فبراير";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    #[test]
    fn no_marker_means_no_rows() {
        let g = GridSheet::from_rows(&[&["Name"], &["2025-02-01"]]);
        assert_eq!(find_header_and_date_row(&g, d(2025, 2, 1), &Markers::default()), (None, None));
    }

    #[test]
    fn date_row_matches_text_and_native_dates() {
        let mut g = GridSheet::from_rows(&[
            &["اسم الطالب"],
            &[HEADER],
            &["2025-01-31"],
            &[""],
            &["not a date"],
        ]);
        let noon = d(2025, 2, 1).and_hms_opt(12, 30, 0).expect("time");
        g.set(6, 1, CellValue::DateTime(noon));
        g.set(7, 1, CellValue::Text("2025-02-01".into()));

        let m = Markers::default();
        assert_eq!(find_header_and_date_row(&g, d(2025, 2, 1), &m), (Some(2), Some(6)));
        assert_eq!(find_header_and_date_row(&g, d(2025, 1, 31), &m), (Some(2), Some(3)));
        assert_eq!(find_header_and_date_row(&g, d(2025, 3, 1), &m), (Some(2), None));
    }

    #[test]
    fn dates_above_header_are_ignored() {
        let g = GridSheet::from_rows(&[&["2025-02-01"], &[HEADER], &["2025-02-02"]]);
        let m = Markers::default();
        assert_eq!(find_header_and_date_row(&g, d(2025, 2, 1), &m), (Some(2), None));
    }

    #[test]
    fn numbers_are_not_dates() {
        let mut g = GridSheet::from_rows(&[&[HEADER]]);
        g.set(2, 1, CellValue::Number(45689.0));
        let m = Markers::default();
        assert_eq!(find_header_and_date_row(&g, d(2025, 2, 1), &m), (Some(1), None));
    }

    #[test]
    fn homework_columns_stop_at_repetition() {
        let g = GridSheet::from_rows(&[&["", "", "مراجعة قريبة", "حفظ", "مراجعة قريبة", "حفظ"]]);
        let cols = find_homework_columns(&g, 1, &Markers::default());
        let labels: Vec<&str> = cols.labels.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["مراجعة قريبة", "حفظ"]);
        assert_eq!(cols.repetition_start, Some(5));
        assert_eq!(cols.assignment_column(4), Some(6));
    }

    #[test]
    fn unrelated_headers_are_skipped() {
        let g = GridSheet::from_rows(&[&["", "", "ملاحظات", "حفظ", "", "ملاحظات", "حفظ"]]);
        let cols = find_homework_columns(&g, 1, &Markers::default());
        assert_eq!(cols.labels, vec![("حفظ".to_string(), 4)]);
        assert_eq!(cols.repetition_start, Some(7));
    }

    #[test]
    fn layout_reports_missing_part() {
        let m = Markers::default();
        let g = GridSheet::from_rows(&[&[HEADER, "", "حفظ"], &["2025-02-01"]]);
        assert_eq!(locate_layout(&g, d(2025, 2, 1), &m), Err(MissingPart::RepetitionBoundary));
        assert_eq!(locate_layout(&g, d(2025, 2, 2), &m), Err(MissingPart::DateRow));
        let empty = GridSheet::default();
        assert_eq!(locate_layout(&empty, d(2025, 2, 2), &m), Err(MissingPart::HeaderRow));
    }

    #[test]
    fn text_date_forms() {
        let want = d(2025, 2, 1);
        for s in [
            "2025-02-01",
            "2025/02/01",
            " 2025-02-01 08:15:00 ",
            "2025-02-01T08:15:00",
            "2025-02-01 08:15",
            "02/01/2025",
            "2025-02-01T08:15:00+03:00",
        ] {
            assert_eq!(parse_date_text(s).map(|dt| dt.date()), Some(want), "{s}");
        }
        assert_eq!(parse_date_text("السبت"), None);
    }
}
