use anyhow::{anyhow, Context};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use umya_spreadsheet::{Spreadsheet, Worksheet};

use crate::markers::Markers;
use crate::sheet::{CellValue, CellWrite, SheetGrid, SheetWriter};
use crate::updater::WorkbookSheets;

/// An `.xlsx` file opened twice: calamine for cached values (what Excel last
/// computed) and umya for the formula-preserving copy that gets saved.
pub struct XlsxWorkbook {
    path: PathBuf,
    values: BTreeMap<String, Range<Data>>,
    book: Spreadsheet,
}

pub struct XlsxSheet<'a> {
    values: Option<&'a Range<Data>>,
    sheet: &'a mut Worksheet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetKind {
    Student,
    Meta,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetInfo {
    pub name: String,
    pub kind: SheetKind,
}

impl XlsxWorkbook {
    pub fn open(path: &Path) -> anyhow::Result<XlsxWorkbook> {
        if !is_zip_file(path)? {
            return Err(anyhow!(
                "not an xlsx workbook: {}",
                path.to_string_lossy()
            ));
        }

        let book = umya_spreadsheet::reader::xlsx::read(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("failed to read workbook {}", path.to_string_lossy()))?;

        let mut xlsx: Xlsx<_> = open_workbook(path)
            .with_context(|| format!("failed to open workbook {}", path.to_string_lossy()))?;
        let mut values = BTreeMap::new();
        for name in xlsx.sheet_names() {
            match xlsx.worksheet_range(&name) {
                Ok(range) => {
                    values.insert(name, range);
                }
                Err(e) => tracing::warn!(sheet = %name, "cached values unavailable: {e}"),
            }
        }

        tracing::debug!(
            path = %path.to_string_lossy(),
            sheets = values.len(),
            "workbook opened"
        );
        Ok(XlsxWorkbook {
            path: path.to_path_buf(),
            values,
            book,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheets(&self, markers: &Markers) -> Vec<SheetInfo> {
        self.sheet_names()
            .into_iter()
            .map(|name| {
                let kind = if markers.is_meta_sheet(&name) {
                    SheetKind::Meta
                } else {
                    SheetKind::Student
                };
                SheetInfo { name, kind }
            })
            .collect()
    }

    pub fn save(&self, out_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = out_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory {}", parent.to_string_lossy())
                })?;
            }
        }
        umya_spreadsheet::writer::xlsx::write(&self.book, out_path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("failed to write workbook {}", out_path.to_string_lossy()))?;
        tracing::info!(path = %out_path.to_string_lossy(), "workbook saved");
        Ok(())
    }
}

impl WorkbookSheets for XlsxWorkbook {
    type Sheet<'a> = XlsxSheet<'a>;

    fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|s| s.get_name().to_string())
            .collect()
    }

    fn sheet_mut(&mut self, name: &str) -> Option<XlsxSheet<'_>> {
        let values = self.values.get(name);
        let sheet = self.book.get_sheet_by_name_mut(name)?;
        Some(XlsxSheet { values, sheet })
    }
}

impl XlsxSheet<'_> {
    fn cached(&self, row: u32, col: u32) -> Option<CellValue> {
        let data = self.values?.get_value((row - 1, col - 1))?;
        let v = match data {
            Data::Empty => return None,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(ndt) => CellValue::DateTime(ndt),
                None => CellValue::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(_) => return None,
        };
        Some(v)
    }
}

impl SheetGrid for XlsxSheet<'_> {
    fn value(&self, row: u32, col: u32) -> CellValue {
        if row == 0 || col == 0 {
            return CellValue::Empty;
        }
        if let Some(v) = self.cached(row, col) {
            return v;
        }
        // Cells calamine did not report; formulas without a cached result
        // stay empty.
        match self.sheet.get_cell((col, row)) {
            Some(cell) if cell.get_formula().is_empty() => {
                let raw = cell.get_value();
                if raw.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(raw.to_string())
                }
            }
            _ => CellValue::Empty,
        }
    }

    fn max_row(&self) -> u32 {
        let cached = self
            .values
            .and_then(|r| r.end())
            .map(|(r, _)| r + 1)
            .unwrap_or(0);
        cached.max(self.sheet.get_highest_row())
    }

    fn max_column(&self) -> u32 {
        let cached = self
            .values
            .and_then(|r| r.end())
            .map(|(_, c)| c + 1)
            .unwrap_or(0);
        cached.max(self.sheet.get_highest_column())
    }
}

impl SheetWriter for XlsxSheet<'_> {
    fn write(&mut self, row: u32, col: u32, value: CellWrite) {
        let cell = self.sheet.get_cell_mut((col, row));
        match value {
            CellWrite::Text(s) => {
                cell.set_value_string(s);
            }
            CellWrite::Number(n) => {
                cell.set_value_number(n);
            }
        }
    }
}

/// `<stem>_updated_<YYYYmmdd_HHMMSS>.xlsx` next to the input.
pub fn default_output_path(input: &Path, now: chrono::NaiveDateTime) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "workbook".to_string());
    let name = format!("{}_updated_{}.xlsx", stem, now.format("%Y%m%d_%H%M%S"));
    match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

pub fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
