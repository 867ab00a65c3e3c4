use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming an optional JSON marker file read at startup.
pub const MARKERS_ENV: &str = "REPORTD_MARKERS";

/// Literal strings the exporter app and the workbook templates use.
///
/// Every field has a default matching the Arabic templates in use today; a
/// JSON file only needs to list the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Markers {
    pub header_keys: HeaderKeys,
    /// Line separating the readable header from the encoded body.
    pub header_delimiter: String,
    /// Substring identifying the header row in column A of a student sheet.
    pub header_row_marker: String,
    pub homework_categories: Vec<String>,
    pub attendance: AttendanceTokens,
    /// Sheets whose name contains one of these are never student sheets.
    pub meta_sheet_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeaderKeys {
    pub class_name: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceTokens {
    pub present: String,
    pub absent: String,
}

impl Default for Markers {
    fn default() -> Self {
        Markers {
            header_keys: HeaderKeys::default(),
            header_delimiter: "---".to_string(),
            header_row_marker: "التاريخ: السبت".to_string(),
            homework_categories: vec![
                "مراجعة بعيدة".to_string(),
                "مراجعة قريبة".to_string(),
                "حفظ".to_string(),
            ],
            attendance: AttendanceTokens::default(),
            meta_sheet_patterns: vec!["Tabelle".to_string(), "الطالب".to_string()],
        }
    }
}

impl Default for HeaderKeys {
    fn default() -> Self {
        HeaderKeys {
            class_name: "فصل".to_string(),
            date: "التاريخ".to_string(),
        }
    }
}

impl Default for AttendanceTokens {
    fn default() -> Self {
        AttendanceTokens {
            present: "حاضر".to_string(),
            absent: "غائب".to_string(),
        }
    }
}

impl Markers {
    pub fn load(path: &Path) -> anyhow::Result<Markers> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read marker file {}", path.to_string_lossy()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid marker file {}", path.to_string_lossy()))
    }

    pub fn is_meta_sheet(&self, name: &str) -> bool {
        self.meta_sheet_patterns
            .iter()
            .any(|p| !p.is_empty() && name.contains(p.as_str()))
    }

    pub fn is_homework_label(&self, text: &str) -> bool {
        self.homework_categories
            .iter()
            .any(|c| !c.is_empty() && text.contains(c.as_str()))
    }

    pub fn attendance_token(&self, present: bool) -> &str {
        if present {
            &self.attendance.present
        } else {
            &self.attendance.absent
        }
    }
}
