use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::sheet::parse_date_text;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("decoded payload is not a JSON object")]
    NotAnObject,
    #[error("invalid record: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// One day's report as exported by the mobile app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedRecord {
    #[serde(default)]
    pub metadata: Metadata,
    pub attendance: BTreeMap<String, AttendanceEntry>,
    #[serde(default)]
    pub homework: Homework,
    #[serde(default)]
    pub previous_homework: BTreeMap<String, BTreeMap<String, GradeValue>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<ReportDate>,
    #[serde(
        rename = "header_class_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub header_class_name: Option<String>,
    #[serde(rename = "header_date", default, skip_serializing_if = "Option::is_none")]
    pub header_date: Option<String>,
    /// schoolName, className and anything else the exporter adds.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDate {
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    #[serde(default)]
    pub present: bool,
    #[serde(
        default,
        deserialize_with = "blank_late_is_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub late_minutes: Option<LateMinutes>,
}

/// Minutes late as sent by the exporter: a number, a numeric string, or a
/// label such as `أكثر` for more than an hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LateMinutes {
    Minutes(f64),
    Text(String),
    Other(serde_json::Value),
}

impl LateMinutes {
    fn is_blank(&self) -> bool {
        match self {
            LateMinutes::Text(s) => s.trim().is_empty(),
            LateMinutes::Other(v) => v.is_null(),
            LateMinutes::Minutes(_) => false,
        }
    }

    pub fn is_late(&self) -> bool {
        match self {
            LateMinutes::Minutes(m) => *m > 0.0,
            LateMinutes::Text(s) => match s.trim().parse::<f64>() {
                Ok(m) => m > 0.0,
                Err(_) => !s.trim().is_empty(),
            },
            LateMinutes::Other(_) => false,
        }
    }
}

fn blank_late_is_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<LateMinutes>, D::Error> {
    let v = Option::<LateMinutes>::deserialize(d)?;
    Ok(v.filter(|m| !m.is_blank()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Homework {
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    /// `None` or empty means the assignment applies to every student.
    #[serde(default)]
    pub assigned_students: Option<Vec<String>>,
}

impl Assignment {
    pub fn applies_to(&self, student: &str) -> bool {
        match &self.assigned_students {
            None => true,
            Some(names) => names.is_empty() || names.iter().any(|n| n == student),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GradeValue {
    Number(f64),
    Text(String),
    Empty,
    /// Booleans, arrays and objects; reported as a format error when written.
    Other(serde_json::Value),
}

impl GradeValue {
    /// `Ok(None)` when there is nothing to write, `Err` carries the raw text
    /// that failed to coerce.
    pub fn as_number(&self) -> Result<Option<f64>, String> {
        match self {
            GradeValue::Number(n) if n.is_finite() => Ok(Some(*n)),
            GradeValue::Number(n) => Err(n.to_string()),
            GradeValue::Empty => Ok(None),
            GradeValue::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return Ok(None);
                }
                match t.parse::<f64>() {
                    Ok(v) if v.is_finite() => Ok(Some(v)),
                    _ => Err(s.clone()),
                }
            }
            GradeValue::Other(v) => Err(v.to_string()),
        }
    }
}

impl DecodedRecord {
    pub fn from_value(value: serde_json::Value) -> Result<DecodedRecord, RecordError> {
        if !value.is_object() {
            return Err(RecordError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The report day, taken from `metadata.date.raw`.
    pub fn report_date(&self) -> Option<NaiveDate> {
        let raw = self.metadata.date.as_ref()?.raw.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_date_text(raw).map(|dt: NaiveDateTime| dt.date()))
    }

    pub fn grade_for(&self, label: &str, student: &str) -> Option<&GradeValue> {
        self.previous_homework.get(label)?.get(student)
    }

    pub fn assignment_for(&self, label: &str, student: &str) -> Option<&Assignment> {
        self.homework
            .assignments
            .iter()
            .find(|a| a.kind == label && a.applies_to(student))
    }

    pub fn summary(&self) -> RecordSummary {
        let present = self.attendance.values().filter(|a| a.present).count();
        let late = self
            .attendance
            .values()
            .filter(|a| {
                a.present && a.late_minutes.as_ref().map(LateMinutes::is_late).unwrap_or(false)
            })
            .count();
        let mut homework_types: Vec<String> = Vec::new();
        for a in &self.homework.assignments {
            if !homework_types.contains(&a.kind) {
                homework_types.push(a.kind.clone());
            }
        }
        RecordSummary {
            students: self.attendance.len(),
            present,
            absent: self.attendance.len() - present,
            late,
            assignments: self.homework.assignments.len(),
            homework_types,
            graded_types: self.previous_homework.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub students: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub assignments: usize,
    pub homework_types: Vec<String>,
    pub graded_types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "metadata": {
                "schoolName": "Al Noor",
                "className": "الفوج الثاني",
                "date": { "raw": "2025-01-29", "formatted": "الأربعاء" }
            },
            "attendance": {
                "Ali": { "present": true, "lateMinutes": 5 },
                "Omar": { "present": false }
            },
            "homework": {
                "assignments": [
                    { "type": "حفظ", "content": "Surah 1", "assignedStudents": null },
                    { "type": "مراجعة قريبة", "content": "p. 3", "assignedStudents": ["Omar"] }
                ]
            },
            "previousHomework": {
                "حفظ": { "Ali": "9", "Omar": "" }
            }
        })
    }

    #[test]
    fn typed_record_keeps_unknown_metadata() {
        let rec = DecodedRecord::from_value(sample()).expect("record");
        assert_eq!(rec.metadata.extra.get("schoolName"), Some(&json!("Al Noor")));
        assert_eq!(rec.report_date(), NaiveDate::from_ymd_opt(2025, 1, 29));

        let back = serde_json::to_value(&rec).expect("serialize");
        let again = DecodedRecord::from_value(back).expect("record again");
        assert_eq!(rec, again);
    }

    #[test]
    fn missing_attendance_is_rejected() {
        let err = DecodedRecord::from_value(json!({ "metadata": {} })).unwrap_err();
        assert!(matches!(err, RecordError::Invalid(_)));
        assert!(matches!(
            DecodedRecord::from_value(json!("plain")),
            Err(RecordError::NotAnObject)
        ));
    }

    #[test]
    fn assignment_targeting() {
        let rec = DecodedRecord::from_value(sample()).expect("record");
        assert_eq!(rec.assignment_for("حفظ", "Ali").map(|a| a.content.as_str()), Some("Surah 1"));
        assert!(rec.assignment_for("مراجعة قريبة", "Ali").is_none());
        assert!(rec.assignment_for("مراجعة قريبة", "Omar").is_some());
    }

    #[test]
    fn grade_coercion() {
        assert_eq!(GradeValue::Text(" 7.5 ".into()).as_number(), Ok(Some(7.5)));
        assert_eq!(GradeValue::Text("".into()).as_number(), Ok(None));
        assert_eq!(GradeValue::Empty.as_number(), Ok(None));
        assert_eq!(GradeValue::Number(0.0).as_number(), Ok(Some(0.0)));
        assert_eq!(GradeValue::Text("ممتاز".into()).as_number(), Err("ممتاز".to_string()));
    }

    fn late_of(late: serde_json::Value) -> Option<LateMinutes> {
        let rec = DecodedRecord::from_value(json!({
            "attendance": { "Ali": { "present": true, "lateMinutes": late } }
        }))
        .expect("record");
        rec.attendance["Ali"].late_minutes.clone()
    }

    #[test]
    fn exporter_late_minutes_forms_are_accepted() {
        assert_eq!(late_of(json!("")), None);
        assert_eq!(late_of(json!(null)), None);
        assert_eq!(late_of(json!(15)), Some(LateMinutes::Minutes(15.0)));
        assert_eq!(late_of(json!("أكثر")), Some(LateMinutes::Text("أكثر".into())));
        assert!(LateMinutes::Text("أكثر".into()).is_late());
        assert!(LateMinutes::Text("10".into()).is_late());
        assert!(!LateMinutes::Minutes(0.0).is_late());
    }

    #[test]
    fn odd_grade_types_do_not_reject_the_record() {
        let rec = DecodedRecord::from_value(json!({
            "attendance": { "Ali": { "present": true, "lateMinutes": "" } },
            "previousHomework": { "حفظ": { "Ali": true }, "مراجعة قريبة": { "Ali": { "n": 1 } } }
        }))
        .expect("record");
        assert_eq!(
            rec.grade_for("حفظ", "Ali").map(GradeValue::as_number),
            Some(Err("true".to_string()))
        );
        assert!(rec
            .grade_for("مراجعة قريبة", "Ali")
            .map(|g| g.as_number().is_err())
            .unwrap_or(false));
    }

    #[test]
    fn summary_counts_text_lateness() {
        let rec = DecodedRecord::from_value(json!({
            "attendance": {
                "Ali": { "present": true, "lateMinutes": "أكثر" },
                "Omar": { "present": true, "lateMinutes": "" },
                "Sara": { "present": false, "lateMinutes": "" }
            }
        }))
        .expect("record");
        let s = rec.summary();
        assert_eq!((s.present, s.absent, s.late), (2, 1, 1));
    }

    #[test]
    fn summary_counts() {
        let rec = DecodedRecord::from_value(sample()).expect("record");
        let s = rec.summary();
        assert_eq!((s.students, s.present, s.absent, s.late), (2, 1, 1, 1));
        assert_eq!(s.assignments, 2);
        assert_eq!(s.homework_types, vec!["حفظ".to_string(), "مراجعة قريبة".to_string()]);
    }
}
