use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::scheme::{Criterion, GradingScheme, SubjectScheme};

/// Canonical stored/wire form of an absent mark.
pub const ABSENT_MARK: &str = "A";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarkValue {
    Empty,
    Absent,
    Scored(f64),
}

impl MarkValue {
    pub fn contribution(&self) -> f64 {
        match self {
            MarkValue::Scored(v) => *v,
            MarkValue::Empty | MarkValue::Absent => 0.0,
        }
    }

    /// Lenient reading of a previously stored cell. Returns `None` for
    /// values that are neither a number, blank, nor the absent marker.
    pub fn from_stored(v: &serde_json::Value, absent_token: &str) -> Option<MarkValue> {
        match v {
            serde_json::Value::Null => Some(MarkValue::Empty),
            serde_json::Value::Number(n) => n.as_f64().map(MarkValue::Scored),
            serde_json::Value::String(s) => {
                let t = s.trim();
                if t.is_empty() {
                    Some(MarkValue::Empty)
                } else if t.eq_ignore_ascii_case(absent_token) || t.eq_ignore_ascii_case(ABSENT_MARK)
                {
                    Some(MarkValue::Absent)
                } else {
                    t.parse::<f64>()
                        .ok()
                        .filter(|n| n.is_finite())
                        .map(MarkValue::Scored)
                }
            }
            _ => None,
        }
    }
}

impl Serialize for MarkValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MarkValue::Empty => serializer.serialize_str(""),
            MarkValue::Absent => serializer.serialize_str(ABSENT_MARK),
            MarkValue::Scored(v) => serializer.serialize_f64(*v),
        }
    }
}

struct MarkValueVisitor;

impl<'de> Visitor<'de> for MarkValueVisitor {
    type Value = MarkValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number, an empty string, or the absent marker")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<MarkValue, E> {
        Ok(MarkValue::Scored(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<MarkValue, E> {
        Ok(MarkValue::Scored(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<MarkValue, E> {
        Ok(MarkValue::Scored(v as f64))
    }

    fn visit_unit<E: de::Error>(self) -> Result<MarkValue, E> {
        Ok(MarkValue::Empty)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<MarkValue, E> {
        MarkValue::from_stored(&serde_json::Value::String(v.to_string()), ABSENT_MARK)
            .ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for MarkValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MarkValueVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkVector {
    pub raw: Vec<MarkValue>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub gpa: String,
}

impl MarkVector {
    pub fn blank(criteria: usize) -> Self {
        Self {
            raw: vec![MarkValue::Empty; criteria],
            subtotal: 0.0,
            grade: String::new(),
            gpa: String::new(),
        }
    }

    fn fit_to(&mut self, criteria: usize) {
        self.raw.resize(criteria, MarkValue::Empty);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub serial_number: u32,
    pub student_name: String,
    pub pen_number: String,
    pub section: String,
    #[serde(default)]
    pub school: String,
    pub subject_marks: BTreeMap<String, MarkVector>,
    pub grand_total: f64,
    pub overall_grade: String,
    pub gpa: String,
    pub percentage: String,
}

impl StudentRecord {
    /// A record with blank marks for every subject of `scheme`, derived
    /// fields already consistent.
    pub fn blank(
        serial_number: u32,
        student_name: impl Into<String>,
        pen_number: impl Into<String>,
        section: impl Into<String>,
        school: impl Into<String>,
        scheme: &GradingScheme,
    ) -> Self {
        let mut record = StudentRecord {
            serial_number,
            student_name: student_name.into(),
            pen_number: pen_number.into(),
            section: section.into(),
            school: school.into(),
            subject_marks: BTreeMap::new(),
            grand_total: 0.0,
            overall_grade: String::new(),
            gpa: String::new(),
            percentage: String::new(),
        };
        recompute(&mut record, scheme);
        record
    }

    pub fn marks(&self, subject: &str) -> Option<&MarkVector> {
        self.subject_marks.get(subject)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown subject: {subject}")]
    UnknownSubject { subject: String },
    #[error("criterion {index} is out of range for {subject} ({len} criteria)")]
    UnknownCriterion {
        subject: String,
        index: usize,
        len: usize,
    },
    #[error("'{input}' is not a valid mark for {criterion}")]
    BadFormat { criterion: String, input: String },
    #[error("enter the marks according to limit: maximum allowed for {criterion} is {max}")]
    OutOfRange { criterion: String, max: f64 },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::UnknownSubject { .. } => "unknown_subject",
            ValidationError::UnknownCriterion { .. } => "unknown_criterion",
            ValidationError::BadFormat { .. } => "bad_format",
            ValidationError::OutOfRange { .. } => "out_of_range",
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            ValidationError::UnknownSubject { subject } => json!({ "subject": subject }),
            ValidationError::UnknownCriterion {
                subject,
                index,
                len,
            } => json!({ "subject": subject, "criterion": index, "criteriaCount": len }),
            ValidationError::BadFormat { criterion, input } => {
                json!({ "criterion": criterion, "input": input })
            }
            ValidationError::OutOfRange { criterion, max } => {
                json!({ "criterion": criterion, "max": max })
            }
        }
    }
}

/// When `|x| * 10^digits` is exactly `k + 0.5`, returns `k`.
fn exact_tie(x: f64, digits: u8) -> Option<u128> {
    if !x.is_finite() || x == 0.0 {
        return None;
    }
    let bits = x.abs().to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & ((1u64 << 52) - 1);
    let (mantissa, exp) = if exp == 0 {
        (frac, -1074)
    } else {
        (frac | (1u64 << 52), exp - 1075)
    };
    if exp >= 0 {
        return None;
    }
    let shift = exp.unsigned_abs();
    if shift >= 127 {
        return None;
    }
    let doubled = u128::from(mantissa) * 2 * 10u128.pow(u32::from(digits));
    if doubled % (1u128 << shift) != 0 {
        return None;
    }
    let halves = doubled >> shift;
    (halves % 2 == 1).then_some(halves / 2)
}

/// Fixed-point rendering that rounds the exact binary value, with exact
/// halves going away from zero (`Number.prototype.toFixed`).
pub fn format_fixed(x: f64, digits: u8) -> String {
    let Some(k) = exact_tie(x, digits) else {
        return format!("{:.*}", digits as usize, x);
    };
    let width = digits as usize + 1;
    let mut s = format!("{:0width$}", k + 1, width = width);
    if digits > 0 {
        s.insert(s.len() - digits as usize, '.');
    }
    if x < 0.0 {
        s.insert(0, '-');
    }
    s
}

/// `part / whole * scale`, rendered at the scheme precision.
pub fn normalized(part: f64, whole: f64, scale: f64, digits: u8) -> String {
    let v = if whole > 0.0 { part / whole * scale } else { 0.0 };
    format_fixed(v, digits)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    /// `None` means unbounded below.
    pub lower: Option<f64>,
    pub inclusive: bool,
    /// `None` marks a span no configured range covers.
    pub grade: Option<String>,
}

impl GradeBand {
    fn admits(&self, total: f64) -> bool {
        match self.lower {
            None => true,
            Some(lower) => total > lower || (self.inclusive && total == lower),
        }
    }
}

/// Grade bands sorted by descending lower bound; the first admitting band wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeTable {
    bands: Vec<GradeBand>,
}

impl GradeTable {
    fn from_bands(mut bands: Vec<GradeBand>) -> Self {
        // Stable sort: equal bounds keep the configured order.
        bands.sort_by(|a, b| {
            let a_key = a.lower.unwrap_or(f64::NEG_INFINITY);
            let b_key = b.lower.unwrap_or(f64::NEG_INFINITY);
            b_key.partial_cmp(&a_key).unwrap_or(Ordering::Equal)
        });
        Self { bands }
    }

    /// `total >= bound` scanned top-down.
    pub fn from_lower_bounds<I, S>(bounds: I) -> Self
    where
        I: IntoIterator<Item = (f64, S)>,
        S: Into<String>,
    {
        let bands = bounds
            .into_iter()
            .map(|(lower, grade)| GradeBand {
                lower: Some(lower),
                inclusive: true,
                grade: Some(grade.into()),
            })
            .collect();
        Self::from_bands(bands)
    }

    /// `total <= bound` buckets scanned bottom-up, with `above` for anything
    /// past the last bucket.
    pub fn from_upper_bounds<I, S>(buckets: I, above: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (f64, S)>,
        S: Into<String>,
    {
        let mut buckets: Vec<(f64, String)> =
            buckets.into_iter().map(|(b, g)| (b, g.into())).collect();
        buckets.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut bands = Vec::with_capacity(buckets.len() + 1);
        let mut prev_upper: Option<f64> = None;
        for (upper, grade) in &buckets {
            bands.push(GradeBand {
                lower: prev_upper,
                inclusive: false,
                grade: Some(grade.clone()),
            });
            prev_upper = Some(*upper);
        }
        bands.push(GradeBand {
            lower: prev_upper,
            inclusive: false,
            grade: Some(above.into()),
        });
        Self::from_bands(bands)
    }

    /// Fixed `[lo, hi]` ranges. Totals in a gap between ranges, below the
    /// lowest `lo` or above the highest `hi` have no grade.
    pub fn from_ranges<I, S>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64, S)>,
        S: Into<String>,
    {
        let mut ranges: Vec<(f64, f64, String)> = ranges
            .into_iter()
            .map(|(lo, hi, g)| (lo, hi, g.into()))
            .collect();
        ranges.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut bands = Vec::with_capacity(ranges.len() * 2);
        let mut reach: Option<f64> = None;
        for (lo, hi, grade) in ranges {
            if let Some(r) = reach {
                if r < lo {
                    bands.push(GradeBand {
                        lower: Some(r),
                        inclusive: false,
                        grade: None,
                    });
                }
            }
            bands.push(GradeBand {
                lower: Some(lo),
                inclusive: true,
                grade: Some(grade),
            });
            reach = Some(reach.map_or(hi, |r| r.max(hi)));
        }
        if let Some(r) = reach {
            bands.push(GradeBand {
                lower: Some(r),
                inclusive: false,
                grade: None,
            });
        }
        Self::from_bands(bands)
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

pub fn grade_of(total: f64, table: &GradeTable) -> Option<&str> {
    table
        .bands
        .iter()
        .find(|b| b.admits(total))
        .and_then(|b| b.grade.as_deref())
}

pub fn parse_entry(
    raw: &str,
    criterion: &Criterion,
    absent_token: &str,
) -> Result<MarkValue, ValidationError> {
    let t = raw.trim();
    if t.is_empty() {
        return Ok(MarkValue::Empty);
    }
    if criterion.allow_absent && t.eq_ignore_ascii_case(absent_token) {
        return Ok(MarkValue::Absent);
    }

    let Some(v) = t.parse::<f64>().ok().filter(|v| v.is_finite()) else {
        return Err(ValidationError::BadFormat {
            criterion: criterion.name.clone(),
            input: raw.to_string(),
        });
    };
    if v < 0.0 || v > criterion.max_marks {
        return Err(ValidationError::OutOfRange {
            criterion: criterion.name.clone(),
            max: criterion.max_marks,
        });
    }
    Ok(MarkValue::Scored(v))
}

fn recompute_subject(marks: &mut MarkVector, subject: &SubjectScheme, precision: u8) {
    marks.fit_to(subject.criteria.len());
    marks.subtotal = marks.raw.iter().map(MarkValue::contribution).sum();
    marks.grade = grade_of(marks.subtotal, &subject.grade_table)
        .unwrap_or("")
        .to_string();
    marks.gpa = normalized(marks.subtotal, subject.max_total(), 10.0, precision);
}

fn recompute_overall(record: &mut StudentRecord, scheme: &GradingScheme) {
    let grand_total: f64 = scheme
        .subjects
        .iter()
        .map(|s| {
            record
                .subject_marks
                .get(&s.id)
                .map(|m| m.subtotal)
                .unwrap_or(0.0)
        })
        .sum();
    record.grand_total = grand_total;
    record.overall_grade = grade_of(grand_total, &scheme.overall_grade_table)
        .unwrap_or("")
        .to_string();
    record.gpa = normalized(grand_total, scheme.overall_max_total, 10.0, scheme.precision);
    record.percentage = normalized(grand_total, scheme.overall_max_total, 100.0, scheme.precision);
}

/// Brings every derived field of `record` in line with its raw marks. Mark
/// vectors are resized to the scheme's criteria and subjects outside the
/// scheme are dropped.
pub fn recompute(record: &mut StudentRecord, scheme: &GradingScheme) {
    record
        .subject_marks
        .retain(|id, _| scheme.subject(id).is_some());
    for subject in &scheme.subjects {
        let marks = record
            .subject_marks
            .entry(subject.id.clone())
            .or_insert_with(|| MarkVector::blank(subject.criteria.len()));
        recompute_subject(marks, subject, scheme.precision);
    }
    recompute_overall(record, scheme);
}

/// Validates one raw entry and returns the record with that entry applied and
/// every derived field recomputed. On error the input record is untouched.
pub fn apply_mark(
    record: &StudentRecord,
    subject: &str,
    criterion_index: usize,
    raw: &str,
    scheme: &GradingScheme,
) -> Result<StudentRecord, ValidationError> {
    let Some(subject_scheme) = scheme.subject(subject) else {
        return Err(ValidationError::UnknownSubject {
            subject: subject.to_string(),
        });
    };
    let Some(criterion) = subject_scheme.criteria.get(criterion_index) else {
        return Err(ValidationError::UnknownCriterion {
            subject: subject.to_string(),
            index: criterion_index,
            len: subject_scheme.criteria.len(),
        });
    };
    let value = parse_entry(raw, criterion, &scheme.absent_token)?;

    let mut next = record.clone();
    let marks = next
        .subject_marks
        .entry(subject_scheme.id.clone())
        .or_insert_with(|| MarkVector::blank(subject_scheme.criteria.len()));
    marks.fit_to(subject_scheme.criteria.len());
    marks.raw[criterion_index] = value;
    recompute_subject(marks, subject_scheme, scheme.precision);
    recompute_overall(&mut next, scheme);
    Ok(next)
}
