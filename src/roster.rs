use anyhow::bail;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::db;
use crate::grading::{recompute, MarkValue, MarkVector, StudentRecord};
use crate::scheme::{GradingScheme, SubjectScheme};

/// School selector that spans every stored school for a class and cycle.
pub const ALL_SCHOOLS: &str = "ALL";
const LAST_CONTEXT_KEY: &str = "session.lastContext";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterContext {
    pub school: String,
    pub class_level: String,
    pub cycle: String,
}

impl RosterContext {
    pub fn is_all(&self) -> bool {
        self.school.trim().eq_ignore_ascii_case(ALL_SCHOOLS)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSummary {
    pub id: String,
    pub school: String,
    pub class_level: String,
    pub cycle: String,
    pub scheme_id: String,
    pub student_count: i64,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub created: usize,
    pub updated: usize,
    /// Records whose pen number repeats an earlier one in the same school;
    /// these are keyed by position instead.
    pub duplicate_pens: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("roster file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("a plain student list needs a school")]
    MissingSchool,
    #[error("unsupported roster layout: {0}")]
    Layout(String),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::Json(_) => "import_parse_failed",
            ImportError::MissingSchool => "bad_params",
            ImportError::Layout(_) => "import_bad_layout",
        }
    }
}

#[derive(Debug, Default)]
pub struct ParsedImport {
    pub records: Vec<StudentRecord>,
    pub schools: Vec<String>,
    pub warnings: Vec<String>,
}

fn text_field(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Reads a stored or imported subject cell. Both the flattened legacy array
/// (criteria followed by derived slots) and `{ "raw": [...] }` are accepted;
/// only the first `criteria.len()` entries are read.
fn read_marks(
    cell: Option<&Value>,
    subject: &SubjectScheme,
    absent_token: &str,
    who: &str,
    warnings: &mut Vec<String>,
) -> MarkVector {
    let items = match cell {
        Some(Value::Array(items)) => Some(items),
        Some(Value::Object(o)) => o.get("raw").and_then(Value::as_array),
        _ => None,
    };
    let mut marks = MarkVector::blank(subject.criteria.len());
    if let Some(items) = items {
        for (slot, item) in marks.raw.iter_mut().zip(items.iter()) {
            match MarkValue::from_stored(item, absent_token) {
                Some(v) => *slot = v,
                None => {
                    tracing::warn!(student = who, subject = %subject.id, value = %item, "unreadable stored mark");
                    warnings.push(format!(
                        "{}: unreadable {} mark {} treated as empty",
                        who, subject.id, item
                    ));
                }
            }
        }
    }
    marks
}

fn record_from_json(
    entry: &Map<String, Value>,
    serial_number: u32,
    school: &str,
    scheme: &GradingScheme,
    warnings: &mut Vec<String>,
) -> StudentRecord {
    let mut record = StudentRecord::blank(
        serial_number,
        text_field(entry, "studentName"),
        text_field(entry, "penNumber"),
        text_field(entry, "section"),
        school,
        scheme,
    );
    let who = if record.pen_number.is_empty() {
        format!("{} #{}", school, serial_number)
    } else {
        record.pen_number.clone()
    };
    let nested = entry.get("subjectMarks").and_then(Value::as_object);
    for subject in &scheme.subjects {
        let cell = entry
            .get(&subject.id)
            .or_else(|| nested.and_then(|m| m.get(&subject.id)));
        let marks = read_marks(cell, subject, &scheme.absent_token, &who, warnings);
        record.subject_marks.insert(subject.id.clone(), marks);
    }
    recompute(&mut record, scheme);
    record
}

fn records_from_list<'a>(
    entries: impl IntoIterator<Item = &'a Value>,
    school: &str,
    scheme: &GradingScheme,
    out: &mut ParsedImport,
) {
    let mut serial = 0u32;
    let mut pens: HashSet<String> = HashSet::new();
    for (i, entry) in entries.into_iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            out.warnings
                .push(format!("{}: entry {} is not a student object", school, i + 1));
            continue;
        };
        serial += 1;
        let record = record_from_json(obj, serial, school, scheme, &mut out.warnings);
        let pen = record.pen_number.trim();
        if !pen.is_empty() && !pens.insert(pen.to_string()) {
            out.warnings.push(format!(
                "{}: pen number {} repeats for {} (serial {})",
                school, pen, record.student_name, serial
            ));
        }
        out.records.push(record);
    }
    if !out.schools.iter().any(|s| s == school) {
        out.schools.push(school.to_string());
    }
}

/// Parses a static roster file. Accepted layouts:
/// - `{ "<school>": [student, ...], ... }`
/// - `[student, ...]` (needs `school`)
/// - `{ "<studentId>": student, ... }` (needs `school`)
pub fn parse_import(
    text: &str,
    school: Option<&str>,
    scheme: &GradingScheme,
) -> Result<ParsedImport, ImportError> {
    let value: Value = serde_json::from_str(text)?;
    let school = school.map(str::trim).filter(|s| !s.is_empty());
    let mut out = ParsedImport::default();

    match &value {
        Value::Array(entries) => {
            let school = school.ok_or(ImportError::MissingSchool)?;
            records_from_list(entries, school, scheme, &mut out);
        }
        Value::Object(map) if map.values().all(Value::is_array) => {
            for (name, entries) in map {
                if name.eq_ignore_ascii_case(ALL_SCHOOLS) {
                    out.warnings.push(format!("skipped reserved school name {}", name));
                    continue;
                }
                if let Value::Array(entries) = entries {
                    records_from_list(entries, name, scheme, &mut out);
                }
            }
        }
        Value::Object(map) if map.values().all(Value::is_object) => {
            let school = school.ok_or(ImportError::MissingSchool)?;
            records_from_list(map.values(), school, scheme, &mut out);
        }
        Value::Object(_) => {
            return Err(ImportError::Layout(
                "object values must be all student lists or all student objects".to_string(),
            ))
        }
        _ => {
            return Err(ImportError::Layout(
                "expected a JSON object or array".to_string(),
            ))
        }
    }
    Ok(out)
}

/// Serial numbers are positional: 1-based and contiguous.
pub fn renumber(records: &mut [StudentRecord]) {
    for (i, record) in records.iter_mut().enumerate() {
        record.serial_number = (i + 1) as u32;
    }
}

/// Pen number, or `#<position>` within the record's own school when the pen
/// number is blank or already taken by an earlier record.
fn record_key(record: &StudentRecord, position: u32, taken: &HashSet<String>) -> String {
    let pen = record.pen_number.trim();
    if pen.is_empty() || taken.contains(pen) {
        format!("#{}", position)
    } else {
        pen.to_string()
    }
}

/// Indices of the rows matching `query`: case-insensitive substring of the
/// student name or pen number, or substring of the serial number.
pub fn search(records: &[StudentRecord], query: &str) -> Vec<usize> {
    let q = query.trim().to_lowercase();
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            q.is_empty()
                || r.student_name.to_lowercase().contains(&q)
                || r.pen_number.to_lowercase().contains(&q)
                || r.serial_number.to_string().contains(&q)
        })
        .map(|(i, _)| i)
        .collect()
}

pub fn list_rosters(conn: &Connection) -> anyhow::Result<Vec<RosterSummary>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.school, r.class_level, r.cycle, r.scheme_id, r.updated_at, COUNT(s.id)
         FROM rosters r
         LEFT JOIN roster_students s ON s.roster_id = r.id
         GROUP BY r.id
         ORDER BY r.class_level, r.cycle, r.school",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(RosterSummary {
                id: r.get(0)?,
                school: r.get(1)?,
                class_level: r.get(2)?,
                cycle: r.get(3)?,
                scheme_id: r.get(4)?,
                updated_at: r.get(5)?,
                student_count: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn rosters_for(conn: &Connection, ctx: &RosterContext) -> anyhow::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, school FROM rosters
         WHERE lower(class_level) = lower(?) AND lower(cycle) = lower(?)
         ORDER BY school",
    )?;
    let all = stmt
        .query_map((ctx.class_level.trim(), ctx.cycle.trim()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if ctx.is_all() {
        return Ok(all);
    }
    let school = ctx.school.trim();
    Ok(all.into_iter().filter(|(_, s)| s == school).collect())
}

/// Loads the roster for `ctx` (every school when the school is `ALL`) with
/// serial numbers renumbered across the combined list. Unknown rosters load
/// as empty.
pub fn load(
    conn: &Connection,
    ctx: &RosterContext,
    scheme: &GradingScheme,
) -> anyhow::Result<(Vec<StudentRecord>, Vec<String>)> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT pen_number, student_name, section, marks_json
         FROM roster_students
         WHERE roster_id = ?
         ORDER BY sort_order, rowid",
    )?;
    for (roster_id, school) in rosters_for(conn, ctx)? {
        let rows = stmt
            .query_map([&roster_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (pen_number, student_name, section, marks_json) in rows {
            let marks: Value = serde_json::from_str(&marks_json).unwrap_or_else(|e| {
                warnings.push(format!("{}: stored marks unreadable ({})", pen_number, e));
                Value::Null
            });
            let mut entry = Map::new();
            entry.insert("studentName".into(), Value::String(student_name));
            entry.insert("penNumber".into(), Value::String(pen_number));
            entry.insert("section".into(), Value::String(section));
            entry.insert("subjectMarks".into(), marks);
            let serial = records.len() as u32 + 1;
            records.push(record_from_json(&entry, serial, &school, scheme, &mut warnings));
        }
    }
    renumber(&mut records);
    Ok((records, warnings))
}

fn ensure_roster(
    conn: &Connection,
    school: &str,
    ctx: &RosterContext,
    scheme: &GradingScheme,
    now: &str,
) -> anyhow::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM rosters
             WHERE school = ? AND lower(class_level) = lower(?) AND lower(cycle) = lower(?)",
            (school, ctx.class_level.trim(), ctx.cycle.trim()),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        conn.execute(
            "UPDATE rosters SET scheme_id = ?, updated_at = ? WHERE id = ?",
            (&scheme.id, now, &id),
        )?;
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO rosters(id, school, class_level, cycle, scheme_id, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            school,
            ctx.class_level.trim(),
            ctx.cycle.trim(),
            &scheme.id,
            now,
        ),
    )?;
    Ok(id)
}

/// Upserts every record keyed by (school, pen number), or by position within
/// the school when the pen number is blank. In an `ALL` context each record is written
/// back to its own school. Derived fields are stored alongside the marks.
pub fn save(
    conn: &Connection,
    ctx: &RosterContext,
    scheme: &GradingScheme,
    records: &[StudentRecord],
) -> anyhow::Result<SaveReport> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    let mut roster_ids: HashMap<String, String> = HashMap::new();
    let mut positions: HashMap<String, u32> = HashMap::new();
    let mut pens: HashMap<String, HashSet<String>> = HashMap::new();
    let mut report = SaveReport::default();

    for record in records {
        let school = if ctx.is_all() {
            record.school.trim()
        } else {
            ctx.school.trim()
        };
        if school.is_empty() || school.eq_ignore_ascii_case(ALL_SCHOOLS) {
            bail!(
                "record {} ({}) has no school to save into",
                record.serial_number,
                record.student_name
            );
        }
        let roster_id = match roster_ids.get(school) {
            Some(id) => id.clone(),
            None => {
                let id = ensure_roster(&tx, school, ctx, scheme, &now)?;
                roster_ids.insert(school.to_string(), id.clone());
                id
            }
        };

        let position = positions.entry(school.to_string()).or_insert(0);
        *position += 1;
        let position = *position;
        let taken = pens.entry(school.to_string()).or_default();
        let key = record_key(record, position, taken);
        let pen = record.pen_number.trim();
        if !pen.is_empty() && !taken.insert(pen.to_string()) {
            tracing::warn!(
                school = %school,
                pen_number = %pen,
                student = %record.student_name,
                "duplicate pen number saved under its position"
            );
            report.duplicate_pens += 1;
        }
        let marks_json = serde_json::to_string(&record.subject_marks)?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM roster_students WHERE roster_id = ? AND record_key = ?",
                (&roster_id, &key),
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE roster_students
                     SET pen_number = ?, student_name = ?, section = ?, sort_order = ?,
                         marks_json = ?, grand_total = ?, overall_grade = ?, gpa = ?,
                         percentage = ?, updated_at = ?
                     WHERE id = ?",
                    rusqlite::params![
                        record.pen_number.trim(),
                        record.student_name,
                        record.section,
                        position as i64,
                        marks_json,
                        record.grand_total,
                        record.overall_grade,
                        record.gpa,
                        record.percentage,
                        now,
                        id,
                    ],
                )?;
                report.updated += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO roster_students(
                        id, roster_id, record_key, pen_number, student_name, section, sort_order,
                        marks_json, grand_total, overall_grade, gpa, percentage, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        roster_id,
                        key,
                        record.pen_number.trim(),
                        record.student_name,
                        record.section,
                        position as i64,
                        marks_json,
                        record.grand_total,
                        record.overall_grade,
                        record.gpa,
                        record.percentage,
                        now,
                    ],
                )?;
                report.created += 1;
            }
        }
    }

    tx.commit()?;
    tracing::info!(
        school = %ctx.school,
        class_level = %ctx.class_level,
        cycle = %ctx.cycle,
        created = report.created,
        updated = report.updated,
        duplicate_pens = report.duplicate_pens,
        "roster saved"
    );
    Ok(report)
}

pub fn remember_context(conn: &Connection, ctx: &RosterContext) -> anyhow::Result<()> {
    db::settings_set_json(conn, LAST_CONTEXT_KEY, &serde_json::to_value(ctx)?)
}

pub fn last_context(conn: &Connection) -> Option<RosterContext> {
    db::settings_get_json(conn, LAST_CONTEXT_KEY)
        .ok()
        .flatten()
        .and_then(|v| serde_json::from_value(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::apply_mark;
    use crate::scheme::SchemeCatalog;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
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

    fn ctx(school: &str) -> RosterContext {
        RosterContext {
            school: school.to_string(),
            class_level: "Class-1".to_string(),
            cycle: "FA-1".to_string(),
        }
    }

    #[test]
    fn school_keyed_import_reads_legacy_flattened_arrays() {
        let catalog = SchemeCatalog::builtin().expect("builtin");
        let scheme = catalog.get("class-1-fa-1").expect("scheme");
        let text = r#"{
            "Tandur": [
                { "studentName": "Ravi", "penNumber": "P1", "section": "A",
                  "telugu": ["20", "5", "5", "5", "5", "5", "5", 50, "A1", "10.0"] },
                { "studentName": "Sita", "penNumber": 2002, "section": "B",
                  "hindi": { "raw": [10, "", "x"] } }
            ],
            "Vikarabad": [ { "studentName": "Anil", "penNumber": "P9" } ]
        }"#;
        let parsed = parse_import(text, None, scheme).expect("parse");
        assert_eq!(parsed.schools, vec!["Tandur".to_string(), "Vikarabad".to_string()]);
        assert_eq!(parsed.records.len(), 3);

        let ravi = &parsed.records[0];
        assert_eq!(ravi.marks("telugu").expect("telugu").raw.len(), 7);
        assert_eq!(ravi.marks("telugu").expect("telugu").subtotal, 50.0);
        assert_eq!(ravi.overall_grade, "C");

        let sita = &parsed.records[1];
        assert_eq!(sita.pen_number, "2002");
        assert_eq!(sita.serial_number, 2);
        assert_eq!(sita.marks("hindi").expect("hindi").subtotal, 10.0);
        assert_eq!(parsed.warnings.len(), 1);

        let anil = &parsed.records[2];
        assert_eq!(anil.school, "Vikarabad");
        assert_eq!(anil.serial_number, 1);
        assert_eq!(anil.grand_total, 0.0);
    }

    #[test]
    fn plain_list_requires_a_school() {
        let catalog = SchemeCatalog::builtin().expect("builtin");
        let scheme = catalog.get("class-1-fa-1").expect("scheme");
        let text = r#"[{ "studentName": "Ravi", "penNumber": "P1" }]"#;
        assert!(matches!(
            parse_import(text, None, scheme),
            Err(ImportError::MissingSchool)
        ));
        let parsed = parse_import(text, Some("Tandur"), scheme).expect("parse");
        assert_eq!(parsed.records[0].school, "Tandur");
        assert!(matches!(
            parse_import("42", Some("Tandur"), scheme),
            Err(ImportError::Layout(_))
        ));
    }

    #[test]
    fn search_matches_name_pen_and_serial() {
        let catalog = SchemeCatalog::builtin().expect("builtin");
        let scheme = catalog.get("class-1-fa-1").expect("scheme");
        let records = vec![
            StudentRecord::blank(1, "Ravi Kumar", "PEN100", "A", "Tandur", scheme),
            StudentRecord::blank(2, "Sita", "PEN200", "A", "Tandur", scheme),
            StudentRecord::blank(12, "Anil", "X9", "B", "Tandur", scheme),
        ];
        assert_eq!(search(&records, "ravi"), vec![0]);
        assert_eq!(search(&records, "pen2"), vec![1]);
        assert_eq!(search(&records, "2"), vec![1, 2]);
        assert_eq!(search(&records, "  "), vec![0, 1, 2]);
        assert!(search(&records, "zzz").is_empty());
    }

    #[test]
    fn save_upserts_and_reload_preserves_marks() {
        let ws = temp_dir("marksentry-roster-save");
        let conn = db::open_db(&ws).expect("open");
        let catalog = SchemeCatalog::builtin().expect("builtin");
        let scheme = catalog.get("class-1-fa-1").expect("scheme");

        let ravi = StudentRecord::blank(1, "Ravi", "P1", "A", "Tandur", scheme);
        let ravi = apply_mark(&ravi, "telugu", 0, "18", scheme).expect("apply");
        let ravi = apply_mark(&ravi, "telugu", 1, "4.5", scheme).expect("apply");
        let nameless = StudentRecord::blank(2, "Sita", "", "A", "Tandur", scheme);

        let first = save(&conn, &ctx("Tandur"), scheme, &[ravi.clone(), nameless.clone()])
            .expect("save");
        assert_eq!(first, SaveReport { created: 2, updated: 0, duplicate_pens: 0 });
        let second = save(&conn, &ctx("Tandur"), scheme, &[ravi.clone(), nameless])
            .expect("save again");
        assert_eq!(second, SaveReport { created: 0, updated: 2, duplicate_pens: 0 });

        let (loaded, warnings) = load(&conn, &ctx("Tandur"), scheme).expect("load");
        assert!(warnings.is_empty());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], ravi);

        let rosters = list_rosters(&conn).expect("list");
        assert_eq!(rosters.len(), 1);
        assert_eq!(rosters[0].student_count, 2);
        assert_eq!(rosters[0].scheme_id, "class-1-fa-1");

        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn all_schools_load_renumbers_and_saves_back_to_origin() {
        let ws = temp_dir("marksentry-roster-all");
        let conn = db::open_db(&ws).expect("open");
        let catalog = SchemeCatalog::builtin().expect("builtin");
        let scheme = catalog.get("class-1-fa-1").expect("scheme");

        let a = vec![
            StudentRecord::blank(1, "A1", "PA1", "A", "Alpha", scheme),
            StudentRecord::blank(2, "A2", "PA2", "A", "Alpha", scheme),
        ];
        let b = vec![StudentRecord::blank(1, "B1", "PB1", "A", "Beta", scheme)];
        save(&conn, &ctx("Alpha"), scheme, &a).expect("alpha");
        save(&conn, &ctx("Beta"), scheme, &b).expect("beta");

        let (mut all, _) = load(&conn, &ctx("all"), scheme).expect("load all");
        let serials: Vec<u32> = all.iter().map(|r| r.serial_number).collect();
        assert_eq!(serials, vec![1, 2, 3]);
        assert_eq!(all[2].school, "Beta");

        all[2] = apply_mark(&all[2], "english", 0, "15", scheme).expect("apply");
        let report = save(&conn, &ctx(ALL_SCHOOLS), scheme, &all).expect("save all");
        assert_eq!(report, SaveReport { created: 0, updated: 3, duplicate_pens: 0 });

        let (beta, _) = load(&conn, &ctx("Beta"), scheme).expect("load beta");
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].grand_total, 15.0);
        let (alpha, _) = load(&conn, &ctx("Alpha"), scheme).expect("load alpha");
        assert_eq!(alpha.len(), 2);

        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn repeated_pen_numbers_keep_both_students() {
        let ws = temp_dir("marksentry-roster-dup-pen");
        let conn = db::open_db(&ws).expect("open");
        let catalog = SchemeCatalog::builtin().expect("builtin");
        let scheme = catalog.get("class-1-fa-1").expect("scheme");
        let text = r#"{
            "Tandur": [
                { "studentName": "Ravi", "penNumber": "P1" },
                { "studentName": "Sita", "penNumber": "P1" },
                { "studentName": "Arjun", "penNumber": "P2" }
            ],
            "Vikarabad": [ { "studentName": "Kiran", "penNumber": "P1" } ]
        }"#;
        let parsed = parse_import(text, None, scheme).expect("parse");
        assert_eq!(parsed.warnings.len(), 1);
        assert!(parsed.warnings[0].contains("P1"));

        let sita = apply_mark(&parsed.records[1], "telugu", 0, "12", scheme).expect("apply");
        let mut records = parsed.records.clone();
        records[1] = sita;
        let first = save(&conn, &ctx(ALL_SCHOOLS), scheme, &records).expect("save");
        assert_eq!(first, SaveReport { created: 4, updated: 0, duplicate_pens: 1 });
        let second = save(&conn, &ctx(ALL_SCHOOLS), scheme, &records).expect("save again");
        assert_eq!(second, SaveReport { created: 0, updated: 4, duplicate_pens: 1 });

        let (tandur, _) = load(&conn, &ctx("Tandur"), scheme).expect("load");
        let names: Vec<&str> = tandur.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, vec!["Ravi", "Sita", "Arjun"]);
        assert_eq!(tandur[1].pen_number, "P1");
        assert_eq!(tandur[1].grand_total, 12.0);

        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn unreadable_stored_marks_load_as_empty_with_warning() {
        let ws = temp_dir("marksentry-roster-lenient");
        let conn = db::open_db(&ws).expect("open");
        let catalog = SchemeCatalog::builtin().expect("builtin");
        let scheme = catalog.get("class-1-fa-1").expect("scheme");
        let rec = StudentRecord::blank(1, "Ravi", "P1", "A", "Tandur", scheme);
        save(&conn, &ctx("Tandur"), scheme, &[rec]).expect("save");
        conn.execute(
            "UPDATE roster_students SET marks_json = ?",
            [r#"{"telugu":{"raw":[12,"??",true]}}"#],
        )
        .expect("corrupt");

        let (loaded, warnings) = load(&conn, &ctx("Tandur"), scheme).expect("load");
        assert_eq!(warnings.len(), 2);
        let telugu = loaded[0].marks("telugu").expect("telugu");
        assert_eq!(telugu.raw[0], MarkValue::Scored(12.0));
        assert_eq!(telugu.raw[1], MarkValue::Empty);
        assert_eq!(loaded[0].grand_total, 12.0);

        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn last_context_round_trips_through_settings() {
        let ws = temp_dir("marksentry-roster-ctx");
        let conn = db::open_db(&ws).expect("open");
        assert_eq!(last_context(&conn), None);
        remember_context(&conn, &ctx("Tandur")).expect("remember");
        assert_eq!(last_context(&conn), Some(ctx("Tandur")));
        drop(conn);
        let _ = std::fs::remove_dir_all(ws);
    }
}
