use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet, XlsxError};
use std::path::Path;

use crate::grading::{MarkValue, StudentRecord};
use crate::scheme::GradingScheme;

const LEADING_COLUMNS: [&str; 4] = ["Sno", "Student Name", "Pen Number", "Section"];
const SUBJECT_TRAILER: [&str; 3] = ["SubTotal", "Grade", "SGPA"];
const TRAILING_COLUMNS: [&str; 4] = ["Grand Total", "Total Grade", "GPA", "Percentage"];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("unsupported export format: {0}")]
    UnknownFormat(String),
    #[error("xlsx write failed: {0}")]
    Xlsx(#[from] XlsxError),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    /// An explicit format wins; otherwise the extension of `path` decides.
    pub fn resolve(explicit: Option<&str>, path: &Path) -> Result<Self, ExportError> {
        let name = match explicit {
            Some(f) => f.trim().to_ascii_lowercase(),
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default(),
        };
        match name.as_str() {
            "xlsx" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    fn csv_value(&self) -> String {
        match self {
            Cell::Blank => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
        }
    }
}

/// Inclusive cell range rendered as one merged header cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub first_row: u32,
    pub first_col: u16,
    pub last_row: u32,
    pub last_col: u16,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    /// Always two rows of equal width. Cells covered by a merge but not at
    /// its top-left corner are empty.
    pub header: [Vec<String>; 2],
    pub merges: Vec<Merge>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn width(&self) -> usize {
        self.header[0].len()
    }
}

fn mark_cell(v: &MarkValue) -> Cell {
    match v {
        MarkValue::Empty => Cell::Blank,
        MarkValue::Absent => Cell::text(crate::grading::ABSENT_MARK),
        MarkValue::Scored(n) => Cell::Number(*n),
    }
}

pub fn build_sheet(scheme: &GradingScheme, records: &[StudentRecord]) -> Sheet {
    let mut top: Vec<String> = Vec::new();
    let mut bottom: Vec<String> = Vec::new();
    let mut merges = Vec::new();

    let mut span_both_rows = |label: &str, top: &mut Vec<String>, bottom: &mut Vec<String>| {
        let col = top.len() as u16;
        top.push(label.to_string());
        bottom.push(String::new());
        merges.push(Merge {
            first_row: 0,
            first_col: col,
            last_row: 1,
            last_col: col,
            label: label.to_string(),
        });
    };

    for label in LEADING_COLUMNS {
        span_both_rows(label, &mut top, &mut bottom);
    }
    let mut subject_merges = Vec::with_capacity(scheme.subjects.len());
    for subject in &scheme.subjects {
        let first = top.len() as u16;
        for (i, criterion) in subject.criteria.iter().enumerate() {
            top.push(if i == 0 { subject.label.clone() } else { String::new() });
            bottom.push(criterion.name.clone());
        }
        for label in SUBJECT_TRAILER {
            top.push(String::new());
            bottom.push(label.to_string());
        }
        subject_merges.push(Merge {
            first_row: 0,
            first_col: first,
            last_row: 0,
            last_col: top.len() as u16 - 1,
            label: subject.label.clone(),
        });
    }
    for label in TRAILING_COLUMNS {
        span_both_rows(label, &mut top, &mut bottom);
    }
    merges.extend(subject_merges);
    merges.sort_by_key(|m| m.first_col);

    let rows = records
        .iter()
        .map(|record| {
            let mut row = vec![
                Cell::Number(record.serial_number as f64),
                Cell::text(&record.student_name),
                Cell::text(&record.pen_number),
                Cell::text(&record.section),
            ];
            for subject in &scheme.subjects {
                match record.marks(&subject.id) {
                    Some(marks) => {
                        row.extend(
                            (0..subject.criteria.len())
                                .map(|i| marks.raw.get(i).map_or(Cell::Blank, mark_cell)),
                        );
                        row.push(Cell::Number(marks.subtotal));
                        row.push(Cell::text(&marks.grade));
                        row.push(Cell::text(&marks.gpa));
                    }
                    None => {
                        row.extend((0..subject.criteria.len() + SUBJECT_TRAILER.len()).map(|_| Cell::Blank));
                    }
                }
            }
            row.push(Cell::Number(record.grand_total));
            row.push(Cell::text(&record.overall_grade));
            row.push(Cell::text(&record.gpa));
            row.push(Cell::text(&record.percentage));
            row
        })
        .collect();

    Sheet {
        name: format!("{} {}", scheme.class_level, scheme.cycle),
        header: [top, bottom],
        merges,
        rows,
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn to_csv(sheet: &Sheet) -> String {
    let mut out = String::new();
    for header in &sheet.header {
        let line: Vec<String> = header.iter().map(|h| csv_field(h)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    for row in &sheet.rows {
        let line: Vec<String> = row.iter().map(|c| csv_field(&c.csv_value())).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

pub fn to_xlsx(sheet: &Sheet) -> Result<Vec<u8>, ExportError> {
    let header_format = Format::new().set_bold().set_align(FormatAlign::Center);

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    // Sheet names are capped at 31 characters by the format.
    let name: String = sheet.name.chars().take(31).collect();
    worksheet.set_name(name)?;

    for (r, header) in sheet.header.iter().enumerate() {
        for (c, label) in header.iter().enumerate() {
            if !label.is_empty() {
                worksheet.write_string_with_format(r as u32, c as u16, label, &header_format)?;
            }
        }
    }
    for m in &sheet.merges {
        worksheet.merge_range(
            m.first_row,
            m.first_col,
            m.last_row,
            m.last_col,
            &m.label,
            &header_format,
        )?;
    }

    for (i, row) in sheet.rows.iter().enumerate() {
        let r = (i + 2) as u32;
        for (c, cell) in row.iter().enumerate() {
            match cell {
                Cell::Blank => {}
                Cell::Text(s) => {
                    worksheet.write_string(r, c as u16, s)?;
                }
                Cell::Number(n) => {
                    worksheet.write_number(r, c as u16, *n)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    Ok(workbook.save_to_buffer()?)
}

pub fn write_file(sheet: &Sheet, format: ExportFormat, path: &Path) -> Result<usize, ExportError> {
    let bytes = match format {
        ExportFormat::Csv => to_csv(sheet).into_bytes(),
        ExportFormat::Xlsx => to_xlsx(sheet)?,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, &bytes)?;
    Ok(bytes.len())
}
