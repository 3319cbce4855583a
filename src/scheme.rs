use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::grading::{GradeTable, ABSENT_MARK};

const BUILTIN_CATALOG: &str = include_str!("catalog.json");
pub const OVERRIDE_FILE_NAME: &str = "schemes.json";
const DEFAULT_CATEGORY: &str = "default";
const MAX_PRECISION: u8 = 4;

#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    #[error("scheme catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read scheme catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("scheme {scheme}: unknown criteria set '{name}'")]
    UnknownCriteriaSet { scheme: String, name: String },
    #[error("scheme {scheme}: unknown grade table '{name}'")]
    UnknownGradeTable { scheme: String, name: String },
    #[error("scheme {scheme}: subject {subject} uses undefined category '{category}'")]
    UnknownCategory {
        scheme: String,
        subject: String,
        category: String,
    },
    #[error("grade table '{name}' is invalid: {reason}")]
    InvalidGradeTable { name: String, reason: String },
    #[error("scheme {scheme}: {reason}")]
    Invalid { scheme: String, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionSpec {
    pub name: String,
    pub max: f64,
    #[serde(default)]
    pub absent: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GradeTableSpec {
    LowerBounds { bands: Vec<(f64, String)> },
    UpperBounds {
        buckets: Vec<(f64, String)>,
        above: String,
    },
    Ranges { ranges: Vec<(f64, f64, String)> },
    PercentOfMax { bands: Vec<(f64, String)> },
}

impl GradeTableSpec {
    /// `max_total` resolves percent-of-max bands for the table's consumer.
    pub fn build(&self, name: &str, max_total: f64) -> Result<GradeTable, SchemeError> {
        let invalid = |reason: &str| SchemeError::InvalidGradeTable {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let table = match self {
            GradeTableSpec::LowerBounds { bands } => {
                GradeTable::from_lower_bounds(bands.iter().map(|(b, g)| (*b, g.clone())))
            }
            GradeTableSpec::UpperBounds { buckets, above } => GradeTable::from_upper_bounds(
                buckets.iter().map(|(b, g)| (*b, g.clone())),
                above.clone(),
            ),
            GradeTableSpec::Ranges { ranges } => {
                if ranges.iter().any(|(lo, hi, _)| lo > hi) {
                    return Err(invalid("range lower bound exceeds upper bound"));
                }
                GradeTable::from_ranges(ranges.iter().map(|(lo, hi, g)| (*lo, *hi, g.clone())))
            }
            GradeTableSpec::PercentOfMax { bands } => {
                if bands.iter().any(|(p, _)| !(0.0..=100.0).contains(p)) {
                    return Err(invalid("percent bands must lie within 0..=100"));
                }
                GradeTable::from_lower_bounds(
                    bands.iter().map(|(p, g)| (max_total * p / 100.0, g.clone())),
                )
            }
        };
        if table.is_empty() {
            return Err(invalid("no bands"));
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSpec {
    pub id: String,
    pub label: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_precision() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySpec {
    pub criteria: String,
    pub grade_table: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeSpec {
    pub id: String,
    pub class_level: String,
    pub cycle: String,
    #[serde(default = "default_precision")]
    pub precision: u8,
    #[serde(default)]
    pub absent_token: Option<String>,
    pub subjects: Vec<SubjectSpec>,
    pub categories: BTreeMap<String, CategorySpec>,
    pub overall_grade_table: String,
    #[serde(default)]
    pub overall_max_total: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    #[serde(default)]
    pub criteria_sets: BTreeMap<String, Vec<CriterionSpec>>,
    #[serde(default)]
    pub grade_tables: BTreeMap<String, GradeTableSpec>,
    #[serde(default)]
    pub schemes: Vec<SchemeSpec>,
}

impl CatalogFile {
    fn merge(&mut self, other: CatalogFile) {
        self.criteria_sets.extend(other.criteria_sets);
        self.grade_tables.extend(other.grade_tables);
        for spec in other.schemes {
            match self.schemes.iter_mut().find(|s| s.id == spec.id) {
                Some(existing) => *existing = spec,
                None => self.schemes.push(spec),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub name: String,
    pub max_marks: f64,
    pub allow_absent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScheme {
    pub id: String,
    pub label: String,
    pub category: String,
    pub criteria: Vec<Criterion>,
    pub grade_table: GradeTable,
}

impl SubjectScheme {
    pub fn max_total(&self) -> f64 {
        self.criteria.iter().map(|c| c.max_marks).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingScheme {
    pub id: String,
    pub class_level: String,
    pub cycle: String,
    pub precision: u8,
    pub absent_token: String,
    pub subjects: Vec<SubjectScheme>,
    pub overall_grade_table: GradeTable,
    pub overall_max_total: f64,
}

impl GradingScheme {
    pub fn subject(&self, id: &str) -> Option<&SubjectScheme> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn subject_ids(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(|s| s.id.as_str())
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "classLevel": self.class_level,
            "cycle": self.cycle,
            "subjects": self.subject_ids().collect::<Vec<_>>(),
            "criteriaCount": self.subjects.iter().map(|s| s.criteria.len()).max().unwrap_or(0),
            "overallMaxTotal": self.overall_max_total,
            "precision": self.precision,
        })
    }
}

fn build_scheme(spec: &SchemeSpec, file: &CatalogFile) -> Result<GradingScheme, SchemeError> {
    let invalid = |reason: String| SchemeError::Invalid {
        scheme: spec.id.clone(),
        reason,
    };
    if spec.subjects.is_empty() {
        return Err(invalid("no subjects".to_string()));
    }
    if spec.precision > MAX_PRECISION {
        return Err(invalid(format!(
            "precision {} exceeds {}",
            spec.precision, MAX_PRECISION
        )));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut subjects = Vec::with_capacity(spec.subjects.len());
    for subj in &spec.subjects {
        if !seen.insert(subj.id.as_str()) {
            return Err(invalid(format!("duplicate subject {}", subj.id)));
        }
        let Some(category) = spec.categories.get(&subj.category) else {
            return Err(SchemeError::UnknownCategory {
                scheme: spec.id.clone(),
                subject: subj.id.clone(),
                category: subj.category.clone(),
            });
        };
        let Some(criteria_spec) = file.criteria_sets.get(&category.criteria) else {
            return Err(SchemeError::UnknownCriteriaSet {
                scheme: spec.id.clone(),
                name: category.criteria.clone(),
            });
        };
        if criteria_spec.is_empty() {
            return Err(invalid(format!("criteria set {} is empty", category.criteria)));
        }
        if let Some(bad) = criteria_spec
            .iter()
            .find(|c| !c.max.is_finite() || c.max <= 0.0)
        {
            return Err(invalid(format!(
                "criterion {} must have a positive maximum",
                bad.name
            )));
        }
        let criteria: Vec<Criterion> = criteria_spec
            .iter()
            .map(|c| Criterion {
                name: c.name.clone(),
                max_marks: c.max,
                allow_absent: c.absent,
            })
            .collect();
        let max_total: f64 = criteria.iter().map(|c| c.max_marks).sum();

        let Some(table_spec) = file.grade_tables.get(&category.grade_table) else {
            return Err(SchemeError::UnknownGradeTable {
                scheme: spec.id.clone(),
                name: category.grade_table.clone(),
            });
        };
        let grade_table = table_spec.build(&category.grade_table, max_total)?;

        subjects.push(SubjectScheme {
            id: subj.id.clone(),
            label: subj.label.clone(),
            category: subj.category.clone(),
            criteria,
            grade_table,
        });
    }

    let summed: f64 = subjects.iter().map(SubjectScheme::max_total).sum();
    let overall_max_total = spec.overall_max_total.unwrap_or(summed);
    if !overall_max_total.is_finite() || overall_max_total <= 0.0 {
        return Err(invalid("overallMaxTotal must be positive".to_string()));
    }

    let Some(overall_spec) = file.grade_tables.get(&spec.overall_grade_table) else {
        return Err(SchemeError::UnknownGradeTable {
            scheme: spec.id.clone(),
            name: spec.overall_grade_table.clone(),
        });
    };
    let overall_grade_table = overall_spec.build(&spec.overall_grade_table, overall_max_total)?;

    let absent_token = spec
        .absent_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(ABSENT_MARK)
        .to_string();

    Ok(GradingScheme {
        id: spec.id.clone(),
        class_level: spec.class_level.clone(),
        cycle: spec.cycle.clone(),
        precision: spec.precision,
        absent_token,
        subjects,
        overall_grade_table,
        overall_max_total,
    })
}

#[derive(Debug, Clone)]
pub struct SchemeCatalog {
    file: CatalogFile,
    schemes: BTreeMap<String, GradingScheme>,
}

impl SchemeCatalog {
    pub fn builtin() -> Result<Self, SchemeError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(text: &str) -> Result<Self, SchemeError> {
        let file: CatalogFile = serde_json::from_str(text)?;
        Self::from_file(file)
    }

    fn from_file(file: CatalogFile) -> Result<Self, SchemeError> {
        let mut schemes = BTreeMap::new();
        for spec in &file.schemes {
            let scheme = build_scheme(spec, &file)?;
            schemes.insert(scheme.id.clone(), scheme);
        }
        Ok(Self { file, schemes })
    }

    /// Layers an override catalog on top of this one: criteria sets and grade
    /// tables merge by name, schemes replace by id.
    pub fn with_override(&self, text: &str) -> Result<Self, SchemeError> {
        let extra: CatalogFile = serde_json::from_str(text)?;
        let mut file = self.file.clone();
        file.merge(extra);
        Self::from_file(file)
    }

    /// Applies `<workspace>/schemes.json` when present. `Ok(None)` means there
    /// was no override file.
    pub fn with_workspace_override(&self, workspace: &Path) -> Result<Option<Self>, SchemeError> {
        let path = workspace.join(OVERRIDE_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        self.with_override(&text).map(Some)
    }

    pub fn get(&self, id: &str) -> Option<&GradingScheme> {
        self.schemes.get(id)
    }

    pub fn find(&self, class_level: &str, cycle: &str) -> Option<&GradingScheme> {
        self.schemes.values().find(|s| {
            s.class_level.eq_ignore_ascii_case(class_level.trim())
                && s.cycle.eq_ignore_ascii_case(cycle.trim())
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &GradingScheme> {
        self.schemes.values()
    }

    pub fn len(&self) -> usize {
        self.schemes.len()
    }
}
