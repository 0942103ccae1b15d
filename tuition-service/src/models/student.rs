//! Student profile model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Current layout of [`StudentProfile`]. Bump when fields change meaning.
pub const PROFILE_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeLevel {
    Undergraduate,
    Graduate,
}

impl DegreeLevel {
    /// Student numbers carry the degree level in their third digit; `8` and
    /// `9` are graduate programs.
    pub fn from_student_id(student_id: &str) -> Self {
        match student_id.as_bytes().get(2) {
            Some(b'8') | Some(b'9') => DegreeLevel::Graduate,
            _ => DegreeLevel::Undergraduate,
        }
    }
}

/// Attributes needed for period and fee lookups, populated once when the
/// profile is read from master data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub schema_version: u16,
    pub student_id: String,
    pub name: String,
    pub admission_year: Option<i32>,
    pub admission_semester: Option<i32>,
    pub program_code: Option<String>,
    /// Tuition tier (UKT group).
    pub fee_group: Option<String>,
    /// Fee template code for graduate programs.
    pub billing_code: Option<String>,
    pub degree_level: DegreeLevel,
}

impl StudentProfile {
    pub fn new(student_id: impl Into<String>, name: impl Into<String>) -> Self {
        let student_id = student_id.into();
        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            degree_level: DegreeLevel::from_student_id(&student_id),
            student_id,
            name: name.into(),
            admission_year: None,
            admission_semester: None,
            program_code: None,
            fee_group: None,
            billing_code: None,
        }
    }

    pub fn cohort(&self) -> Option<i32> {
        self.admission_year
    }

    /// Period code of admission, e.g. `20231`.
    pub fn admission_period_code(&self) -> Option<String> {
        match (self.admission_year, self.admission_semester) {
            (Some(year), Some(semester)) => Some(format!("{}{}", year, semester)),
            _ => None,
        }
    }

    pub fn is_graduate(&self) -> bool {
        self.degree_level == DegreeLevel::Graduate
    }
}

/// Row shape of the master-data student query.
#[derive(Debug, Clone, FromRow)]
pub struct StudentRow {
    pub student_id: String,
    pub name: String,
    pub admission_year: Option<i32>,
    pub admission_semester: Option<i32>,
    pub program_code: Option<String>,
    pub fee_group: Option<String>,
    pub billing_code: Option<String>,
}

/// Admission year encoded in the first two digits of a student ID.
fn admission_year_from_id(student_id: &str) -> Option<i32> {
    let prefix = student_id.get(..2)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse::<i32>().ok().map(|yy| 2000 + yy)
}

impl From<StudentRow> for StudentProfile {
    fn from(row: StudentRow) -> Self {
        let (admission_year, admission_semester) = match row.admission_year {
            Some(year) => (Some(year), row.admission_semester.or(Some(1))),
            None => match admission_year_from_id(&row.student_id) {
                Some(year) => (Some(year), Some(1)),
                None => (None, row.admission_semester),
            },
        };

        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            degree_level: DegreeLevel::from_student_id(&row.student_id),
            student_id: row.student_id,
            name: row.name,
            admission_year,
            admission_semester,
            program_code: row.program_code.filter(|s| !s.trim().is_empty()),
            fee_group: row.fee_group.filter(|s| !s.trim().is_empty()),
            billing_code: row.billing_code.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Study program with its owning faculty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProgramUnit {
    pub code: String,
    pub name: String,
    pub faculty_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degree_level_follows_third_digit() {
        assert_eq!(DegreeLevel::from_student_id("238101"), DegreeLevel::Graduate);
        assert_eq!(DegreeLevel::from_student_id("239101"), DegreeLevel::Graduate);
        assert_eq!(DegreeLevel::from_student_id("231101"), DegreeLevel::Undergraduate);
        assert_eq!(DegreeLevel::from_student_id("2"), DegreeLevel::Undergraduate);
    }

    #[test]
    fn admission_code_requires_year_and_semester() {
        let mut profile = StudentProfile::new("231101", "Ana");
        assert_eq!(profile.admission_period_code(), None);

        profile.admission_year = Some(2023);
        profile.admission_semester = Some(1);
        assert_eq!(profile.admission_period_code().as_deref(), Some("20231"));
    }

    #[test]
    fn blank_row_fields_become_none() {
        let profile = StudentProfile::from(StudentRow {
            student_id: "231101".into(),
            name: "Ana".into(),
            admission_year: Some(2023),
            admission_semester: Some(1),
            program_code: Some("  ".into()),
            fee_group: Some("3".into()),
            billing_code: None,
        });

        assert_eq!(profile.program_code, None);
        assert_eq!(profile.fee_group.as_deref(), Some("3"));
    }

    #[test]
    fn missing_admission_year_is_read_from_student_id() {
        let profile = StudentProfile::from(StudentRow {
            student_id: "238101".into(),
            name: "Budi".into(),
            admission_year: None,
            admission_semester: None,
            program_code: None,
            fee_group: None,
            billing_code: Some("MM".into()),
        });

        assert_eq!(profile.admission_period_code().as_deref(), Some("20231"));
        assert!(profile.is_graduate());
    }
}
