use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ProjectId(pub i64);

#[derive(Clone, Debug, PartialEq, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: ProjectId,
    pub appl_id: String,
    pub subproject_id: Option<String>,
    pub fiscal_year: i32,
    pub organization: Option<String>,
    pub project_num: String,
    pub org_country: Option<String>,
    pub project_num_split: Option<String>,
    pub contact_pi_name: Option<String>,
    pub all_text: Option<String>,
    pub full_study_section: Option<String>,
    pub project_start_date: Option<NaiveDate>,
    pub project_end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The attributes of a project that are copied from the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectFields {
    pub appl_id: String,
    pub subproject_id: Option<String>,
    pub fiscal_year: Option<i32>,
    pub organization: Option<String>,
    pub project_num: String,
    pub org_country: Option<String>,
    pub project_num_split: Option<String>,
    pub contact_pi_name: Option<String>,
    pub all_text: Option<String>,
    pub full_study_section: Option<String>,
    pub project_start_date: Option<NaiveDate>,
    pub project_end_date: Option<NaiveDate>,
}

impl ProjectFields {
    /// Check the fields that every stored project must carry and return the
    /// fiscal year.
    pub fn validate(&self) -> Result<i32> {
        if self.appl_id.trim().is_empty() {
            return Err(Error::Validation(String::from("project appl_id is missing")));
        }
        if self.project_num.trim().is_empty() {
            return Err(Error::Validation(format!(
                "project {} has no project_num",
                self.appl_id
            )));
        }
        self.fiscal_year.ok_or_else(|| {
            Error::Validation(format!("project {} has no fiscal_year", self.appl_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_fields() {
        let fields = ProjectFields {
            appl_id: "9876543".into(),
            project_num: "R01AB123456".into(),
            fiscal_year: Some(2023),
            ..ProjectFields::default()
        };
        assert_eq!(fields.validate().unwrap(), 2023);
        let p = ProjectFields {
            fiscal_year: None,
            ..fields.clone()
        };
        assert!(matches!(p.validate(), Err(Error::Validation(_))));
        let p = ProjectFields {
            project_num: String::new(),
            ..fields.clone()
        };
        assert!(matches!(p.validate(), Err(Error::Validation(_))));
        let p = ProjectFields {
            appl_id: " ".into(),
            ..fields
        };
        assert!(matches!(p.validate(), Err(Error::Validation(_))));
    }
}
