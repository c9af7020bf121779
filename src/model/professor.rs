use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ProfessorId(pub i64);

impl fmt::Display for ProfessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Professor {
    pub id: ProfessorId,
    pub pi_profile_id: i64,
    pub name: String,
    pub university: String,
    pub last_projects_fetch: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Professor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.university)
    }
}

/// A professor as entered by the seeding command, before it gets an id.
#[derive(Clone, Debug)]
pub struct NewProfessor {
    pub pi_profile_id: i64,
    pub name: String,
    pub university: String,
}

impl NewProfessor {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation(String::from("professor name is missing")));
        }
        if self.university.trim().is_empty() {
            return Err(Error::Validation(String::from(
                "professor university is missing",
            )));
        }
        Ok(())
    }
}
