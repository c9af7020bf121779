use crate::config::FetchErrorPolicy;
use crate::error::{Error, Result};
use crate::model::{Professor, ProjectFields};
use crate::registry::{ProjectRecord, Registry};
use crate::store::{Store, Upsert};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, trace, warn};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// What a workflow run did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct FetchSummary {
    pub pages: usize,
    pub created: usize,
    pub updated: usize,
    pub linked: usize,
    /// Pagination stopped because the registry could not be queried.
    pub interrupted: bool,
}

/// Walk the registry pages for a professor and store every project found.
pub struct ProjectUpsertWorkflow {
    store: Store,
    registry: Arc<dyn Registry>,
    page_size: u32,
    on_fetch_error: FetchErrorPolicy,
}

impl ProjectUpsertWorkflow {
    pub fn new(store: Store, registry: Arc<dyn Registry>) -> Self {
        Self {
            store,
            registry,
            page_size: DEFAULT_PAGE_SIZE,
            on_fetch_error: FetchErrorPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_page_size(self, page_size: u32) -> Self {
        assert!(page_size > 0, "page size must be positive");
        Self { page_size, ..self }
    }

    #[must_use]
    pub fn with_fetch_error_policy(self, on_fetch_error: FetchErrorPolicy) -> Self {
        Self {
            on_fetch_error,
            ..self
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    #[instrument(level = "info", skip_all, fields(professor = %professor.id, pi_profile_id = professor.pi_profile_id))]
    pub async fn run(&self, professor: &Professor) -> Result<FetchSummary> {
        let mut summary = FetchSummary::default();
        let mut offset = 0;
        loop {
            let records = match self
                .registry
                .fetch_page(professor.pi_profile_id, offset, self.page_size)
                .await
            {
                Ok(records) => records,
                Err(e) => match self.on_fetch_error {
                    FetchErrorPolicy::Stop => {
                        warn!(offset, error = %e, "stopping pagination after fetch failure");
                        summary.interrupted = true;
                        break;
                    }
                    FetchErrorPolicy::Fail => return Err(Error::ExternalFetch(e)),
                },
            };
            if records.is_empty() {
                break;
            }
            summary.pages += 1;
            trace!(offset, records = records.len(), "processing page");
            for record in &records {
                let outcome = self.store.upsert_project(&project_fields(record)).await?;
                match outcome {
                    Upsert::Created(_) => summary.created += 1,
                    Upsert::Updated(_) => summary.updated += 1,
                }
                if self.store.link(professor.id, outcome.id()).await? {
                    summary.linked += 1;
                }
            }
            offset += self.page_size;
        }
        self.store.mark_fetched(professor.id, Utc::now()).await?;
        info!(
            pages = summary.pages,
            created = summary.created,
            updated = summary.updated,
            linked = summary.linked,
            interrupted = summary.interrupted,
            "projects fetched"
        );
        Ok(summary)
    }
}

/// Map a registry record onto the stored project attributes. The study
/// section name fills both `all_text` and `full_study_section`.
pub fn project_fields(record: &ProjectRecord) -> ProjectFields {
    let organization = record.organization.as_ref();
    let study_section = record
        .full_study_section
        .as_ref()
        .and_then(|s| s.name.clone());
    ProjectFields {
        appl_id: record.appl_id.clone().unwrap_or_default(),
        subproject_id: record.subproject_id.clone(),
        fiscal_year: record.fiscal_year,
        organization: organization.and_then(|o| o.org_name.clone()),
        project_num: record.project_num.clone().unwrap_or_default(),
        org_country: organization.and_then(|o| o.org_country.clone()),
        project_num_split: record
            .project_num_split
            .as_ref()
            .and_then(|s| s.full_support_year.clone()),
        contact_pi_name: record.contact_pi_name.clone(),
        all_text: study_section.clone(),
        full_study_section: study_section,
        project_start_date: record.project_start_date.as_deref().and_then(parse_date),
        project_end_date: record.project_end_date.as_deref().and_then(parse_date),
    }
}

/// Dates come either as `2023-01-01` or as `2023-01-01T00:00:00`.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let day = s.split('T').next().unwrap_or(s).trim();
    match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(date = s, error = %e, "ignoring unparsable date");
            None
        }
    }
}
