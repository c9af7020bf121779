//! NIH RePORTER project search client.
//!
//! Only the subset of the `projects/search` API needed to list the projects
//! of a principal investigator is modelled here.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Fields requested for every project.
pub const INCLUDE_FIELDS: [&str; 12] = [
    "ApplId",
    "SubprojectId",
    "FiscalYear",
    "Organization",
    "ProjectNum",
    "OrgCountry",
    "ProjectNumSplit",
    "ContactPiName",
    "AllText",
    "FullStudySection",
    "ProjectStartDate",
    "ProjectEndDate",
];

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("registry answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("cannot reach registry: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cannot decode registry answer: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
pub struct SearchRequest {
    #[serde(rename = "searchId")]
    pub search_id: String,
    pub criteria: SearchCriteria,
    pub include_fields: &'static [&'static str],
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct SearchCriteria {
    pub pi_profile_ids: Vec<i64>,
}

impl SearchRequest {
    pub fn for_pi(pi_profile_id: i64, offset: u32, limit: u32) -> Self {
        Self {
            search_id: format!("search_{pi_profile_id}"),
            criteria: SearchCriteria {
                pi_profile_ids: vec![pi_profile_id],
            },
            include_fields: &INCLUDE_FIELDS,
            offset,
            limit,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub meta: Option<SearchMeta>,
    #[serde(default)]
    pub results: Vec<ProjectRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchMeta {
    #[serde(default)]
    pub total: Option<u64>,
}

/// One project as returned by the registry. Everything is optional so that a
/// missing field is reported by validation rather than by the decoder.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProjectRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub appl_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub subproject_id: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<i32>,
    #[serde(default)]
    pub organization: Option<Organization>,
    #[serde(default)]
    pub project_num: Option<String>,
    #[serde(default)]
    pub project_num_split: Option<ProjectNumSplit>,
    #[serde(default)]
    pub contact_pi_name: Option<String>,
    #[serde(default)]
    pub full_study_section: Option<StudySection>,
    #[serde(default)]
    pub project_start_date: Option<String>,
    #[serde(default)]
    pub project_end_date: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Organization {
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub org_country: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProjectNumSplit {
    #[serde(default, deserialize_with = "string_or_number")]
    pub full_support_year: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StudySection {
    #[serde(default)]
    pub name: Option<String>,
}

/// The registry sends identifiers as JSON numbers while they are stored as
/// text.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Integer(n) => n.to_string(),
    }))
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch one page of projects for a principal investigator.
    async fn fetch_page(
        &self,
        pi_profile_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ProjectRecord>, FetchError>;
}

#[derive(Clone, Debug)]
pub struct GrantsRegistryClient {
    client: Client,
    base_url: String,
}

impl GrantsRegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn search_url(&self) -> String {
        format!("{}/projects/search", self.base_url)
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, FetchError> {
        let response = self
            .client
            .post(self.search_url())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Registry for GrantsRegistryClient {
    #[instrument(level = "debug", skip(self))]
    async fn fetch_page(
        &self,
        pi_profile_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<ProjectRecord>, FetchError> {
        let request = SearchRequest::for_pi(pi_profile_id, offset, limit);
        match self.search(&request).await {
            Ok(response) => {
                debug!(
                    results = response.results.len(),
                    total = ?response.meta.and_then(|m| m.total),
                    "registry page received"
                );
                Ok(response.results)
            }
            Err(e) => {
                error!(pi_profile_id, offset, error = %e, "error fetching projects");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    /// The record used throughout the tests, as the registry would send it.
    pub fn sample_record_json() -> Value {
        json!({
            "appl_id": "9876543",
            "subproject_id": null,
            "fiscal_year": 2023,
            "organization": { "org_name": "Test Univ", "org_country": "USA" },
            "project_num": "R01AB123456",
            "project_num_split": { "full_support_year": "2023" },
            "contact_pi_name": "Jane Doe",
            "full_study_section": { "name": "Cell Biology" },
            "project_start_date": "2023-01-01",
            "project_end_date": "2024-01-01"
        })
    }

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });
        format!("http://{addr}/v2")
    }

    fn client(base_url: &str) -> GrantsRegistryClient {
        GrantsRegistryClient::new(base_url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(SearchRequest::for_pi(42, 200, 100)).unwrap();
        assert_eq!(body["searchId"], "search_42");
        assert_eq!(body["criteria"]["pi_profile_ids"], json!([42]));
        assert_eq!(body["offset"], 200);
        assert_eq!(body["limit"], 100);
        assert_eq!(body["include_fields"].as_array().unwrap().len(), 12);
        assert_eq!(body["include_fields"][0], "ApplId");
    }

    #[test]
    fn numeric_identifiers_are_accepted() {
        let record: ProjectRecord = serde_json::from_value(json!({
            "appl_id": 10_000_001,
            "subproject_id": 7,
            "fiscal_year": 2021,
            "project_num_split": { "full_support_year": 5 },
        }))
        .unwrap();
        assert_eq!(record.appl_id.as_deref(), Some("10000001"));
        assert_eq!(record.subproject_id.as_deref(), Some("7"));
        assert_eq!(
            record.project_num_split.unwrap().full_support_year.as_deref(),
            Some("5")
        );
        assert!(record.organization.is_none());
    }

    #[tokio::test]
    async fn page_is_fetched_and_decoded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let router = {
            let seen = seen.clone();
            Router::new().route(
                "/v2/projects/search",
                post(move |Json(body): Json<Value>| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().unwrap().push(body);
                        Json(json!({
                            "meta": { "total": 1, "offset": 0, "limit": 100 },
                            "results": [sample_record_json()]
                        }))
                    }
                }),
            )
        };
        let base_url = serve(router).await;
        let records = client(&base_url).fetch_page(42, 0, 100).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].appl_id.as_deref(), Some("9876543"));
        assert_eq!(
            records[0].organization.as_ref().unwrap().org_name.as_deref(),
            Some("Test Univ")
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["criteria"]["pi_profile_ids"], json!([42]));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let router = Router::new().route(
            "/v2/projects/search",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later") }),
        );
        let base_url = serve(router).await;
        match client(&base_url).fetch_page(42, 0, 100).await {
            Err(FetchError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "try later");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_answer_is_reported() {
        let router = Router::new().route("/v2/projects/search", post(|| async { "not json" }));
        let base_url = serve(router).await;
        assert!(matches!(
            client(&base_url).fetch_page(42, 0, 100).await,
            Err(FetchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn missing_results_is_an_empty_page() {
        let router = Router::new().route(
            "/v2/projects/search",
            post(|| async { Json(json!({ "meta": { "total": 0 } })) }),
        );
        let base_url = serve(router).await;
        assert!(
            client(&base_url)
                .fetch_page(42, 0, 100)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
