use crate::error::{Error, Result};
use crate::model::{NewProfessor, Professor, ProfessorId, Project, ProjectFields, ProjectId};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, trace};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS professors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pi_profile_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    university TEXT NOT NULL,
    last_projects_fetch TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS index_professors_on_pi_profile_id
    ON professors(pi_profile_id);

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    appl_id TEXT NOT NULL,
    subproject_id TEXT,
    fiscal_year INTEGER NOT NULL,
    organization TEXT,
    project_num TEXT NOT NULL,
    org_country TEXT,
    project_num_split TEXT,
    contact_pi_name TEXT,
    all_text TEXT,
    full_study_section TEXT,
    project_start_date TEXT,
    project_end_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS index_projects_on_appl_id ON projects(appl_id);
CREATE INDEX IF NOT EXISTS index_projects_on_project_num ON projects(project_num);

CREATE TABLE IF NOT EXISTS professors_projects (
    professor_id INTEGER NOT NULL REFERENCES professors(id),
    project_id INTEGER NOT NULL REFERENCES projects(id),
    PRIMARY KEY (professor_id, project_id)
);

CREATE INDEX IF NOT EXISTS index_professors_projects_on_project_id_and_professor_id
    ON professors_projects(project_id, professor_id);
";

/// Outcome of saving a project keyed by its `appl_id`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Upsert {
    Created(ProjectId),
    Updated(ProjectId),
}

impl Upsert {
    pub fn id(self) -> ProjectId {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!("database schema is ready");
        Ok(Self { pool })
    }

    pub async fn add_professor(&self, professor: &NewProfessor) -> Result<Professor> {
        professor.validate()?;
        let now = Utc::now();
        let added = sqlx::query_as::<_, Professor>(
            "INSERT INTO professors (pi_profile_id, name, university, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(professor.pi_profile_id)
        .bind(professor.name.trim())
        .bind(professor.university.trim())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Validation(format!(
                "pi_profile_id {} is already registered",
                professor.pi_profile_id
            )),
            e => Error::Database(e),
        })?;
        debug!(professor = %added, id = %added.id, "professor added");
        Ok(added)
    }

    pub async fn list_professors(&self) -> Result<Vec<Professor>> {
        Ok(
            sqlx::query_as::<_, Professor>("SELECT * FROM professors ORDER BY name, id")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    pub async fn get_professor(&self, id: ProfessorId) -> Result<Professor> {
        sqlx::query_as::<_, Professor>("SELECT * FROM professors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::professor_not_found(id.0))
    }

    pub async fn mark_fetched(&self, id: ProfessorId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE professors SET last_projects_fetch = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Find the project carrying the same `appl_id` and overwrite its fields,
    /// or create it. The change is committed before returning.
    pub async fn upsert_project(&self, fields: &ProjectFields) -> Result<Upsert> {
        let fiscal_year = fields.validate()?;
        let now = Utc::now();
        let mut trans = self.pool.begin().await?;
        let existing: Option<ProjectId> =
            sqlx::query_scalar("SELECT id FROM projects WHERE appl_id = ? ORDER BY id LIMIT 1")
                .bind(&fields.appl_id)
                .fetch_optional(&mut *trans)
                .await?;
        let outcome = if let Some(id) = existing {
            sqlx::query(
                "UPDATE projects SET subproject_id = ?, fiscal_year = ?, organization = ?, \
                 project_num = ?, org_country = ?, project_num_split = ?, contact_pi_name = ?, \
                 all_text = ?, full_study_section = ?, project_start_date = ?, \
                 project_end_date = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&fields.subproject_id)
            .bind(fiscal_year)
            .bind(&fields.organization)
            .bind(&fields.project_num)
            .bind(&fields.org_country)
            .bind(&fields.project_num_split)
            .bind(&fields.contact_pi_name)
            .bind(&fields.all_text)
            .bind(&fields.full_study_section)
            .bind(fields.project_start_date)
            .bind(fields.project_end_date)
            .bind(now)
            .bind(id)
            .execute(&mut *trans)
            .await?;
            Upsert::Updated(id)
        } else {
            let id = sqlx::query_scalar(
                "INSERT INTO projects (appl_id, subproject_id, fiscal_year, organization, \
                 project_num, org_country, project_num_split, contact_pi_name, all_text, \
                 full_study_section, project_start_date, project_end_date, created_at, \
                 updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(&fields.appl_id)
            .bind(&fields.subproject_id)
            .bind(fiscal_year)
            .bind(&fields.organization)
            .bind(&fields.project_num)
            .bind(&fields.org_country)
            .bind(&fields.project_num_split)
            .bind(&fields.contact_pi_name)
            .bind(&fields.all_text)
            .bind(&fields.full_study_section)
            .bind(fields.project_start_date)
            .bind(fields.project_end_date)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *trans)
            .await?;
            Upsert::Created(id)
        };
        trans.commit().await?;
        trace!(appl_id = %fields.appl_id, ?outcome, "project saved");
        Ok(outcome)
    }

    /// Associate a project with a professor. Returns `false` if they were
    /// already associated.
    pub async fn link(&self, professor: ProfessorId, project: ProjectId) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO professors_projects (professor_id, project_id) VALUES (?, ?)",
        )
        .bind(professor)
        .bind(project)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn projects_for(&self, professor: ProfessorId) -> Result<Vec<Project>> {
        Ok(sqlx::query_as::<_, Project>(
            "SELECT p.* FROM projects p \
             JOIN professors_projects pp ON pp.project_id = p.id \
             WHERE pp.professor_id = ? \
             ORDER BY p.fiscal_year DESC, p.appl_id",
        )
        .bind(professor)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[cfg(test)]
impl Store {
    /// A private database living as long as the returned store. A single
    /// connection is kept open since every in-memory connection sees its own
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn project_by_appl_id(&self, appl_id: &str) -> Result<Option<Project>> {
        Ok(sqlx::query_as::<_, Project>(
            "SELECT * FROM projects WHERE appl_id = ? ORDER BY id LIMIT 1",
        )
        .bind(appl_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn project_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn link_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM professors_projects")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub async fn store_with_professor() -> (Store, Professor) {
        let store = Store::in_memory().await.unwrap();
        let professor = store
            .add_professor(&NewProfessor {
                pi_profile_id: 8_888_888,
                name: "Jane Doe".into(),
                university: "Test Univ".into(),
            })
            .await
            .unwrap();
        (store, professor)
    }

    pub fn fields(appl_id: &str) -> ProjectFields {
        ProjectFields {
            appl_id: appl_id.into(),
            fiscal_year: Some(2023),
            project_num: format!("R01{appl_id}"),
            ..ProjectFields::default()
        }
    }

    #[tokio::test]
    async fn professors_are_listed_by_name() {
        let (store, jane) = store_with_professor().await;
        let alan = store
            .add_professor(&NewProfessor {
                pi_profile_id: 1,
                name: "Alan Turing".into(),
                university: "Manchester".into(),
            })
            .await
            .unwrap();
        let ids = store
            .list_professors()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![alan.id, jane.id]);
    }

    #[tokio::test]
    async fn duplicate_pi_profile_id_is_rejected() {
        let (store, jane) = store_with_professor().await;
        let result = store
            .add_professor(&NewProfessor {
                pi_profile_id: jane.pi_profile_id,
                name: "Someone Else".into(),
                university: "Elsewhere".into(),
            })
            .await;
        assert!(matches!(
            result,
            Err(Error::Validation(msg)) if msg.contains("already registered")
        ));
        assert_eq!(store.list_professors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_professor() {
        let store = Store::in_memory().await.unwrap();
        assert!(matches!(
            store.get_professor(ProfessorId(12)).await,
            Err(Error::NotFound { id: 12, .. })
        ));
    }

    #[tokio::test]
    async fn upsert_overwrites_by_appl_id() {
        let store = Store::in_memory().await.unwrap();
        let created = store.upsert_project(&fields("1")).await.unwrap();
        assert!(matches!(created, Upsert::Created(_)));
        let updated = store
            .upsert_project(&ProjectFields {
                fiscal_year: Some(2024),
                organization: Some("Other Univ".into()),
                ..fields("1")
            })
            .await
            .unwrap();
        assert_eq!(updated, Upsert::Updated(created.id()));
        assert_eq!(store.project_count().await, 1);
        let project = store.project_by_appl_id("1").await.unwrap().unwrap();
        assert_eq!(project.fiscal_year, 2024);
        assert_eq!(project.organization.as_deref(), Some("Other Univ"));
    }

    #[tokio::test]
    async fn invalid_project_is_not_saved() {
        let store = Store::in_memory().await.unwrap();
        let result = store
            .upsert_project(&ProjectFields {
                fiscal_year: None,
                ..fields("1")
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(store.project_count().await, 0);
    }

    #[tokio::test]
    async fn linking_twice_keeps_one_edge() {
        let (store, professor) = store_with_professor().await;
        let project = store.upsert_project(&fields("1")).await.unwrap().id();
        assert!(store.link(professor.id, project).await.unwrap());
        assert!(!store.link(professor.id, project).await.unwrap());
        assert_eq!(store.link_count().await, 1);
        let projects = store.projects_for(professor.id).await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].id, project);
    }

    #[tokio::test]
    async fn projects_for_only_returns_linked_projects() {
        let (store, professor) = store_with_professor().await;
        let older = store.upsert_project(&fields("1")).await.unwrap().id();
        let newer = store
            .upsert_project(&ProjectFields {
                fiscal_year: Some(2025),
                ..fields("2")
            })
            .await
            .unwrap()
            .id();
        store.upsert_project(&fields("3")).await.unwrap();
        store.link(professor.id, older).await.unwrap();
        store.link(professor.id, newer).await.unwrap();
        let ids = store
            .projects_for(professor.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![newer, older]);
    }

    #[tokio::test]
    async fn mark_fetched_sets_timestamp() {
        let (store, professor) = store_with_professor().await;
        assert!(professor.last_projects_fetch.is_none());
        let now = Utc::now();
        store.mark_fetched(professor.id, now).await.unwrap();
        let professor = store.get_professor(professor.id).await.unwrap();
        assert_eq!(
            professor.last_projects_fetch.map(|t| t.timestamp()),
            Some(now.timestamp())
        );
    }
}
