use crate::registry::FetchError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot fetch projects from the grants registry: {0}")]
    ExternalFetch(#[from] FetchError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("fetch queue is full")]
    QueueFull,

    #[error("fetch queue is closed")]
    QueueClosed,
}

impl Error {
    pub fn professor_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "professor",
            id,
        }
    }

    /// Whether running the same job again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalFetch(_) | Self::Database(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
