use thiserror::Error;

#[derive(Error, Debug)]
pub enum NestViewError {
    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("Display not found: {view}/{display}")]
    DisplayNotFound { view: String, display: String },

    #[error("Access denied: {view}/{display}")]
    AccessDenied { view: String, display: String },

    #[error("View query error: {0}")]
    Query(String),

    #[error("SQL parse error: {0}")]
    SqlParse(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, NestViewError>;
