use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClovrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("XML parse error at position {position}: {source}")]
    Xml {
        source: quick_xml::Error,
        position: usize,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid report id '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidIdentity(String),

    #[error("Report id '{identity}' is already used by build #{build}")]
    DuplicateIdentity { build: u64, identity: String },

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Build #{0} not found")]
    BuildNotFound(u64),

    /// A cache load failed. Shared so every waiter on the same key sees the
    /// same failure.
    #[error("Failed to load coverage report: {0}")]
    LoadFailed(Arc<ClovrError>),

    #[error("{0}")]
    Other(String),
}

impl From<figment::Error> for ClovrError {
    fn from(e: figment::Error) -> Self {
        ClovrError::Config(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, ClovrError>;
