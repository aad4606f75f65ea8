use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential unavailable for {endpoint} ({kind}): {reason}")]
    CredentialUnavailable {
        endpoint: String,
        kind: String,
        reason: String,
    },

    #[error("Enumeration failed for {endpoint}: {source}")]
    Enumeration {
        endpoint: String,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("Transfer of {unit} failed: {reason}")]
    Transfer { unit: String, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl MigrationError {
    /// Wraps a transport-level failure as an enumeration error for `endpoint`.
    pub fn enumeration(endpoint: impl Into<String>, source: MigrationError) -> Self {
        MigrationError::Enumeration {
            endpoint: endpoint.into(),
            source: Box::new(source),
        }
    }

    /// Fatal errors abort the current workflow stage; the rest are recorded per unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrationError::Configuration(_)
                | MigrationError::CredentialUnavailable { .. }
                | MigrationError::Enumeration { .. }
        )
    }

    /// Short machine-friendly name used in reports.
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::Configuration(_) => "ConfigurationError",
            MigrationError::CredentialUnavailable { .. } => "CredentialUnavailable",
            MigrationError::Enumeration { .. } => "EnumerationError",
            MigrationError::Transfer { .. } => "TransferError",
            MigrationError::Command { .. } => "CommandError",
            MigrationError::Cancelled(_) => "Cancelled",
            MigrationError::Io(_) => "IoError",
            MigrationError::SerdeJson(_) => "JsonError",
            MigrationError::Sqlx(_) => "DatabaseError",
            MigrationError::UrlParse(_) => "UrlError",
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
