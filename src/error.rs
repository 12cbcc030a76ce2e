use thiserror::Error;

/// Integrity failures detected while verifying downloaded archives
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    Mismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("no sha256 declared for {0}; refusing to install an unverified archive")]
    MissingHash(String),

    #[error("invalid sha256 for {name}: {reason}")]
    Malformed { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum KegError {
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Dependency error: {0}")]
    Dependency(String),

    #[error("Install error: {0}")]
    Install(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Formula error: {0}")]
    Formula(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse formula: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl KegError {
    /// Short name of the pipeline stage the error belongs to
    pub fn stage(&self) -> &'static str {
        match self {
            KegError::Integrity(_) => "verify",
            KegError::Dependency(_) => "resolve",
            KegError::Install(_) | KegError::Io(_) => "install",
            KegError::Verification(_) => "test",
            KegError::Formula(_) | KegError::Toml(_) | KegError::Json(_) => "formula",
            KegError::Http(_) => "fetch",
            KegError::Other(_) => "keg",
        }
    }
}

pub type Result<T> = std::result::Result<T, KegError>;
