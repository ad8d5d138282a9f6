use thiserror::Error;

/// Failures raised by the page protocol and the query path.
///
/// Backend-reported *write* failures (edit conflicts, checksum mismatches,
/// already-exists on create) are not represented here: the write methods
/// return the backend's raw result payload and callers inspect its status.
/// Only local precondition failures and query/transport failures raise.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page identity: {0}")]
    Construction(String),

    #[error("page {0:?} is invalid")]
    InvalidPage(String),

    #[error("page {0:?} does not exist")]
    NonexistentPage(String),

    #[error("missing the {capability:?} permission for page {title:?}")]
    Permission { capability: String, title: String },

    #[error("API error: {code} - {info}")]
    Api { code: String, info: String },

    #[error("auth failed: {reason}")]
    Auth { reason: String },

    #[error("malformed API response: {0}")]
    Response(String),

    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
}
