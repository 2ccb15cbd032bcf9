use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the identity lifecycle. Every variant maps to a specific
/// message the UI can render; none of them are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthError {
    /// Bad local input, rejected before any boundary call.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("an account with this email already exists")]
    DuplicateEmail,
    #[error("password does not meet the minimum requirements")]
    WeakCredential,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("this account has been suspended")]
    AccountSuspended,
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Store-read failure while fetching listings. Entity absence is not an
/// error; single-item lookups return `Option::None` for that.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogError {
    #[error("listing fetch failed: {0}")]
    Fetch(String),
}
