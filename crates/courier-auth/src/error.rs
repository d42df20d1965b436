//! Backend error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a backend or core collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The backend answered with an error response
    #[error("Backend responded {status} ({label}): {message}")]
    Response {
        status: u16,
        label: String,
        message: String,
    },

    /// The request never reached the backend
    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl From<courier_storage::StorageError> for ApiError {
    fn from(e: courier_storage::StorageError) -> Self {
        ApiError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendLabel {
    InvalidCredentials,
    TooManyClients,
    MissingAuth,
    BadRequest,
    NotFound,
    Unauthorized,
    ServerError,
    Offline,
    Unknown,
}

impl BackendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendLabel::InvalidCredentials => "invalid-credentials",
            BackendLabel::TooManyClients => "too-many-clients",
            BackendLabel::MissingAuth => "missing-auth",
            BackendLabel::BadRequest => "bad-request",
            BackendLabel::NotFound => "not-found",
            BackendLabel::Unauthorized => "unauthorized",
            BackendLabel::ServerError => "server-error",
            BackendLabel::Offline => "offline",
            BackendLabel::Unknown => "unknown",
        }
    }

    /// Fallback label when the backend sent none we know
    fn from_status(status: u16) -> Self {
        match status {
            400 => BackendLabel::BadRequest,
            401 => BackendLabel::Unauthorized,
            403 => BackendLabel::InvalidCredentials,
            404 => BackendLabel::NotFound,
            500..=599 => BackendLabel::ServerError,
            _ => BackendLabel::Unknown,
        }
    }
}

impl std::fmt::Display for BackendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid-credentials" => Ok(BackendLabel::InvalidCredentials),
            "too-many-clients" => Ok(BackendLabel::TooManyClients),
            "missing-auth" => Ok(BackendLabel::MissingAuth),
            "bad-request" => Ok(BackendLabel::BadRequest),
            "not-found" => Ok(BackendLabel::NotFound),
            "unauthorized" => Ok(BackendLabel::Unauthorized),
            "server-error" => Ok(BackendLabel::ServerError),
            "offline" => Ok(BackendLabel::Offline),
            "unknown" => Ok(BackendLabel::Unknown),
            _ => Err(format!("Unknown backend label: {}", s)),
        }
    }
}

/// Normalised backend failure handed to callers and kept in client state
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{label} ({code}): {message}")]
pub struct BackendError {
    pub code: u16,
    pub label: BackendLabel,
    pub message: String,
}

impl BackendError {
    pub fn new(code: u16, label: BackendLabel, message: impl Into<String>) -> Self {
        Self {
            code,
            label,
            message: message.into(),
        }
    }

    /// Normalise any collaborator failure into a `BackendError`
    pub fn handle(error: ApiError) -> Self {
        match error {
            ApiError::Response {
                status,
                label,
                message,
            } => {
                let label = label
                    .parse()
                    .unwrap_or_else(|_| BackendLabel::from_status(status));
                Self::new(status, label, message)
            }
            ApiError::Network(message) => Self::new(0, BackendLabel::Offline, message),
            ApiError::Storage(message) | ApiError::Other(message) => {
                Self::new(500, BackendLabel::Unknown, message)
            }
        }
    }
}

impl From<ApiError> for BackendError {
    fn from(error: ApiError) -> Self {
        BackendError::handle(error)
    }
}
