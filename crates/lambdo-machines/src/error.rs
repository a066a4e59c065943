//! Error types for the Machines API client
//!
//! `TransportError` covers everything that happens before a usable HTTP
//! response exists. `MachinesError` is what the typed client operations return,
//! with HTTP statuses already translated into domain errors.

use thiserror::Error;

/// Terminal failures of the retrying transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request descriptor could not be turned into an HTTP request
    #[error("could not create request: {0}")]
    Build(String),

    /// Network-level failure that is not a timeout (never retried)
    #[error("http client error: {0}")]
    Http(String),

    /// Every attempt hit a retryable condition
    #[error("too many attempts ({attempts}) for {method} {url}")]
    TooManyAttempts {
        method: String,
        url: String,
        attempts: u32,
    },

    /// Request construction or execution panicked
    #[error("request panicked: {0}")]
    Panicked(String),
}

/// Errors returned by typed Machines API operations
#[derive(Debug, Error)]
pub enum MachinesError {
    /// The API answered 404 for an app
    #[error("app '{app}' not found")]
    AppNotFound { app: String },

    /// The API answered 404 (or 400, for malformed ids) for a machine
    #[error("app '{app}' machine '{machine}' not found")]
    MachineNotFound { app: String, machine: String },

    /// The API rejected a machine config (422); the body explains why
    #[error("did not create machine, http status: {status}, http body: {body}")]
    Unprocessable { status: u16, body: String },

    /// Any other non-2xx status
    #[error("could not {operation}, http status: {status}")]
    Status {
        operation: &'static str,
        status: u16,
    },

    /// A 2xx body did not decode into the expected type
    #[error("could not decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Request body could not be serialized
    #[error("could not encode {operation} request: {source}")]
    Encode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Creation failed in every candidate region
    #[error("could not create a machine in any region ({})", regions.join(", "))]
    AllRegionsFailed { regions: Vec<String> },

    /// A wait ran out of attempts
    #[error("timed out waiting for {resource} after {attempts} attempts")]
    WaitTimeout { resource: String, attempts: u32 },

    /// A wait was cancelled before the resource became ready
    #[error("wait for {resource} cancelled")]
    WaitCancelled { resource: String },

    #[error("request error: {0}")]
    Transport(#[from] TransportError),
}

impl MachinesError {
    /// Check if this is an app or machine "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MachinesError::AppNotFound { .. } | MachinesError::MachineNotFound { .. }
        )
    }

    /// Check if this is an app "not found" error
    pub fn is_app_not_found(&self) -> bool {
        matches!(self, MachinesError::AppNotFound { .. })
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            MachinesError::Unprocessable { status, .. } | MachinesError::Status { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}
