use std::time::Duration;

use thiserror::Error;

/// Why a single request attempt failed. Every variant is retryable: the
/// retry engine moves on to the next endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// The transport could not be set up or the exchange broke off.
    #[error("transport failure: {0}")]
    TransportInit(String),
    #[error("unexpected HTTP status {0}")]
    TransportStatus(u16),
    #[error("payload decode failed: {0}")]
    PayloadDecode(String),
    #[error("not enough free heap to decode ({free} bytes free, {required} required)")]
    MemoryPressure { free: usize, required: usize },
}

/// Terminal outcome of a retried fetch for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{label}: retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted {
        label: &'static str,
        attempts: u32,
        last: Option<AttemptError>,
    },
    #[error("{label}: cancelled after {attempts} attempts")]
    Cancelled { label: &'static str, attempts: u32 },
}

impl FetchError {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::RetryBudgetExhausted { attempts, .. } => *attempts,
            FetchError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn last_attempt_error(&self) -> Option<&AttemptError> {
        match self {
            FetchError::RetryBudgetExhausted { last, .. } => last.as_ref(),
            FetchError::Cancelled { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("could not join {ssid:?} even after provisioning")]
    ConnectivityFailure { ssid: String },
    #[error("no provisioning submission within {0:?}")]
    ProvisioningTimedOut(Duration),
    #[error("wifi driver: {0}")]
    Driver(String),
}

/// Rejection of a provisioning form submission (HTTP 400, form re-shown).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} must be at most {max} bytes")]
    TooLong { field: &'static str, max: usize },
    #[error("malformed form body")]
    Malformed,
}
