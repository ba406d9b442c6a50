//! Unified error handling for the HAT sync core.
//!
//! Every failure in the sync pipeline is absorbed locally: rejected fixes are
//! dropped, upload failures are retried on the next tick and auth problems are
//! surfaced to the UI as a re-authentication prompt. Nothing here is fatal.

use std::fmt;

use thiserror::Error;

/// Why a location fix was not written to the sample store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixRejection {
    /// Platform reported a negative accuracy, meaning "no valid measurement".
    NegativeAccuracy { accuracy: f64 },
    /// Latitude, longitude or accuracy is NaN or infinite.
    NonFinite,
    /// Coordinates outside [-90, 90] / [-180, 180].
    CoordinatesOutOfRange { latitude: f64, longitude: f64 },
    /// Accuracy radius is larger than the desired accuracy bound.
    AccuracyAboveThreshold { accuracy: f64, threshold: f64 },
    /// Fix is closer to the last accepted sample than the distance filter.
    WithinDistanceFilter { distance: f64, filter: f64 },
}

impl fmt::Display for FixRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixRejection::NegativeAccuracy { accuracy } => {
                write!(f, "negative accuracy {}", accuracy)
            }
            FixRejection::NonFinite => write!(f, "non-finite coordinate or accuracy"),
            FixRejection::CoordinatesOutOfRange {
                latitude,
                longitude,
            } => write!(f, "coordinates out of range ({}, {})", latitude, longitude),
            FixRejection::AccuracyAboveThreshold {
                accuracy,
                threshold,
            } => write!(
                f,
                "accuracy {:.1}m worse than desired {:.1}m",
                accuracy, threshold
            ),
            FixRejection::WithinDistanceFilter { distance, filter } => write!(
                f,
                "moved {:.1}m, distance filter is {:.1}m",
                distance, filter
            ),
        }
    }
}

/// Unified error type for HAT sync operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HatError {
    /// Location fix rejected at ingest. Dropped silently by callers.
    #[error("Invalid location fix: {reason}")]
    InvalidFix { reason: FixRejection },

    /// Auth token missing, expired or refused by the HAT (HTTP 401).
    #[error("Authentication expired")]
    AuthExpired,

    /// Upload attempt failed. `message` is shown to the user verbatim.
    #[error("Upload failed: {message}")]
    UploadFailed {
        message: String,
        status_code: Option<u16>,
    },

    /// Local store failure
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Social feed record could not be fetched or parsed
    #[error("Feed error: {message}")]
    Feed { message: String },
}

impl HatError {
    pub fn storage(err: impl fmt::Display) -> Self {
        HatError::Storage {
            message: err.to_string(),
        }
    }

    pub fn upload(message: impl Into<String>, status_code: Option<u16>) -> Self {
        HatError::UploadFailed {
            message: message.into(),
            status_code,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        HatError::Config {
            message: message.into(),
        }
    }

    pub fn feed(message: impl Into<String>) -> Self {
        HatError::Feed {
            message: message.into(),
        }
    }

    /// Message suitable for the sync feedback label.
    ///
    /// Upload failures surface the transport's own message so that
    /// "network timeout" reads as "network timeout" in the UI.
    pub fn user_message(&self) -> String {
        match self {
            HatError::UploadFailed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the UI should be asked to re-authenticate.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, HatError::AuthExpired)
    }
}

/// Result type alias for HAT sync operations.
pub type Result<T> = std::result::Result<T, HatError>;

/// Extension trait for converting Option to HatError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an auth-expired error.
    fn ok_or_auth_expired(self) -> Result<T>;

    /// Convert Option to Result with a storage error.
    fn ok_or_storage(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_auth_expired(self) -> Result<T> {
        self.ok_or(HatError::AuthExpired)
    }

    fn ok_or_storage(self, message: &str) -> Result<T> {
        self.ok_or_else(|| HatError::Storage {
            message: message.to_string(),
        })
    }
}
