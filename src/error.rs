//! Centralized error handling module
//!
//! Controller-level error taxonomy plus the HTTP response mapping used by the
//! API adapter.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Failure to produce a sensor reading. The tick is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("sensor failure: {0}")]
pub struct SensorFailure(pub String);

/// A commanded valve, pump or dosing pump did not execute.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("actuation failure: {0}")]
pub struct ActuationFailure(pub String);

/// Controller error taxonomy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error(transparent)]
    Sensor(#[from] SensorFailure),

    #[error(transparent)]
    Actuation(#[from] ActuationFailure),

    /// Invalid configuration; the prior configuration is retained.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{variable} out of range: {value}")]
    OutOfRange { variable: String, value: f64 },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Application-wide error types (HTTP surface)
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Sensor data error: {0}")]
    SensorError(String),

    #[error("Actuation error: {0}")]
    ActuationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<ControllerError> for AppError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::Sensor(e) => AppError::SensorError(e.0),
            ControllerError::Actuation(e) => AppError::ActuationError(e.0),
            ControllerError::Configuration(msg) => AppError::ValidationError(msg),
            ControllerError::OutOfRange { .. } => AppError::BadRequest(err.to_string()),
            ControllerError::NotFound(msg) => AppError::NotFound(msg),
        }
    }
}

/// Standardized error response format
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Unique correlation ID for tracing
    pub correlation_id: String,
    /// Error type classification
    pub error_type: String,
    /// Human-readable error message (safe for clients)
    pub message: String,
    /// HTTP status code
    pub status_code: u16,
    /// Timestamp of the error
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str, status_code: StatusCode) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            status_code: status_code.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.as_str())
            }
            AppError::SensorError(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SENSOR_ERROR", msg.as_str())
            }
            AppError::ActuationError(msg) => {
                (StatusCode::BAD_GATEWAY, "ACTUATION_ERROR", msg.as_str())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.as_str()),
        };

        let error_response = ErrorResponse::new(error_type, message, status);

        error!(
            correlation_id = %error_response.correlation_id,
            error_type = %error_type,
            status_code = %status.as_u16(),
            "Error response generated"
        );

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::SensorError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ActuationError(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status() {
        let error = AppError::ValidationError("pH min above max".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_controller_error_mapping() {
        let err: AppError = ControllerError::Configuration("bad".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: AppError = ControllerError::from(SensorFailure("probe offline".into())).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: AppError = ControllerError::NotFound("task".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: AppError = ControllerError::OutOfRange {
            variable: "window hours".into(),
            value: 0.0,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_sensor_failure_display() {
        let err = ControllerError::from(SensorFailure("pH probe timeout".into()));
        assert_eq!(err.to_string(), "sensor failure: pH probe timeout");
    }

    #[test]
    fn test_error_response_format() {
        let response = ErrorResponse::new("TEST_ERROR", "Test message", StatusCode::BAD_REQUEST);
        assert!(!response.correlation_id.is_empty());
        assert_eq!(response.error_type, "TEST_ERROR");
        assert_eq!(response.message, "Test message");
        assert_eq!(response.status_code, 400);
    }
}
