//! Sistema de manejo de errores
//!
//! Este módulo define todos los tipos de errores del sistema
//! y su conversión a respuestas HTTP apropiadas.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errores principales de la aplicación
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No se pudo derivar un efecto secundario (driver, vehículo, operador de update)
    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// Error etiquetado explícitamente como `TransientTransactionError`
    #[error("Transient transaction error: {0}")]
    TransientTransaction(String),

    #[error("No active transaction on connection '{0}'")]
    NoSuchTransaction(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    /// Commit parcial: algunas conexiones ya confirmaron cuando otra falló
    #[error("Partial commit: committed {committed:?}, failed on '{failed}': {reason}")]
    PartialCommit {
        committed: Vec<String>,
        failed: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Respuesta de error para la API
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl ErrorResponse {
    fn new(error: &str, message: String, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message,
            details: None,
            code: Some(code.to_string()),
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "Database Error",
                        "An error occurred while accessing the database".to_string(),
                        "DB_ERROR",
                    )
                    .with_details(json!({ "sql_error": e.to_string() })),
                )
            }

            AppError::Validation(e) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(
                    "Validation Error",
                    "The provided data is invalid".to_string(),
                    "VALIDATION_ERROR",
                )
                .with_details(json!(e)),
            ),

            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new("Not Found", msg, "NOT_FOUND"),
            ),

            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::new("Conflict", msg, "CONFLICT"),
            ),

            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("Bad Request", msg, "BAD_REQUEST"),
            ),

            AppError::Resolution(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::new("Resolution Error", msg, "RESOLUTION_ERROR"),
            ),

            AppError::WriteConflict(msg) | AppError::TransientTransaction(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::new("Write Conflict", msg, "WRITE_CONFLICT"),
            ),

            AppError::NoSuchTransaction(conn) => (
                StatusCode::CONFLICT,
                ErrorResponse::new(
                    "No Such Transaction",
                    format!("No active transaction on '{}'", conn),
                    "NO_SUCH_TRANSACTION",
                ),
            ),

            AppError::Cancelled => (
                StatusCode::REQUEST_TIMEOUT,
                ErrorResponse::new(
                    "Cancelled",
                    "The operation was cancelled".to_string(),
                    "CANCELLED",
                ),
            ),

            AppError::Timeout(after) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorResponse::new(
                    "Timeout",
                    format!("The operation timed out after {:?}", after),
                    "TIMEOUT",
                ),
            ),

            AppError::CircuitOpen(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::new("Service Degraded", msg, "CIRCUIT_OPEN"),
            ),

            AppError::PartialCommit {
                committed,
                failed,
                reason,
            } => {
                tracing::error!(
                    "Partial commit: committed={:?} failed={} reason={}",
                    committed,
                    failed,
                    reason
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "Partial Commit",
                        "Some connections committed before another one failed".to_string(),
                        "PARTIAL_COMMIT",
                    )
                    .with_details(json!({ "committed": committed, "failed": failed, "reason": reason })),
                )
            }

            AppError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Configuration Error", msg, "CONFIG_ERROR"),
            ),

            AppError::Serialization(e) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(
                    "Serialization Error",
                    "The document could not be (de)serialized".to_string(),
                    "SERIALIZATION_ERROR",
                )
                .with_details(json!({ "serde_error": e.to_string() })),
            ),

            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "Internal Server Error",
                        "An unexpected error occurred".to_string(),
                        "INTERNAL_ERROR",
                    )
                    .with_details(json!({ "internal_error": msg })),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Resultado tipado para operaciones que pueden fallar
pub type AppResult<T> = Result<T, AppError>;

/// Función helper para crear errores de recurso no encontrado
pub fn not_found_error(resource: &str, id: &str) -> AppError {
    AppError::NotFound(format!("{} with id '{}' not found", resource, id))
}

/// Función helper para crear errores de solicitud incorrecta
pub fn bad_request_error(message: &str) -> AppError {
    AppError::BadRequest(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error_message() {
        let err = not_found_error("Vehicle", "GJ-01-AB-1234");
        assert_eq!(
            err.to_string(),
            "Not found: Vehicle with id 'GJ-01-AB-1234' not found"
        );
    }

    #[test]
    fn test_circuit_open_maps_to_service_unavailable() {
        let response = AppError::CircuitOpen("reconciler".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_cancelled_maps_to_request_timeout() {
        let response = AppError::Cancelled.into_response();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
