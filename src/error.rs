//! Taxonomía de errores visibles para el usuario.
//!
//! Ningún error de este módulo es fatal: todos se convierten en un mensaje
//! JSON `{"error": "..."}` y la aplicación sigue operativa.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// La extracción de texto falló o no produjo contenido.
    #[error("{0}")]
    Extraction(String),

    #[error("{0}")]
    Analysis(String),

    #[error("{0}")]
    Feedback(String),

    #[error("{0}")]
    Consolidation(String),

    #[error("{0}")]
    Chat(String),

    /// Lectura/escritura de un slot de almacenamiento.
    #[error("Error de persistencia: {0}")]
    Persistence(String),

    /// Fichero rechazado en la subida (sólo se aceptan PDF).
    #[error("{0}")]
    InvalidUpload(String),

    #[error("{0}")]
    NotFound(String),

    /// Ya hay una operación equivalente en curso.
    #[error("{0}")]
    Busy(String),

    #[error("No se pudo generar el documento: {0}")]
    Export(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Extraction(_) | AppError::InvalidUpload(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Analysis(_)
            | AppError::Feedback(_)
            | AppError::Consolidation(_)
            | AppError::Chat(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(_) | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Busy(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
