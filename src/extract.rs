//! Extracción de texto de los PDF subidos.

use async_trait::async_trait;
use mime_guess::MimeGuess;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> AppResult<String>;
}

/// Extractor basado en `pdf-extract`. El parseo es síncrono, así que se hace
/// en el pool de tareas bloqueantes de tokio.
#[derive(Debug, Clone, Default)]
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, bytes: &[u8]) -> AppResult<String> {
        let owned = bytes.to_vec();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned))
            .await
            .map_err(|e| AppError::Extraction(format!("La extracción se interrumpió: {e}")))?
            .map_err(|e| {
                warn!("No se pudo extraer texto del PDF: {e}");
                AppError::Extraction(format!("No se pudo leer el PDF: {e}"))
            })?;
        debug!("Extraídos {} caracteres del PDF", text.len());
        non_empty(text)
    }
}

/// Un texto vacío o sólo con espacios cuenta como extracción fallida.
pub fn non_empty(text: String) -> AppResult<String> {
    if text.trim().is_empty() {
        Err(AppError::Extraction(
            "No se pudo extraer texto del PDF o el archivo está vacío.".to_string(),
        ))
    } else {
        Ok(text)
    }
}

/// Filtro de subida: sólo PDF. Se comprueba la extensión, el tipo declarado
/// (si lo hay) y la firma `%PDF-` del contenido.
pub fn ensure_pdf(file_name: &str, content_type: Option<&str>, bytes: &[u8]) -> AppResult<()> {
    let reject = |reason: &str| {
        Err(AppError::InvalidUpload(format!(
            "'{file_name}' no es un PDF válido ({reason}). Sólo se aceptan ficheros PDF."
        )))
    };

    let guessed = MimeGuess::from_path(file_name).first();
    if guessed.map(|m| m.essence_str() != "application/pdf").unwrap_or(true) {
        return reject("extensión no admitida");
    }
    if let Some(declared) = content_type {
        let declared = declared.split(';').next().unwrap_or_default().trim();
        if !declared.is_empty()
            && declared != "application/pdf"
            && declared != "application/octet-stream"
        {
            return reject("tipo de contenido no admitido");
        }
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return reject("contenido sin cabecera PDF");
    }
    Ok(())
}
