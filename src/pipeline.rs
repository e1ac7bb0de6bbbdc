//! Pipelines de análisis y de feedback sobre el `Workspace`.
//!
//! Flujo del análisis:
//!   1. Filtro de subida (sólo PDF).
//!   2. Extracción de texto; vacío = error de extracción.
//!   3. Análisis estructurado con el modelo. Sin reintentos.
//!   4. Alta en el historial (sustituye la entrada con el mismo nombre).
//!
//! Ninguno de estos pasos dispara la consolidación: quien llame decide cuándo
//! ejecutar `refresh_consolidation` tras la mutación.

use chrono::Utc;
use tracing::info;

use crate::{
    error::{AppError, AppResult},
    extract::ensure_pdf,
    models::{HistoryItem, ReportFeedback},
    workspace::{not_found, ActiveView, Workspace},
};

impl Workspace {
    pub async fn analyze_upload(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> AppResult<HistoryItem> {
        ensure_pdf(file_name, content_type, bytes)?;
        let text = self.extractor.extract(bytes).await?;
        let analysis = self.ai.analyze_report(&text).await?;

        let item = HistoryItem::new(
            file_name,
            bytes,
            text,
            analysis,
            Utc::now().timestamp_millis(),
        );
        let mut state = self.lock();
        state.history.insert(item.clone());
        state.active = Some(ActiveView::from(&item));
        info!(
            "Reporte '{}' analizado como {}.",
            item.file_name, item.analysis_result.detected_role
        );
        Ok(item)
    }

    /// Vuelve a analizar un reporte del historial a partir de su fichero
    /// original. El resultado sustituye a la entrada anterior.
    pub async fn reanalyze(&self, id: &str) -> AppResult<HistoryItem> {
        let (file_name, bytes) = self.stored_file(id)?;
        self.analyze_upload(&file_name, None, &bytes).await
    }

    /// Pide la evaluación de calidad de un reporte y la adjunta a su entrada.
    pub async fn request_feedback(&self, id: &str) -> AppResult<ReportFeedback> {
        let (file_name, bytes) = self.stored_file(id)?;
        let text = self.extractor.extract(&bytes).await?;
        let feedback = self.ai.report_feedback(&text).await?;

        let mut state = self.lock();
        if !state.history.attach_feedback(&file_name, feedback.clone()) {
            return Err(AppError::NotFound(format!(
                "'{file_name}' se eliminó del historial antes de recibir el feedback."
            )));
        }
        if let Some(view) = state.active.as_mut().filter(|v| v.file_name == file_name) {
            view.report_feedback = Some(feedback.clone());
        }
        info!(
            "Feedback de '{file_name}': {}/10.",
            feedback.quality_evaluation.score
        );
        Ok(feedback)
    }

    fn stored_file(&self, id: &str) -> AppResult<(String, Vec<u8>)> {
        let state = self.lock();
        let item = state.history.get(id).ok_or_else(|| not_found(id))?;
        let bytes = item.file_bytes().map_err(|e| {
            AppError::Extraction(format!(
                "El fichero guardado de '{}' está dañado: {e}",
                item.file_name
            ))
        })?;
        Ok((item.file_name.clone(), bytes))
    }
}
