use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    app_state::AppState,
    consolidation::ConsolidationView,
    error::{AppError, AppResult},
    export, pdf,
    models::{ChatMessage, ReportFeedback},
    workspace::{ActiveView, HistorySummary},
};

/// Tamaño máximo aceptado para un PDF subido.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    question: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    answer: ChatMessage,
    transcript: Vec<ChatMessage>,
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum ExportFormat {
    Markdown,
    Pdf,
}

impl ExportFormat {
    fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "md" | "markdown" => Ok(Self::Markdown),
            "pdf" => Ok(Self::Pdf),
            other => Err(AppError::NotFound(format!(
                "Formato de exportación no soportado: {other}"
            ))),
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Pdf => "pdf",
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Pdf => "application/pdf",
        }
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/info", get(info_handler))
        .route("/api/history", get(history_handler))
        .route(
            "/api/reports",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/reports/:id",
            get(view_report_handler).delete(delete_report_handler),
        )
        .route("/api/reports/:id/reanalyze", post(reanalyze_handler))
        .route("/api/reports/:id/feedback", post(feedback_handler))
        .route("/api/reports/:id/file", get(report_file_handler))
        .route("/api/reports/:id/export/:format", get(export_report_handler))
        .route("/api/active", get(active_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/consolidated", get(consolidated_handler))
        .route("/api/consolidated/refresh", post(refresh_consolidated_handler))
        .route(
            "/api/consolidated/chat",
            get(chat_transcript_handler).post(chat_handler),
        )
        .route(
            "/api/consolidated/export/:format",
            get(export_consolidated_handler),
        )
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "provider": format!("{:?}", state.config.llm_provider),
        "analysisModel": state.config.llm_analysis_model,
        "strategyModel": state.config.llm_strategy_model,
        "dataDir": state.config.data_dir,
    }))
}

#[axum::debug_handler]
async fn history_handler(State(state): State<AppState>) -> Json<Vec<HistorySummary>> {
    Json(state.workspace.history())
}

#[axum::debug_handler]
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<ActiveView>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidUpload(format!("Subida inválida: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::InvalidUpload("El fichero no tiene nombre.".to_string()))?;
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidUpload(format!("No se pudo leer el fichero: {e}")))?;

        info!("Subida recibida: {file_name} ({} bytes)", bytes.len());
        let item = state
            .workspace
            .analyze_upload(&file_name, content_type.as_deref(), &bytes)
            .await?;
        state.workspace.spawn_consolidation();
        return Ok(Json(ActiveView::from(&item)));
    }
    Err(AppError::InvalidUpload(
        "No se recibió ningún fichero en el campo 'file'.".to_string(),
    ))
}

#[axum::debug_handler]
async fn view_report_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ActiveView>> {
    Ok(Json(state.workspace.view(&id)?))
}

#[axum::debug_handler]
async fn delete_report_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.workspace.delete(&id)?;
    state.workspace.spawn_consolidation();
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn reanalyze_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ActiveView>> {
    let item = state.workspace.reanalyze(&id).await?;
    state.workspace.spawn_consolidation();
    Ok(Json(ActiveView::from(&item)))
}

#[axum::debug_handler]
async fn feedback_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ReportFeedback>> {
    let feedback = state.workspace.request_feedback(&id).await?;
    state.workspace.spawn_consolidation();
    Ok(Json(feedback))
}

#[axum::debug_handler]
async fn report_file_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let item = state.workspace.item(&id)?;
    let bytes = item
        .file_bytes()
        .map_err(|e| AppError::Export(format!("fichero guardado dañado: {e}")))?;
    Ok(file_response(bytes, "application/pdf", &item.file_name, false))
}

#[axum::debug_handler]
async fn export_report_handler(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> AppResult<Response> {
    let format = ExportFormat::parse(&format)?;
    let item = state.workspace.item(&id)?;
    let feedback = item.report_feedback.as_ref();
    let bytes = match format {
        ExportFormat::Markdown => {
            export::analysis_markdown(&item.analysis_result, &item.file_name, feedback).into_bytes()
        }
        ExportFormat::Pdf => pdf::analysis_pdf(&item.analysis_result, &item.file_name, feedback)
            .map_err(|e| AppError::Export(e.to_string()))?,
    };
    let name = export::analysis_download_name(&item.file_name, format.extension());
    Ok(file_response(bytes, format.content_type(), &name, true))
}

#[axum::debug_handler]
async fn active_handler(State(state): State<AppState>) -> Json<Option<ActiveView>> {
    Json(state.workspace.active())
}

#[axum::debug_handler]
async fn reset_handler(State(state): State<AppState>) -> StatusCode {
    state.workspace.reset();
    StatusCode::NO_CONTENT
}

#[axum::debug_handler]
async fn consolidated_handler(State(state): State<AppState>) -> Json<ConsolidationView> {
    Json(state.workspace.consolidation())
}

/// Reintento explícito tras un fallo de consolidación.
#[axum::debug_handler]
async fn refresh_consolidated_handler(State(state): State<AppState>) -> Json<ConsolidationView> {
    state.workspace.spawn_consolidation();
    Json(state.workspace.consolidation())
}

#[axum::debug_handler]
async fn chat_transcript_handler(State(state): State<AppState>) -> Json<Vec<ChatMessage>> {
    Json(state.workspace.chat_transcript())
}

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> AppResult<Json<ChatResponse>> {
    let answer = state.workspace.ask(&payload.question).await?;
    Ok(Json(ChatResponse {
        answer,
        transcript: state.workspace.chat_transcript(),
    }))
}

#[axum::debug_handler]
async fn export_consolidated_handler(
    State(state): State<AppState>,
    Path(format): Path<String>,
) -> AppResult<Response> {
    let format = ExportFormat::parse(&format)?;
    let analysis = state.workspace.consolidation().analysis.ok_or_else(|| {
        AppError::NotFound("Todavía no hay un análisis consolidado disponible.".to_string())
    })?;
    let bytes = match format {
        ExportFormat::Markdown => export::consolidated_markdown(&analysis).into_bytes(),
        ExportFormat::Pdf => {
            pdf::consolidated_pdf(&analysis).map_err(|e| AppError::Export(e.to_string()))?
        }
    };
    let name = export::consolidated_download_name(export::today(), format.extension());
    Ok(file_response(bytes, format.content_type(), &name, true))
}

// --- Handler de Apagado y Utilidades ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

fn file_response(bytes: Vec<u8>, content_type: &'static str, file_name: &str, download: bool) -> Response {
    let disposition = content_disposition(file_name, download);
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

/// `filename` en ASCII para clientes antiguos y `filename*` (RFC 5987) con
/// el nombre real.
fn content_disposition(file_name: &str, download: bool) -> String {
    let kind = if download { "attachment" } else { "inline" };
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::new();
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("{kind}; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}
