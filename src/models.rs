//! Modelos de dominio: resultados del análisis, feedback, historial y chat.
//!
//! Los nombres de campo se serializan en camelCase porque ése es el formato
//! persistido en el slot de historial.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const PDF_DATA_URL_PREFIX: &str = "data:application/pdf;base64,";

/// Departamento al que va dirigido un reporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ReportRole {
    Marketing,
    #[serde(rename = "Administración")]
    Administracion,
    #[serde(rename = "Soporte y Herramientas")]
    SoporteYHerramientas,
    #[serde(rename = "Análisis")]
    Analisis,
    General,
}

/// Departamentos necesarios para el análisis consolidado, en el orden en que
/// se envían al modelo.
pub const REQUIRED_ROLES: [ReportRole; 4] = [
    ReportRole::Marketing,
    ReportRole::Administracion,
    ReportRole::SoporteYHerramientas,
    ReportRole::Analisis,
];

impl ReportRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportRole::Marketing => "Marketing",
            ReportRole::Administracion => "Administración",
            ReportRole::SoporteYHerramientas => "Soporte y Herramientas",
            ReportRole::Analisis => "Análisis",
            ReportRole::General => "General",
        }
    }
}

impl std::fmt::Display for ReportRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    /// El nombre de la métrica (por ejemplo, "Tasa de Conversión", "Estabilidad del Desempeño").
    pub metric: String,
    /// El valor de la métrica (por ejemplo, "15.2%", "Sólida", "8.5/10").
    pub value: String,
    /// Breve contexto o cambio si está disponible (por ejemplo, "+5% MoM", "vs. Q2").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Análisis estructurado de un reporte. Inmutable una vez producido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Clasificación del reporte: Marketing, Administración, Soporte y Herramientas, Análisis o General.
    pub detected_role: ReportRole,
    /// Resumen ejecutivo conciso y profesional del informe.
    pub summary: String,
    /// Métricas clave más relevantes extraídas del informe.
    pub key_metrics: Vec<Metric>,
    /// De 3 a 5 recomendaciones específicas y accionables.
    pub recommendations: Vec<String>,
    /// De 2 a 4 logros o puntos positivos a destacar.
    pub achievements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AreaForImprovement {
    /// El aspecto a mejorar (ej. "Visualización de Datos").
    pub point: String,
    /// Por qué es un área de mejora y cómo abordarla.
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityEvaluation {
    /// Puntuación de 1 a 10 sobre la calidad general del reporte.
    pub score: i64,
    /// Resumen conciso que justifica la puntuación.
    pub summary: String,
}

/// Evaluación de calidad de un reporte, adjuntada a posteriori.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportFeedback {
    /// Análisis de estructura, claridad, presentación de datos y profesionalismo.
    pub detailed_analysis: String,
    /// De 2 a 4 áreas específicas de mejora.
    pub areas_for_improvement: Vec<AreaForImprovement>,
    pub quality_evaluation: QualityEvaluation,
    /// De 2 a 3 sugerencias concretas para futuras versiones del reporte.
    pub optimization_suggestions: Vec<String>,
}

/// Síntesis estratégica entre departamentos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedAnalysis {
    /// Resumen ejecutivo de alto nivel con la visión global del negocio.
    pub strategic_summary: String,
    /// De 2 a 4 insights que surgen de combinar información entre departamentos.
    pub cross_department_insights: Vec<String>,
    /// De 3 a 5 recomendaciones estratégicas para el negocio.
    pub business_recommendations: Vec<String>,
}

/// Entrada del historial persistido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub file_name: String,
    /// Data URL `data:application/pdf;base64,...` con el fichero original.
    pub file_content: String,
    pub extracted_text: String,
    pub analysis_result: AnalysisResult,
    #[serde(default)]
    pub report_feedback: Option<ReportFeedback>,
    /// Milisegundos desde epoch.
    pub timestamp: i64,
}

impl HistoryItem {
    pub fn new(
        file_name: &str,
        bytes: &[u8],
        extracted_text: String,
        analysis_result: AnalysisResult,
        timestamp: i64,
    ) -> Self {
        Self {
            id: format!("{timestamp}-{file_name}"),
            file_name: file_name.to_string(),
            file_content: encode_pdf_data_url(bytes),
            extracted_text,
            analysis_result,
            report_feedback: None,
            timestamp,
        }
    }

    pub fn file_bytes(&self) -> Result<Vec<u8>, String> {
        decode_pdf_data_url(&self.file_content)
    }
}

/// Par (departamento, texto) que alimenta el análisis consolidado.
#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentReport {
    pub role: ReportRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

/// Estado de un mensaje dentro del turno en que se creó.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    #[default]
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    #[serde(default)]
    pub status: TurnStatus,
}

pub fn encode_pdf_data_url(bytes: &[u8]) -> String {
    format!("{PDF_DATA_URL_PREFIX}{}", BASE64.encode(bytes))
}

/// Acepta cualquier data URL base64 (el MIME declarado no se comprueba).
pub fn decode_pdf_data_url(data_url: &str) -> Result<Vec<u8>, String> {
    let payload = match data_url.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") && header.ends_with(";base64") => {
            payload
        }
        Some(_) => return Err("Cabecera de data URL no reconocida".to_string()),
        None => data_url,
    };
    BASE64
        .decode(payload.trim())
        .map_err(|e| format!("Contenido base64 inválido: {e}"))
}

// --- Validación de las respuestas del modelo ---

fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("el campo '{field}' está vacío"))
    } else {
        Ok(())
    }
}

impl AnalysisResult {
    pub fn validate(&self) -> Result<(), String> {
        require_text("summary", &self.summary)?;
        for (i, m) in self.key_metrics.iter().enumerate() {
            require_text(&format!("keyMetrics[{i}].metric"), &m.metric)?;
            require_text(&format!("keyMetrics[{i}].value"), &m.value)?;
        }
        Ok(())
    }
}

impl ReportFeedback {
    pub fn validate(&self) -> Result<(), String> {
        require_text("detailedAnalysis", &self.detailed_analysis)?;
        require_text("qualityEvaluation.summary", &self.quality_evaluation.summary)?;
        if !(1..=10).contains(&self.quality_evaluation.score) {
            return Err(format!(
                "qualityEvaluation.score fuera de rango (1-10): {}",
                self.quality_evaluation.score
            ));
        }
        for (i, area) in self.areas_for_improvement.iter().enumerate() {
            require_text(&format!("areasForImprovement[{i}].point"), &area.point)?;
        }
        Ok(())
    }
}

impl ConsolidatedAnalysis {
    pub fn validate(&self) -> Result<(), String> {
        require_text("strategicSummary", &self.strategic_summary)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn sample_analysis(role: ReportRole) -> AnalysisResult {
        AnalysisResult {
            detected_role: role,
            summary: format!("Resumen {role}"),
            key_metrics: vec![Metric {
                metric: "Leads".into(),
                value: "120".into(),
                context: Some("+5% MoM".into()),
            }],
            recommendations: vec!["Invertir en SEO".into()],
            achievements: vec!["Récord de ventas".into()],
        }
    }

    pub fn history_item(file_name: &str, role: ReportRole, timestamp: i64) -> HistoryItem {
        HistoryItem::new(
            file_name,
            b"%PDF-1.4 fixture",
            format!("Texto de {file_name}"),
            sample_analysis(role),
            timestamp,
        )
    }

    pub fn sample_feedback(score: i64) -> ReportFeedback {
        ReportFeedback {
            detailed_analysis: "Estructura clara".into(),
            areas_for_improvement: vec![AreaForImprovement {
                point: "Visualización de Datos".into(),
                explanation: "Faltan gráficos".into(),
            }],
            quality_evaluation: QualityEvaluation {
                score,
                summary: "Buen reporte".into(),
            },
            optimization_suggestions: vec!["Añadir comparativa trimestral".into()],
        }
    }

    pub fn sample_consolidated() -> ConsolidatedAnalysis {
        ConsolidatedAnalysis {
            strategic_summary: "El negocio crece".into(),
            cross_department_insights: vec!["Marketing presiona a Soporte".into()],
            business_recommendations: vec!["Reforzar Soporte".into()],
        }
    }
}
