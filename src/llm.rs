//! Abstracción sobre Rig para las cuatro peticiones al modelo generativo:
//! análisis de reporte, feedback de calidad, consolidación y preguntas.
//!
//! Las respuestas estructuradas se piden en JSON con el esquema generado por
//! `schemars` y se validan antes de construir el registro de dominio. Una
//! respuesta que no encaja es un error, nunca se acepta parcialmente.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{error, info};

use crate::{
    config::{AppConfig, LlmProvider},
    error::{AppError, AppResult},
    models::{
        AnalysisResult, ChatMessage, ChatRole, ConsolidatedAnalysis, DepartmentReport,
        ReportFeedback,
    },
};

/// Caracteres de cada reporte que se envían a la consolidación.
const CONSOLIDATION_TEXT_LIMIT: usize = 3000;

#[async_trait]
pub trait ReportAi: Send + Sync {
    async fn analyze_report(&self, text: &str) -> AppResult<AnalysisResult>;
    async fn report_feedback(&self, text: &str) -> AppResult<ReportFeedback>;
    async fn consolidate(&self, reports: &[DepartmentReport]) -> AppResult<ConsolidatedAnalysis>;
    async fn ask_question(
        &self,
        context: &ConsolidatedAnalysis,
        history: &[ChatMessage],
        question: &str,
    ) -> AppResult<String>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub analysis_model: String,
    pub strategy_model: String,
    pub timeout: Duration,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider,
            analysis_model: cfg.llm_analysis_model.clone(),
            strategy_model: cfg.llm_strategy_model.clone(),
            timeout: cfg.llm_timeout,
        }
    }

    /// Lanza un prompt con límite de tiempo.
    async fn complete(
        &self,
        model: &str,
        preamble: &str,
        temperature: f64,
        prompt: &str,
    ) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.complete_unbounded(model, preamble, temperature, prompt)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "el modelo {model} no respondió en {}s",
                self.timeout.as_secs()
            )),
        }
    }

    async fn complete_unbounded(
        &self,
        model: &str,
        preamble: &str,
        temperature: f64,
        prompt: &str,
    ) -> Result<String> {
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        info!("Petición a {:?}/{model} ({} caracteres)", self.provider, prompt.len());
        let answer = match self.provider {
            LlmProvider::OpenAI => {
                let client = rig::providers::openai::Client::from_env();
                let agent = client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(temperature)
                    .build();
                agent.prompt(prompt).await?
            }
            LlmProvider::Gemini => {
                let client = rig::providers::gemini::Client::from_env();
                let agent = client
                    .agent(model)
                    .preamble(preamble)
                    .temperature(temperature)
                    .build();
                agent.prompt(prompt).await?
            }
        };
        Ok(answer)
    }

    async fn complete_structured<T>(
        &self,
        model: &str,
        preamble: &str,
        temperature: f64,
        prompt: &str,
    ) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let instructions = format!("{preamble}\n{}", json_output_instructions::<T>()?);
        let response = self.complete(model, &instructions, temperature, prompt).await?;
        parse_structured(&response)
    }
}

#[async_trait]
impl ReportAi for LlmManager {
    async fn analyze_report(&self, text: &str) -> AppResult<AnalysisResult> {
        let result: Result<AnalysisResult> = async {
            let analysis: AnalysisResult = self
                .complete_structured(&self.analysis_model, ANALYSIS_PROMPT, 0.2, &report_body(text))
                .await?;
            analysis.validate().map_err(|e| anyhow!(e))?;
            Ok(analysis)
        }
        .await;
        result.map_err(|e| {
            error!("Error llamando al modelo para el análisis: {e:#}");
            AppError::Analysis(
                "No se pudo obtener una respuesta válida del servicio de IA. Inténtalo de nuevo."
                    .to_string(),
            )
        })
    }

    async fn report_feedback(&self, text: &str) -> AppResult<ReportFeedback> {
        let result: Result<ReportFeedback> = async {
            let feedback: ReportFeedback = self
                .complete_structured(&self.analysis_model, FEEDBACK_PROMPT, 0.3, &report_body(text))
                .await?;
            feedback.validate().map_err(|e| anyhow!(e))?;
            Ok(feedback)
        }
        .await;
        result.map_err(|e| {
            error!("Error llamando al modelo para el feedback: {e:#}");
            AppError::Feedback(
                "No se pudo obtener una respuesta válida del servicio de IA para el feedback."
                    .to_string(),
            )
        })
    }

    async fn consolidate(&self, reports: &[DepartmentReport]) -> AppResult<ConsolidatedAnalysis> {
        let result: Result<ConsolidatedAnalysis> = async {
            let analysis: ConsolidatedAnalysis = self
                .complete_structured(
                    &self.strategy_model,
                    CONSOLIDATION_PROMPT,
                    0.5,
                    &consolidation_body(reports),
                )
                .await?;
            analysis.validate().map_err(|e| anyhow!(e))?;
            Ok(analysis)
        }
        .await;
        result.map_err(|e| {
            error!("Error llamando al modelo para la consolidación: {e:#}");
            AppError::Consolidation(
                "No se pudo generar el análisis consolidado desde el servicio de IA.".to_string(),
            )
        })
    }

    async fn ask_question(
        &self,
        context: &ConsolidatedAnalysis,
        history: &[ChatMessage],
        question: &str,
    ) -> AppResult<String> {
        let prompt = chat_body(context, history, question);
        match self.complete(&self.strategy_model, CHAT_PROMPT, 0.4, &prompt).await {
            Ok(answer) if !answer.trim().is_empty() => Ok(answer.trim().to_string()),
            Ok(_) => Err(AppError::Chat(
                "El asistente de IA devolvió una respuesta vacía.".to_string(),
            )),
            Err(e) => {
                error!("Error llamando al modelo para la pregunta: {e:#}");
                Err(AppError::Chat(
                    "No se pudo obtener una respuesta del asistente de IA.".to_string(),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------
// PROMPTS
// ---------------------------------------------------------------------

const ANALYSIS_PROMPT: &str = r#"
Tu tarea es actuar como un analista de negocios experto. Primero, clasifica el tipo de reporte en una de las siguientes categorías: Marketing, Administración (reportes sobre el estado del personal, ingresos y egresos de miembros, contabilidad general, o gestión de recursos como estudiantes o inscripciones), Soporte y Herramientas (reportes que combinan atención al cliente, tickets, satisfacción con infraestructura de TI y herramientas internas), Análisis (reportes de desempeño de equipos de trading, que incluye seguimiento de operadores, su estado anímico, y análisis de señales de mercado), o General (si no encaja claramente en los otros).

Luego, analiza el texto extraído de un reporte de negocio y proporciona un análisis completo en el formato JSON especificado. Sé preciso, profesional y extrae la información más relevante. Para reportes de tipo 'Análisis' que son cualitativos, las métricas clave pueden ser abstractas (ej. 'Compromiso del Equipo', 'Estado Anímico') con valores descriptivos (ej. 'Alto', 'En recuperación'). Presta especial atención a los detalles cualitativos sobre el desempeño y estado anímico del personal.
"#;

const FEEDBACK_PROMPT: &str = r#"
Actúa como un consultor de comunicación y análisis de datos. Evalúa la calidad del reporte de negocio. Tu feedback debe ser constructivo, profesional y orientado a la mejora. Proporciona una evaluación completa en el formato JSON especificado. Considera la claridad, la estructura, la presentación de datos y la efectividad de las conclusiones. La puntuación es un entero de 1 a 10.
"#;

const CONSOLIDATION_PROMPT: &str = r#"
Actúa como un Director de Estrategia (Chief Strategy Officer). Has recibido reportes de varios departamentos clave. Tu tarea es analizarlos en conjunto para crear un análisis consolidado que ofrezca una visión estratégica del negocio. Identifica sinergias, conflictos, tendencias emergentes y oportunidades. Proporciona tu análisis en el formato JSON especificado.
"#;

const CHAT_PROMPT: &str = r#"
Eres un Asistente de Estrategia de IA. Tu propósito es responder preguntas basadas ÚNICAMENTE en el análisis consolidado y el historial de conversación que se te proporciona. Sé conciso, directo y mantente dentro del contexto de los datos. No inventes información.
"#;

fn json_output_instructions<T: JsonSchema>() -> Result<String> {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(T))?;
    Ok(format!(
        "La salida DEBE ser un único objeto JSON válido que cumpla este esquema:\n{schema}\nNo incluyas explicaciones, solo el JSON."
    ))
}

fn report_body(text: &str) -> String {
    format!("Texto del reporte:\n---\n{text}\n---")
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn consolidation_body(reports: &[DepartmentReport]) -> String {
    let sections: Vec<String> = reports
        .iter()
        .map(|r| {
            format!(
                "--- DEPARTAMENTO: {role} ---\n{text}...\n--- FIN DEPARTAMENTO: {role} ---",
                role = r.role,
                text = truncate_chars(&r.text, CONSOLIDATION_TEXT_LIMIT)
            )
        })
        .collect();
    format!("Textos de los reportes:\n{}", sections.join("\n\n"))
}

/// Aplana el análisis consolidado a texto plano para usarlo como contexto.
pub fn flatten_context(context: &ConsolidatedAnalysis) -> String {
    format!(
        "Resumen Estratégico: {}\nInsights Clave: {}\nRecomendaciones de Negocio: {}",
        context.strategic_summary,
        context.cross_department_insights.join("; "),
        context.business_recommendations.join("; ")
    )
}

pub fn flatten_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|msg| {
            let speaker = match msg.role {
                ChatRole::User => "Usuario",
                ChatRole::Model => "Asistente",
            };
            format!("{speaker}: {}", msg.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn chat_body(context: &ConsolidatedAnalysis, history: &[ChatMessage], question: &str) -> String {
    format!(
        "--- CONTEXTO DEL ANÁLISIS CONSOLIDADO ---\n{}\n--- FIN DEL CONTEXTO ---\n\n\
         --- HISTORIAL DE LA CONVERSACIÓN ---\n{}\n--- FIN DEL HISTORIAL ---\n\n\
         Pregunta del usuario: \"{question}\"\n\nResponde directamente a la pregunta del usuario.",
        flatten_context(context),
        flatten_history(history)
    )
}

/// Limpia la respuesta del LLM (bloques ```json) y la parsea de forma estricta.
pub fn parse_structured<T: DeserializeOwned>(response: &str) -> Result<T> {
    let json_response = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str::<T>(json_response)
        .map_err(|e| anyhow!("respuesta JSON inválida: {e}. Respuesta LLM: '{response}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures::sample_consolidated, ReportRole, TurnStatus};

    #[test]
    fn parses_fenced_analysis() {
        let response = r#"```json
{"detectedRole":"Soporte y Herramientas","summary":"Tickets estables",
 "keyMetrics":[{"metric":"CSAT","value":"92%"}],
 "recommendations":["Automatizar"],"achievements":["Menos incidencias"]}
```"#;
        let analysis: AnalysisResult = parse_structured(response).unwrap();
        assert_eq!(analysis.detected_role, ReportRole::SoporteYHerramientas);
        assert_eq!(analysis.key_metrics[0].context, None);
    }

    #[test]
    fn shape_mismatch_is_a_hard_failure() {
        let missing_field = r#"{"detectedRole":"Marketing","summary":"x","keyMetrics":[],"recommendations":[]}"#;
        assert!(parse_structured::<AnalysisResult>(missing_field).is_err());
        let bad_role = r#"{"detectedRole":"Ventas","summary":"x","keyMetrics":[],"recommendations":[],"achievements":[]}"#;
        assert!(parse_structured::<AnalysisResult>(bad_role).is_err());
        let float_score = r#"{"detailedAnalysis":"x","areasForImprovement":[],
            "qualityEvaluation":{"score":7.5,"summary":"y"},"optimizationSuggestions":[]}"#;
        assert!(parse_structured::<ReportFeedback>(float_score).is_err());
    }

    #[test]
    fn schema_instructions_name_the_fields() {
        let text = json_output_instructions::<ReportFeedback>().unwrap();
        assert!(text.contains("qualityEvaluation"));
        assert!(text.contains("optimizationSuggestions"));
    }

    #[test]
    fn consolidation_body_truncates_each_report() {
        let reports = vec![
            DepartmentReport {
                role: ReportRole::Marketing,
                text: "ñ".repeat(CONSOLIDATION_TEXT_LIMIT + 50),
            },
            DepartmentReport {
                role: ReportRole::Analisis,
                text: "corto".into(),
            },
        ];
        let body = consolidation_body(&reports);
        assert!(body.contains("--- DEPARTAMENTO: Marketing ---"));
        assert!(body.contains("--- FIN DEPARTAMENTO: Análisis ---"));
        assert_eq!(body.matches('ñ').count(), CONSOLIDATION_TEXT_LIMIT);
        assert!(body.find("Marketing").unwrap() < body.find("Análisis").unwrap());
    }

    #[test]
    fn chat_body_flattens_context_and_transcript() {
        let history = vec![
            ChatMessage {
                role: ChatRole::User,
                text: "¿Y Soporte?".into(),
                status: TurnStatus::Confirmed,
            },
            ChatMessage {
                role: ChatRole::Model,
                text: "Saturado.".into(),
                status: TurnStatus::Confirmed,
            },
        ];
        let body = chat_body(&sample_consolidated(), &history, "¿Qué hacemos?");
        assert!(body.contains("Resumen Estratégico: El negocio crece"));
        assert!(body.contains("Usuario: ¿Y Soporte?\nAsistente: Saturado."));
        assert!(body.contains("Pregunta del usuario: \"¿Qué hacemos?\""));
    }
}
