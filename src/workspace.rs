//! Contexto explícito de la aplicación: historial, caché de consolidación,
//! conversación y vista activa detrás de un único mutex.
//!
//! El mutex nunca se mantiene durante una llamada externa. Cada operación
//! toma una instantánea bajo el lock, suelta el lock para llamar al modelo y
//! vuelve a tomarlo para aplicar el resultado.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    chat::{ChatSession, TurnTicket},
    consolidation::{Consolidation, ConsolidationView, TriggerAction},
    error::{AppError, AppResult},
    extract::TextExtractor,
    history::HistoryStore,
    llm::ReportAi,
    models::{AnalysisResult, ChatMessage, ChatRole, HistoryItem, ReportFeedback, ReportRole, TurnStatus},
    storage::KvStore,
};

/// Reporte que se está mostrando.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveView {
    pub id: String,
    pub file_name: String,
    pub analysis_result: AnalysisResult,
    pub report_feedback: Option<ReportFeedback>,
}

impl From<&HistoryItem> for ActiveView {
    fn from(item: &HistoryItem) -> Self {
        Self {
            id: item.id.clone(),
            file_name: item.file_name.clone(),
            analysis_result: item.analysis_result.clone(),
            report_feedback: item.report_feedback.clone(),
        }
    }
}

/// Entrada del listado de historial, sin el contenido del fichero.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub id: String,
    pub file_name: String,
    pub detected_role: ReportRole,
    pub timestamp: i64,
    pub has_feedback: bool,
}

pub(crate) struct WorkspaceState {
    pub history: HistoryStore,
    pub consolidation: Consolidation,
    pub chat: ChatSession,
    pub active: Option<ActiveView>,
}

pub struct Workspace {
    pub(crate) ai: Arc<dyn ReportAi>,
    pub(crate) extractor: Arc<dyn TextExtractor>,
    state: Mutex<WorkspaceState>,
}

impl Workspace {
    pub fn new(
        kv: Arc<dyn KvStore>,
        ai: Arc<dyn ReportAi>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let state = WorkspaceState {
            history: HistoryStore::load(kv.clone()),
            consolidation: Consolidation::load(kv),
            chat: ChatSession::default(),
            active: None,
        };
        Self {
            ai,
            extractor,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn history(&self) -> Vec<HistorySummary> {
        self.lock()
            .history
            .items()
            .iter()
            .map(|item| HistorySummary {
                id: item.id.clone(),
                file_name: item.file_name.clone(),
                detected_role: item.analysis_result.detected_role,
                timestamp: item.timestamp,
                has_feedback: item.report_feedback.is_some(),
            })
            .collect()
    }

    pub fn item(&self, id: &str) -> AppResult<HistoryItem> {
        self.lock().history.get(id).cloned().ok_or_else(|| not_found(id))
    }

    /// Abre un reporte del historial en la vista activa.
    pub fn view(&self, id: &str) -> AppResult<ActiveView> {
        let mut state = self.lock();
        let view = state
            .history
            .get(id)
            .map(ActiveView::from)
            .ok_or_else(|| not_found(id))?;
        state.active = Some(view.clone());
        Ok(view)
    }

    pub fn active(&self) -> Option<ActiveView> {
        self.lock().active.clone()
    }

    pub fn reset(&self) {
        self.lock().active = None;
    }

    /// Borra un reporte. Si era el activo, la vista vuelve al estado inicial.
    pub fn delete(&self, id: &str) -> AppResult<HistoryItem> {
        let mut state = self.lock();
        let removed = state.history.remove(id).ok_or_else(|| not_found(id))?;
        if state.active.as_ref().is_some_and(|view| view.id == removed.id) {
            state.active = None;
        }
        info!("Reporte '{}' eliminado del historial.", removed.file_name);
        Ok(removed)
    }

    pub fn consolidation(&self) -> ConsolidationView {
        let state = self.lock();
        state.consolidation.view(state.history.items())
    }

    pub fn chat_transcript(&self) -> Vec<ChatMessage> {
        self.lock().chat.messages().to_vec()
    }

    /// Evalúa el disparador de consolidación y, si procede, lanza la
    /// petición. Es seguro llamarlo tras cada mutación del historial: con una
    /// petición en vuelo o la caché al día no hace nada.
    pub async fn refresh_consolidation(&self) {
        loop {
            let (reports, last_analysis_time) = {
                let mut guard = self.lock();
                let state = &mut *guard;
                match state.consolidation.plan(state.history.items()) {
                    TriggerAction::Nothing => return,
                    TriggerAction::Cleared => {
                        state.chat.reset();
                        return;
                    }
                    TriggerAction::Request {
                        reports,
                        last_analysis_time,
                    } => (reports, last_analysis_time),
                }
            };

            info!("Solicitando análisis consolidado (as of {last_analysis_time}).");
            let result = self.ai.consolidate(&reports).await;
            let failed = result.is_err();

            {
                let mut guard = self.lock();
                let state = &mut *guard;
                if state
                    .consolidation
                    .complete(state.history.items(), last_analysis_time, result)
                {
                    state.chat.reset();
                }
            }

            if failed {
                return;
            }
            debug!("Reevaluando consolidación tras la respuesta.");
        }
    }

    /// Lanza `refresh_consolidation` en segundo plano.
    pub fn spawn_consolidation(self: &Arc<Self>) {
        let workspace = Arc::clone(self);
        tokio::spawn(async move {
            workspace.refresh_consolidation().await;
        });
    }

    /// Pregunta sobre el análisis consolidado en caché.
    pub async fn ask(&self, question: &str) -> AppResult<ChatMessage> {
        let (ticket, prior, context) = {
            let mut state = self.lock();
            let context = state.consolidation.cached().cloned().ok_or_else(|| {
                AppError::NotFound("Todavía no hay un análisis consolidado disponible.".to_string())
            })?;
            let (ticket, prior) = state.chat.begin_turn(question)?;
            (ticket, prior, context)
        };
        let turn = OpenTurn {
            workspace: self,
            ticket: Some(ticket),
        };

        let result = self.ai.ask_question(&context, &prior, question.trim()).await;

        let applied = turn.close(result.as_ref().map(String::clone));
        let text = result?;
        if !applied {
            return Err(AppError::Chat(
                "El análisis consolidado cambió mientras se respondía; vuelve a preguntar."
                    .to_string(),
            ));
        }
        Ok(ChatMessage {
            role: ChatRole::Model,
            text,
            status: TurnStatus::Confirmed,
        })
    }
}

/// Turno de chat abierto por `ask`. Si el futuro se descarta antes de la
/// respuesta (cliente desconectado), el turno queda como `Failed` al soltarse.
struct OpenTurn<'a> {
    workspace: &'a Workspace,
    ticket: Option<TurnTicket>,
}

impl OpenTurn<'_> {
    fn close(mut self, answer: Result<String, &AppError>) -> bool {
        match self.ticket.take() {
            Some(ticket) => self.workspace.lock().chat.complete_turn(ticket, answer),
            None => false,
        }
    }
}

impl Drop for OpenTurn<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            warn!("Pregunta cancelada antes de recibir respuesta.");
            let err = AppError::Chat("La pregunta se canceló antes de recibir respuesta.".to_string());
            self.workspace.lock().chat.complete_turn(ticket, Err(&err));
        }
    }
}

pub(crate) fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("No existe el reporte '{id}' en el historial."))
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::fakes::*;
    use super::*;
    use crate::consolidation::ConsolidationStatus;
    use crate::models::REQUIRED_ROLES;

    #[tokio::test]
    async fn consolidates_once_all_departments_are_present() {
        let (ai, ws) = workspace();
        seed(&ws, "mkt.pdf", ReportRole::Marketing, 100);
        ws.refresh_consolidation().await;
        assert_eq!(FakeAi::count(&ai.consolidations), 0);
        assert_eq!(ws.consolidation().status, ConsolidationStatus::Incomplete);

        seed_all_departments(&ws);
        ws.refresh_consolidation().await;
        ws.refresh_consolidation().await;
        assert_eq!(FakeAi::count(&ai.consolidations), 1);

        let roles: Vec<_> = ai.last_reports.lock().unwrap().iter().map(|r| r.role).collect();
        assert_eq!(roles, REQUIRED_ROLES.to_vec());
        let view = ws.consolidation();
        assert_eq!(view.status, ConsolidationStatus::Ready);
        assert_eq!(view.as_of, Some(120));
    }

    #[tokio::test]
    async fn concurrent_checks_share_one_request() {
        let (ai, ws) = workspace();
        seed_all_departments(&ws);
        tokio::join!(ws.refresh_consolidation(), ws.refresh_consolidation());
        assert_eq!(FakeAi::count(&ai.consolidations), 1);
    }

    #[tokio::test]
    async fn newer_report_during_request_is_picked_up() {
        let (ai, ws) = workspace();
        seed_all_departments(&ws);
        let late_insert = async {
            tokio::task::yield_now().await;
            seed(&ws, "mkt-2.pdf", ReportRole::Marketing, 400);
        };
        tokio::join!(ws.refresh_consolidation(), late_insert);
        assert_eq!(FakeAi::count(&ai.consolidations), 2);
        assert_eq!(ws.consolidation().as_of, Some(400));
    }

    #[tokio::test]
    async fn deleting_marketing_clears_consolidation_and_chat() {
        let (_ai, ws) = workspace();
        seed_all_departments(&ws);
        ws.refresh_consolidation().await;
        ws.ask("¿Cómo va Marketing?").await.unwrap();
        assert_eq!(ws.chat_transcript().len(), 2);

        ws.delete("100-mkt.pdf").unwrap();
        ws.refresh_consolidation().await;
        let view = ws.consolidation();
        assert!(view.analysis.is_none());
        assert_eq!(view.missing_roles, vec![ReportRole::Marketing]);
        assert!(ws.chat_transcript().is_empty());
    }

    #[tokio::test]
    async fn failed_consolidation_is_reported() {
        let (ai, ws) = workspace();
        ai.fail_consolidation.store(true, Ordering::SeqCst);
        seed_all_departments(&ws);
        ws.refresh_consolidation().await;
        let view = ws.consolidation();
        assert_eq!(view.status, ConsolidationStatus::Error);
        assert_eq!(view.error.as_deref(), Some("sin respuesta"));
        assert_eq!(FakeAi::count(&ai.consolidations), 1);
    }

    #[tokio::test]
    async fn deleting_active_report_resets_view() {
        let (_ai, ws) = workspace();
        seed(&ws, "a.pdf", ReportRole::General, 1);
        seed(&ws, "b.pdf", ReportRole::General, 2);
        ws.view("1-a.pdf").unwrap();

        ws.delete("2-b.pdf").unwrap();
        assert_eq!(ws.active().map(|v| v.file_name), Some("a.pdf".to_string()));

        ws.delete("1-a.pdf").unwrap();
        assert_eq!(ws.active(), None);
        assert!(matches!(ws.delete("1-a.pdf"), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn chat_requires_consolidated_analysis() {
        let (ai, ws) = workspace();
        assert!(matches!(ws.ask("¿Hola?").await, Err(AppError::NotFound(_))));
        assert_eq!(FakeAi::count(&ai.questions), 0);
        assert!(ws.chat_transcript().is_empty());
    }

    #[tokio::test]
    async fn chat_sends_prior_transcript_and_keeps_failed_turns() {
        let (ai, ws) = workspace();
        seed_all_departments(&ws);
        ws.refresh_consolidation().await;

        let answer = ws.ask("primera").await.unwrap();
        assert_eq!(answer.text, "Respuesta a: primera");
        assert!(ai.last_chat_history.lock().unwrap().is_empty());

        ai.fail_chat.store(true, Ordering::SeqCst);
        assert!(matches!(ws.ask("segunda").await, Err(AppError::Chat(_))));
        let transcript = ws.chat_transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[2].status, TurnStatus::Failed);

        ai.fail_chat.store(false, Ordering::SeqCst);
        ws.ask("tercera").await.unwrap();
        assert_eq!(ai.last_chat_history.lock().unwrap().len(), 3);
        let texts: Vec<_> = ws.chat_transcript().into_iter().map(|m| m.text).collect();
        assert_eq!(
            texts,
            vec![
                "primera",
                "Respuesta a: primera",
                "segunda",
                "tercera",
                "Respuesta a: tercera"
            ]
        );
    }

    #[tokio::test]
    async fn abandoned_question_does_not_block_the_chat() {
        let (ai, ws) = workspace();
        seed_all_departments(&ws);
        ws.refresh_consolidation().await;

        ai.chat_delay_ms.store(50, Ordering::SeqCst);
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(5), ws.ask("segunda")).await;
        assert!(abandoned.is_err());
        let transcript = ws.chat_transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].status, TurnStatus::Failed);

        ai.chat_delay_ms.store(0, Ordering::SeqCst);
        let answer = ws.ask("tercera").await.unwrap();
        assert_eq!(answer.text, "Respuesta a: tercera");
        let statuses: Vec<_> = ws
            .chat_transcript()
            .into_iter()
            .map(|m| (m.text, m.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("segunda".to_string(), TurnStatus::Failed),
                ("tercera".to_string(), TurnStatus::Confirmed),
                ("Respuesta a: tercera".to_string(), TurnStatus::Confirmed),
            ]
        );
    }
}
