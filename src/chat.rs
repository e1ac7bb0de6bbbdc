//! Conversación sobre el análisis consolidado.
//!
//! La transcripción sólo crece. Cada turno tiene dos fases: la pregunta se
//! añade como `Pending` antes de llamar al modelo y después se confirma (y se
//! añade la respuesta) o se marca como `Failed`, sin retirarla.

use crate::{
    error::{AppError, AppResult},
    models::{ChatMessage, ChatRole, TurnStatus},
};

/// Identifica un turno abierto por `begin_turn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTicket {
    generation: u64,
    index: usize,
}

#[derive(Debug, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    generation: u64,
    pending: Option<usize>,
}

impl ChatSession {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Vacía la transcripción. Las respuestas de turnos anteriores que lleguen
    /// después se descartan.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.pending = None;
        self.generation += 1;
    }

    /// Añade la pregunta y devuelve el ticket del turno junto con la
    /// transcripción previa, que es el contexto para el modelo.
    pub fn begin_turn(&mut self, question: &str) -> AppResult<(TurnTicket, Vec<ChatMessage>)> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Chat("La pregunta está vacía.".to_string()));
        }
        if self.pending.is_some() {
            return Err(AppError::Busy(
                "Ya hay una pregunta esperando respuesta.".to_string(),
            ));
        }
        let prior = self.messages.clone();
        self.messages.push(ChatMessage {
            role: ChatRole::User,
            text: question.to_string(),
            status: TurnStatus::Pending,
        });
        let index = self.messages.len() - 1;
        self.pending = Some(index);
        Ok((
            TurnTicket {
                generation: self.generation,
                index,
            },
            prior,
        ))
    }

    /// Cierra el turno. Devuelve `false` si la transcripción se reinició
    /// mientras tanto y el resultado ya no aplica.
    pub fn complete_turn(&mut self, ticket: TurnTicket, answer: Result<String, &AppError>) -> bool {
        if ticket.generation != self.generation || self.pending != Some(ticket.index) {
            return false;
        }
        self.pending = None;
        match answer {
            Ok(text) => {
                self.messages[ticket.index].status = TurnStatus::Confirmed;
                self.messages.push(ChatMessage {
                    role: ChatRole::Model,
                    text,
                    status: TurnStatus::Confirmed,
                });
            }
            Err(_) => {
                self.messages[ticket.index].status = TurnStatus::Failed;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_is_visible_before_the_answer() {
        let mut chat = ChatSession::default();
        let (ticket, prior) = chat.begin_turn("¿Qué tal Soporte?").unwrap();
        assert!(prior.is_empty());
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].status, TurnStatus::Pending);

        assert!(chat.complete_turn(ticket, Ok("Bien".into())));
        let roles: Vec<_> = chat.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model]);
        assert!(chat
            .messages()
            .iter()
            .all(|m| m.status == TurnStatus::Confirmed));
    }

    #[test]
    fn failed_turn_keeps_the_question() {
        let mut chat = ChatSession::default();
        let (ticket, _) = chat.begin_turn("primera").unwrap();
        let err = AppError::Chat("timeout".into());
        chat.complete_turn(ticket, Err(&err));
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].status, TurnStatus::Failed);

        let (_, prior) = chat.begin_turn("segunda").unwrap();
        assert_eq!(prior.len(), 1);
        assert_eq!(prior[0].text, "primera");
    }

    #[test]
    fn one_turn_at_a_time() {
        let mut chat = ChatSession::default();
        chat.begin_turn("a").unwrap();
        assert!(matches!(chat.begin_turn("b"), Err(AppError::Busy(_))));
        assert!(matches!(chat.begin_turn("   "), Err(AppError::Chat(_))));
    }

    #[test]
    fn late_answer_after_reset_is_dropped() {
        let mut chat = ChatSession::default();
        let (ticket, _) = chat.begin_turn("a").unwrap();
        chat.reset();
        assert!(!chat.complete_turn(ticket, Ok("tarde".into())));
        assert!(chat.messages().is_empty());
        assert!(chat.begin_turn("b").is_ok());
    }
}
