//! Disparador del análisis ejecutivo consolidado.
//!
//! El estado se deriva del historial con una función pura (`evaluate`):
//!
//! - `Incomplete`: falta algún departamento obligatorio.
//! - `Stale`: están los cuatro, pero no hay análisis en caché o el timestamp
//!   persistido es anterior al reporte más reciente de los seleccionados.
//! - `Fresh`: la caché refleja ya la selección actual.
//!
//! `Consolidation` guarda la caché, el timestamp persistido y la marca de
//! petición en curso. Nunca hay más de una petición en vuelo.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    models::{ConsolidatedAnalysis, DepartmentReport, HistoryItem, ReportRole, REQUIRED_ROLES},
    storage::{KvStore, CONSOLIDATION_TIMESTAMP_KEY},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidationState {
    Incomplete { missing: Vec<ReportRole> },
    Stale {
        reports: Vec<DepartmentReport>,
        last_analysis_time: i64,
    },
    Fresh { last_analysis_time: i64 },
}

/// Reporte más reciente de cada departamento obligatorio, en el orden fijo
/// de `REQUIRED_ROLES`. El historial ya viene ordenado de más nuevo a más
/// antiguo, así que basta con la primera coincidencia.
pub fn select_latest(history: &[HistoryItem]) -> Result<Vec<&HistoryItem>, Vec<ReportRole>> {
    let mut selected = Vec::with_capacity(REQUIRED_ROLES.len());
    let mut missing = Vec::new();
    for role in REQUIRED_ROLES {
        match history
            .iter()
            .find(|item| item.analysis_result.detected_role == role)
        {
            Some(item) => selected.push(item),
            None => missing.push(role),
        }
    }
    if missing.is_empty() {
        Ok(selected)
    } else {
        Err(missing)
    }
}

pub fn evaluate(
    history: &[HistoryItem],
    persisted_timestamp: Option<i64>,
    has_cached: bool,
) -> ConsolidationState {
    let selected = match select_latest(history) {
        Ok(selected) => selected,
        Err(missing) => return ConsolidationState::Incomplete { missing },
    };
    let last_analysis_time = selected
        .iter()
        .map(|item| item.timestamp)
        .max()
        .unwrap_or_default();

    let fresh = has_cached && persisted_timestamp.is_some_and(|ts| ts >= last_analysis_time);
    if fresh {
        ConsolidationState::Fresh { last_analysis_time }
    } else {
        ConsolidationState::Stale {
            reports: selected
                .into_iter()
                .map(|item| DepartmentReport {
                    role: item.analysis_result.detected_role,
                    text: item.extracted_text.clone(),
                })
                .collect(),
            last_analysis_time,
        }
    }
}

/// Lo que el llamador debe hacer tras evaluar el historial.
#[derive(Debug, PartialEq)]
pub enum TriggerAction {
    Nothing,
    /// La caché se acaba de invalidar (transición a `Incomplete`).
    Cleared,
    /// Lanzar la petición de consolidación; ya se marcó como en curso.
    Request {
        reports: Vec<DepartmentReport>,
        last_analysis_time: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidationStatus {
    Incomplete,
    Pending,
    Ready,
    Error,
}

/// Vista serializable para la capa de presentación.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationView {
    pub status: ConsolidationStatus,
    pub missing_roles: Vec<ReportRole>,
    pub analysis: Option<ConsolidatedAnalysis>,
    pub error: Option<String>,
    pub as_of: Option<i64>,
}

pub struct Consolidation {
    kv: Arc<dyn KvStore>,
    persisted_timestamp: Option<i64>,
    cached: Option<ConsolidatedAnalysis>,
    in_flight: Option<i64>,
    last_error: Option<String>,
}

impl Consolidation {
    pub fn load(kv: Arc<dyn KvStore>) -> Self {
        let persisted_timestamp = match kv.get(CONSOLIDATION_TIMESTAMP_KEY) {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(ts) => Some(ts),
                Err(e) => {
                    warn!("Timestamp de consolidación corrupto ('{raw}'): {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("No se pudo leer el timestamp de consolidación: {e}");
                None
            }
        };
        Self {
            kv,
            persisted_timestamp,
            cached: None,
            in_flight: None,
            last_error: None,
        }
    }

    pub fn cached(&self) -> Option<&ConsolidatedAnalysis> {
        self.cached.as_ref()
    }

    pub fn persisted_timestamp(&self) -> Option<i64> {
        self.persisted_timestamp
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn state(&self, history: &[HistoryItem]) -> ConsolidationState {
        evaluate(history, self.persisted_timestamp, self.cached.is_some())
    }

    /// Evalúa el historial y aplica la transición correspondiente. Se puede
    /// llamar tras cada mutación: si ya hay una petición en curso o la caché
    /// está al día no se pide nada.
    pub fn plan(&mut self, history: &[HistoryItem]) -> TriggerAction {
        match self.state(history) {
            ConsolidationState::Incomplete { missing } => {
                if self.cached.is_none() && self.persisted_timestamp.is_none() {
                    return TriggerAction::Nothing;
                }
                info!("Faltan reportes de {:?}; se descarta el análisis consolidado.", missing);
                self.cached = None;
                self.last_error = None;
                self.set_persisted(None);
                TriggerAction::Cleared
            }
            ConsolidationState::Fresh { last_analysis_time } => {
                debug!("Análisis consolidado al día (as of {last_analysis_time}).");
                TriggerAction::Nothing
            }
            ConsolidationState::Stale {
                reports,
                last_analysis_time,
            } => {
                if let Some(pending) = self.in_flight {
                    debug!("Consolidación en curso para {pending}; no se lanza otra.");
                    return TriggerAction::Nothing;
                }
                self.in_flight = Some(last_analysis_time);
                self.last_error = None;
                TriggerAction::Request {
                    reports,
                    last_analysis_time,
                }
            }
        }
    }

    /// Registra el resultado de la petición lanzada por `plan`. Devuelve
    /// `true` si se guardó un análisis nuevo en caché.
    pub fn complete(
        &mut self,
        history: &[HistoryItem],
        last_analysis_time: i64,
        result: Result<ConsolidatedAnalysis, AppError>,
    ) -> bool {
        self.in_flight = None;
        match result {
            Ok(analysis) => {
                // El historial pudo perder un departamento mientras tanto.
                if let Err(missing) = select_latest(history) {
                    info!("Consolidación descartada: ya faltan reportes de {:?}.", missing);
                    return false;
                }
                self.cached = Some(analysis);
                self.last_error = None;
                self.set_persisted(Some(last_analysis_time));
                info!("Análisis consolidado actualizado (as of {last_analysis_time}).");
                true
            }
            Err(e) => {
                warn!("Fallo en la consolidación: {e}");
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    pub fn view(&self, history: &[HistoryItem]) -> ConsolidationView {
        let missing_roles = match select_latest(history) {
            Ok(_) => Vec::new(),
            Err(missing) => missing,
        };
        let status = if !missing_roles.is_empty() {
            ConsolidationStatus::Incomplete
        } else if self.is_in_flight() {
            ConsolidationStatus::Pending
        } else if self.last_error.is_some() && self.cached.is_none() {
            ConsolidationStatus::Error
        } else if self.cached.is_some() {
            ConsolidationStatus::Ready
        } else {
            ConsolidationStatus::Pending
        };
        ConsolidationView {
            status,
            missing_roles,
            analysis: self.cached.clone(),
            error: self.last_error.clone(),
            as_of: self.persisted_timestamp(),
        }
    }

    fn set_persisted(&mut self, timestamp: Option<i64>) {
        self.persisted_timestamp = timestamp;
        let outcome = match timestamp {
            Some(ts) => self.kv.set(CONSOLIDATION_TIMESTAMP_KEY, &ts.to_string()),
            None => self.kv.remove(CONSOLIDATION_TIMESTAMP_KEY),
        };
        if let Err(e) = outcome {
            warn!("No se pudo persistir el timestamp de consolidación: {e}");
        }
    }
}
