//! Historial persistente de análisis.
//!
//! Cada mutación calcula la lista completa en memoria y la guarda entera en
//! el slot de historial; nunca hay escrituras parciales. La lista se mantiene
//! ordenada por timestamp descendente y con como mucho una entrada por nombre
//! de fichero.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    models::{HistoryItem, ReportFeedback},
    storage::{KvStore, HISTORY_KEY},
};

pub struct HistoryStore {
    kv: Arc<dyn KvStore>,
    items: Vec<HistoryItem>,
}

impl HistoryStore {
    /// Carga el historial del slot. Datos ausentes o corruptos equivalen a un
    /// historial vacío.
    pub fn load(kv: Arc<dyn KvStore>) -> Self {
        let mut items = read_items(kv.as_ref());
        sort_descending(&mut items);
        info!("Historial cargado: {} reportes.", items.len());
        Self { kv, items }
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Sustituye la entrada con el mismo nombre de fichero (si la hay) por la
    /// nueva y guarda la lista completa.
    pub fn insert(&mut self, item: HistoryItem) {
        let mut next: Vec<HistoryItem> = self
            .items
            .iter()
            .filter(|existing| existing.file_name != item.file_name)
            .cloned()
            .collect();
        next.insert(0, item);
        sort_descending(&mut next);
        self.replace_all(next);
    }

    /// Adjunta feedback a la primera entrada con ese nombre de fichero.
    /// Devuelve `false` si no existe.
    pub fn attach_feedback(&mut self, file_name: &str, feedback: ReportFeedback) -> bool {
        let mut next = self.items.clone();
        let Some(target) = next.iter_mut().find(|item| item.file_name == file_name) else {
            return false;
        };
        target.report_feedback = Some(feedback);
        self.replace_all(next);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<HistoryItem> {
        let position = self.items.iter().position(|item| item.id == id)?;
        let mut next = self.items.clone();
        let removed = next.remove(position);
        self.replace_all(next);
        Some(removed)
    }

    fn replace_all(&mut self, items: Vec<HistoryItem>) {
        self.items = items;
        self.save();
    }

    /// Los fallos de escritura se registran y no se propagan: el historial
    /// simplemente no persiste en esta sesión.
    fn save(&self) {
        let serialized = match serde_json::to_string(&self.items) {
            Ok(json) => json,
            Err(e) => {
                error!("No se pudo serializar el historial: {e}");
                return;
            }
        };
        if let Err(e) = self.kv.set(HISTORY_KEY, &serialized) {
            error!("No se pudo guardar el historial: {e}");
        }
    }
}

fn read_items(kv: &dyn KvStore) -> Vec<HistoryItem> {
    let raw = match kv.get(HISTORY_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("No se pudo leer el historial: {e}");
            return Vec::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(e) => {
            warn!("Historial corrupto, se ignora: {e}");
            Vec::new()
        }
    }
}

fn sort_descending(items: &mut [HistoryItem]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{AppError, AppResult},
        models::{
            fixtures::{history_item, sample_feedback},
            ReportRole,
        },
        storage::MemoryKvStore,
    };

    fn store() -> (Arc<MemoryKvStore>, HistoryStore) {
        let kv = Arc::new(MemoryKvStore::default());
        let history = HistoryStore::load(kv.clone());
        (kv, history)
    }

    fn assert_descending(items: &[HistoryItem]) {
        for pair in items.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[test]
    fn insert_replaces_entry_with_same_file_name() {
        let (_, mut history) = store();
        history.insert(history_item("ventas.pdf", ReportRole::Marketing, 100));
        history.insert(history_item("otro.pdf", ReportRole::General, 150));
        history.insert(history_item("ventas.pdf", ReportRole::Analisis, 200));

        let same_name: Vec<_> = history
            .items()
            .iter()
            .filter(|item| item.file_name == "ventas.pdf")
            .collect();
        assert_eq!(same_name.len(), 1);
        assert_eq!(same_name[0].timestamp, 200);
        assert_eq!(history.items().len(), 2);
    }

    #[test]
    fn list_stays_timestamp_descending() {
        let (_, mut history) = store();
        for (name, ts) in [("a.pdf", 30), ("b.pdf", 10), ("c.pdf", 50), ("d.pdf", 20)] {
            history.insert(history_item(name, ReportRole::General, ts));
            assert_descending(history.items());
        }
        history.remove("50-c.pdf").unwrap();
        assert_descending(history.items());
        assert_eq!(history.items()[0].file_name, "a.pdf");
    }

    #[test]
    fn every_mutation_persists_the_whole_list() {
        let (kv, mut history) = store();
        history.insert(history_item("a.pdf", ReportRole::Marketing, 1));
        history.insert(history_item("b.pdf", ReportRole::Analisis, 2));
        assert!(history.attach_feedback("a.pdf", sample_feedback(8)));

        let reloaded = HistoryStore::load(kv.clone());
        assert_eq!(reloaded.items(), history.items());
        assert_eq!(
            reloaded.items()[1]
                .report_feedback
                .as_ref()
                .map(|f| f.quality_evaluation.score),
            Some(8)
        );
    }

    #[test]
    fn attach_feedback_to_unknown_file_is_a_no_op() {
        let (_, mut history) = store();
        history.insert(history_item("a.pdf", ReportRole::Marketing, 1));
        assert!(!history.attach_feedback("nope.pdf", sample_feedback(5)));
        assert!(history.items()[0].report_feedback.is_none());
    }

    #[test]
    fn corrupt_slot_loads_as_empty() {
        let kv = Arc::new(MemoryKvStore::default());
        kv.set(HISTORY_KEY, "{not json").unwrap();
        let history = HistoryStore::load(kv);
        assert!(history.items().is_empty());
    }

    #[test]
    fn unsorted_slot_is_sorted_on_load() {
        let kv = Arc::new(MemoryKvStore::default());
        let items = vec![
            history_item("a.pdf", ReportRole::General, 5),
            history_item("b.pdf", ReportRole::General, 9),
        ];
        kv.set(HISTORY_KEY, &serde_json::to_string(&items).unwrap())
            .unwrap();
        let history = HistoryStore::load(kv);
        assert_eq!(history.items()[0].file_name, "b.pdf");
    }

    struct FailingKv;

    impl KvStore for FailingKv {
        fn get(&self, _key: &str) -> AppResult<Option<String>> {
            Err(AppError::Persistence("disco no disponible".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> AppResult<()> {
            Err(AppError::Persistence("disco lleno".into()))
        }
        fn remove(&self, _key: &str) -> AppResult<()> {
            Ok(())
        }
    }

    #[test]
    fn storage_failures_never_reach_the_caller() {
        let mut history = HistoryStore::load(Arc::new(FailingKv));
        assert!(history.items().is_empty());
        history.insert(history_item("a.pdf", ReportRole::Marketing, 1));
        assert_eq!(history.items().len(), 1);
    }
}
