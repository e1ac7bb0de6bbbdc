//! Slots de almacenamiento clave-valor.
//!
//! Cada slot guarda un único valor de texto. `FileKvStore` escribe un fichero
//! por slot dentro del directorio de datos; `MemoryKvStore` se usa en tests.

use std::{
    fs,
    path::{Path, PathBuf},
};
#[cfg(test)]
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use tracing::debug;

use crate::error::{AppError, AppResult};

/// Slot con la lista de historial serializada en JSON.
pub const HISTORY_KEY: &str = "pdf_analyzer_history";
/// Slot con el timestamp de los reportes usados en el último análisis consolidado.
pub const CONSOLIDATION_TIMESTAMP_KEY: &str = "consolidated_analysis_timestamp";

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Abre (creándolo si hace falta) el directorio de datos.
    pub fn open(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            AppError::Persistence(format!("no se pudo crear {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let path = self.slot_path(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Persistence(format!(
                "no se pudo leer {}: {e}",
                path.display()
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let path = self.slot_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                AppError::Persistence(format!("no se pudo escribir {}: {e}", path.display()))
            })?;
        debug!("Slot '{key}' guardado ({} bytes)", value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let path = self.slot_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Persistence(format!(
                "no se pudo borrar {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    slots: Mutex<HashMap<String, String>>,
}

#[cfg(test)]
impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(key);
        Ok(())
    }
}
