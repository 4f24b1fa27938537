//! Contrato estrecho del almacén de datos.
//!
//! El núcleo solo necesita tres operaciones sobre un backend clave/valor
//! versionado por sujeto: escritura/borrado múltiple atómico por sujeto
//! (`multi_set`), lectura acotada de rango por regex (`resolve_regex`, que
//! devuelve filas ordenadas por clave con la versión más reciente) y borrado
//! de un sujeto completo (`delete_subject`). Los tokens llevan el usuario en
//! cuyo nombre se opera; la autorización concreta es asunto del backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use indexmap::IndexMap;
use regex::Regex;

use crate::errors::{Result, StoreError};

/// Token de seguridad que acompaña cada operación.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub username: String,
}

impl AccessToken {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into() }
    }
}

/// Fila devuelta por `resolve_regex`: clave, valor más reciente y su
/// timestamp en microsegundos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedValue {
    pub key: String,
    pub value: Vec<u8>,
    pub timestamp_us: i64,
}

pub trait DataStore: Send + Sync {
    /// Escribe todos los valores (múltiples valores por clave se acumulan
    /// como versiones) y borra las claves de `to_delete`, de forma atómica
    /// dentro del sujeto. Con `sync` el llamador exige durabilidad antes de
    /// continuar.
    fn multi_set(&self,
                 subject: &str,
                 values: &IndexMap<String, Vec<Vec<u8>>>,
                 to_delete: &[String],
                 sync: bool,
                 token: &AccessToken)
                 -> Result<()>;

    /// Lee hasta `limit` claves del sujeto que casen con `pattern`, en orden
    /// ascendente de clave, devolviendo la versión más reciente de cada una.
    fn resolve_regex(&self, subject: &str, pattern: &str, limit: usize, token: &AccessToken) -> Result<Vec<ResolvedValue>>;

    /// Elimina el sujeto completo con todas sus claves.
    fn delete_subject(&self, subject: &str, token: &AccessToken) -> Result<()>;
}

type Rows = BTreeMap<String, Vec<(Vec<u8>, i64)>>;

/// Almacén en memoria para tests y wiring local.
///
/// Guarda versiones por clave con timestamp; `resolve_regex` devuelve la
/// última versión. `inject_write_failures` permite simular fallos
/// transitorios de escritura para probar el flush best-effort.
pub struct InMemoryDataStore {
    subjects: Mutex<HashMap<String, Rows>>,
    write_failures: AtomicU32,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self { subjects: Mutex::new(HashMap::new()),
               write_failures: AtomicU32::new(0) }
    }

    /// Hace fallar las próximas `n` escrituras con `StoreError::Transient`.
    pub fn inject_write_failures(&self, n: u32) {
        self.write_failures.store(n, Ordering::SeqCst);
    }

    /// Claves existentes de un sujeto (para aserciones en tests).
    pub fn keys(&self, subject: &str) -> Vec<String> {
        self.subjects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(subject)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subject_exists(&self, subject: &str) -> bool {
        self.subjects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(subject)
    }

    fn now_us() -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

impl Default for InMemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for InMemoryDataStore {
    fn multi_set(&self,
                 subject: &str,
                 values: &IndexMap<String, Vec<Vec<u8>>>,
                 to_delete: &[String],
                 _sync: bool,
                 _token: &AccessToken)
                 -> Result<()> {
        if self.write_failures.load(Ordering::SeqCst) > 0 {
            self.write_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Transient("injected write failure".into()));
        }

        let mut subjects = self.subjects.lock().unwrap_or_else(|e| e.into_inner());
        let rows = subjects.entry(subject.to_string()).or_default();

        // Primero los borrados, después las escrituras: una clave borrada y
        // reescrita en la misma llamada sobrevive con su valor nuevo.
        for key in to_delete {
            rows.remove(key);
        }
        let ts = Self::now_us();
        for (key, versions) in values {
            let slot = rows.entry(key.clone()).or_default();
            for value in versions {
                slot.push((value.clone(), ts));
            }
        }
        Ok(())
    }

    fn resolve_regex(&self, subject: &str, pattern: &str, limit: usize, _token: &AccessToken) -> Result<Vec<ResolvedValue>> {
        let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| StoreError::Pattern(e.to_string()))?;
        let subjects = self.subjects.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        if let Some(rows) = subjects.get(subject) {
            for (key, versions) in rows {
                if out.len() >= limit {
                    break;
                }
                if !re.is_match(key) {
                    continue;
                }
                if let Some((value, ts)) = versions.last() {
                    out.push(ResolvedValue { key: key.clone(),
                                             value: value.clone(),
                                             timestamp_us: *ts });
                }
            }
        }
        Ok(out)
    }

    fn delete_subject(&self, subject: &str, _token: &AccessToken) -> Result<()> {
        self.subjects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(subject);
        Ok(())
    }
}
