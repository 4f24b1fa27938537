//! Errores de la capa de almacenamiento.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Fallo transitorio del almacén de datos. Quien hace flush lo trata
    /// como best-effort; la siguiente pasada del worker recupera.
    #[error("transient data store failure: {0}")]
    Transient(String),
    /// Fallo de la cola de tasks. A diferencia del almacén, esto es un fallo
    /// duro de infraestructura y se propaga.
    #[error("task queue failure: {0}")]
    Queue(String),
    #[error("invalid resolve pattern: {0}")]
    Pattern(String),
    #[error("corrupt record under '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
