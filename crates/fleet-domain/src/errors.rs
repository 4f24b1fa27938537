//! Errores del modelo de datos (simples por ahora).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DomainError {
    #[error("malformed session id '{0}'")] MalformedSessionId(String),
    #[error("session id value {0} falls in the reserved range")] ReservedSessionId(u32),
    #[error("value {0} is outside the well-known range")] NotWellKnown(u32),
    #[error("malformed client id '{0}'")] MalformedClientId(String),
}
