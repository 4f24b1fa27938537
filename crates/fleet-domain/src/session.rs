//! Identificadores de sesión, cliente y task.
//!
//! Una sesión se identifica como `"<cola>:<HEX>"`: el prefijo decide qué
//! pool de workers atiende el flow y el sufijo es el valor hexadecimal (en
//! mayúsculas) de un entero de 32 bits. Los valores menores o iguales a
//! `RESERVED_RANGE` quedan reservados para flows well-known (sumideros de
//! mensajes de sistema) y nunca se sortean al azar.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Los ids de sesión por debajo de este valor están reservados.
pub const RESERVED_RANGE: u32 = 100;

/// Cola de workers de propósito general.
pub const DEFAULT_WORKER_QUEUE: &str = "W";

/// Identificador de una sesión de flow: `"<cola>:<HEX>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId {
    queue: String,
    value: u32,
}

impl SessionId {
    /// Construye un id de sesión normal. El valor debe quedar fuera del
    /// rango reservado.
    pub fn new(queue: impl Into<String>, value: u32) -> Result<Self, DomainError> {
        if value <= RESERVED_RANGE {
            return Err(DomainError::ReservedSessionId(value));
        }
        Ok(Self { queue: queue.into(), value })
    }

    /// Construye el id de una sesión well-known (valor dentro del rango
    /// reservado, distinto de cero).
    pub fn well_known(queue: impl Into<String>, value: u32) -> Result<Self, DomainError> {
        if value == 0 || value > RESERVED_RANGE {
            return Err(DomainError::NotWellKnown(value));
        }
        Ok(Self { queue: queue.into(), value })
    }

    /// Sortea un id de sesión uniforme de 32 bits fuera del rango reservado.
    ///
    /// La unicidad frente al almacén la comprueba quien crea el flow; aquí
    /// solo se garantiza que el valor no caiga en el rango reservado.
    pub fn random(queue: impl Into<String>) -> Self {
        let value = loop {
            let candidate = (rand::random::<u64>() % (1u64 << 32)) as u32;
            if candidate > RESERVED_RANGE {
                break candidate;
            }
        };
        Self { queue: queue.into(), value }
    }

    /// Nombre de la cola de workers que atiende esta sesión.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Valor numérico del id.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Cierto si la sesión pertenece al rango reservado de flows well-known.
    pub fn is_well_known(&self) -> bool {
        self.value <= RESERVED_RANGE
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:X}", self.queue, self.value)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (queue, hex) = s.rsplit_once(':')
                            .ok_or_else(|| DomainError::MalformedSessionId(s.to_string()))?;
        if queue.is_empty() || hex.is_empty() {
            return Err(DomainError::MalformedSessionId(s.to_string()));
        }
        let value = u32::from_str_radix(hex, 16).map_err(|_| DomainError::MalformedSessionId(s.to_string()))?;
        Ok(Self { queue: queue.to_string(), value })
    }
}

impl TryFrom<String> for SessionId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

/// Identificador de un cliente (endpoint remoto). El id funciona además como
/// nombre de la cola de tasks dirigidos a ese cliente.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::MalformedClientId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identificador estable asignado por la cola de tasks al encolar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_roundtrips_through_display_and_parse() {
        let id = SessionId::new("W", 0xDEADBEEF).unwrap();
        assert_eq!(id.to_string(), "W:DEADBEEF");
        let parsed: SessionId = "W:DEADBEEF".parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.queue(), "W");
        assert_eq!(parsed.value(), 0xDEADBEEF);
    }

    #[test]
    fn random_ids_avoid_the_reserved_range() {
        for _ in 0..64 {
            let id = SessionId::random("W");
            assert!(id.value() > RESERVED_RANGE);
            assert!(!id.is_well_known());
        }
    }

    #[test]
    fn well_known_ids_stay_in_range() {
        let id = SessionId::well_known("W", 7).unwrap();
        assert!(id.is_well_known());
        assert_eq!(id.to_string(), "W:7");
        assert!(SessionId::well_known("W", 500).is_err());
        assert!(SessionId::new("W", 7).is_err());
    }

    #[test]
    fn malformed_session_ids_are_rejected() {
        assert!("noqueue".parse::<SessionId>().is_err());
        assert!("W:".parse::<SessionId>().is_err());
        assert!(":AB".parse::<SessionId>().is_err());
        assert!("W:ZZZ".parse::<SessionId>().is_err());
    }

    #[test]
    fn session_id_serde_uses_the_string_form() {
        let id = SessionId::new("HUNT", 0x1234ABCD).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"HUNT:1234ABCD\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
