//! `RequestState`: registro durable de cada llamada saliente.
//!
//! Cada request de un flow (a un cliente, a un flow hijo o a sí mismo) se
//! persiste como un `RequestState` bajo la clave `flow:request:<ID_HEX8>`
//! de la sesión. El id es denso y monótono por sesión; las respuestas se
//! acumulan bajo el mismo id hasta que llega el status terminal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;
use crate::session::{ClientId, SessionId, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestState {
    /// Id saliente, denso y monótono dentro de la sesión. El 0 es un
    /// centinela que nunca se despacha.
    pub id: u64,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Estado del flow que recibirá las respuestas.
    pub next_state: String,
    /// Nombre de la clase de flow hijo, cuando el request proviene de un
    /// `CallFlow`. Estos requests no llevan mensaje saliente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
    /// Contador de respuestas emitidas contra este request (lo incrementa el
    /// hijo en cada `SendReply`).
    #[serde(default)]
    pub response_count: u64,
    /// Metadatos opacos del request, visibles para el estado receptor.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Value>,
    /// Mensaje saliente embebido (solo llamadas reales a cliente).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Message>,
    /// Id del task devuelto por la cola al programar el mensaje saliente.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_id: Option<TaskId>,
    /// Número de retransmisiones explícitas ya realizadas.
    #[serde(default)]
    pub transmission_count: u32,
}

impl RequestState {
    pub fn new(id: u64, session_id: SessionId, next_state: impl Into<String>, client_id: Option<ClientId>) -> Self {
        Self { id,
               session_id,
               client_id,
               next_state: next_state.into(),
               flow_name: None,
               response_count: 0,
               data: HashMap::new(),
               request: None,
               ts_id: None,
               transmission_count: 0 }
    }

    /// Centinela con id 0, usado como ancla de respuestas huérfanas.
    pub fn sentinel(session_id: SessionId) -> Self {
        Self::new(0, session_id, "", None)
    }

    /// Cierto si este request lleva un mensaje saliente real hacia un
    /// cliente (y por tanto debe programarse en su cola).
    pub fn has_outbound_message(&self) -> bool {
        self.request.as_ref().map(|m| m.name.is_some()).unwrap_or(false)
    }
}
