//! Mensajes del protocolo servidor ↔ cliente.
//!
//! Un `Message` es tanto el request saliente hacia un cliente (lleva `name`,
//! la acción a ejecutar) como cada respuesta entrante (lleva `response_id`
//! denso 1..N). La última respuesta de todo request completo es de tipo
//! `Status` y transporta un `StatusPayload` serializado en `args`; ese
//! mensaje es el que cierra la transacción y dispara el despacho del estado.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionId;

/// Tipo de mensaje. `Status` es terminal para un request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MessageType {
    #[default]
    Message,
    Status,
}

/// Estado de autenticación del mensaje. Todo mensaje originado en el
/// servidor viaja como `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
}

/// Resultado transportado por un mensaje de status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StatusCode {
    #[default]
    Ok,
    GenericError,
}

/// Segundos de CPU consumidos, divididos en usuario y sistema.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CpuSeconds {
    pub user: f64,
    pub system: f64,
}

/// Payload del mensaje terminal de un request.
///
/// Además del código de resultado transporta, opcionalmente, el consumo de
/// recursos acumulado y el id de sesión del flow hijo cuando el status
/// proviene de un `SendReply` terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusPayload {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_time_used: Option<CpuSeconds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_bytes_sent: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_session_id: Option<SessionId>,
}

impl StatusPayload {
    /// Status de éxito sin más información.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Status de error genérico con mensaje.
    pub fn generic_error(message: impl Into<String>) -> Self {
        Self { status: StatusCode::GenericError,
               error_message: Some(message.into()),
               ..Self::default() }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Mensaje del protocolo. Ver el doc del módulo para la dualidad
/// request/respuesta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: SessionId,
    /// Acción a invocar en el cliente. Solo los requests salientes la llevan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub request_id: u64,
    pub response_id: u64,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default)]
    pub auth_state: AuthState,
    #[serde(default)]
    pub priority: u32,
    /// Payload opaco (o un `StatusPayload` serializado si `kind == Status`).
    #[serde(default)]
    pub args: Value,
}

impl Message {
    /// Request saliente hacia un cliente.
    pub fn request(session_id: SessionId, name: impl Into<String>, request_id: u64, priority: u32, args: Value) -> Self {
        Self { session_id,
               name: Some(name.into()),
               request_id,
               response_id: 0,
               kind: MessageType::Message,
               auth_state: AuthState::Authenticated,
               priority,
               args }
    }

    /// Respuesta corriente (no terminal).
    pub fn response(session_id: SessionId, request_id: u64, response_id: u64, args: Value) -> Self {
        Self { session_id,
               name: None,
               request_id,
               response_id,
               kind: MessageType::Message,
               auth_state: AuthState::Authenticated,
               priority: 0,
               args }
    }

    /// Respuesta terminal de tipo status.
    pub fn status(session_id: SessionId, request_id: u64, response_id: u64, payload: StatusPayload) -> Self {
        Self { session_id,
               name: None,
               request_id,
               response_id,
               kind: MessageType::Status,
               auth_state: AuthState::Authenticated,
               priority: 0,
               args: payload.to_value() }
    }

    pub fn is_status(&self) -> bool {
        self.kind == MessageType::Status
    }

    /// Decodifica el `StatusPayload` si este mensaje es un status.
    pub fn status_payload(&self) -> Option<StatusPayload> {
        if !self.is_status() {
            return None;
        }
        serde_json::from_value(self.args.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> SessionId {
        SessionId::new("W", 0xABC123).unwrap()
    }

    #[test]
    fn status_payload_travels_inside_the_message_args() {
        let payload = StatusPayload { network_bytes_sent: Some(42),
                                      child_session_id: Some(SessionId::new("W", 0xFEED55).unwrap()),
                                      ..StatusPayload::ok() };
        let msg = Message::status(session(), 3, 2, payload.clone());
        assert!(msg.is_status());
        assert_eq!(msg.status_payload().unwrap(), payload);
    }

    #[test]
    fn plain_responses_have_no_status_payload() {
        let msg = Message::response(session(), 1, 1, json!({"x": 1}));
        assert!(!msg.is_status());
        assert!(msg.status_payload().is_none());
    }

    #[test]
    fn requests_carry_the_action_name_and_auth() {
        let msg = Message::request(session(), "Echo", 7, 1, json!("hola"));
        assert_eq!(msg.name.as_deref(), Some("Echo"));
        assert_eq!(msg.auth_state, AuthState::Authenticated);
        assert_eq!(msg.request_id, 7);
    }
}
