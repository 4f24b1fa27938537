//! `FlowRecord`: la mitad persistente de un flow.
//!
//! Un flow vivo es el par (registro persistente, sesión transitoria). Solo
//! este registro se serializa entre saltos de worker; los cursores de
//! ejecución (próximo id saliente, próximo request a procesar, requests
//! pendientes) se re-derivan del almacén al cargar.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{CpuSeconds, StatusPayload};
use crate::request::RequestState;
use crate::session::{ClientId, SessionId};

/// Estado terminal o de marcha de un flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlowState {
    #[default]
    Running,
    Terminated,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub session_id: SessionId,
    /// Clave de clase para el despacho por nombre en la factoría.
    pub name: String,
    pub creator: String,
    pub event_id: String,
    pub create_time_us: i64,
    pub state: FlowState,
    /// Mensaje terminal opcional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: u32,
    /// Cliente primario del flow, si lo hay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    /// Argumentos opacos con los que se arrancó el flow.
    #[serde(default)]
    pub args: HashMap<String, Value>,
    /// Request del padre al que este flow reporta. Su presencia implica que
    /// este es un flow hijo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_state: Option<RequestState>,
    /// Sesiones de los flows hijos lanzados con `CallFlow`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SessionId>,
    #[serde(default)]
    pub cpu_used: CpuSeconds,
    #[serde(default)]
    pub network_bytes_sent: u64,
    /// Traza del fallo cuando el flow termina en `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
    /// Si el usuario pidió ser notificado al terminar.
    #[serde(default)]
    pub notify_to_user: bool,
}

impl FlowRecord {
    pub fn is_running(&self) -> bool {
        self.state == FlowState::Running
    }

    /// Acumula en el registro el consumo de recursos que reporta un status.
    pub fn accumulate_usage(&mut self, status: &StatusPayload) {
        if let Some(cpu) = &status.cpu_time_used {
            self.cpu_used.user += cpu.user;
            self.cpu_used.system += cpu.system;
        }
        if let Some(bytes) = status.network_bytes_sent {
            self.network_bytes_sent += bytes;
        }
    }
}
