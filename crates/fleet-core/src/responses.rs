//! Vista de las respuestas completas de un request, tal y como las recibe
//! un estado.
//!
//! El despachador garantiza que la lista es densa 1..N con el status al
//! final; esta vista separa el status de las respuestas útiles y da acceso
//! a los metadatos del request original.

use std::collections::HashMap;

use fleet_domain::{Message, RequestState, StatusPayload};
use serde_json::Value;

pub struct Responses<'a> {
    request: &'a RequestState,
    messages: &'a [Message],
    status: Option<StatusPayload>,
}

impl<'a> Responses<'a> {
    pub fn new(request: &'a RequestState, messages: &'a [Message]) -> Self {
        let status = messages.last().and_then(|m| m.status_payload());
        Self { request, messages, status }
    }

    /// Vista vacía, para las invocaciones sintéticas de `Start` y `End`.
    pub fn empty(request: &'a RequestState) -> Self {
        Self { request,
               messages: &[],
               status: None }
    }

    /// Respuestas útiles, sin el status terminal.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        let skip_last = self.status.is_some();
        let end = if skip_last { self.messages.len().saturating_sub(1) } else { self.messages.len() };
        self.messages[..end].iter()
    }

    /// Payloads de las respuestas útiles.
    pub fn payloads(&self) -> impl Iterator<Item = &Value> {
        self.iter().map(|m| &m.args)
    }

    pub fn len(&self) -> usize {
        if self.status.is_some() {
            self.messages.len().saturating_sub(1)
        } else {
            self.messages.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status terminal del request, si lo hay.
    pub fn status(&self) -> Option<&StatusPayload> {
        self.status.as_ref()
    }

    /// Cierto si el request terminó con status de éxito.
    pub fn success(&self) -> bool {
        self.status.as_ref().map(|s| s.is_ok()).unwrap_or(false)
    }

    pub fn request(&self) -> &RequestState {
        self.request
    }

    /// Metadatos opacos adjuntados al request en la llamada original.
    pub fn request_data(&self) -> &HashMap<String, Value> {
        &self.request.data
    }
}
