//! Contabilidad durable de requests y respuestas de una sesión.
//!
//! Cada sesión guarda su estado bajo el sujeto `task:<sesión>:state` con el
//! layout de claves:
//! - `flow:request:<REQID_HEX8>` — bytes del `RequestState`.
//! - `flow:response:<REQID_HEX8>:<RESPID_HEX8>` — bytes del `Message`.
//!
//! El `FlowStore` acumula escrituras y borrados y los aplica de una vez en
//! `flush`: la escritura al almacén es best-effort (un fallo transitorio se
//! registra y se recupera en la siguiente pasada del worker), mientras que
//! el desencolado de tasks de cliente propaga su error. `scoped` garantiza
//! que el flush corre en todos los caminos, también con error.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use fleet_domain::{ClientId, Message, RequestState, SessionId, TaskId};
use indexmap::IndexMap;

use crate::data_store::{AccessToken, DataStore};
use crate::errors::{Result, StoreError};
use crate::task_queue::TaskQueue;

const FLOW_REQUEST_PREFIX: &str = "flow:request:";
const FLOW_RESPONSE_PREFIX: &str = "flow:response:";
const FLOW_REQUEST_REGEX: &str = "flow:request:.*";
const FLOW_RESPONSE_REGEX: &str = "flow:response:.*";

/// Sujeto que guarda requests y respuestas de la sesión.
pub fn state_subject(session_id: &SessionId) -> String {
    format!("task:{session_id}:state")
}

/// Sujeto que guarda el registro y metadatos de lock de la sesión.
pub fn task_subject(session_id: &SessionId) -> String {
    format!("task:{session_id}")
}

pub fn request_key(request_id: u64) -> String {
    format!("{FLOW_REQUEST_PREFIX}{request_id:08X}")
}

pub fn response_key(request_id: u64, response_id: u64) -> String {
    format!("{FLOW_RESPONSE_PREFIX}{request_id:08X}:{response_id:08X}")
}

/// Límites de los barridos acotados de lectura.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub request_limit: usize,
    pub response_limit: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self { request_limit: 10_000,
               response_limit: 100_000 }
    }
}

/// Página devuelta por `fetch_requests_and_responses`.
///
/// `more_data` indica que algún barrido tocó su límite: hay más estado del
/// que cupo en esta pasada y el llamador debe re-notificar la cola para que
/// una pasada posterior continúe. No es un error.
#[derive(Debug)]
pub struct FetchPage {
    /// Pares (request, respuestas) en orden ascendente de id de request.
    /// Incluye el centinela con id 0.
    pub pairs: Vec<(RequestState, Vec<Message>)>,
    pub more_data: bool,
}

/// Handle de almacenamiento ligado a una sesión.
pub struct FlowStore {
    session_id: SessionId,
    subject: String,
    data_store: Arc<dyn DataStore>,
    task_queue: Arc<dyn TaskQueue>,
    token: AccessToken,
    limits: StoreLimits,
    sync: bool,
    to_write: IndexMap<String, Vec<Vec<u8>>>,
    to_delete: Vec<String>,
    client_tasks: Vec<(ClientId, TaskId)>,
}

impl FlowStore {
    pub fn new(data_store: Arc<dyn DataStore>,
               task_queue: Arc<dyn TaskQueue>,
               token: AccessToken,
               limits: StoreLimits,
               session_id: SessionId)
               -> Self {
        let subject = state_subject(&session_id);
        Self { session_id,
               subject,
               data_store,
               task_queue,
               token,
               limits,
               sync: true,
               to_write: IndexMap::new(),
               to_delete: Vec::new(),
               client_tasks: Vec::new() }
    }

    /// Ejecuta `f` con un handle y hace flush al salir por cualquier camino.
    /// Si `f` falla se conserva su error; un fallo del flush en ese caso
    /// solo se registra.
    pub fn scoped<T, E, F>(data_store: Arc<dyn DataStore>,
                           task_queue: Arc<dyn TaskQueue>,
                           token: AccessToken,
                           limits: StoreLimits,
                           session_id: SessionId,
                           f: F)
                           -> std::result::Result<T, E>
        where E: From<StoreError>,
              F: FnOnce(&mut FlowStore) -> std::result::Result<T, E>
    {
        let mut store = FlowStore::new(data_store, task_queue, token, limits, session_id);
        let result = f(&mut store);
        let flushed = store.flush();
        match result {
            Ok(value) => flushed.map(|_| value).map_err(E::from),
            Err(e) => {
                if let Err(flush_err) = flushed {
                    log::warn!("flush after failed scope on {}: {flush_err}", store.subject);
                }
                Err(e)
            }
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Lee los requests pendientes con sus respuestas, en orden ascendente
    /// de id de request, mediante dos barridos acotados unidos en memoria
    /// por `request_id`.
    pub fn fetch_requests_and_responses(&self) -> Result<FetchPage> {
        let mut by_id: BTreeMap<u64, (RequestState, Vec<Message>)> = BTreeMap::new();
        by_id.insert(0, (RequestState::sentinel(self.session_id.clone()), Vec::new()));

        let request_rows = self.data_store
                               .resolve_regex(&self.subject, FLOW_REQUEST_REGEX, self.limits.request_limit, &self.token)?;
        let request_count = request_rows.len();
        let mut max_request_id = 0u64;
        for row in &request_rows {
            let request: RequestState = decode(&row.key, &row.value)?;
            max_request_id = max_request_id.max(request.id);
            by_id.insert(request.id, (request, Vec::new()));
        }

        let response_rows = self.data_store
                                .resolve_regex(&self.subject, FLOW_RESPONSE_REGEX, self.limits.response_limit, &self.token)?;
        let response_count = response_rows.len();
        for row in &response_rows {
            let response: Message = decode(&row.key, &row.value)?;
            // Las claves van ordenadas: al pasar el último request conocido
            // ya no queda nada que emparejar en esta página.
            if response.request_id > max_request_id {
                break;
            }
            if let Some((_, responses)) = by_id.get_mut(&response.request_id) {
                responses.push(response);
            }
        }

        let mut pairs: Vec<(RequestState, Vec<Message>)> = by_id.into_values().collect();
        for (_, responses) in pairs.iter_mut() {
            responses.sort_by_key(|m| m.response_id);
        }

        Ok(FetchPage { pairs,
                       more_data: request_count >= self.limits.request_limit
                                  || response_count >= self.limits.response_limit })
    }

    /// Lectura para sesiones well-known: sus mensajes no se emparejan con
    /// requests, se entregan sueltos.
    pub fn fetch_responses(&self) -> Result<Vec<Message>> {
        let rows = self.data_store
                       .resolve_regex(&self.subject, FLOW_RESPONSE_REGEX, self.limits.request_limit, &self.token)?;
        rows.iter().map(|row| decode(&row.key, &row.value)).collect()
    }

    /// Acumula un request para escritura en el próximo flush.
    pub fn queue_request(&mut self, request: &RequestState) -> Result<()> {
        let bytes = encode(&request_key(request.id), request)?;
        self.to_write.entry(request_key(request.id)).or_default().push(bytes);
        Ok(())
    }

    /// Acumula una respuesta para escritura en el próximo flush.
    pub fn queue_response(&mut self, message: &Message) -> Result<()> {
        let key = response_key(message.request_id, message.response_id);
        let bytes = encode(&key, message)?;
        self.to_write.entry(key).or_default().push(bytes);
        Ok(())
    }

    /// Marca el request y todas sus respuestas para borrado, y apunta su
    /// task de cliente para desencolarlo en el flush.
    pub fn delete_request_states(&mut self, request: &RequestState, responses: &[Message]) {
        if request.id != 0 {
            self.to_delete.push(request_key(request.id));
            if let (Some(client), Some(ts_id)) = (&request.client_id, request.ts_id) {
                self.client_tasks.push((client.clone(), ts_id));
            }
        }
        for response in responses {
            self.to_delete.push(response_key(response.request_id, response.response_id));
        }
    }

    /// Marca una respuesta suelta para borrado (sesiones well-known).
    pub fn delete_response(&mut self, message: &Message) {
        self.to_delete.push(response_key(message.request_id, message.response_id));
    }

    /// Destruye todo el estado de la sesión: apunta los tasks de cliente de
    /// todos los requests que quepan en una página y borra el sujeto entero.
    /// El borrado del sujeto es total aunque la página estuviera truncada.
    pub fn destroy_flow_states(&mut self) -> Result<()> {
        let page = self.fetch_requests_and_responses()?;
        for (request, _) in &page.pairs {
            if let (Some(client), Some(ts_id)) = (&request.client_id, request.ts_id) {
                self.client_tasks.push((client.clone(), ts_id));
            }
        }
        self.data_store.delete_subject(&self.subject, &self.token)?;
        self.to_write.clear();
        self.to_delete.clear();
        Ok(())
    }

    /// Aplica las escrituras y borrados acumulados (best-effort) y desencola
    /// los tasks de cliente apuntados (fallo duro).
    pub fn flush(&mut self) -> Result<()> {
        if !self.to_write.is_empty() || !self.to_delete.is_empty() {
            let values = mem::take(&mut self.to_write);
            let to_delete = mem::take(&mut self.to_delete);
            if let Err(e) = self.data_store.multi_set(&self.subject, &values, &to_delete, self.sync, &self.token) {
                log::warn!("best-effort flush on {} dropped a write batch: {e}", self.subject);
            }
        }

        let client_tasks = mem::take(&mut self.client_tasks);
        let mut by_client: IndexMap<ClientId, Vec<TaskId>> = IndexMap::new();
        for (client, ts_id) in client_tasks {
            by_client.entry(client).or_default().push(ts_id);
        }
        for (client, ids) in by_client {
            self.task_queue.delete(client.as_str(), &ids, &self.token)?;
        }
        Ok(())
    }
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Corrupt { key: key.to_string(),
                                                                reason: e.to_string() })
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt { key: key.to_string(),
                                                                    reason: e.to_string() })
}
