//! Simulador de cliente en proceso.
//!
//! Hace el papel del agente remoto: toma en lease los tasks de su cola de
//! cliente, ejecuta la acción con un handler registrado, escribe las
//! respuestas (densas, con status terminal) en el FlowStore de la sesión,
//! borra el task y notifica a la cola de workers. Lo usan el binario de
//! demo y los tests de integración; también expone la inyección cruda de
//! respuestas para fabricar huecos y desorden.

use std::collections::HashMap;

use fleet_domain::{ClientId, Message, SessionId, StatusPayload};
use fleet_store::{AccessToken, Task};
use serde_json::Value;

use crate::env::CoreEnv;
use crate::errors::{FlowError, Result};

pub type ActionHandler = Box<dyn Fn(&Message) -> Vec<Value> + Send + Sync>;

pub struct ClientSimulator {
    env: CoreEnv,
    token: AccessToken,
    client_id: ClientId,
    actions: HashMap<String, ActionHandler>,
}

impl ClientSimulator {
    pub fn new(env: CoreEnv, client_id: ClientId) -> Self {
        let token = AccessToken::new(client_id.as_str());
        Self { env,
               token,
               client_id,
               actions: HashMap::new() }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Registra el handler de una acción: recibe el mensaje del request y
    /// devuelve los payloads de respuesta.
    pub fn handle<F>(&mut self, action: impl Into<String>, handler: F)
        where F: Fn(&Message) -> Vec<Value> + Send + Sync + 'static
    {
        self.actions.insert(action.into(), Box::new(handler));
    }

    /// Atiende los tasks disponibles de la cola del cliente. Devuelve
    /// cuántos procesó.
    pub fn poll_once(&self) -> Result<usize> {
        let tasks = self.env
                        .task_queue
                        .lease_tasks(self.client_id.as_str(), chrono::Duration::seconds(600), 50, &self.token)?;
        for task in &tasks {
            self.execute(task)?;
        }
        Ok(tasks.len())
    }

    fn execute(&self, task: &Task) -> Result<()> {
        let request = &task.message;
        let action = request.name.as_deref().unwrap_or_default();
        let (payloads, status) = match self.actions.get(action) {
            Some(handler) => (handler(request), StatusPayload::ok()),
            None => (Vec::new(), StatusPayload::generic_error(format!("action '{action}' not available"))),
        };
        deliver_responses(&self.env, &self.token, &request.session_id, request.request_id, payloads, status)?;
        self.env
            .task_queue
            .delete(self.client_id.as_str(), &[task.id], &self.token)?;
        Ok(())
    }
}

/// Escribe una transacción completa de respuestas (densas 1..N, status al
/// final) y notifica a la cola de workers de la sesión.
pub fn deliver_responses(env: &CoreEnv,
                         token: &AccessToken,
                         session_id: &SessionId,
                         request_id: u64,
                         payloads: Vec<Value>,
                         status: StatusPayload)
                         -> Result<()> {
    env.scoped_store(token, session_id, |store| {
        let mut response_id = 0u64;
        for payload in payloads {
            response_id += 1;
            store.queue_response(&Message::response(session_id.clone(), request_id, response_id, payload))?;
        }
        store.queue_response(&Message::status(session_id.clone(), request_id, response_id + 1, status))?;
        Ok::<(), FlowError>(())
    })?;
    env.task_queue.notify_queue(session_id.queue(), session_id, token)?;
    Ok(())
}

/// Inyección cruda de un mensaje de respuesta, sin garantías de densidad.
/// Para fabricar huecos y llegadas desordenadas en tests.
pub fn inject_response(env: &CoreEnv, token: &AccessToken, message: Message) -> Result<()> {
    let session_id = message.session_id.clone();
    env.scoped_store(token, &session_id, |store| {
        store.queue_response(&message)?;
        Ok::<(), FlowError>(())
    })?;
    env.task_queue.notify_queue(session_id.queue(), &session_id, token)?;
    Ok(())
}
