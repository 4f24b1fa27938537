//! Contexto de ejecución por sesión: el corazón del motor.
//!
//! El `FlowContext` es la sesión transitoria de un flow: posee los cursores
//! de salida (ids salientes monótonos bajo el lock de outbound), el buffer
//! de requests pendientes de publicar, el registro persistente y las
//! operaciones que los estados invocan (`call_client`, `call_flow`,
//! `call_state`, `send_reply`). `process_completed_requests` reclama y
//! despacha los requests completos; `flush_messages` publica de una vez lo
//! acumulado por los estados.
//!
//! Modelo de concurrencia: el lock por sesión de la factoría serializa a
//! los workers; dentro de la sesión todo es cooperativo salvo el despacho
//! de hunts, que abre un scope sobre el pool y se une a él antes de volver.
//! Los contadores del contexto se protegen con el lock de outbound y
//! atómicos, de modo que los despachos paralelos de un hunt pueden emitir
//! nuevas llamadas sin carreras.

use std::collections::HashMap;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fleet_domain::{ClientId, FlowRecord, FlowState, Message, RequestState, SessionId, StatusPayload};
use fleet_store::{AccessToken, FlowStore, Task};
use serde_json::Value;

use crate::env::CoreEnv;
use crate::errors::{FlowError, Result};
use crate::factory::{FlowFactory, ParentLink, StartFlowOptions};
use crate::flow::Flow;
use crate::responses::Responses;
use crate::stats::counter;

/// Buffer de requests pendientes de flush. Un flow hijo lo comparte con su
/// padre durante `call_flow`, de modo que un solo flush publica ambos.
pub type SharedRequestQueue = Arc<Mutex<Vec<RequestState>>>;

fn lock<'a, T>(m: &'a Mutex<T>) -> MutexGuard<'a, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum ReplyBody {
    Message(Value),
    Status(StatusPayload),
}

pub struct FlowContext {
    env: CoreEnv,
    factory: FlowFactory,
    token: AccessToken,
    session_id: SessionId,
    queue_name: String,
    /// Cierto para flows corrientes; falso para hunts.
    in_order: bool,
    record: Mutex<FlowRecord>,
    pending: SharedRequestQueue,
    /// El lock de outbound: protege la asignación de ids salientes y el
    /// intercambio del buffer pendiente.
    outbound: Mutex<u64>,
    outstanding: AtomicI64,
    next_processed: AtomicU64,
    current_state: Mutex<String>,
    /// Transiciones declaradas del estado en ejecución, para validar
    /// `next_state` en flows ordenados.
    declared_next: Mutex<Option<&'static [&'static str]>>,
}

impl FlowContext {
    pub(crate) fn new(env: CoreEnv,
                      factory: FlowFactory,
                      token: AccessToken,
                      record: FlowRecord,
                      queue_name: String,
                      in_order: bool,
                      pending: SharedRequestQueue)
                      -> Self {
        let session_id = record.session_id.clone();
        Self { env,
               factory,
               token,
               session_id,
               queue_name,
               in_order,
               record: Mutex::new(record),
               pending,
               outbound: Mutex::new(1),
               outstanding: AtomicI64::new(0),
               next_processed: AtomicU64::new(1),
               current_state: Mutex::new("Start".to_string()),
               declared_next: Mutex::new(None) }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Factoría inyectada (la misma que creó este contexto).
    pub fn factory(&self) -> &FlowFactory {
        &self.factory
    }

    pub fn client_id(&self) -> Option<ClientId> {
        lock(&self.record).client_id.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.record).is_running()
    }

    pub fn flow_state(&self) -> FlowState {
        lock(&self.record).state
    }

    pub fn current_state(&self) -> String {
        lock(&self.current_state).clone()
    }

    /// Requests emitidos y aún no procesados. Con esto se decide si el flow
    /// puede destruirse.
    pub fn outstanding_requests(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Argumentos opacos con los que se arrancó el flow.
    pub fn args(&self) -> HashMap<String, Value> {
        lock(&self.record).args.clone()
    }

    /// Sesiones hijas lanzadas hasta ahora.
    pub fn children(&self) -> Vec<SessionId> {
        lock(&self.record).children.clone()
    }

    pub fn backtrace(&self) -> Option<String> {
        lock(&self.record).backtrace.clone()
    }

    /// Fija el mensaje terminal del registro.
    pub fn set_status(&self, status: impl Into<String>) {
        lock(&self.record).status = Some(status.into());
    }

    /// Copia del registro persistente, lista para serializar.
    pub fn record_snapshot(&self) -> FlowRecord {
        lock(&self.record).clone()
    }

    pub(crate) fn pending_is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }

    /// Restaura los cursores transitorios re-derivados del almacén al
    /// cargar el flow.
    pub(crate) fn restore_cursors(&self, next_outbound: u64, next_processed: u64, outstanding: i64) {
        *lock(&self.outbound) = next_outbound;
        self.next_processed.store(next_processed, Ordering::SeqCst);
        self.outstanding.store(outstanding, Ordering::SeqCst);
    }

    fn next_outbound_id(&self) -> u64 {
        let mut guard = lock(&self.outbound);
        let id = *guard;
        *guard += 1;
        id
    }

    /// Valida `next_state` contra las transiciones declaradas del estado en
    /// curso. Los hunts no imponen orden y aceptan cualquier estado.
    fn check_transition(&self, next_state: &str) -> Result<()> {
        if next_state.is_empty() {
            return Err(FlowError::Internal("next_state is required".into()));
        }
        if !self.in_order {
            return Ok(());
        }
        let declared = lock(&self.declared_next);
        let allowed: &[&str] = declared.unwrap_or(&[]);
        if allowed.contains(&next_state) {
            Ok(())
        } else {
            let record = lock(&self.record);
            Err(FlowError::InvalidStateTransition { flow: record.name.clone(),
                                                    from: self.current_state(),
                                                    to: next_state.to_string() })
        }
    }

    /// Llama una acción en el cliente de forma asíncrona.
    ///
    /// El mensaje no sale todavía: queda en el buffer pendiente con su
    /// `RequestState` y se publica en el próximo `flush_messages`. Las
    /// respuestas se acumularán hasta el status terminal, momento en el que
    /// `next_state` recibirá la transacción completa.
    pub fn call_client(&self,
                       action: &str,
                       args: Value,
                       next_state: &str,
                       request_data: HashMap<String, Value>,
                       client_id: Option<ClientId>)
                       -> Result<()> {
        let client_id = if self.in_order { client_id.or_else(|| self.client_id()) } else { client_id };
        self.check_transition(next_state)?;

        let outbound_id = self.next_outbound_id();
        let priority = lock(&self.record).priority;
        let message = Message::request(self.session_id.clone(), action, outbound_id, priority, args);

        let mut state = RequestState::new(outbound_id, self.session_id.clone(), next_state, client_id);
        state.data = request_data;
        state.request = Some(message);

        lock(&self.pending).push(state);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Crea un flow hijo cuyas respuestas llegarán a `next_state`.
    ///
    /// El hijo se arranca sincrónicamente reutilizando el buffer pendiente
    /// de este contexto, así el flush del padre publica los requests de
    /// ambos. No hay mensaje saliente: el hijo reporta con `send_reply`.
    pub fn call_flow(&self,
                     flow_name: &str,
                     next_state: &str,
                     request_data: HashMap<String, Value>,
                     client_id: Option<ClientId>,
                     args: HashMap<String, Value>)
                     -> Result<SessionId> {
        self.check_transition(next_state)?;
        let client_id = if self.in_order { client_id.or_else(|| self.client_id()) } else { client_id };

        let outbound_id = self.next_outbound_id();
        let mut state = RequestState::new(outbound_id, self.session_id.clone(), next_state, client_id.clone());
        state.flow_name = Some(flow_name.to_string());
        state.data = request_data;

        let (event_id, priority) = {
            let record = lock(&self.record);
            (record.event_id.clone(), record.priority)
        };
        let opts = StartFlowOptions { client_id,
                                      queue_name: self.queue_name.clone(),
                                      event_id: Some(event_id),
                                      priority,
                                      notify_user: false,
                                      args,
                                      token: self.token.clone(),
                                      parent: Some(ParentLink { request_state: state.clone(),
                                                                queue: self.pending.clone() }) };
        let child = self.factory.start_flow(flow_name, opts)?;

        lock(&self.pending).push(state);
        lock(&self.record).children.push(child.clone());
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(child)
    }

    /// Auto-despacho: programa un estado de este mismo flow en otro turno
    /// de worker, entregándole los mensajes dados.
    ///
    /// A diferencia de `call_client`, aquí se persiste de inmediato: el
    /// request y sus respuestas quedan escritos, el status terminal se
    /// programa como task en la cola propia y se notifica al worker.
    pub fn call_state(&self, messages: Vec<Message>, next_state: &str, client_id: Option<ClientId>) -> Result<()> {
        if next_state.is_empty() {
            return Err(FlowError::Internal("next_state is required".into()));
        }
        let client_id = if self.in_order { client_id.or_else(|| self.client_id()) } else { client_id };
        let outbound_id = self.next_outbound_id();

        let mut messages = messages;
        let needs_status = !messages.last().map(|m| m.is_status()).unwrap_or(false);
        if needs_status {
            messages.push(Message::status(self.session_id.clone(), outbound_id, 0, StatusPayload::ok()));
        }

        self.env.scoped_store(&self.token, &self.session_id, |store| {
            let state = RequestState::new(outbound_id, self.session_id.clone(), next_state, client_id.clone());
            store.queue_request(&state)?;

            let mut last = None;
            for (i, mut message) in messages.into_iter().enumerate() {
                message.session_id = self.session_id.clone();
                message.request_id = outbound_id;
                message.response_id = (i + 1) as u64;
                message.auth_state = fleet_domain::AuthState::Authenticated;
                store.queue_response(&message)?;
                last = Some(message);
            }
            self.outstanding.fetch_add(1, Ordering::SeqCst);

            // El status va también a la cola propia: su TTL garantiza que la
            // invocación del estado no se pierda.
            if let Some(status) = last {
                self.env.task_queue.schedule(vec![Task::new(self.queue_name.clone(), status)], false, &self.token)?;
            }
            self.env.task_queue.notify_queue(&self.queue_name, &self.session_id, &self.token)?;
            Ok::<(), FlowError>(())
        })
    }

    /// Envía una respuesta al flow padre. Sin padre, se ignora.
    pub fn send_reply(&self, payload: Value) -> Result<()> {
        self.reply_to_parent(ReplyBody::Message(payload))
    }

    /// Envía un status al flow padre, estampando el consumo de recursos
    /// acumulado y la sesión propia. Sin padre, se ignora.
    pub fn send_status(&self, status: StatusPayload) -> Result<()> {
        self.reply_to_parent(ReplyBody::Status(status))
    }

    fn reply_to_parent(&self, body: ReplyBody) -> Result<()> {
        let (parent_session, parent_request_id, response_id) = {
            let mut record = lock(&self.record);
            let Some(parent) = record.request_state.as_mut() else {
                return Ok(());
            };
            parent.response_count += 1;
            (parent.session_id.clone(), parent.id, parent.response_count)
        };
        let worker_queue = parent_session.queue().to_string();

        let message = match body {
            ReplyBody::Message(payload) => Message::response(parent_session.clone(), parent_request_id, response_id, payload),
            ReplyBody::Status(mut status) => {
                {
                    let record = lock(&self.record);
                    status.cpu_time_used = Some(record.cpu_used);
                    status.network_bytes_sent = Some(record.network_bytes_sent);
                }
                status.child_session_id = Some(self.session_id.clone());
                Message::status(parent_session.clone(), parent_request_id, response_id, status)
            }
        };

        let result = self.env.scoped_store(&self.token, &parent_session, |store| {
            if message.is_status() {
                // Los status también van a la cola de workers del padre.
                self.env.task_queue.schedule(vec![Task::new(worker_queue.clone(), message.clone())], false, &self.token)?;
            }
            store.queue_response(&message)?;
            Ok::<(), FlowError>(())
        });

        // La cola del padre se notifica siempre, también tras un fallo.
        let notified = self.env.task_queue.notify_queue(&worker_queue, &parent_session, &self.token);
        result?;
        notified.map_err(FlowError::from)
    }

    /// Publica de una vez los requests acumulados por los estados.
    ///
    /// Primero se programan los mensajes salientes reales en la cola de
    /// cada cliente (`sync`, para observar los ids) y se copia cada id de
    /// task al `RequestState` correspondiente; después los `RequestState`
    /// se persisten agrupados por sesión.
    pub fn flush_messages(&self) -> Result<()> {
        let mut states = {
            let _outbound = lock(&self.outbound);
            mem::take(&mut *lock(&self.pending))
        };
        if states.is_empty() {
            return Ok(());
        }

        let mut by_client: HashMap<ClientId, Vec<usize>> = HashMap::new();
        for (i, state) in states.iter().enumerate() {
            if !state.has_outbound_message() {
                continue;
            }
            match &state.client_id {
                Some(client) => by_client.entry(client.clone()).or_default().push(i),
                None => log::warn!("request {} of {} has no destination client; not scheduled",
                                   state.id, state.session_id),
            }
        }
        for (client, idxs) in by_client {
            let mut tasks = Vec::with_capacity(idxs.len());
            for &i in &idxs {
                if let Some(message) = states[i].request.clone() {
                    tasks.push(Task::new(client.as_str(), message));
                }
            }
            let scheduled = self.env.task_queue.schedule(tasks, true, &self.token)?;
            self.env.stats.add(counter::WORKER_REQUESTS_ISSUED, scheduled.len() as u64);
            for (&i, task) in idxs.iter().zip(scheduled.iter()) {
                states[i].ts_id = Some(task.id);
            }
        }

        let mut by_session: Vec<(SessionId, Vec<RequestState>)> = Vec::new();
        for state in states {
            match by_session.iter_mut().find(|(session, _)| *session == state.session_id) {
                Some((_, group)) => group.push(state),
                None => by_session.push((state.session_id.clone(), vec![state])),
            }
        }
        for (session, requests) in by_session {
            self.env.scoped_store(&self.token, &session, |store| {
                for request in &requests {
                    store.queue_request(request)?;
                }
                Ok::<(), FlowError>(())
            })?;
        }
        Ok(())
    }

    /// Reclama y despacha los requests completos de la sesión.
    ///
    /// Se toma una página de requests/respuestas, se procesan tantos
    /// completos como sea posible y se deja el resto para la próxima
    /// pasada. Si la página vino truncada (`more_data`) se re-notifica la
    /// cola y no se evalúa el cierre del flow. El pool solo interviene en
    /// hunts, y el scope se une antes de decidir el cierre.
    pub(crate) fn process_completed_requests(&self, flow: &Mutex<Box<dyn Flow>>, pool: &rayon::ThreadPool) -> Result<()> {
        if !self.is_running() {
            log::info!("flow {} dead - deleting all outstanding requests", self.session_id);
            return self.env.scoped_store(&self.token, &self.session_id, |store| {
                let page = store.fetch_requests_and_responses()?;
                for (request, responses) in &page.pairs {
                    store.delete_request_states(request, responses);
                }
                Ok(())
            });
        }

        let more_data = self.env.scoped_store(&self.token, &self.session_id, |store| {
            let page = store.fetch_requests_and_responses()?;
            let more_data = page.more_data;

            if self.in_order {
                self.claim_and_dispatch(store, page.pairs, flow, None);
            } else {
                pool.scope(|scope| self.claim_and_dispatch(store, page.pairs, flow, Some(scope)));
            }

            // Con la página completa (y el pool ya unido) se decide el cierre.
            if !more_data {
                self.maybe_complete(flow)?;
            }
            Ok::<bool, FlowError>(more_data)
        })?;

        if more_data {
            // Quedó estado sin leer: que otra pasada continúe.
            self.env.task_queue.notify_queue(&self.queue_name, &self.session_id, &self.token)?;
        }
        Ok(())
    }

    fn claim_and_dispatch<'s>(&'s self,
                              store: &mut FlowStore,
                              pairs: Vec<(RequestState, Vec<Message>)>,
                              flow: &'s Mutex<Box<dyn Flow>>,
                              scope: Option<&rayon::Scope<'s>>) {
        for (mut request, responses) in pairs {
            if request.id == 0 {
                continue;
            }
            if responses.is_empty() {
                continue;
            }

            if self.in_order {
                let next = self.next_processed.load(Ordering::SeqCst);
                if request.id > next {
                    break;
                }
                if request.id < next {
                    // Duplicado rancio de una pasada anterior.
                    store.delete_request_states(&request, &responses);
                    continue;
                }
                if request.id != next {
                    self.env.stats.increment(counter::RESPONSE_OUT_OF_ORDER);
                    break;
                }
            }

            // Completo solo si la última respuesta es el status terminal.
            if !responses.last().map(|m| m.is_status()).unwrap_or(false) {
                continue;
            }

            // Reclamado: el request y sus respuestas salen de la cola.
            store.delete_request_states(&request, &responses);

            // ¿Llegaron todas? La lista debe ser densa 1..N.
            let expected = responses.last().map(|m| m.response_id).unwrap_or(0);
            if responses.len() as u64 != expected {
                // Retransmisión explícita, aparte de la redelivery por TTL
                // de la cola de tasks.
                if request.transmission_count < self.env.config.max_retransmissions {
                    request.transmission_count += 1;
                    self.env.stats.increment(counter::RETRANSMISSIONS);
                    lock(&self.pending).push(request);
                }
                break;
            }

            if !self.is_running() {
                break;
            }

            // Contabiliza el consumo que reporta el status antes de despachar.
            if let Some(status) = responses.last().and_then(|m| m.status_payload()) {
                lock(&self.record).accumulate_usage(&status);
            }

            match scope {
                None => self.dispatch_single(flow, &request, &responses),
                Some(scope) => {
                    // En un hunt cada request es independiente: al pool.
                    scope.spawn(move |_| self.dispatch_single(flow, &request, &responses));
                }
            }

            if self.in_order {
                self.next_processed.fetch_add(1, Ordering::SeqCst);
            }
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Completa un request invocando su estado. Cualquier fallo del handler
    /// (error o pánico) se convierte según la clase de flow: los ordenados
    /// pasan a `Error` terminal, los hunts registran el error de cliente y
    /// siguen.
    fn dispatch_single(&self, flow: &Mutex<Box<dyn Flow>>, request: &RequestState, responses: &[Message]) {
        *lock(&self.current_state) = request.next_state.clone();
        let client_id = request.client_id.clone().or_else(|| self.client_id());
        log::info!("{} running {} with {} responses from {:?}",
                   self.session_id, request.next_state, responses.len(), client_id);

        let view = Responses::new(request, responses);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut guard = lock(flow);
            *lock(&self.declared_next) = guard.transitions(&request.next_state);
            guard.call_state(self, &request.next_state, &view)
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic)),
        };
        if let Some(reason) = failure {
            self.env.stats.increment(counter::FLOW_ERRORS);
            let backtrace = format!("state '{}' failed: {reason}", request.next_state);
            if self.in_order {
                self.error(client_id.as_ref(), backtrace);
            } else {
                self.log_client_error(client_id.as_ref(), backtrace);
            }
        }
    }

    /// Invocación sintética del estado `Start` al crear el flow.
    pub(crate) fn dispatch_start(&self, flow: &Mutex<Box<dyn Flow>>) {
        let request = RequestState::new(0, self.session_id.clone(), "Start", self.client_id());
        self.dispatch_single(flow, &request, &[]);
    }

    /// Cierra el flow si ya no le quedan requests pendientes: invoca `End`
    /// (que puede emitir más llamadas y posponer la destrucción) y, si tras
    /// ello sigue sin trabajo, lo termina.
    pub(crate) fn maybe_complete(&self, flow: &Mutex<Box<dyn Flow>>) -> Result<()> {
        if self.outstanding_requests() != 0 {
            return Ok(());
        }
        if self.is_running() && self.current_state() != "End" {
            self.invoke_end(flow);
        }
        if self.outstanding_requests() == 0 {
            self.env.stats.increment(counter::FLOW_COMPLETED);
            log::info!("destroying session {} for client {:?}", self.session_id, self.client_id());
            self.terminate()?;
        }
        Ok(())
    }

    /// Da al flow la oportunidad de cerrar. `End` es opcional: si la clase
    /// no lo declara, solo se marca el cursor de estado.
    fn invoke_end(&self, flow: &Mutex<Box<dyn Flow>>) {
        let knows_end = lock(flow).transitions("End").is_some();
        if !knows_end {
            *lock(&self.current_state) = "End".to_string();
            return;
        }
        let request = RequestState::new(0, self.session_id.clone(), "End", self.client_id());
        self.dispatch_single(flow, &request, &[]);
    }

    /// Mata el flow con error: estado terminal `Error`, traza persistida,
    /// status de error al padre y notificación al usuario.
    pub(crate) fn error(&self, client_id: Option<&ClientId>, backtrace: String) {
        let was_running = {
            let mut record = lock(&self.record);
            if record.is_running() {
                record.state = FlowState::Error;
                record.backtrace = Some(backtrace.clone());
                record.status = Some("flow terminated due to error".to_string());
                true
            } else {
                false
            }
        };
        if !was_running {
            return;
        }
        log::error!("error in flow {} ({:?}): {backtrace}", self.session_id, client_id);
        if let Err(e) = self.send_status(StatusPayload::generic_error(backtrace)) {
            log::warn!("could not report the failure of {} to its parent: {e}", self.session_id);
        }
        self.env.notifier.notify("FlowStatus",
                                 &self.session_id.to_string(),
                                 &format!("Flow ({}) terminated due to error", self.session_id));
    }

    /// Variante de los hunts: un cliente roto no tumba el fan-out.
    fn log_client_error(&self, client_id: Option<&ClientId>, backtrace: String) {
        self.env.stats.increment(counter::CLIENT_ERRORS);
        log::error!("client error in hunt {} ({:?}): {backtrace}", self.session_id, client_id);
    }

    /// Termina el flow: desencola sus tasks residuales, borra su estado y,
    /// si seguía en marcha, responde al padre y pasa a `Terminated`.
    pub(crate) fn terminate(&self) -> Result<()> {
        self.env.scoped_store(&self.token, &self.session_id, |store| {
            store.destroy_flow_states().map_err(FlowError::from)
        })?;

        if self.is_running() {
            log::debug!("terminating flow {}", self.session_id);
            self.send_status(StatusPayload::ok())?;
            let notify = {
                let mut record = lock(&self.record);
                record.state = FlowState::Terminated;
                record.notify_to_user
            };
            if notify {
                self.env.notifier.notify("FlowStatus",
                                         &self.session_id.to_string(),
                                         &format!("Flow ({}) terminated", self.session_id));
            }
        }
        Ok(())
    }
}

/// Un flow vivo: el par (contexto de sesión, objeto de flow). El objeto va
/// tras un mutex para que los despachos paralelos de un hunt se serialicen
/// sobre él y un pánico quede aislado por despacho.
pub struct FlowHandle {
    ctx: FlowContext,
    flow: Mutex<Box<dyn Flow>>,
}

impl FlowHandle {
    pub(crate) fn new(ctx: FlowContext, flow: Box<dyn Flow>) -> Self {
        Self { ctx, flow: Mutex::new(flow) }
    }

    pub fn ctx(&self) -> &FlowContext {
        &self.ctx
    }

    pub fn session_id(&self) -> &SessionId {
        self.ctx.session_id()
    }

    pub fn process_completed_requests(&self, pool: &rayon::ThreadPool) -> Result<()> {
        self.ctx.process_completed_requests(&self.flow, pool)
    }

    pub(crate) fn run_start(&self) {
        self.ctx.dispatch_start(&self.flow);
    }

    /// Cierre inmediato para flows que no emitieron trabajo (p.ej. un hijo
    /// cuyo `Start` solo responde al padre).
    pub(crate) fn maybe_complete(&self) -> Result<()> {
        self.ctx.maybe_complete(&self.flow)
    }
}
