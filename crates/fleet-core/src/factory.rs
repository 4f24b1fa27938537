//! Factoría de flows: creación, carga, guardado y locking por sesión.
//!
//! La factoría mantiene el registro nombre → constructor con el que se
//! resuelve el despacho por clase, el registro de flows well-known y la
//! tabla de locks por sesión que serializa a los workers. Es clonable a
//! bajo coste (estado compartido) y cada contexto recibe su propia copia:
//! así `call_flow` no depende de ningún singleton global. El registro
//! persistente del flow vive bajo el sujeto `task:<sesión>` con la clave
//! `flow`; solo ese registro se serializa (los cursores transitorios se
//! re-derivan del FlowStore al cargar).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use fleet_domain::{ClientId, CpuSeconds, FlowRecord, FlowState, RequestState, SessionId};
use fleet_store::{task_subject, AccessToken};
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::context::{FlowContext, FlowHandle, SharedRequestQueue};
use crate::env::CoreEnv;
use crate::errors::{FlowError, Result};
use crate::flow::Flow;
use crate::stats::counter;
use crate::well_known::WellKnownFlow;

const FLOW_RECORD_KEY: &str = "flow";

/// Constructor registrado de una clase de flow. Recibe el bag de argumentos
/// del arranque (también disponible después vía `FlowContext::args`).
pub type FlowConstructor = fn(&HashMap<String, Value>) -> Result<Box<dyn Flow>>;

/// Enlace al padre cuando el flow se crea desde `call_flow`: el request que
/// lo representa en el padre y el buffer pendiente compartido.
pub struct ParentLink {
    pub request_state: RequestState,
    pub queue: SharedRequestQueue,
}

pub struct StartFlowOptions {
    pub client_id: Option<ClientId>,
    /// Cola de workers; vacía significa la de la configuración.
    pub queue_name: String,
    pub event_id: Option<String>,
    pub priority: u32,
    pub notify_user: bool,
    pub args: HashMap<String, Value>,
    pub token: AccessToken,
    pub parent: Option<ParentLink>,
}

impl StartFlowOptions {
    pub fn new(token: AccessToken) -> Self {
        Self { client_id: None,
               queue_name: String::new(),
               event_id: None,
               priority: 0,
               notify_user: true,
               args: HashMap::new(),
               token,
               parent: None }
    }

    pub fn client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn notify_user(mut self, notify: bool) -> Self {
        self.notify_user = notify;
        self
    }
}

struct FactoryInner {
    env: CoreEnv,
    registry: DashMap<String, FlowConstructor>,
    well_known: DashMap<SessionId, Arc<Mutex<Box<dyn WellKnownFlow>>>>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

#[derive(Clone)]
pub struct FlowFactory {
    inner: Arc<FactoryInner>,
}

impl FlowFactory {
    pub fn new(env: CoreEnv) -> Self {
        Self { inner: Arc::new(FactoryInner { env,
                                              registry: DashMap::new(),
                                              well_known: DashMap::new(),
                                              locks: DashMap::new() }) }
    }

    pub fn env(&self) -> &CoreEnv {
        &self.inner.env
    }

    /// Registra una clase de flow bajo su nombre de despacho.
    pub fn register(&self, name: impl Into<String>, constructor: FlowConstructor) {
        self.inner.registry.insert(name.into(), constructor);
    }

    /// Registra un flow well-known bajo su sesión reservada.
    pub fn register_well_known(&self, session_id: SessionId, flow: Box<dyn WellKnownFlow>) -> Result<()> {
        if !session_id.is_well_known() {
            return Err(FlowError::Internal(format!("{session_id} is outside the reserved range")));
        }
        self.inner.well_known.insert(session_id, Arc::new(Mutex::new(flow)));
        Ok(())
    }

    pub fn is_well_known(&self, session_id: &SessionId) -> bool {
        self.inner.well_known.contains_key(session_id)
    }

    /// Lock por sesión: la única frontera de corrección entre workers.
    pub fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Crea un flow: instancia la clase, corre `Start` sincrónicamente,
    /// publica sus mensajes y lo persiste. Un flow que no emitió trabajo se
    /// cierra aquí mismo (por eso un hijo trivial termina antes de que el
    /// padre vuelva de `call_flow`).
    pub fn start_flow(&self, flow_name: &str, opts: StartFlowOptions) -> Result<SessionId> {
        let constructor = self.constructor(flow_name)?;
        let flow = constructor(&opts.args)?;
        let in_order = flow.process_in_order();

        let queue_name = if opts.queue_name.is_empty() {
            self.inner.env.config.worker_queue.clone()
        } else {
            opts.queue_name.clone()
        };
        let session_id = self.new_session_id(&queue_name, &opts.token)?;
        // Sin origen conocido asumimos consola y generamos un event id.
        let event_id = opts.event_id
                           .clone()
                           .unwrap_or_else(|| format!("{}:console:{}", opts.token.username, Uuid::new_v4().simple()));

        let record = FlowRecord { session_id: session_id.clone(),
                                  name: flow_name.to_string(),
                                  creator: opts.token.username.clone(),
                                  event_id,
                                  create_time_us: Utc::now().timestamp_micros(),
                                  state: FlowState::Running,
                                  status: None,
                                  priority: opts.priority,
                                  client_id: opts.client_id.clone(),
                                  args: opts.args.clone(),
                                  request_state: opts.parent.as_ref().map(|p| p.request_state.clone()),
                                  children: Vec::new(),
                                  cpu_used: CpuSeconds::default(),
                                  network_bytes_sent: 0,
                                  backtrace: None,
                                  notify_to_user: opts.notify_user };

        let pending: SharedRequestQueue = opts.parent
                                              .as_ref()
                                              .map(|p| p.queue.clone())
                                              .unwrap_or_else(|| Arc::new(Mutex::new(Vec::new())));
        let ctx = FlowContext::new(self.inner.env.clone(),
                                   self.clone(),
                                   opts.token.clone(),
                                   record,
                                   queue_name,
                                   in_order,
                                   pending);
        let handle = FlowHandle::new(ctx, flow);

        handle.run_start();
        // Un solo flush publica también lo que el padre tuviera pendiente.
        handle.ctx().flush_messages()?;
        handle.maybe_complete()?;
        self.save_flow(&handle)?;

        log::info!("started flow {} ({}) for client {:?}", session_id, flow_name, opts.client_id);
        Ok(session_id)
    }

    /// Materializa un flow guardado: registro + contexto fresco, con los
    /// cursores transitorios re-derivados de un barrido del FlowStore.
    pub fn load_flow(&self, session_id: &SessionId, token: &AccessToken) -> Result<FlowHandle> {
        let rows = self.inner
                       .env
                       .data_store
                       .resolve_regex(&task_subject(session_id), FLOW_RECORD_KEY, 1, token)?;
        let row = rows.into_iter()
                      .next()
                      .ok_or_else(|| FlowError::NotFound(session_id.clone()))?;
        let record: FlowRecord = serde_json::from_slice(&row.value)
            .map_err(|e| FlowError::Internal(format!("corrupt flow record for {session_id}: {e}")))?;

        let constructor = self.constructor(&record.name)?;
        let flow = constructor(&record.args)?;
        let in_order = flow.process_in_order();
        let queue_name = session_id.queue().to_string();
        let ctx = FlowContext::new(self.inner.env.clone(),
                                   self.clone(),
                                   token.clone(),
                                   record,
                                   queue_name,
                                   in_order,
                                   Arc::new(Mutex::new(Vec::new())));

        let page = self.inner.env.scoped_store(token, session_id, |store| {
            store.fetch_requests_and_responses().map_err(FlowError::from)
        })?;
        let mut outstanding = 0i64;
        let mut max_id = 0u64;
        let mut min_id: Option<u64> = None;
        for (request, _) in &page.pairs {
            if request.id == 0 {
                continue;
            }
            outstanding += 1;
            max_id = max_id.max(request.id);
            min_id = Some(min_id.map_or(request.id, |m| m.min(request.id)));
        }
        let next_outbound = max_id + 1;
        ctx.restore_cursors(next_outbound, min_id.unwrap_or(next_outbound), outstanding);

        Ok(FlowHandle::new(ctx, flow))
    }

    /// Serializa el registro del flow. El buffer pendiente debe estar vacío
    /// (flush antes de guardar): así cada request se publica exactamente
    /// una vez.
    pub fn save_flow(&self, handle: &FlowHandle) -> Result<()> {
        let ctx = handle.ctx();
        if !ctx.pending_is_empty() {
            return Err(FlowError::Internal(format!("flow {} still has unflushed requests; flush before saving",
                                                   ctx.session_id())));
        }
        let record = ctx.record_snapshot();
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| FlowError::Internal(format!("cannot serialize flow {}: {e}", ctx.session_id())))?;

        let mut values = IndexMap::new();
        values.insert(FLOW_RECORD_KEY.to_string(), vec![bytes]);
        self.inner.env.data_store.multi_set(&task_subject(ctx.session_id()),
                                            &values,
                                            &[FLOW_RECORD_KEY.to_string()],
                                            true,
                                            ctx.token())?;
        self.inner.env.stats.increment(counter::FLOWS_SERIALIZED);
        Ok(())
    }

    /// Entrega a un flow well-known los mensajes acumulados en su sesión,
    /// de uno en uno, y los purga.
    pub fn process_well_known(&self, session_id: &SessionId, token: &AccessToken) -> Result<()> {
        let flow = self.inner
                       .well_known
                       .get(session_id)
                       .map(|entry| entry.value().clone())
                       .ok_or_else(|| FlowError::UnknownWellKnown(session_id.clone()))?;
        let env = self.inner.env.clone();
        self.inner.env.scoped_store(token, session_id, |store| {
            let messages = store.fetch_responses()?;
            for message in &messages {
                store.delete_response(message);
                let mut guard = flow.lock().unwrap_or_else(|e| e.into_inner());
                match guard.process_message(&env, message) {
                    Ok(()) => env.stats.increment(counter::WELL_KNOWN_HANDLED),
                    Err(e) => {
                        env.stats.increment(counter::FLOW_ERRORS);
                        log::error!("well-known flow {session_id} failed on a message: {e}");
                    }
                }
            }
            Ok::<(), FlowError>(())
        })
    }

    fn constructor(&self, flow_name: &str) -> Result<FlowConstructor> {
        self.inner
            .registry
            .get(flow_name)
            .map(|entry| *entry.value())
            .ok_or_else(|| FlowError::UnknownFlowName(flow_name.to_string()))
    }

    /// Sortea una sesión nueva comprobando que no exista ya un registro con
    /// ese id.
    fn new_session_id(&self, queue_name: &str, token: &AccessToken) -> Result<SessionId> {
        loop {
            let candidate = SessionId::random(queue_name);
            let existing = self.inner
                               .env
                               .data_store
                               .resolve_regex(&task_subject(&candidate), FLOW_RECORD_KEY, 1, token)?;
            if existing.is_empty() {
                return Ok(candidate);
            }
            log::warn!("session id collision on {candidate}; drawing again");
        }
    }
}
