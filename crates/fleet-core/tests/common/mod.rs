//! Fixture compartida de los tests de integración del motor: entorno en
//! memoria completo, flows de prueba y un log de eventos global (indexado
//! por sesión) donde los estados dejan constancia de sus despachos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fleet_core::{declare_flow_states, CoreConfig, CoreEnv, FlowContext, FlowFactory, InMemoryNotifier, Responses,
                 StartFlowOptions, Worker};
use fleet_domain::{ClientId, FlowRecord, FlowState, SessionId};
use fleet_store::{task_subject, AccessToken, DataStore, InMemoryDataStore, InMemoryTaskQueue};
use serde_json::json;

/// (sesión, estado, detalle) por cada despacho observado.
pub static EVENTS: Mutex<Vec<(String, String, String)>> = Mutex::new(Vec::new());

pub fn log_event(ctx: &FlowContext, state: &str, detail: impl Into<String>) {
    EVENTS.lock()
          .unwrap_or_else(|e| e.into_inner())
          .push((ctx.session_id().to_string(), state.to_string(), detail.into()));
}

/// Eventos de una sesión, en orden de despacho.
pub fn events_for(session_id: &SessionId) -> Vec<(String, String)> {
    let key = session_id.to_string();
    EVENTS.lock()
          .unwrap_or_else(|e| e.into_inner())
          .iter()
          .filter(|(session, _, _)| *session == key)
          .map(|(_, state, detail)| (state.clone(), detail.clone()))
          .collect()
}

pub struct TestRig {
    pub data_store: Arc<InMemoryDataStore>,
    pub task_queue: Arc<InMemoryTaskQueue>,
    pub notifier: Arc<InMemoryNotifier>,
    pub env: CoreEnv,
    pub factory: FlowFactory,
    pub worker: Worker,
    pub token: AccessToken,
}

impl TestRig {
    pub fn new() -> Self {
        let data_store = Arc::new(InMemoryDataStore::new());
        let task_queue = Arc::new(InMemoryTaskQueue::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let env = CoreEnv::new(data_store.clone(),
                               task_queue.clone(),
                               notifier.clone(),
                               CoreConfig::default());
        let factory = FlowFactory::new(env.clone());
        let worker = Worker::new(factory.clone(), "W", AccessToken::new("worker")).expect("worker");
        Self { data_store,
               task_queue,
               notifier,
               env,
               factory,
               worker,
               token: AccessToken::new("test") }
    }

    pub fn options(&self) -> StartFlowOptions {
        StartFlowOptions::new(self.token.clone()).notify_user(false)
    }

    /// Estado del registro persistido de la sesión.
    pub fn flow_state(&self, session_id: &SessionId) -> FlowState {
        self.flow_record(session_id).state
    }

    pub fn flow_record(&self, session_id: &SessionId) -> FlowRecord {
        let rows = self.data_store
                       .resolve_regex(&task_subject(session_id), "flow", 1, &self.token)
                       .expect("record read");
        let row = rows.first().expect("record present");
        serde_json::from_slice(&row.value).expect("record decodes")
    }

    /// Requests pendientes persistidos de la sesión (sin el centinela).
    pub fn request_states(&self, session_id: &SessionId) -> Vec<fleet_domain::RequestState> {
        let store = fleet_store::FlowStore::new(self.data_store.clone(),
                                                self.task_queue.clone(),
                                                self.token.clone(),
                                                fleet_store::StoreLimits::default(),
                                                session_id.clone());
        store.fetch_requests_and_responses()
             .expect("fetch")
             .pairs
             .into_iter()
             .map(|(request, _)| request)
             .filter(|request| request.id != 0)
             .collect()
    }

    /// Claves `flow:*` que siguen vivas en el estado de la sesión.
    pub fn residual_state_keys(&self, session_id: &SessionId) -> Vec<String> {
        self.data_store
            .keys(&fleet_store::state_subject(session_id))
            .into_iter()
            .filter(|k| k.starts_with("flow:"))
            .collect()
    }
}

pub fn client(n: u32) -> ClientId {
    ClientId::new(format!("C.{n:04X}")).expect("client id")
}

// ---- Flows de prueba compartidos ----

/// Una llamada a cliente y un estado final que registra lo recibido.
#[derive(Default)]
pub struct EchoFlow;

impl EchoFlow {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        let payload = ctx.args().get("payload").cloned().unwrap_or(json!("x"));
        ctx.call_client("Echo", payload, "Done", HashMap::new(), None)
    }

    fn done(&mut self, ctx: &FlowContext, responses: &Responses<'_>) -> fleet_core::Result<()> {
        let payloads: Vec<String> = responses.payloads().map(|p| p.to_string()).collect();
        log_event(ctx, "Done", format!("ok={} payloads={}", responses.success(), payloads.join(",")));
        Ok(())
    }
}

declare_flow_states! {
    EchoFlow {
        "Start" => start ["Done"],
        "Done"  => done  [],
    }
}

pub fn register_echo(factory: &FlowFactory) {
    factory.register("EchoFlow", |_args| Ok(Box::<EchoFlow>::default()));
}
