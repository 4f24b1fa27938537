//! Demo del núcleo de ejecución de flows contra el entorno en memoria:
//! un triage con flow hijo, un hunt sobre una pequeña flota de clientes
//! simulados y un sumidero well-known de eventos de auditoría.
//!
//! Todo el wiring (almacén, cola de tasks, notificador) usa los dobles en
//! memoria, así que el binario corre sin servicios externos.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::sim::inject_response;
use fleet_core::{declare_flow_states, ClientSimulator, CoreConfig, CoreEnv, FlowContext, FlowFactory, InMemoryNotifier,
                 Responses, StartFlowOptions, WellKnownFlow, Worker};
use fleet_domain::{ClientId, FlowState, Message, SessionId};
use fleet_store::{AccessToken, InMemoryDataStore, InMemoryTaskQueue};
use serde_json::json;

// --------------------
// Flows de la demo
// --------------------

/// Triage de un endpoint: delega la recogida en un flow hijo y resume lo
/// que este devuelve.
#[derive(Default)]
struct TriageFlow;

impl TriageFlow {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        let child = ctx.call_flow("ListProcessesFlow", "ChildDone", HashMap::new(), None, HashMap::new())?;
        println!("[triage {}] lanzado hijo {child}", ctx.session_id());
        Ok(())
    }

    fn child_done(&mut self, ctx: &FlowContext, responses: &Responses<'_>) -> fleet_core::Result<()> {
        let status = responses.status().cloned().unwrap_or_default();
        println!("[triage {}] hijo {} terminó ok={} con {} procesos",
                 ctx.session_id(),
                 status.child_session_id.clone().map(|s| s.to_string()).unwrap_or_default(),
                 status.is_ok(),
                 responses.len());
        Ok(())
    }
}

declare_flow_states! {
    TriageFlow {
        "Start"     => start      ["ChildDone"],
        "ChildDone" => child_done [],
    }
}

/// Pide el listado de procesos al cliente y reenvía cada proceso al padre.
#[derive(Default)]
struct ListProcessesFlow;

impl ListProcessesFlow {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        ctx.call_client("ListProcesses", json!({}), "Collected", HashMap::new(), None)
    }

    fn collected(&mut self, ctx: &FlowContext, responses: &Responses<'_>) -> fleet_core::Result<()> {
        for process in responses.payloads() {
            ctx.send_reply(process.clone())?;
        }
        println!("[list {}] {} procesos recogidos", ctx.session_id(), responses.len());
        Ok(())
    }
}

declare_flow_states! {
    ListProcessesFlow {
        "Start"     => start     ["Collected"],
        "Collected" => collected [],
    }
}

/// Barrido de flota: el mismo listado en todos los clientes, sin orden.
#[derive(Default)]
struct SweepHunt;

impl SweepHunt {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        let clients = ctx.args().get("clients").cloned().unwrap_or(json!([]));
        for name in clients.as_array().cloned().unwrap_or_default() {
            let client_id = ClientId::new(name.as_str().unwrap_or_default())
                .map_err(|e| fleet_core::FlowError::Internal(e.to_string()))?;
            ctx.call_client("ListProcesses", json!({}), "Collect", HashMap::new(), Some(client_id))?;
        }
        Ok(())
    }

    fn collect(&mut self, ctx: &FlowContext, responses: &Responses<'_>) -> fleet_core::Result<()> {
        println!("[hunt {}] request {} devolvió {} procesos",
                 ctx.session_id(),
                 responses.request().id,
                 responses.len());
        Ok(())
    }
}

declare_flow_states! {
    hunt SweepHunt {
        "Start"   => start   ["Collect"],
        "Collect" => collect [],
    }
}

/// Sumidero well-known de eventos de auditoría.
struct AuditSink;

impl WellKnownFlow for AuditSink {
    fn name(&self) -> &'static str {
        "AuditSink"
    }

    fn process_message(&mut self, _env: &CoreEnv, message: &Message) -> fleet_core::Result<()> {
        println!("[audit] evento recibido: {}", message.args);
        Ok(())
    }
}

// --------------------
// Wiring y escenario
// --------------------

/// Alterna clientes y worker hasta que no quede trabajo.
fn pump(worker: &Worker, fleet: &[ClientSimulator]) {
    loop {
        let mut moved = worker.run_until_idle().expect("worker");
        for sim in fleet {
            moved += sim.poll_once().expect("client poll");
        }
        if moved == 0 {
            break;
        }
    }
}

fn flow_state(factory: &FlowFactory, session: &SessionId, token: &AccessToken) -> FlowState {
    factory.load_flow(session, token)
           .map(|handle| handle.ctx().flow_state())
           .unwrap_or(FlowState::Error)
}

fn main() {
    dotenvy::dotenv().ok();
    println!("== fleetflow: demo del motor de flows ==");

    let env = CoreEnv::new(Arc::new(InMemoryDataStore::new()),
                           Arc::new(InMemoryTaskQueue::new()),
                           Arc::new(InMemoryNotifier::new()),
                           CoreConfig::from_env());
    let factory = FlowFactory::new(env.clone());
    factory.register("TriageFlow", |_args| Ok(Box::<TriageFlow>::default()));
    factory.register("ListProcessesFlow", |_args| Ok(Box::<ListProcessesFlow>::default()));
    factory.register("SweepHunt", |_args| Ok(Box::<SweepHunt>::default()));

    let audit_session = SessionId::well_known(&env.config.worker_queue, 1).expect("reserved id");
    factory.register_well_known(audit_session.clone(), Box::new(AuditSink)).expect("sink");

    let token = AccessToken::new("analyst");
    let worker = Worker::new(factory.clone(), env.config.worker_queue.clone(), AccessToken::new("worker")).expect("worker");

    // Tres endpoints simulados que saben listar procesos.
    let mut fleet = Vec::new();
    for n in 1..=3u32 {
        let client_id = ClientId::new(format!("C.{n:04X}")).expect("client id");
        let mut sim = ClientSimulator::new(env.clone(), client_id);
        sim.handle("ListProcesses", |_request| {
               vec![json!({"pid": 1, "name": "init"}),
                    json!({"pid": 4242, "name": "sshd"})]
           });
        fleet.push(sim);
    }

    // 1. Triage de un endpoint a través de un flow hijo.
    println!("\n-- triage con flow hijo --");
    let triage = factory.start_flow("TriageFlow",
                                    StartFlowOptions::new(token.clone()).client(fleet[0].client_id().clone())
                                                                        .notify_user(false))
                        .expect("start triage");
    pump(&worker, &fleet);
    println!("triage {triage}: {:?}", flow_state(&factory, &triage, &token));

    // 2. Hunt sobre toda la flota.
    println!("\n-- hunt de barrido --");
    let clients: Vec<String> = fleet.iter().map(|sim| sim.client_id().to_string()).collect();
    let hunt = factory.start_flow("SweepHunt",
                                  StartFlowOptions::new(token.clone()).arg("clients", json!(clients))
                                                                      .notify_user(false))
                      .expect("start hunt");
    pump(&worker, &fleet);
    println!("hunt {hunt}: {:?}", flow_state(&factory, &hunt, &token));

    // 3. Un evento hacia el sumidero well-known.
    println!("\n-- sumidero well-known --");
    inject_response(&env,
                    &token,
                    Message::response(audit_session.clone(), 0x1234, 1, json!({"evento": "demo terminada"})))
        .expect("inject audit event");
    worker.run_until_idle().expect("worker");

    println!("\n-- contadores --");
    for (name, value) in env.stats.snapshot() {
        println!("  {name}: {value}");
    }
}
