//! Hunts: el mismo trabajo repartido entre muchos clientes, despachado sin
//! orden por cliente y a través del pool de workers.

mod common;

use std::collections::HashMap;

use common::{client, events_for, TestRig};
use fleet_core::sim::deliver_responses;
use fleet_core::{counter, FlowContext, Responses};
use fleet_domain::{ClientId, FlowState, StatusPayload};
use serde_json::json;

const FLEET_SIZE: u32 = 100;

#[derive(Default)]
struct SweepHunt;

impl SweepHunt {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        let clients = ctx.args().get("clients").cloned().unwrap_or(json!([]));
        for name in clients.as_array().cloned().unwrap_or_default() {
            let client_id = ClientId::new(name.as_str().unwrap_or_default())
                .map_err(|e| fleet_core::FlowError::Internal(e.to_string()))?;
            ctx.call_client("Echo", json!("sweep"), "Collect", HashMap::new(), Some(client_id))?;
        }
        Ok(())
    }

    fn collect(&mut self, ctx: &FlowContext, responses: &Responses<'_>) -> fleet_core::Result<()> {
        common::log_event(ctx, "Collect", format!("req={}", responses.request().id));
        Ok(())
    }
}

fleet_core::declare_flow_states! {
    hunt SweepHunt {
        "Start"   => start   ["Collect"],
        "Collect" => collect [],
    }
}

#[test]
fn a_hunt_dispatches_every_client_regardless_of_arrival_order() {
    let rig = TestRig::new();
    rig.factory.register("SweepHunt", |_args| Ok(Box::<SweepHunt>::default()));

    let fleet: Vec<String> = (1..=FLEET_SIZE).map(|n| client(n).to_string()).collect();
    let session = rig.factory
                     .start_flow("SweepHunt", rig.options().arg("clients", json!(fleet.clone())))
                     .expect("start");
    assert_eq!(rig.env.stats.get(counter::WORKER_REQUESTS_ISSUED), FLEET_SIZE as u64);

    // Las respuestas llegan en orden inverso al de emisión.
    for request_id in (1..=FLEET_SIZE as u64).rev() {
        deliver_responses(&rig.env, &rig.token, &session, request_id, vec![json!("sweep")], StatusPayload::ok())
            .expect("deliver");
    }
    rig.worker.run_until_idle().expect("worker");

    // Los cien despachos ocurrieron (en cualquier orden) y el hunt cerró.
    let mut seen: Vec<String> = events_for(&session).into_iter().map(|(_, detail)| detail).collect();
    seen.sort();
    assert_eq!(seen.len(), FLEET_SIZE as usize);
    let mut expected: Vec<String> = (1..=FLEET_SIZE as u64).map(|id| format!("req={id}")).collect();
    expected.sort();
    assert_eq!(seen, expected);

    assert_eq!(rig.flow_state(&session), FlowState::Terminated);
    assert!(rig.residual_state_keys(&session).is_empty());
    for name in &fleet {
        assert!(rig.task_queue.pending_tasks(name).is_empty(), "client {name} queue drained");
    }
}

#[derive(Default)]
struct FragileHunt;

impl FragileHunt {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        for n in 1..=3u32 {
            let mut data = HashMap::new();
            if n == 2 {
                data.insert("poison".to_string(), json!(true));
            }
            ctx.call_client("Echo", json!(n), "Collect", data, Some(client(200 + n)))?;
        }
        Ok(())
    }

    fn collect(&mut self, ctx: &FlowContext, responses: &Responses<'_>) -> fleet_core::Result<()> {
        if responses.request().data.get("poison").is_some() {
            return Err(fleet_core::FlowError::Internal("poisoned dispatch".into()));
        }
        common::log_event(ctx, "Collect", format!("req={}", responses.request().id));
        Ok(())
    }
}

fleet_core::declare_flow_states! {
    hunt FragileHunt {
        "Start"   => start   ["Collect"],
        "Collect" => collect [],
    }
}

#[test]
fn a_failing_dispatch_does_not_block_its_siblings_nor_kill_the_hunt() {
    let rig = TestRig::new();
    rig.factory.register("FragileHunt", |_args| Ok(Box::<FragileHunt>::default()));

    let session = rig.factory.start_flow("FragileHunt", rig.options()).expect("start");
    for request_id in 1..=3u64 {
        deliver_responses(&rig.env, &rig.token, &session, request_id, vec![json!("r")], StatusPayload::ok())
            .expect("deliver");
    }
    rig.worker.run_until_idle().expect("worker");

    // Los hermanos del despacho envenenado se procesaron igual.
    let mut seen: Vec<String> = events_for(&session).into_iter().map(|(_, d)| d).collect();
    seen.sort();
    assert_eq!(seen, vec!["req=1".to_string(), "req=3".to_string()]);

    // El hunt no pasa a Error: registra el fallo de cliente y cierra.
    assert_eq!(rig.flow_state(&session), FlowState::Terminated);
    assert_eq!(rig.env.stats.get(counter::CLIENT_ERRORS), 1);
    assert_eq!(rig.env.stats.get(counter::FLOW_ERRORS), 1);
}
