//! Conversión de fallos: un estado que falla mata el flow ordenado con
//! traza, status de error al padre y notificación al usuario, sin tumbar
//! al worker.

mod common;

use std::collections::HashMap;

use common::{client, events_for, TestRig};
use fleet_core::sim::deliver_responses;
use fleet_core::{counter, FlowContext, FlowError, Responses};
use fleet_domain::{FlowState, StatusCode, StatusPayload};
use serde_json::json;

#[derive(Default)]
struct BrittleFlow;

impl BrittleFlow {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        ctx.call_client("Echo", json!("x"), "Boom", HashMap::new(), None)
    }

    fn boom(&mut self, _ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        Err(FlowError::Internal("kaput".into()))
    }
}

fleet_core::declare_flow_states! {
    BrittleFlow {
        "Start" => start ["Boom"],
        "Boom"  => boom  [],
    }
}

#[test]
fn a_failing_state_turns_the_flow_into_error_without_crashing_the_worker() {
    let rig = TestRig::new();
    rig.factory.register("BrittleFlow", |_args| Ok(Box::<BrittleFlow>::default()));

    let session = rig.factory
                     .start_flow("BrittleFlow", rig.options().client(client(11)))
                     .expect("start");
    deliver_responses(&rig.env, &rig.token, &session, 1, vec![json!("x")], StatusPayload::ok()).expect("deliver");

    // El worker sobrevive al fallo del estado.
    rig.worker.run_until_idle().expect("worker survives");

    let record = rig.flow_record(&session);
    assert_eq!(record.state, FlowState::Error);
    let backtrace = record.backtrace.expect("backtrace persisted");
    assert!(backtrace.contains("Boom"), "backtrace: {backtrace}");
    assert!(backtrace.contains("kaput"), "backtrace: {backtrace}");

    // Usuario notificado del final con error.
    let sent = rig.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "FlowStatus");
    assert!(sent[0].message.contains("terminated due to error"));

    assert_eq!(rig.env.stats.get(counter::FLOW_ERRORS), 1);
    // El estado residual quedó purgado al cerrar.
    assert!(rig.residual_state_keys(&session).is_empty());
}

#[derive(Default)]
struct PanickyFlow;

impl PanickyFlow {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        ctx.call_client("Echo", json!("x"), "Boom", HashMap::new(), None)
    }

    fn boom(&mut self, _ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        panic!("se nos fue de las manos");
    }
}

fleet_core::declare_flow_states! {
    PanickyFlow {
        "Start" => start ["Boom"],
        "Boom"  => boom  [],
    }
}

#[test]
fn a_panicking_state_is_contained_like_any_other_failure() {
    let rig = TestRig::new();
    rig.factory.register("PanickyFlow", |_args| Ok(Box::<PanickyFlow>::default()));

    let session = rig.factory
                     .start_flow("PanickyFlow", rig.options().client(client(12)))
                     .expect("start");
    deliver_responses(&rig.env, &rig.token, &session, 1, vec![json!("x")], StatusPayload::ok()).expect("deliver");
    rig.worker.run_until_idle().expect("worker survives the panic");

    let record = rig.flow_record(&session);
    assert_eq!(record.state, FlowState::Error);
    assert!(record.backtrace.unwrap().contains("se nos fue de las manos"));
}

#[derive(Default)]
struct StrayFlow;

impl StrayFlow {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        // Transición no declarada: rechazada en el acto.
        match ctx.call_client("Echo", json!(1), "NotDeclared", HashMap::new(), None) {
            Err(FlowError::InvalidStateTransition { .. }) => common::log_event(ctx, "Start", "rejected"),
            other => common::log_event(ctx, "Start", format!("unexpected: {other:?}")),
        }
        Ok(())
    }
}

fleet_core::declare_flow_states! {
    StrayFlow {
        "Start" => start [],
    }
}

#[test]
fn undeclared_transitions_are_rejected_at_the_call_site() {
    let rig = TestRig::new();
    rig.factory.register("StrayFlow", |_args| Ok(Box::<StrayFlow>::default()));

    let session = rig.factory.start_flow("StrayFlow", rig.options()).expect("start");
    assert_eq!(events_for(&session), vec![("Start".to_string(), "rejected".to_string())]);
    // La llamada rechazada no dejó ningún request pendiente.
    assert_eq!(rig.flow_state(&session), FlowState::Terminated);
}

#[derive(Default)]
struct FailingChild;

impl FailingChild {
    fn start(&mut self, _ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        Err(FlowError::Internal("child exploded".into()))
    }
}

fleet_core::declare_flow_states! {
    FailingChild {
        "Start" => start [],
    }
}

#[derive(Default)]
struct WatchfulParent;

impl WatchfulParent {
    fn start(&mut self, ctx: &FlowContext, _responses: &Responses<'_>) -> fleet_core::Result<()> {
        ctx.call_flow("FailingChild", "GotChild", HashMap::new(), None, HashMap::new())?;
        Ok(())
    }

    fn got_child(&mut self, ctx: &FlowContext, responses: &Responses<'_>) -> fleet_core::Result<()> {
        let status = responses.status().cloned().unwrap_or_default();
        common::log_event(ctx,
                          "GotChild",
                          format!("status={:?} msg={}",
                                  status.status,
                                  status.error_message.unwrap_or_default()));
        Ok(())
    }
}

fleet_core::declare_flow_states! {
    WatchfulParent {
        "Start"    => start     ["GotChild"],
        "GotChild" => got_child [],
    }
}

#[test]
fn a_failing_child_reports_a_generic_error_status_to_its_parent() {
    let rig = TestRig::new();
    rig.factory.register("WatchfulParent", |_args| Ok(Box::<WatchfulParent>::default()));
    rig.factory.register("FailingChild", |_args| Ok(Box::<FailingChild>::default()));

    let parent = rig.factory.start_flow("WatchfulParent", rig.options()).expect("start");
    let child = rig.flow_record(&parent).children[0].clone();
    assert_eq!(rig.flow_state(&child), FlowState::Error);

    rig.worker.run_until_idle().expect("worker");

    let events = events_for(&parent);
    assert_eq!(events.len(), 1);
    assert!(events[0].1.contains(&format!("status={:?}", StatusCode::GenericError)), "event: {}", events[0].1);
    assert!(events[0].1.contains("child exploded"), "event: {}", events[0].1);
    assert_eq!(rig.flow_state(&parent), FlowState::Terminated);
}
