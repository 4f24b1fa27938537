//! Sesiones well-known: mensajes sueltos entregados uno a uno, sin
//! emparejamiento con requests y con purga tras la entrega.

mod common;

use std::sync::{Arc, Mutex};

use common::TestRig;
use fleet_core::sim::inject_response;
use fleet_core::{counter, CoreEnv, WellKnownFlow};
use fleet_domain::{Message, SessionId};
use serde_json::json;

struct EventSink {
    seen: Arc<Mutex<Vec<String>>>,
}

impl WellKnownFlow for EventSink {
    fn name(&self) -> &'static str {
        "EventSink"
    }

    fn process_message(&mut self, _env: &CoreEnv, message: &Message) -> fleet_core::Result<()> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.args.to_string());
        Ok(())
    }
}

#[test]
fn well_known_sessions_deliver_bare_messages_and_purge_them() {
    let rig = TestRig::new();
    let session = SessionId::well_known("W", 9).expect("reserved id");
    let seen = Arc::new(Mutex::new(Vec::new()));
    rig.factory
       .register_well_known(session.clone(), Box::new(EventSink { seen: seen.clone() }))
       .expect("register");

    // Mensajes con request/response ids arbitrarios, como los emite el
    // frontend para los sumideros de sistema.
    inject_response(&rig.env, &rig.token, Message::response(session.clone(), 0xAA01, 1, json!("uno"))).expect("inject");
    inject_response(&rig.env, &rig.token, Message::response(session.clone(), 0xBB02, 7, json!("dos"))).expect("inject");

    rig.worker.run_until_idle().expect("worker");

    let mut delivered = seen.lock().unwrap().clone();
    delivered.sort();
    assert_eq!(delivered, vec!["\"dos\"".to_string(), "\"uno\"".to_string()]);
    assert_eq!(rig.env.stats.get(counter::WELL_KNOWN_HANDLED), 2);

    // Entregados y purgados: una segunda pasada no repite nada.
    inject_response(&rig.env, &rig.token, Message::response(session.clone(), 0xCC03, 2, json!("tres"))).expect("inject");
    rig.worker.run_until_idle().expect("worker");
    assert_eq!(seen.lock().unwrap().len(), 3);
    assert!(rig.residual_state_keys(&session).is_empty());
}

#[test]
fn reserved_registration_rejects_ordinary_sessions() {
    let rig = TestRig::new();
    let ordinary = SessionId::new("W", 0xBEEF).expect("session");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let result = rig.factory.register_well_known(ordinary, Box::new(EventSink { seen }));
    assert!(result.is_err());
}
