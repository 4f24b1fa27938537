//! fleet-core: el motor de ejecución de flows.
//!
//! Propósito:
//! - Orquestar máquinas de estado durables y reanudables (flows) que
//!   dirigen trabajo en clientes remotos y recogen sus respuestas
//!   asíncronas, con hunts que reparten el mismo trabajo entre muchos
//!   clientes sin orden por cliente.
//!
//! Componentes principales:
//! - `flow`: contrato `Flow`, despacho de estados por nombre y la macro
//!   `declare_flow_states!`.
//! - `context`: `FlowContext` con las operaciones de los estados y el
//!   procesamiento de requests completos; `FlowHandle` como par
//!   (contexto, objeto de flow).
//! - `factory`: registro de clases, creación/carga/guardado y locks por
//!   sesión.
//! - `worker`: el bucle lease → lock → load → process → save.
//! - `well_known`: sumideros de mensajes de sistema en sesiones reservadas.
//! - `env`, `config`, `stats`, `notify`: entorno inyectado y preocupaciones
//!   ambientales.
//! - `sim`: cliente simulado para demos y tests.

pub mod config;
pub mod context;
pub mod env;
pub mod errors;
pub mod factory;
pub mod flow;
pub mod notify;
pub mod responses;
pub mod sim;
pub mod stats;
pub mod well_known;
pub mod worker;

pub use config::{CoreConfig, CONFIG};
pub use context::{FlowContext, FlowHandle, SharedRequestQueue};
pub use env::CoreEnv;
pub use errors::{FlowError, Result};
pub use factory::{FlowConstructor, FlowFactory, ParentLink, StartFlowOptions};
pub use flow::Flow;
pub use notify::{InMemoryNotifier, UserNotification, UserNotifier};
pub use responses::Responses;
pub use sim::ClientSimulator;
pub use stats::{counter, Stats};
pub use well_known::WellKnownFlow;
pub use worker::{Worker, WorkerHandle};
