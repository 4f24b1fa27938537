//! Flows well-known: sumideros de mensajes de sistema.
//!
//! Sus sesiones viven en el rango reservado (valor ≤ 100) y no usan el
//! emparejamiento normal request/respuesta: los mensajes llegan sueltos (con
//! request y response id aleatorios) y se entregan de uno en uno a
//! `process_message`. No tienen registro persistente ni terminan nunca.

use fleet_domain::Message;

use crate::env::CoreEnv;
use crate::errors::Result;

pub trait WellKnownFlow: Send {
    fn name(&self) -> &'static str;

    /// Atiende un mensaje entrante. Un error se registra y no detiene la
    /// entrega de los demás mensajes.
    fn process_message(&mut self, env: &CoreEnv, message: &Message) -> Result<()>;
}
