//! fleet-domain: modelo de datos del núcleo de ejecución de flows.
//!
//! Propósito:
//! - Definir los tipos que viajan por el sistema (mensajes, estados de
//!   request, el registro durable del flow) y los identificadores de sesión
//!   y de cliente, sin ninguna dependencia de I/O.
//! - Todo lo persistible deriva `serde` y se serializa como JSON opaco para
//!   los almacenes; los bags de argumentos son `serde_json::Value`.
//!
//! Componentes principales:
//! - `session`: `SessionId` (`"<cola>:<HEX>"`, rango reservado para flows
//!   well-known), `ClientId` y `TaskId`.
//! - `message`: `Message` (request saliente o respuesta), `MessageType`,
//!   `AuthState` y el payload terminal `StatusPayload`.
//! - `request`: `RequestState`, el registro de cada llamada saliente a la
//!   espera de respuestas.
//! - `flow`: `FlowRecord`, la parte persistente de un flow, y `FlowState`.

pub mod errors;
pub mod flow;
pub mod message;
pub mod request;
pub mod session;

pub use errors::DomainError;
pub use flow::{FlowRecord, FlowState};
pub use message::{AuthState, CpuSeconds, Message, MessageType, StatusCode, StatusPayload};
pub use request::RequestState;
pub use session::{ClientId, SessionId, TaskId, DEFAULT_WORKER_QUEUE, RESERVED_RANGE};
