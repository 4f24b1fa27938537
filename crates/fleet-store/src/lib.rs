//! fleet-store: contratos de almacenamiento del núcleo y dobles en memoria.
//!
//! Propósito:
//! - `data_store`: el contrato estrecho del almacén clave/valor con resolución
//!   por regex (`MultiSet` / `ResolveRegex` / `DeleteSubject`) y su doble en
//!   memoria para pruebas y wiring local.
//! - `task_queue`: el contrato de la cola durable de tasks (schedule con ids
//!   estables, delete best-effort, notify coalescente, lease) y su doble en
//!   memoria con redelivery por TTL.
//! - `flow_store`: la contabilidad durable de requests/respuestas de una
//!   sesión, construida encima de los dos contratos anteriores.
//!
//! Las implementaciones en memoria son intencionalmente sencillas: no
//! garantizan durabilidad real ni escalabilidad; están pensadas para tests,
//! demos y como referencia del contrato.

pub mod data_store;
pub mod errors;
pub mod flow_store;
pub mod task_queue;

pub use data_store::{AccessToken, DataStore, InMemoryDataStore, ResolvedValue};
pub use errors::{Result, StoreError};
pub use flow_store::{state_subject, task_subject, FetchPage, FlowStore, StoreLimits};
pub use task_queue::{InMemoryTaskQueue, Task, TaskQueue, DEFAULT_TASK_TTL};
