//! Entorno inyectado del núcleo.
//!
//! En lugar de singletons globales (almacén, cola, notificador, métricas),
//! todo componente recibe un `CoreEnv` con handles compartidos. Los tests
//! sustituyen cada pieza por su doble en memoria sin tocar estado global.

use std::sync::Arc;

use fleet_domain::SessionId;
use fleet_store::{AccessToken, DataStore, FlowStore, InMemoryDataStore, InMemoryTaskQueue, StoreError, TaskQueue};

use crate::config::CoreConfig;
use crate::notify::{InMemoryNotifier, UserNotifier};
use crate::stats::Stats;

#[derive(Clone)]
pub struct CoreEnv {
    pub data_store: Arc<dyn DataStore>,
    pub task_queue: Arc<dyn TaskQueue>,
    pub notifier: Arc<dyn UserNotifier>,
    pub stats: Arc<Stats>,
    pub config: CoreConfig,
}

impl CoreEnv {
    pub fn new(data_store: Arc<dyn DataStore>,
               task_queue: Arc<dyn TaskQueue>,
               notifier: Arc<dyn UserNotifier>,
               config: CoreConfig)
               -> Self {
        Self { data_store,
               task_queue,
               notifier,
               stats: Arc::new(Stats::new()),
               config }
    }

    /// Entorno completamente en memoria, para demos y tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDataStore::new()),
                  Arc::new(InMemoryTaskQueue::new()),
                  Arc::new(InMemoryNotifier::new()),
                  CoreConfig::default())
    }

    /// Abre un `FlowStore` ligado a la sesión y ejecuta `f`; el flush corre
    /// en todos los caminos de salida.
    pub fn scoped_store<T, E, F>(&self, token: &AccessToken, session_id: &SessionId, f: F) -> std::result::Result<T, E>
        where E: From<StoreError>,
              F: FnOnce(&mut FlowStore) -> std::result::Result<T, E>
    {
        FlowStore::scoped(self.data_store.clone(),
                          self.task_queue.clone(),
                          token.clone(),
                          self.config.limits,
                          session_id.clone(),
                          f)
    }
}
