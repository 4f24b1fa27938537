//! Configuración del núcleo.
//!
//! Carga variables de entorno con prefijo `FLEETFLOW_` y expone una
//! instancia global perezosa (`CONFIG`) para el wiring por defecto. Los
//! entornos inyectados (`CoreEnv`) llevan su propia copia, de modo que los
//! tests pueden ajustar límites sin tocar el proceso.

use std::env;
use std::time::Duration;

use fleet_store::StoreLimits;
use once_cell::sync::Lazy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Cola de workers por defecto para flows nuevos.
    pub worker_queue: String,
    /// Retransmisiones explícitas máximas de un request incompleto antes de
    /// abandonarlo.
    pub max_retransmissions: u32,
    /// Límites de los barridos acotados del FlowStore.
    pub limits: StoreLimits,
    /// Hilos del pool de despacho de hunts.
    pub hunt_threads: usize,
    /// Espera del worker entre pasadas sin trabajo.
    pub poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self { worker_queue: fleet_domain::DEFAULT_WORKER_QUEUE.to_string(),
               max_retransmissions: 5,
               limits: StoreLimits::default(),
               hunt_threads: 8,
               poll_interval: Duration::from_millis(200) }
    }
}

impl CoreConfig {
    /// Construye la configuración leyendo el entorno; cualquier variable
    /// ausente o no parseable conserva su valor por defecto.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(queue) = env::var("FLEETFLOW_WORKER_QUEUE") {
            if !queue.is_empty() {
                config.worker_queue = queue;
            }
        }
        if let Some(n) = read_env("FLEETFLOW_MAX_RETRANSMISSIONS") {
            config.max_retransmissions = n;
        }
        if let Some(n) = read_env("FLEETFLOW_REQUEST_LIMIT") {
            config.limits.request_limit = n;
        }
        if let Some(n) = read_env("FLEETFLOW_RESPONSE_LIMIT") {
            config.limits.response_limit = n;
        }
        if let Some(n) = read_env("FLEETFLOW_HUNT_THREADS") {
            config.hunt_threads = n;
        }
        if let Some(ms) = read_env("FLEETFLOW_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        config
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Configuración global perezosa, evaluada una sola vez.
pub static CONFIG: Lazy<CoreConfig> = Lazy::new(CoreConfig::from_env);
