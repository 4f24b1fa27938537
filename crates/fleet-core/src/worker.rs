//! Worker: atiende las notificaciones de una cola de sesiones.
//!
//! Bucle: lease de notificaciones, lock de la sesión, carga del flow,
//! `process_completed_requests`, flush de mensajes, guardado. La
//! concurrencia entre sesiones es libre (varios workers pueden correr a la
//! vez); dentro de una sesión serializa el lock por sesión de la factoría.
//! Las sesiones reservadas se enrutan al registro de flows well-known.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fleet_domain::SessionId;
use fleet_store::AccessToken;

use crate::env::CoreEnv;
use crate::errors::{FlowError, Result};
use crate::factory::FlowFactory;

pub struct Worker {
    env: CoreEnv,
    factory: FlowFactory,
    queue_name: String,
    token: AccessToken,
    pool: rayon::ThreadPool,
}

impl Worker {
    pub fn new(factory: FlowFactory, queue_name: impl Into<String>, token: AccessToken) -> Result<Self> {
        let env = factory.env().clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(env.config.hunt_threads)
            .build()
            .map_err(|e| FlowError::Internal(format!("cannot build the dispatch pool: {e}")))?;
        Ok(Self { env,
                  factory,
                  queue_name: queue_name.into(),
                  token,
                  pool })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Una pasada: drena las notificaciones pendientes y procesa cada
    /// sesión. Devuelve cuántas sesiones atendió. El fallo de una sesión no
    /// detiene a las demás.
    pub fn run_once(&self) -> Result<usize> {
        let sessions = self.env
                           .task_queue
                           .lease_notifications(&self.queue_name, &self.token)?;
        let count = sessions.len();
        for session_id in sessions {
            if let Err(e) = self.process_session(&session_id) {
                log::error!("worker on {}: session {session_id} failed: {e}", self.queue_name);
            }
        }
        Ok(count)
    }

    /// Procesa las notificaciones hasta que la cola quede en silencio. Útil
    /// en tests y demos, donde no hay tráfico de fondo.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let n = self.run_once()?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }

    fn process_session(&self, session_id: &SessionId) -> Result<()> {
        let session_lock = self.factory.session_lock(session_id);
        let _guard = session_lock.lock().unwrap_or_else(|e| e.into_inner());

        if self.factory.is_well_known(session_id) {
            return self.factory.process_well_known(session_id, &self.token);
        }

        let handle = self.factory.load_flow(session_id, &self.token)?;
        handle.process_completed_requests(&self.pool)?;
        handle.ctx().flush_messages()?;
        self.factory.save_flow(&handle)?;
        Ok(())
    }
}

/// Worker corriendo en su propio hilo, con parada cooperativa.
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Lanza el bucle del worker en un hilo dedicado.
    pub fn spawn(worker: Worker) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let poll_interval = worker.env.config.poll_interval;
        let thread = thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match worker.run_once() {
                    Ok(0) => thread::sleep(poll_interval),
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("worker loop on {}: {e}", worker.queue_name);
                        thread::sleep(poll_interval);
                    }
                }
            }
        });
        Self { stop, thread }
    }

    pub fn stop_and_join(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.thread.join();
    }
}
