//! Contrato de la cola durable de tasks.
//!
//! Dos tráficos conviven aquí:
//! - Tasks con mensajes dirigidos a clientes (la cola es el propio id de
//!   cliente). Llevan un TTL implícito: si nadie los borra se vuelven a
//!   entregar al vencer el lease, hasta agotar el TTL. El núcleo confía en
//!   esto para la retransmisión hacia el cliente.
//! - Notificaciones por sesión hacia las colas de workers. Son coalescentes:
//!   varias notificaciones de la misma sesión colapsan en una.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fleet_domain::{Message, SessionId, TaskId};

use crate::data_store::AccessToken;
use crate::errors::Result;

/// Entregas máximas de un task antes de descartarlo.
pub const DEFAULT_TASK_TTL: u32 = 5;

/// Task encolado: un mensaje con destino a una cola concreta.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Id estable, asignado por la cola en `schedule`.
    pub id: TaskId,
    pub queue: String,
    pub message: Message,
    /// Entregas restantes.
    pub ttl: u32,
    /// Momento (µs) a partir del cual el task vuelve a estar disponible.
    pub available_at_us: i64,
}

impl Task {
    pub fn new(queue: impl Into<String>, message: Message) -> Self {
        Self { id: TaskId(0),
               queue: queue.into(),
               message,
               ttl: DEFAULT_TASK_TTL,
               available_at_us: 0 }
    }
}

pub trait TaskQueue: Send + Sync {
    /// Encola los tasks y devuelve cada uno con su id estable asignado. Con
    /// `sync` el llamador necesita observar los ids antes de continuar.
    fn schedule(&self, tasks: Vec<Task>, sync: bool, token: &AccessToken) -> Result<Vec<Task>>;

    /// Desencolado best-effort por id.
    fn delete(&self, queue: &str, ids: &[TaskId], token: &AccessToken) -> Result<()>;

    /// Señala que la sesión tiene trabajo pendiente en `queue`. Coalescente.
    fn notify_queue(&self, queue: &str, session_id: &SessionId, token: &AccessToken) -> Result<()>;

    /// Drena las notificaciones pendientes de la cola. El llamador es
    /// responsable de tomar el lock de cada sesión antes de procesarla.
    fn lease_notifications(&self, queue: &str, token: &AccessToken) -> Result<Vec<SessionId>>;

    /// Toma en lease hasta `limit` tasks disponibles de la cola. Cada lease
    /// consume una entrega del TTL; un task no borrado reaparece al vencer
    /// el lease.
    fn lease_tasks(&self, queue: &str, lease: chrono::Duration, limit: usize, token: &AccessToken) -> Result<Vec<Task>>;
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<String, Vec<Task>>,
    notifications: HashMap<String, BTreeSet<SessionId>>,
}

/// Cola en memoria para tests y wiring local.
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    next_id: AtomicU64,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self { state: Mutex::new(QueueState::default()),
               next_id: AtomicU64::new(1) }
    }

    /// Tasks vivos en una cola (para aserciones en tests). No consume TTL.
    pub fn pending_tasks(&self, queue: &str) -> Vec<Task> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tasks.get(queue).cloned().unwrap_or_default()
    }

    fn now_us() -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn schedule(&self, mut tasks: Vec<Task>, _sync: bool, _token: &AccessToken) -> Result<Vec<Task>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Self::now_us();
        for task in tasks.iter_mut() {
            task.id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
            task.available_at_us = now;
            state.tasks.entry(task.queue.clone()).or_default().push(task.clone());
        }
        Ok(tasks)
    }

    fn delete(&self, queue: &str, ids: &[TaskId], _token: &AccessToken) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tasks) = state.tasks.get_mut(queue) {
            tasks.retain(|t| !ids.contains(&t.id));
        }
        Ok(())
    }

    fn notify_queue(&self, queue: &str, session_id: &SessionId, _token: &AccessToken) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.notifications
             .entry(queue.to_string())
             .or_default()
             .insert(session_id.clone());
        Ok(())
    }

    fn lease_notifications(&self, queue: &str, _token: &AccessToken) -> Result<Vec<SessionId>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.notifications
                .remove(queue)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default())
    }

    fn lease_tasks(&self, queue: &str, lease: chrono::Duration, limit: usize, _token: &AccessToken) -> Result<Vec<Task>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Self::now_us();
        let mut leased = Vec::new();
        if let Some(tasks) = state.tasks.get_mut(queue) {
            // Los tasks sin entregas restantes se descartan.
            tasks.retain(|t| t.ttl > 0);
            for task in tasks.iter_mut() {
                if leased.len() >= limit {
                    break;
                }
                if task.available_at_us > now {
                    continue;
                }
                task.available_at_us = now.saturating_add(lease.num_microseconds().unwrap_or(i64::MAX));
                task.ttl -= 1;
                leased.push(task.clone());
            }
        }
        Ok(leased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token() -> AccessToken {
        AccessToken::new("test")
    }

    fn session(value: u32) -> SessionId {
        SessionId::new("W", value).unwrap()
    }

    fn task(queue: &str) -> Task {
        Task::new(queue, Message::request(session(0x200), "Echo", 1, 0, json!(null)))
    }

    #[test]
    fn schedule_assigns_distinct_stable_ids() {
        let queue = InMemoryTaskQueue::new();
        let scheduled = queue.schedule(vec![task("C.1"), task("C.1")], true, &token()).unwrap();
        assert_eq!(scheduled.len(), 2);
        assert_ne!(scheduled[0].id, scheduled[1].id);
        assert_eq!(queue.pending_tasks("C.1").len(), 2);
    }

    #[test]
    fn notifications_coalesce_per_session() {
        let queue = InMemoryTaskQueue::new();
        for _ in 0..3 {
            queue.notify_queue("W", &session(0x300), &token()).unwrap();
        }
        queue.notify_queue("W", &session(0x301), &token()).unwrap();
        let sessions = queue.lease_notifications("W", &token()).unwrap();
        assert_eq!(sessions.len(), 2);
        // Drenadas: una segunda lectura viene vacía.
        assert!(queue.lease_notifications("W", &token()).unwrap().is_empty());
    }

    #[test]
    fn leased_tasks_reappear_after_the_lease_expires() {
        let queue = InMemoryTaskQueue::new();
        queue.schedule(vec![task("C.2")], true, &token()).unwrap();

        let first = queue.lease_tasks("C.2", chrono::Duration::zero(), 10, &token()).unwrap();
        assert_eq!(first.len(), 1);
        // Lease de duración cero: disponible otra vez de inmediato.
        let second = queue.lease_tasks("C.2", chrono::Duration::seconds(600), 10, &token()).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        // Con el lease largo vigente ya no está disponible.
        assert!(queue.lease_tasks("C.2", chrono::Duration::seconds(600), 10, &token()).unwrap().is_empty());
    }

    #[test]
    fn tasks_expire_after_their_ttl_is_consumed() {
        let queue = InMemoryTaskQueue::new();
        queue.schedule(vec![task("C.3")], true, &token()).unwrap();
        for _ in 0..DEFAULT_TASK_TTL {
            let leased = queue.lease_tasks("C.3", chrono::Duration::zero(), 10, &token()).unwrap();
            assert_eq!(leased.len(), 1);
        }
        assert!(queue.lease_tasks("C.3", chrono::Duration::zero(), 10, &token()).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_only_the_given_ids() {
        let queue = InMemoryTaskQueue::new();
        let scheduled = queue.schedule(vec![task("C.4"), task("C.4")], true, &token()).unwrap();
        queue.delete("C.4", &[scheduled[0].id], &token()).unwrap();
        let left = queue.pending_tasks("C.4");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, scheduled[1].id);
    }
}
