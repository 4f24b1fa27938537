//! Notificaciones al usuario.
//!
//! El motor emite notificaciones `FlowStatus` al terminar un flow con error
//! y, si quien lo arrancó lo pidió, también al terminar con éxito. El
//! transporte real (frontend, correo, etc.) queda fuera del núcleo: aquí
//! solo se define el contrato y un doble en memoria para tests y demos.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotification {
    pub kind: String,
    pub subject: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub trait UserNotifier: Send + Sync {
    fn notify(&self, kind: &str, subject: &str, message: &str);
}

/// Notificador que acumula en memoria lo enviado.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<UserNotification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<UserNotification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl UserNotifier for InMemoryNotifier {
    fn notify(&self, kind: &str, subject: &str, message: &str) {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(UserNotification { kind: kind.to_string(),
                                     subject: subject.to_string(),
                                     message: message.to_string(),
                                     timestamp: Utc::now() });
    }
}
