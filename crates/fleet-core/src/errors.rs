//! Errores semánticos del motor de flows.

use fleet_domain::SessionId;
use fleet_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    /// `next_state` no está declarado entre las transiciones del estado en
    /// curso de un flow ordenado. Se devuelve al llamador de
    /// `call_client`/`call_flow`.
    #[error("flow {flow}: state '{from}' may not transition to '{to}'")]
    InvalidStateTransition { flow: String, from: String, to: String },
    #[error("flow {flow}: unknown state '{state}'")]
    UnknownState { flow: String, state: String },
    #[error("no flow class registered under '{0}'")]
    UnknownFlowName(String),
    #[error("no flow record stored for session {0}")]
    NotFound(SessionId),
    #[error("no well-known flow registered for session {0}")]
    UnknownWellKnown(SessionId),
    /// Fallo dentro de un estado, ya convertido a texto. El motor lo usa al
    /// volcar la traza en el registro del flow.
    #[error("state handler failed: {0}")]
    StateFailed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
