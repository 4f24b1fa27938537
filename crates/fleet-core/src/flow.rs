//! El contrato de un flow y el despacho de estados por nombre.
//!
//! Un flow es una máquina de estados con handlers nombrados: cada request
//! pendiente apunta con `next_state` al handler que recibirá sus respuestas
//! completas. En lugar del despacho dinámico por reflexión del diseño
//! original, aquí cada clase de flow registra en compilación su tabla
//! nombre → handler más la lista de transiciones permitidas por estado; la
//! macro `declare_flow_states!` genera ambas.
//!
//! Convenciones:
//! - Todo flow tiene un estado `Start`, invocado sincrónicamente al crearlo
//!   con una vista de respuestas vacía.
//! - `End` es opcional: si la tabla no lo declara, el cierre del flow es un
//!   no-op.
//! - En flows ordenados (`process_in_order() == true`) las transiciones se
//!   validan contra la lista declarada del estado en curso.

use crate::context::FlowContext;
use crate::errors::Result;
use crate::responses::Responses;

pub trait Flow: Send {
    /// Nombre de clase, clave de registro en la factoría.
    fn name(&self) -> &'static str;

    /// Estados siguientes permitidos desde `state`, o `None` si el estado no
    /// existe en esta clase de flow.
    fn transitions(&self, state: &str) -> Option<&'static [&'static str]>;

    /// Invoca el handler `state` con las respuestas completas de un request.
    fn call_state(&mut self, ctx: &FlowContext, state: &str, responses: &Responses<'_>) -> Result<()>;

    /// Los flows corrientes procesan sus requests en orden estricto de id;
    /// los hunts devuelven `false` y despachan en cualquier orden.
    fn process_in_order(&self) -> bool {
        true
    }
}

/// Genera la implementación de `Flow` para una clase concreta.
///
/// Formas soportadas:
///
/// ```ignore
/// declare_flow_states! {
///     EchoFlow {
///         "Start" => start ["Done"],
///         "Done"  => done  [],
///     }
/// }
///
/// declare_flow_states! {
///     hunt SweepHunt {
///         "Start" => start ["Collect"],
///         "Collect" => collect [],
///     }
/// }
/// ```
///
/// Cada handler tiene la firma
/// `fn(&mut self, &FlowContext, &Responses<'_>) -> fleet_core::Result<()>`.
#[macro_export]
macro_rules! declare_flow_states {
    // Flow ordenado (por defecto).
    ($flow:ident { $($state:literal => $method:ident [ $($next:literal),* $(,)? ]),+ $(,)? }) => {
        $crate::declare_flow_states!(@impl $flow, true, { $($state => $method [ $($next),* ]),+ });
    };
    // Hunt: sin orden entre requests.
    (hunt $flow:ident { $($state:literal => $method:ident [ $($next:literal),* $(,)? ]),+ $(,)? }) => {
        $crate::declare_flow_states!(@impl $flow, false, { $($state => $method [ $($next),* ]),+ });
    };
    (@impl $flow:ident, $ordered:expr, { $($state:literal => $method:ident [ $($next:literal),* ]),+ }) => {
        impl $crate::flow::Flow for $flow {
            fn name(&self) -> &'static str {
                stringify!($flow)
            }

            fn transitions(&self, state: &str) -> Option<&'static [&'static str]> {
                match state {
                    $($state => Some(&[$($next),*]),)+
                    _ => None,
                }
            }

            fn call_state(&mut self,
                          ctx: &$crate::context::FlowContext,
                          state: &str,
                          responses: &$crate::responses::Responses<'_>)
                          -> $crate::errors::Result<()> {
                match state {
                    $($state => self.$method(ctx, responses),)+
                    other => Err($crate::errors::FlowError::UnknownState { flow: self.name().to_string(),
                                                                           state: other.to_string() }),
                }
            }

            fn process_in_order(&self) -> bool {
                $ordered
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ProbeFlow {
        calls: Vec<String>,
    }

    impl ProbeFlow {
        fn start(&mut self, _ctx: &FlowContext, _responses: &Responses<'_>) -> Result<()> {
            self.calls.push("Start".into());
            Ok(())
        }

        fn done(&mut self, _ctx: &FlowContext, _responses: &Responses<'_>) -> Result<()> {
            self.calls.push("Done".into());
            Ok(())
        }
    }

    declare_flow_states! {
        ProbeFlow {
            "Start" => start ["Done"],
            "Done"  => done  [],
        }
    }

    #[derive(Default)]
    struct ProbeHunt;

    impl ProbeHunt {
        fn start(&mut self, _ctx: &FlowContext, _responses: &Responses<'_>) -> Result<()> {
            Ok(())
        }
    }

    declare_flow_states! {
        hunt ProbeHunt {
            "Start" => start [],
        }
    }

    #[test]
    fn the_macro_builds_the_transition_table() {
        let flow = ProbeFlow::default();
        assert_eq!(flow.name(), "ProbeFlow");
        assert_eq!(flow.transitions("Start"), Some(&["Done"][..]));
        assert_eq!(flow.transitions("Done"), Some(&[][..]));
        assert_eq!(flow.transitions("Missing"), None);
        assert!(flow.process_in_order());
    }

    #[test]
    fn hunts_drop_the_ordering_requirement() {
        let hunt = ProbeHunt;
        assert!(!hunt.process_in_order());
    }
}
