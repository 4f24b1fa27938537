//! Contadores de métricas del motor.

use dashmap::DashMap;

/// Nombres de los contadores que el motor incrementa.
pub mod counter {
    pub const FLOW_ERRORS: &str = "flow_errors";
    pub const FLOW_COMPLETED: &str = "flow_completed_count";
    pub const WORKER_REQUESTS_ISSUED: &str = "worker_requests_issued";
    pub const RESPONSE_OUT_OF_ORDER: &str = "response_out_of_order";
    pub const RETRANSMISSIONS: &str = "request_retransmissions";
    pub const FLOWS_SERIALIZED: &str = "worker_flows_serialized";
    pub const WELL_KNOWN_HANDLED: &str = "well_known_flow_requests";
    pub const CLIENT_ERRORS: &str = "client_errors";
}

/// Registro de contadores monótonos con nombre.
#[derive(Debug, Default)]
pub struct Stats {
    counters: DashMap<&'static str, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, delta: u64) {
        *self.counters.entry(name).or_insert(0) += delta;
    }

    pub fn get(&self, name: &'static str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    /// Volcado ordenado (para el binario de demo).
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let mut out: Vec<_> = self.counters.iter().map(|e| (*e.key(), *e.value())).collect();
        out.sort_by_key(|(name, _)| *name);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = Stats::new();
        stats.increment(counter::FLOW_ERRORS);
        stats.add(counter::WORKER_REQUESTS_ISSUED, 3);
        stats.increment(counter::WORKER_REQUESTS_ISSUED);
        assert_eq!(stats.get(counter::FLOW_ERRORS), 1);
        assert_eq!(stats.get(counter::WORKER_REQUESTS_ISSUED), 4);
        assert_eq!(stats.get(counter::FLOW_COMPLETED), 0);
    }
}
