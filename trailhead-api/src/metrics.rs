use prometheus::{opts, IntCounterVec, Registry, TextEncoder};

/// Booking counters exposed on `/metrics`.
pub struct Metrics {
    registry: Registry,
    holds: IntCounterVec,
    reconciliations: IntCounterVec,
    sweep_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let holds = IntCounterVec::new(
            opts!("trailhead_holds_total", "Hold attempts by outcome"),
            &["outcome"],
        )?;
        let reconciliations = IntCounterVec::new(
            opts!("trailhead_reconciliations_total", "Payment reconciliations by outcome"),
            &["outcome"],
        )?;
        let sweep_transitions = IntCounterVec::new(
            opts!("trailhead_sweep_transitions_total", "Bookings moved by the background worker"),
            &["kind"],
        )?;

        registry.register(Box::new(holds.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(sweep_transitions.clone()))?;

        Ok(Self {
            registry,
            holds,
            reconciliations,
            sweep_transitions,
        })
    }

    pub fn record_hold(&self, outcome: &str) {
        self.holds.with_label_values(&[outcome]).inc();
    }

    pub fn record_reconciliation(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    pub fn record_sweep(&self, kind: &str, count: usize) {
        if count > 0 {
            self.sweep_transitions
                .with_label_values(&[kind])
                .inc_by(count as u64);
        }
    }

    /// Text exposition format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
