//! Named-scalar metrics emission and running averages.
//!
//! The training loop emits one scalar per step under names like
//! `train/loss` and `val/loss`. The sink is a trait so the external metrics
//! backend stays outside this crate; the default sink writes structured
//! tracing events, and tests capture scalars in memory.

/// Consumer of named scalar metrics, one emission per step.
pub trait MetricsSink {
    fn scalar(&mut self, name: &str, step: usize, value: f64);
}

/// Default sink: structured tracing events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn scalar(&mut self, name: &str, step: usize, value: f64) {
        tracing::info!(metric = name, step, value, "scalar");
    }
}

/// In-memory sink for tests and offline inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<(String, usize, f64)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(name, step, value)` records in emission order.
    pub fn records(&self) -> &[(String, usize, f64)] {
        &self.records
    }

    /// Values recorded under a given name, in emission order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, _, v)| *v)
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn scalar(&mut self, name: &str, step: usize, value: f64) {
        self.records.push((name.to_string(), step, value));
    }
}

/// Running average over a logging interval.
#[derive(Debug, Default)]
pub struct RunningAvg {
    sum: f64,
    count: usize,
}

impl RunningAvg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
