//! Named wall-clock timers accumulated per output frame.

use std::collections::BTreeMap;
use std::time::Instant;

/// Phase timer labels.
pub mod labels {
    /// Time integration.
    pub const TIMINT: &str = "TIMINT";
    /// Contact detection.
    pub const CONDET: &str = "CONDET";
    /// Contact update.
    pub const CONUPD: &str = "CONUPD";
    /// Local dynamics assembly.
    pub const LOCDYN: &str = "LOCDYN";
    /// Constraint solution.
    pub const CONSOL: &str = "CONSOL";
}

/// Accumulating named timers.
#[derive(Debug, Default)]
pub struct Timers {
    /// Accumulated seconds by label.
    totals: BTreeMap<String, f64>,
    /// Running measurement starts.
    running: BTreeMap<String, Instant>,
}

impl Timers {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a measurement.
    pub fn start(&mut self, label: &str) {
        self.running.insert(label.to_string(), Instant::now());
    }

    /// Stop a measurement and accumulate it.
    pub fn stop(&mut self, label: &str) {
        if let Some(start) = self.running.remove(label) {
            *self.totals.entry(label.to_string()).or_insert(0.0) +=
                start.elapsed().as_secs_f64();
        }
    }

    /// Accumulated seconds of a label.
    pub fn total(&self, label: &str) -> f64 {
        self.totals.get(label).copied().unwrap_or(0.0)
    }

    /// All totals in label order.
    pub fn totals(&self) -> impl Iterator<Item = (&str, f64)> {
        self.totals.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    /// Whether nothing has been measured.
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Merge a stored total, keeping the maximum (ranks report in parallel).
    pub fn merge(&mut self, label: &str, total: f64) {
        let entry = self.totals.entry(label.to_string()).or_insert(0.0);
        *entry = entry.max(total);
    }

    /// Zero every total after a frame write.
    pub fn clear(&mut self) {
        self.totals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::Timers;

    #[test]
    fn test_accumulation() {
        let mut timers = Timers::new();

        timers.start("TIMINT");
        timers.stop("TIMINT");
        timers.start("TIMINT");
        timers.stop("TIMINT");

        assert!(timers.total("TIMINT") >= 0.0);
        assert_eq!(timers.len(), 1);

        timers.merge("CONDET", 1.5);
        timers.merge("CONDET", 0.5);
        assert_eq!(timers.total("CONDET"), 1.5);

        timers.clear();
        assert!(timers.is_empty());
    }
}
