use serde_json::Value;

/// Append-only, in-memory sequence of observed trace events.
///
/// Events are never mutated or removed once appended; only [`EventLog::reset`]
/// empties the log.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<Value>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Value] {
        &self.events
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.events.clone()
    }

    /// Adopt a freshly parsed candidate sequence.
    ///
    /// Returns the appended suffix `candidate[len..]` when the candidate is
    /// longer than the log, `None` otherwise. The already observed prefix is
    /// kept as is.
    pub fn extend_from(&mut self, mut candidate: Vec<Value>) -> Option<Vec<Value>> {
        if candidate.len() <= self.events.len() {
            return None;
        }
        let delta = candidate.split_off(self.events.len());
        self.events.extend(delta.iter().cloned());
        Some(delta)
    }

    pub fn reset(&mut self) {
        self.events.clear();
    }
}
