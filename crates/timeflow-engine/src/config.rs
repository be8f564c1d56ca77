//! Engine configuration

/// Configuration for query execution
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of every emitter channel in the plan (default: 1).
    /// Each in-flight batch holds a single key, so capacity 1 gives full
    /// backpressure from the row consumer down to the iterators.
    pub emitter_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            emitter_capacity: 1,
        }
    }
}

impl EngineConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the emitter channel capacity (clamped to at least 1)
    pub fn with_emitter_capacity(mut self, capacity: usize) -> Self {
        self.emitter_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(EngineConfig::default().emitter_capacity, 1);
    }

    #[test]
    fn test_capacity_clamped() {
        let config = EngineConfig::new().with_emitter_capacity(0);
        assert_eq!(config.emitter_capacity, 1);

        let config = EngineConfig::new().with_emitter_capacity(8);
        assert_eq!(config.emitter_capacity, 8);
    }
}
