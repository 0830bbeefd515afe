//! Server configuration.

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest number of records accepted in one request.
    pub max_batch_records: usize,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_batch_records: 1000,
        }
    }

    /// Sets the per-request record limit.
    #[must_use]
    pub fn with_max_batch_records(mut self, max: usize) -> Self {
        self.max_batch_records = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        assert_eq!(ServerConfig::default().max_batch_records, 1000);
        assert_eq!(
            ServerConfig::new().with_max_batch_records(5).max_batch_records,
            5
        );
    }
}
