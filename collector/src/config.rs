//! Configuration types for the trace collector

/// Collector configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// How many records a trace buffer is sized for. Buffer capacity is this
    /// count times the largest record kind; consumers use it when allocating
    /// in their buffer-requested handler.
    pub records_per_buffer: usize,

    /// Flush and tear down in-flight state when the collector is dropped.
    /// Disable only when shutdown is driven explicitly.
    pub flush_on_drop: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            records_per_buffer: 5_000,
            flush_on_drop: true,
        }
    }
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.records_per_buffer == 0 {
            anyhow::bail!("records_per_buffer must be greater than 0");
        }
        if self.records_per_buffer > 1_000_000 {
            anyhow::bail!("records_per_buffer too large (max 1000000)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_records_rejected() {
        let config = Config {
            records_per_buffer: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let config = Config {
            records_per_buffer: 1_000_001,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            records_per_buffer: 1_000_000,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
