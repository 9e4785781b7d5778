//! Engine settings

/// Tuning knobs of the fetch engine.
///
/// All ceilings are soft in the sense described in the crate docs: they are checked before a
/// new operation is admitted, so an operation is never started once a ceiling is reached.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Size of each remote read / local write unit (bytes)
    pub segment_size: u64,
    /// Aggregate remote copy rate in bytes per second (0 = no limit)
    pub max_copy_rate: u64,
    /// Maximum number of remote reads in flight across all jobs
    pub max_concurrent_remote_copy_requests: usize,
    /// Maximum number of local writes in flight across all jobs
    pub max_concurrent_local_writes: usize,
    /// Maximum number of fetched segments waiting to be written
    pub max_buffered_local_writes: usize,
    /// Maximum number of remote reads in flight for a single low priority job
    pub max_copy_requests_per_job: usize,
    /// Number of high priority segments dispatched for every low priority one
    pub high_priority_speed_ratio: usize,
    /// Number of times a failed segment is retried before its job fails
    pub max_retry_count_per_copy_request: u32,
    /// Deadline for a single remote read (None = wait forever)
    pub rpc_timeout: Option<std::time::Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            segment_size: 4 * 1024 * 1024,
            max_copy_rate: 500 * 1024 * 1024,
            max_concurrent_remote_copy_requests: 50,
            max_concurrent_local_writes: 50,
            max_buffered_local_writes: 500,
            max_copy_requests_per_job: 2,
            high_priority_speed_ratio: 2,
            max_retry_count_per_copy_request: 2,
            rpc_timeout: Some(std::time::Duration::from_secs(10)),
        }
    }
}

impl Settings {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.segment_size == 0 {
            return Err("segment_size must be greater than 0".to_string());
        }
        if self.max_concurrent_remote_copy_requests == 0 {
            return Err("max_concurrent_remote_copy_requests must be greater than 0".to_string());
        }
        if self.max_concurrent_local_writes == 0 {
            return Err("max_concurrent_local_writes must be greater than 0".to_string());
        }
        if self.max_buffered_local_writes == 0 {
            return Err("max_buffered_local_writes must be greater than 0".to_string());
        }
        if self.max_copy_requests_per_job == 0 {
            return Err("max_copy_requests_per_job must be greater than 0".to_string());
        }
        if self.rpc_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("rpc_timeout must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_ceilings_are_rejected() {
        let settings = Settings {
            max_concurrent_local_writes: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let settings = Settings {
            segment_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        let settings = Settings {
            rpc_timeout: Some(std::time::Duration::ZERO),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_rate_and_retries_are_allowed() {
        let settings = Settings {
            max_copy_rate: 0,
            max_retry_count_per_copy_request: 0,
            high_priority_speed_ratio: 0,
            rpc_timeout: None,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }
}
