//! Retry and timeout policies for external calls
//!
//! Ingest boots retry on a constant `backon` schedule; every ingest and
//! object storage call is bounded by a timeout.

use std::future::Future;
use std::time::Duration;

pub mod timeout {
    //! Timeout configuration for external service calls

    use std::time::Duration;

    /// Default bound on ingest boot and shutdown
    pub const INGEST_OPERATION_TIMEOUT: Duration = Duration::from_secs(12);

    /// Default bound on a single object storage request
    pub const OBJECT_STORAGE_TIMEOUT: Duration = Duration::from_secs(30);

    #[derive(Debug, Clone, Copy)]
    pub struct TimeoutConfig {
        pub ingest: Duration,
        pub object_storage: Duration,
    }

    impl Default for TimeoutConfig {
        fn default() -> Self {
            Self {
                ingest: INGEST_OPERATION_TIMEOUT,
                object_storage: OBJECT_STORAGE_TIMEOUT,
            }
        }
    }

    impl TimeoutConfig {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Set ingest operation timeout; zero falls back to the default
        #[must_use]
        pub const fn with_ingest_timeout(mut self, timeout: Duration) -> Self {
            self.ingest = if timeout.is_zero() {
                INGEST_OPERATION_TIMEOUT
            } else {
                timeout
            };
            self
        }

        /// Set object storage request timeout; zero falls back to the default
        #[must_use]
        pub const fn with_object_storage_timeout(mut self, timeout: Duration) -> Self {
            self.object_storage = if timeout.is_zero() {
                OBJECT_STORAGE_TIMEOUT
            } else {
                timeout
            };
            self
        }
    }
}

pub mod retry {
    //! Bounded retry schedule for ingest boots

    use backon::{BackoffBuilder, ConstantBuilder};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IngestRetryPolicy {
        /// Total attempts including the first, at least 1
        pub max_attempts: u32,
        pub interval: Duration,
    }

    impl Default for IngestRetryPolicy {
        fn default() -> Self {
            Self {
                max_attempts: 1,
                interval: Duration::from_millis(500),
            }
        }
    }

    impl IngestRetryPolicy {
        #[must_use]
        pub fn new(max_attempts: u32, interval: Duration) -> Self {
            Self {
                max_attempts: max_attempts.max(1),
                interval,
            }
        }

        /// Delay before each attempt: zero for the first, then `interval`
        pub fn delays(&self) -> impl Iterator<Item = Duration> {
            let retries = usize::try_from(self.max_attempts.saturating_sub(1)).unwrap_or(usize::MAX);
            let backoff = ConstantBuilder::default()
                .with_delay(self.interval)
                .with_max_times(retries)
                .build();
            std::iter::once(Duration::ZERO).chain(backoff)
        }
    }
}

/// Run `fut`, mapping an elapsed deadline into the caller's error type
pub async fn with_timeout<F, T, E>(
    timeout: Duration,
    fut: F,
    on_elapsed: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed()),
    }
}
