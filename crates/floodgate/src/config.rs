//! Admission controller configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::OverloadError;

/// Default time a request may wait in the queue before rejection.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default JSON-RPC error code carried by overload rejections.
pub const DEFAULT_OVERLOAD_CODE: i32 = -32001;

/// Default advisory retry delay attached to overload rejections.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_millis(1000);

/// Callback fired synchronously on each rejection.
pub(crate) type OverloadObserver = Arc<dyn Fn(&OverloadError) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_concurrent must be >= 1, got {0}")]
    MaxConcurrentTooSmall(u32),
}

/// Immutable configuration for a [`Limiter`](crate::Limiter).
///
/// `queue_size` and `queue_timeout` cannot go negative by construction; the
/// only value rejected at build time is `max_concurrent == 0`.
#[derive(Clone)]
pub struct BackpressureConfig {
    max_concurrent: u32,
    queue_size: u32,
    queue_timeout: Duration,
    overload_code: i32,
    retry_after: Duration,
    on_overload: Option<OverloadObserver>,
}

impl BackpressureConfig {
    /// Create a config with queueing disabled and default error settings.
    pub fn new(max_concurrent: u32) -> Result<Self, ConfigError> {
        if max_concurrent < 1 {
            return Err(ConfigError::MaxConcurrentTooSmall(max_concurrent));
        }

        Ok(Self {
            max_concurrent,
            queue_size: 0,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
            overload_code: DEFAULT_OVERLOAD_CODE,
            retry_after: DEFAULT_RETRY_AFTER,
            on_overload: None,
        })
    }

    /// Enable a bounded wait queue. Zero disables queueing.
    pub fn with_queue_size(mut self, queue_size: u32) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Maximum time a request may wait in the queue. Ignored when
    /// `queue_size == 0`.
    pub fn with_queue_timeout(mut self, queue_timeout: Duration) -> Self {
        self.queue_timeout = queue_timeout;
        self
    }

    /// JSON-RPC error code for overload rejections. Opaque to the core.
    pub fn with_overload_code(mut self, code: i32) -> Self {
        self.overload_code = code;
        self
    }

    /// Advisory retry delay echoed in rejection payloads.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Observer fired synchronously on each rejection. Panics inside the
    /// observer are caught and logged; the rejection is still returned.
    pub fn with_overload_observer(
        mut self,
        observer: impl Fn(&OverloadError) + Send + Sync + 'static,
    ) -> Self {
        self.on_overload = Some(Arc::new(observer));
        self
    }

    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    pub fn queue_size(&self) -> u32 {
        self.queue_size
    }

    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout
    }

    pub fn queue_timeout_ms(&self) -> u64 {
        self.queue_timeout.as_millis() as u64
    }

    pub fn overload_code(&self) -> i32 {
        self.overload_code
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    pub fn retry_after_ms(&self) -> u64 {
        self.retry_after.as_millis() as u64
    }

    pub(crate) fn on_overload(&self) -> Option<&OverloadObserver> {
        self.on_overload.as_ref()
    }
}

impl fmt::Debug for BackpressureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackpressureConfig")
            .field("max_concurrent", &self.max_concurrent)
            .field("queue_size", &self.queue_size)
            .field("queue_timeout", &self.queue_timeout)
            .field("overload_code", &self.overload_code)
            .field("retry_after", &self.retry_after)
            .field("on_overload", &self.on_overload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BackpressureConfig::new(5).unwrap();
        assert_eq!(config.max_concurrent(), 5);
        assert_eq!(config.queue_size(), 0);
        assert_eq!(config.queue_timeout(), Duration::from_secs(30));
        assert_eq!(config.overload_code(), -32001);
        assert_eq!(config.retry_after_ms(), 1000);
        assert!(config.on_overload().is_none());
    }

    #[test]
    fn rejects_zero_max_concurrent() {
        let err = BackpressureConfig::new(0).unwrap_err();
        assert_eq!(err, ConfigError::MaxConcurrentTooSmall(0));
        assert_eq!(err.to_string(), "max_concurrent must be >= 1, got 0");
    }

    #[test]
    fn builder_overrides() {
        let config = BackpressureConfig::new(2)
            .unwrap()
            .with_queue_size(10)
            .with_queue_timeout(Duration::from_millis(1500))
            .with_overload_code(-32050)
            .with_retry_after(Duration::from_millis(250));

        assert_eq!(config.queue_size(), 10);
        assert_eq!(config.queue_timeout_ms(), 1500);
        assert_eq!(config.overload_code(), -32050);
        assert_eq!(config.retry_after_ms(), 250);
    }

    #[test]
    fn debug_does_not_require_observer_debug() {
        let config = BackpressureConfig::new(1)
            .unwrap()
            .with_overload_observer(|_| {});
        let rendered = format!("{config:?}");
        assert!(rendered.contains("on_overload: true"));
    }
}
