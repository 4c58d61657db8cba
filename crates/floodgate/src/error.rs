//! Structured overload rejections and their JSON-RPC rendering.

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};

use crate::config::BackpressureConfig;
use crate::metrics::MetricsSnapshot;

/// Wire message carried by every overload rejection.
pub const OVERLOAD_MESSAGE: &str = "SERVER_OVERLOADED";

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No free slot and no queue configured.
    ConcurrencyLimit,
    /// Queue configured but at capacity.
    QueueFull,
    /// Parked, but the deadline fired before a slot was handed off.
    QueueTimeout,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConcurrencyLimit => "concurrency_limit",
            Self::QueueFull => "queue_full",
            Self::QueueTimeout => "queue_timeout",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overload rejection carrying the counters as seen at the rejection instant.
///
/// Overload is a value, not a panic: callers receive this and render it into
/// whatever wire format their protocol uses. [`to_json_rpc`](Self::to_json_rpc)
/// produces the JSON-RPC error object directly.
#[derive(Debug, Clone, thiserror::Error)]
#[error("SERVER_OVERLOADED: {reason}")]
pub struct OverloadError {
    reason: RejectReason,
    active: u32,
    queued: u32,
    max_concurrent: u32,
    queue_size: u32,
    queue_timeout_ms: u64,
    retry_after_ms: u64,
    code: i32,
}

impl OverloadError {
    pub(crate) fn new(
        reason: RejectReason,
        snapshot: MetricsSnapshot,
        config: &BackpressureConfig,
    ) -> Self {
        Self {
            reason,
            active: snapshot.active,
            queued: snapshot.queued,
            max_concurrent: config.max_concurrent(),
            queue_size: config.queue_size(),
            queue_timeout_ms: config.queue_timeout_ms(),
            retry_after_ms: config.retry_after_ms(),
            code: config.overload_code(),
        }
    }

    pub fn reason(&self) -> RejectReason {
        self.reason
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// `active` at the rejection instant.
    pub fn active(&self) -> u32 {
        self.active
    }

    /// `queued` at the rejection instant.
    pub fn queued(&self) -> u32 {
        self.queued
    }

    pub fn retry_after_ms(&self) -> u64 {
        self.retry_after_ms
    }

    /// The `data` member of the JSON-RPC error object.
    pub fn data(&self) -> Value {
        json!({
            "reason": self.reason,
            "active": self.active,
            "queued": self.queued,
            "max_concurrent": self.max_concurrent,
            "queue_size": self.queue_size,
            "queue_timeout_ms": self.queue_timeout_ms,
            "retry_after_ms": self.retry_after_ms,
        })
    }

    /// The full JSON-RPC error object: `code`, `message`, `data`.
    pub fn to_json_rpc(&self) -> Value {
        json!({
            "code": self.code,
            "message": OVERLOAD_MESSAGE,
            "data": self.data(),
        })
    }
}
