// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use serde_json::Value;
use std::fmt;
use std::time::Instant;

use crate::scheduler::cache::{CacheKey, Resource};
use crate::tools::ToolInvocation;

/// Identifies a queued request in drain results
pub type RequestKey = String;

/// Dispatch precedence; `High` goes first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub key: RequestKey,
    pub operation: String,
    pub params: Value,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub sequence: u64,
    pub cache_key: Option<CacheKey>,
    pub resource: Option<Resource>,
    /// Cleared once a later destructive request may change what this one
    /// reads; a stale request is neither joined nor cached
    pub fresh: bool,
}

impl QueuedRequest {
    /// Sort key: priority, then age, then enqueue order
    pub fn order(&self) -> (Priority, Instant, u64) {
        (self.priority, self.enqueued_at, self.sequence)
    }

    pub fn invocation(&self) -> ToolInvocation {
        ToolInvocation::new(self.operation.clone(), self.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn request(priority: Priority, sequence: u64, enqueued_at: Instant) -> QueuedRequest {
        QueuedRequest {
            key: format!("k{sequence}"),
            operation: "read_file".to_string(),
            params: json!({}),
            priority,
            enqueued_at,
            sequence,
            cache_key: None,
            resource: None,
            fresh: true,
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::Low.to_string(), "low");
    }

    #[test]
    fn test_order_uses_age_then_sequence() {
        let now = Instant::now();
        let later = now + Duration::from_millis(5);

        let mut queue = [
            request(Priority::Low, 0, now),
            request(Priority::High, 2, later),
            request(Priority::High, 1, later),
            request(Priority::High, 3, now),
        ];
        queue.sort_by_key(QueuedRequest::order);

        let keys: Vec<&str> = queue.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k3", "k1", "k2", "k0"]);
    }
}
