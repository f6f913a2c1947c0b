// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Adaptive tool request scheduler
//!
//! Tool calls are queued by priority, answered from a session cache when
//! possible, and dispatched in paced batches. Each executor call runs under
//! the dispatch retry policy, so a remote executor that answers 429 is
//! backed off rather than hammered.
//!
//! The scheduler is single-writer: every method takes `&mut self`. Share it
//! between producers through [`SharedScheduler`].

pub mod cache;
pub mod queue;

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

use crate::config::settings::{SchedulerConfig, Settings};
use crate::error::Result;
use crate::llm::retry::{with_retry, RetryNotice, RetryPolicy};
use crate::tools::{ToolExecutor, ToolInvocation, ToolOutcome};

pub use cache::{cache_key, resource_cache_key, CacheKey, Resource, ResultCache};
pub use queue::{Priority, QueuedRequest, RequestKey};

/// A scheduler shared between tasks
pub type SharedScheduler<E> = Arc<tokio::sync::Mutex<RequestScheduler<E>>>;

/// Hook called before every dispatch retry wait
pub type WaitHook = Arc<dyn Fn(&RetryNotice) + Send + Sync>;

/// Result of [`RequestScheduler::enqueue`]
#[derive(Debug, Clone, PartialEq)]
pub enum Enqueued {
    /// Served from cache; nothing was queued
    Cached(ToolOutcome),
    /// Queued; the outcome will be keyed by this in a later drain
    Pending(RequestKey),
}

/// Snapshot for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub pending: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub cached: usize,
    pub last_dispatch: Option<Instant>,
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pending ({} high, {} medium, {} low), {} cached",
            self.pending, self.high, self.medium, self.low, self.cached
        )?;
        if let Some(last) = self.last_dispatch {
            write!(f, ", last dispatch {:.1}s ago", last.elapsed().as_secs_f64())?;
        }
        Ok(())
    }
}

pub struct RequestScheduler<E: ToolExecutor> {
    executor: E,
    config: SchedulerConfig,
    policy: RetryPolicy,
    queue: Vec<QueuedRequest>,
    cache: ResultCache,
    last_dispatch: Option<Instant>,
    next_sequence: u64,
    on_wait: Option<WaitHook>,
}

impl<E: ToolExecutor> RequestScheduler<E> {
    pub fn new(executor: E, config: SchedulerConfig, policy: RetryPolicy) -> Self {
        Self {
            executor,
            config,
            policy,
            queue: Vec::new(),
            cache: ResultCache::new(),
            last_dispatch: None,
            next_sequence: 0,
            on_wait: None,
        }
    }

    /// Scheduler configured from settings, using the dispatch retry budget
    pub fn from_settings(executor: E, settings: &Settings) -> Self {
        Self::new(
            executor,
            settings.scheduler.clone(),
            RetryPolicy::for_dispatch(&settings.resilience),
        )
    }

    /// Call `hook` before each dispatch retry wait
    pub fn with_wait_hook(mut self, hook: WaitHook) -> Self {
        self.on_wait = Some(hook);
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Wrap in a [`SharedScheduler`]
    pub fn into_shared(self) -> SharedScheduler<E> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    fn is_cacheable(&self, operation: &str) -> bool {
        self.config.cacheable_operations.contains(operation)
    }

    fn is_destructive(&self, operation: &str) -> bool {
        self.config.destructive_operations.contains(operation)
    }

    fn is_batchable(&self, operation: &str) -> bool {
        self.config.batchable_operations.contains(operation)
    }

    /// Cache key for a request, with its path resolved by the executor
    pub fn key_for(&self, operation: &str, params: &Value) -> CacheKey {
        let resource = self.executor.resource_of(operation, params);
        resource_cache_key(operation, params, resource.as_ref())
    }

    /// Queue a request, or answer it from cache.
    ///
    /// An identical cacheable request still in the queue is joined, and its
    /// priority raised to the higher of the two. A request queued before a
    /// destructive one on the same resource is never joined.
    pub fn enqueue(&mut self, operation: &str, params: Value, priority: Priority) -> Enqueued {
        let resource = self.executor.resource_of(operation, &params);

        if self.is_destructive(operation) {
            self.invalidate_for(operation, resource.as_ref());
            self.retire_pending(resource.as_ref());
        }

        let cache_key = self
            .is_cacheable(operation)
            .then(|| resource_cache_key(operation, &params, resource.as_ref()));

        if let Some(key) = &cache_key {
            if let Some(entry) = self.cache.get(key) {
                tracing::debug!(target: "grokit.scheduler", operation, "cache hit");
                return Enqueued::Cached(entry.result.clone());
            }
            if let Some(pending) = self
                .queue
                .iter_mut()
                .find(|r| r.fresh && r.cache_key.as_ref() == Some(key))
            {
                pending.priority = pending.priority.min(priority);
                tracing::debug!(
                    target: "grokit.scheduler",
                    operation,
                    priority = %pending.priority,
                    "joined pending request"
                );
                return Enqueued::Pending(pending.key.clone());
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let key = cache_key
            .clone()
            .filter(|key| !self.queue.iter().any(|r| &r.key == key))
            .unwrap_or_else(|| {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis();
                format!("{operation}@{millis}#{sequence}")
            });

        self.queue.push(QueuedRequest {
            key: key.clone(),
            operation: operation.to_string(),
            params,
            priority,
            enqueued_at: Instant::now(),
            sequence,
            cache_key,
            resource,
            fresh: true,
        });

        tracing::debug!(
            target: "grokit.scheduler",
            operation,
            %priority,
            pending = self.queue.len(),
            "enqueued"
        );
        Enqueued::Pending(key)
    }

    /// Mark queued cacheable requests a destructive request may affect
    fn retire_pending(&mut self, target: Option<&Resource>) {
        for request in self.queue.iter_mut().filter(|r| r.fresh && r.cache_key.is_some()) {
            let affected = match (target, &request.resource) {
                (Some(target), Some(resource)) => resource.affected_by(target),
                (None, _) | (_, None) => true,
            };
            if affected {
                request.fresh = false;
            }
        }
    }

    /// Dispatch up to one batch of queued requests.
    ///
    /// Waits out the minimum spacing since the previous dispatch first.
    /// Requests beyond the batch size stay queued for the next drain.
    pub async fn drain(&mut self) -> Result<BTreeMap<RequestKey, ToolOutcome>> {
        let mut results = BTreeMap::new();
        if self.queue.is_empty() {
            return Ok(results);
        }

        if let Some(last) = self.last_dispatch {
            let min_delay = self.config.min_delay();
            let elapsed = last.elapsed();
            if elapsed < min_delay {
                sleep(min_delay - elapsed).await;
            }
        }

        self.queue.sort_by_key(QueuedRequest::order);
        let take = self.config.batch_size.max(1).min(self.queue.len());
        let batch: Vec<QueuedRequest> = self.queue.drain(..take).collect();

        let batchable =
            batch.len() == 1 || batch.iter().all(|r| self.is_batchable(&r.operation));

        tracing::debug!(
            target: "grokit.scheduler",
            size = batch.len(),
            batchable,
            remaining = self.queue.len(),
            "dispatching"
        );

        let outcome = if batchable {
            self.dispatch_batch(batch, &mut results).await
        } else {
            self.dispatch_each(batch, &mut results).await
        };
        self.last_dispatch = Some(Instant::now());
        outcome?;

        Ok(results)
    }

    async fn dispatch_batch(
        &mut self,
        batch: Vec<QueuedRequest>,
        results: &mut BTreeMap<RequestKey, ToolOutcome>,
    ) -> Result<()> {
        let invocations: Vec<ToolInvocation> = batch.iter().map(QueuedRequest::invocation).collect();

        let outcomes = {
            let executor = &self.executor;
            let hook = self.on_wait.clone();
            with_retry(
                &self.policy,
                "dispatch_batch",
                || executor.execute_batch(&invocations),
                |notice| {
                    if let Some(hook) = &hook {
                        hook(notice);
                    }
                },
            )
            .await?
        };

        if outcomes.len() != batch.len() {
            tracing::warn!(
                target: "grokit.scheduler",
                expected = batch.len(),
                received = outcomes.len(),
                "executor returned a short batch"
            );
        }

        let mut outcomes = outcomes.into_iter();
        for request in batch {
            let outcome = outcomes
                .next()
                .unwrap_or_else(|| ToolOutcome::error("Executor returned no result"));
            self.record(request, outcome, results);
        }
        Ok(())
    }

    async fn dispatch_each(
        &mut self,
        batch: Vec<QueuedRequest>,
        results: &mut BTreeMap<RequestKey, ToolOutcome>,
    ) -> Result<()> {
        let mut remaining = batch.into_iter();
        let mut first = true;

        while let Some(request) = remaining.next() {
            if !first {
                sleep(self.config.inter_request_delay()).await;
            }
            first = false;

            let invocation = request.invocation();
            let outcome = {
                let executor = &self.executor;
                let hook = self.on_wait.clone();
                with_retry(
                    &self.policy,
                    &request.operation,
                    || executor.execute(&invocation),
                    |notice| {
                        if let Some(hook) = &hook {
                            hook(notice);
                        }
                    },
                )
                .await
            };

            match outcome {
                Ok(outcome) => self.record(request, outcome, results),
                Err(e) => {
                    let requeued: Vec<QueuedRequest> = remaining.collect();
                    tracing::warn!(
                        target: "grokit.scheduler",
                        operation = %request.operation,
                        requeued = requeued.len(),
                        error = %e,
                        "dispatch failed"
                    );
                    self.queue.extend(requeued);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn record(
        &mut self,
        request: QueuedRequest,
        outcome: ToolOutcome,
        results: &mut BTreeMap<RequestKey, ToolOutcome>,
    ) {
        if outcome.is_success() {
            if let (Some(key), true) = (&request.cache_key, request.fresh) {
                self.cache.insert(
                    key.clone(),
                    &request.operation,
                    request.resource.clone(),
                    outcome.clone(),
                );
            }
            if self.is_destructive(&request.operation) {
                self.invalidate_for(&request.operation, request.resource.as_ref());
            }
        }
        results.insert(request.key, outcome);
    }

    /// A destructive operation with no resolvable resource clears everything
    fn invalidate_for(&mut self, operation: &str, resource: Option<&Resource>) {
        let removed = match resource {
            Some(resource) => self.cache.invalidate(resource),
            None => self.cache.clear(),
        };
        if removed > 0 {
            tracing::debug!(target: "grokit.scheduler", operation, removed, "cache invalidated");
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn status(&self) -> SchedulerStatus {
        let count = |priority: Priority| self.queue.iter().filter(|r| r.priority == priority).count();
        SchedulerStatus {
            pending: self.queue.len(),
            high: count(Priority::High),
            medium: count(Priority::Medium),
            low: count(Priority::Low),
            cached: self.cache.len(),
            last_dispatch: self.last_dispatch,
        }
    }

    /// Drop all cached results; returns how many were dropped
    pub fn clear_cache(&mut self) -> usize {
        self.cache.clear()
    }

    /// Drop every undispatched request; returns their keys
    pub fn discard_pending(&mut self) -> Vec<RequestKey> {
        let discarded: Vec<RequestKey> = self.queue.drain(..).map(|r| r.key).collect();
        if !discarded.is_empty() {
            tracing::debug!(
                target: "grokit.scheduler",
                discarded = discarded.len(),
                "discarded pending requests"
            );
        }
        discarded
    }
}
