// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Loop
//!
//! A subscription that keeps itself alive. Every cycle it declares its
//! topology, starts a consumer on the queue and dispatches deliveries to the
//! handler one at a time until the delivery stream ends. Whatever ended the
//! cycle (no stream, closed stream, lost connection) the loop cools down and
//! starts over from the declaration, so topology lost on the broker side is
//! recreated without extra bookkeeping.
//!
//! The loop only stops when its cancellation token fires. The token is
//! observed while waiting for a delivery and while sleeping.

use crate::{
    consumer::consume,
    errors::AmqpError,
    handler::ConsumerHandler,
    queue::MATCH_ALL_ROUTING_KEY,
    retry::RetryPolicy,
    topology::TopologyDeclarator,
    transport::{AckMode, DeliveryStream, SharedChannel},
};
use futures_util::StreamExt;
use opentelemetry::global::{self, BoxedTracer};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-subscription settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    pub routing_key: String,
    /// Pause after every delivery before pulling the next one.
    pub inter_message_delay: Duration,
    pub ack_mode: AckMode,
    pub retry: RetryPolicy,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            routing_key: MATCH_ALL_ROUTING_KEY.to_owned(),
            inter_message_delay: Duration::ZERO,
            ack_mode: AckMode::Auto,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConsumerOptions {
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn inter_message_delay(mut self, delay: Duration) -> Self {
        self.inter_message_delay = delay;
        self
    }

    pub fn ack_mode(mut self, mode: AckMode) -> Self {
        self.ack_mode = mode;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// Counters describing what a consumer loop has done so far.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    cycles: AtomicU64,
    fetch_failures: AtomicU64,
    stream_closures: AtomicU64,
    dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

impl ConsumerStats {
    /// Cycles started, each beginning with a topology declaration.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Cycles that ended without a delivery stream.
    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::SeqCst)
    }

    /// Cycles that ended because the delivery stream closed.
    pub fn stream_closures(&self) -> u64 {
        self.stream_closures.load(Ordering::SeqCst)
    }

    /// Deliveries handed to the handler, whatever the outcome.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::SeqCst)
    }
}

enum CycleOutcome {
    FetchFailed,
    StreamClosed { dispatched: u64 },
    Cancelled,
}

/// Sleeps for `duration` unless `shutdown` fires first. Returns whether the
/// loop should keep going.
async fn pause(shutdown: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !shutdown.is_cancelled();
    }

    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// A self-healing subscription to one exchange/queue pair.
pub struct ConsumerLoop {
    exchange: String,
    queue: String,
    options: ConsumerOptions,
    declarator: Arc<TopologyDeclarator>,
    handler: Arc<dyn ConsumerHandler>,
    tracer: BoxedTracer,
    stats: Arc<ConsumerStats>,
}

impl ConsumerLoop {
    pub fn new(
        exchange: &str,
        queue: &str,
        options: ConsumerOptions,
        declarator: Arc<TopologyDeclarator>,
        handler: Arc<dyn ConsumerHandler>,
    ) -> ConsumerLoop {
        ConsumerLoop {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            options,
            declarator,
            handler,
            tracer: global::tracer("amqp consumer"),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Runs the loop on a new task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            exchange = self.exchange.as_str(),
            queue = self.queue.as_str(),
            key = self.options.routing_key.as_str(),
            "starting consumer"
        );

        let mut consecutive_failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            self.stats.cycles.fetch_add(1, Ordering::SeqCst);

            let cooldown = match self.cycle(&shutdown).await {
                CycleOutcome::Cancelled => break,
                CycleOutcome::FetchFailed => {
                    self.stats.fetch_failures.fetch_add(1, Ordering::SeqCst);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let cooldown = self.options.retry.after_fetch_failure(consecutive_failures);
                    warn!(
                        queue = self.queue.as_str(),
                        cooldown = ?cooldown,
                        "failed to get messages, retrying..."
                    );
                    cooldown
                }
                CycleOutcome::StreamClosed { dispatched } => {
                    self.stats.stream_closures.fetch_add(1, Ordering::SeqCst);
                    consecutive_failures = match dispatched {
                        0 => consecutive_failures.saturating_add(1),
                        _ => 1,
                    };
                    let cooldown = self.options.retry.after_stream_closed(consecutive_failures);
                    warn!(
                        error = AmqpError::StreamClosed.to_string(),
                        queue = self.queue.as_str(),
                        cooldown = ?cooldown,
                        "message channel closed, retrying..."
                    );
                    cooldown
                }
            };

            if !pause(&shutdown, cooldown).await {
                break;
            }
        }

        info!(queue = self.queue.as_str(), "consumer stopped");
    }

    async fn cycle(&self, shutdown: &CancellationToken) -> CycleOutcome {
        let channel = match self
            .declarator
            .declare_exchange_and_queue_with_key(
                &self.exchange,
                &self.queue,
                &self.options.routing_key,
            )
            .await
        {
            Ok(channel) => channel,
            Err(err) => {
                warn!(error = err.to_string(), "topology declaration failed");
                return CycleOutcome::FetchFailed;
            }
        };

        let Some(deliveries) = self.fetch(&channel).await else {
            return CycleOutcome::FetchFailed;
        };

        let outcome = self.dispatch(shutdown, deliveries).await;

        if let Err(err) = channel.close().await {
            debug!(error = err.to_string(), "failure to close the consumer channel");
        }

        outcome
    }

    /// Starts consuming on the channel this cycle declared its topology on.
    /// Loops sharing an exchange each keep their own channel.
    async fn fetch(&self, channel: &SharedChannel) -> Option<DeliveryStream> {
        let tag = format!("{}-{}", self.queue, Uuid::new_v4());
        match channel
            .consume(&self.queue, &tag, self.options.ack_mode)
            .await
        {
            Ok(deliveries) => {
                debug!(queue = self.queue.as_str(), tag = tag.as_str(), "consuming");
                Some(deliveries)
            }
            Err(err) => {
                warn!(error = err.to_string(), "error to create the consumer");
                if let Err(close_err) = channel.close().await {
                    debug!(error = close_err.to_string(), "failure to close the channel");
                }
                None
            }
        }
    }

    async fn dispatch(
        &self,
        shutdown: &CancellationToken,
        mut deliveries: DeliveryStream,
    ) -> CycleOutcome {
        let mut dispatched = 0;

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return CycleOutcome::Cancelled,
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    warn!(error = err.to_string(), "errors consume msg");
                    break;
                }
                None => break,
            };

            let result = consume(
                &self.tracer,
                &self.queue,
                &delivery,
                self.handler.as_ref(),
                self.options.ack_mode,
            )
            .await;

            dispatched += 1;
            self.stats.dispatched.fetch_add(1, Ordering::SeqCst);
            if result.is_err() {
                self.stats.handler_failures.fetch_add(1, Ordering::SeqCst);
            }

            if !pause(shutdown, self.options.inter_message_delay).await {
                return CycleOutcome::Cancelled;
            }
        }

        CycleOutcome::StreamClosed { dispatched }
    }
}
