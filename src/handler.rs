// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Handlers
//!
//! The contract between the consumer loop and the domain code that processes
//! deliveries. A handler receives the delivery and the trace context extracted
//! from its headers, and reports success or a [`HandlerError`].

use crate::transport::Delivery;
use async_trait::async_trait;
use opentelemetry::Context;
use thiserror::Error;

/// What happens to a delivery whose handler failed, when the consumer
/// acknowledges manually. Auto-acknowledged deliveries are already settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the message.
    #[default]
    Discard,
    /// Put the message back on the queue for another attempt.
    Requeue,
}

/// A domain-level failure to process one delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    disposition: Disposition,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> HandlerError {
        HandlerError {
            message: message.into(),
            disposition: Disposition::Discard,
        }
    }

    /// Asks for the delivery to be requeued.
    pub fn requeue(mut self) -> Self {
        self.disposition = Disposition::Requeue;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::new(format!("malformed payload: {err}"))
    }
}

/// Processes deliveries for a consumer loop.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F> ConsumerHandler for F
where
    F: Fn(&Delivery) -> Result<(), HandlerError> + Send + Sync,
{
    async fn exec(&self, _ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError> {
        self(delivery)
    }
}
