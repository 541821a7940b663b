// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport
//!
//! Object-safe traits describing the three broker resources the client works
//! with: a dialer producing connections, the connection itself and the
//! channels multiplexed over it. [`crate::amqp`] implements them on top of
//! `lapin`; [`crate::memory`] implements them in-process.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Content type used by the plain publish entry points
pub const TEXT_CONTENT_TYPE: &str = "text/plain";
/// Content type used by the JSON publish entry point
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Shared handle to an open broker connection.
pub type SharedConnection = Arc<dyn BrokerConnection>;
/// Shared handle to a channel.
pub type SharedChannel = Arc<dyn BrokerChannel>;
/// Stream of deliveries produced by a consumer; it ends when the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Establishes broker connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, uri: &str) -> Result<SharedConnection, AmqpError>;
}

/// A live (or dead) connection to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Whether the connection can still be used to open channels.
    fn is_open(&self) -> bool;

    async fn create_channel(&self) -> Result<SharedChannel, AmqpError>;
}

/// A session on a connection, used to issue broker commands.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn publish(&self, msg: &OutboundMessage) -> Result<(), AmqpError>;

    /// Starts a consumer on `queue`.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_mode: AckMode,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// When deliveries are acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The broker considers a delivery acknowledged as soon as it is sent.
    #[default]
    Auto,
    /// The consumer acks after the handler succeeds and nacks when it fails.
    Manual,
}

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub message_id: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Settles a delivery received in [`AckMode::Manual`].
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

/// One message received from a queue.
#[derive(Clone, Default)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub redelivered: bool,
    pub(crate) acker: Option<Arc<dyn Acker>>,
}

impl Delivery {
    /// Builds a delivery carrying only a body.
    pub fn new(body: impl Into<Vec<u8>>) -> Delivery {
        Delivery {
            body: body.into(),
            ..Delivery::default()
        }
    }

    pub fn with_routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub(crate) fn with_acker(mut self, acker: Arc<dyn Acker>) -> Self {
        self.acker = Some(acker);
        self
    }

    /// Decodes the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Acks the delivery. A no-op for auto-acknowledged deliveries.
    pub async fn ack(&self) -> Result<(), AmqpError> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Nacks the delivery. A no-op for auto-acknowledged deliveries.
    pub async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        match &self.acker {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("content_type", &self.content_type)
            .field("message_id", &self.message_id)
            .field("redelivered", &self.redelivered)
            .field("len", &self.body.len())
            .finish()
    }
}
