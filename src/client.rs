// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Client
//!
//! Entry point wiring one connection, its channel registry, the topology
//! declarator and the publisher together. Declarations are best effort and
//! only logged on failure; sends report their outcome; consumers run until
//! their cancellation token fires.
//!
//! ```no_run
//! use rabbitmq_client::{client::RabbitMQClient, config::RabbitMQConfigs};
//! use rabbitmq_client::handler::HandlerError;
//! use rabbitmq_client::transport::Delivery;
//! use std::{sync::Arc, time::Duration};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), rabbitmq_client::errors::AmqpError> {
//! let client = RabbitMQClient::new(&RabbitMQConfigs::from_env());
//! client.connect().await?;
//!
//! let shutdown = CancellationToken::new();
//! let handler = Arc::new(|delivery: &Delivery| -> Result<(), HandlerError> {
//!     println!("{}", String::from_utf8_lossy(&delivery.body));
//!     Ok(())
//! });
//! client.spawn_consumer(
//!     "backend.notifications",
//!     "notifications.worker",
//!     Default::default(),
//!     handler,
//!     shutdown.clone(),
//! );
//!
//! client
//!     .send_json_with_key("backend.notifications", &"hello", "user.created")
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    amqp::AmqpConnector,
    config::RabbitMQConfigs,
    connection::ConnectionManager,
    dispatcher::{ConsumerLoop, ConsumerOptions},
    errors::AmqpError,
    handler::ConsumerHandler,
    publisher::{RabbitMQPublisher, JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE},
    registry::ChannelRegistry,
    topology::TopologyDeclarator,
    transport::{Connector, SharedConnection},
};
use opentelemetry::Context;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A RabbitMQ client owning one connection and the channels opened on it.
pub struct RabbitMQClient {
    connections: Arc<ConnectionManager>,
    registry: Arc<ChannelRegistry>,
    declarator: Arc<TopologyDeclarator>,
    publisher: Arc<RabbitMQPublisher>,
}

impl RabbitMQClient {
    /// A client dialing RabbitMQ with the given settings. Nothing is dialed
    /// until the first operation or [`RabbitMQClient::connect`].
    pub fn new(cfg: &RabbitMQConfigs) -> RabbitMQClient {
        Self::with_connector(
            &cfg.uri(),
            Arc::new(AmqpConnector::new(&cfg.connection_name)),
        )
    }

    /// A client dialing `uri` through `connector`.
    pub fn with_connector(uri: &str, connector: Arc<dyn Connector>) -> RabbitMQClient {
        let connections = Arc::new(ConnectionManager::new(uri, connector));
        let registry = Arc::new(ChannelRegistry::new(connections.clone()));
        let declarator = Arc::new(TopologyDeclarator::new(
            connections.clone(),
            registry.clone(),
        ));
        let publisher = RabbitMQPublisher::new(connections.clone());

        RabbitMQClient {
            connections,
            registry,
            declarator,
            publisher,
        }
    }

    /// Dials the broker, failing fast when it is unreachable.
    pub async fn connect(&self) -> Result<SharedConnection, AmqpError> {
        self.connections.connect().await
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        self.connections.clone()
    }

    pub fn registry(&self) -> Arc<ChannelRegistry> {
        self.registry.clone()
    }

    pub fn publisher(&self) -> Arc<RabbitMQPublisher> {
        self.publisher.clone()
    }

    /// Declares `exchange` and `queue` bound with `#`. Failures are logged.
    pub async fn declare_exchange_and_queue(&self, exchange: &str, queue: &str) {
        if let Err(err) = self
            .declarator
            .declare_exchange_and_queue(exchange, queue)
            .await
        {
            error!(error = err.to_string(), "failed to declare exchange and queue");
        }
    }

    /// Declares `exchange` and `queue` bound with `routing_key`. Failures are
    /// logged.
    pub async fn declare_exchange_and_queue_with_key(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) {
        if let Err(err) = self
            .declarator
            .declare_exchange_and_queue_with_key(exchange, queue, routing_key)
            .await
        {
            error!(error = err.to_string(), "failed to declare exchange and queue");
        }
    }

    /// Declares the topic `exchange` only. Failures are logged.
    pub async fn declare_exchange(&self, exchange: &str) {
        if let Err(err) = self.declarator.declare_exchange(exchange).await {
            error!(error = err.to_string(), "failed to declare exchange");
        }
    }

    /// Publishes `payload` as `text/plain` with an empty routing key.
    pub async fn send<T>(&self, exchange: &str, payload: &T) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.send_with_key(exchange, payload, "").await
    }

    /// Publishes `payload` as `text/plain`.
    pub async fn send_with_key<T>(
        &self,
        exchange: &str,
        payload: &T,
        routing_key: &str,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publisher
            .publish(
                &Context::current(),
                exchange,
                payload,
                routing_key,
                TEXT_CONTENT_TYPE,
            )
            .await
    }

    /// Publishes `payload` as `application/json`.
    pub async fn send_json_with_key<T>(
        &self,
        exchange: &str,
        payload: &T,
        routing_key: &str,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publisher
            .publish(
                &Context::current(),
                exchange,
                payload,
                routing_key,
                JSON_CONTENT_TYPE,
            )
            .await
    }

    /// Builds a consumer loop for `exchange`/`queue` without starting it.
    pub fn consumer(
        &self,
        exchange: &str,
        queue: &str,
        options: ConsumerOptions,
        handler: Arc<dyn ConsumerHandler>,
    ) -> ConsumerLoop {
        ConsumerLoop::new(
            exchange,
            queue,
            options,
            self.declarator.clone(),
            handler,
        )
    }

    /// Consumes `queue` bound to `exchange` with `#` until `shutdown` fires.
    pub async fn consume_with_retry(
        &self,
        exchange: &str,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        inter_message_delay: Duration,
        shutdown: CancellationToken,
    ) {
        let options = ConsumerOptions::default().inter_message_delay(inter_message_delay);
        self.consumer(exchange, queue, options, handler)
            .run(shutdown)
            .await
    }

    /// Consumes `queue` bound to `exchange` with `routing_key` until
    /// `shutdown` fires.
    pub async fn consume_with_key_and_retry(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
        handler: Arc<dyn ConsumerHandler>,
        inter_message_delay: Duration,
        shutdown: CancellationToken,
    ) {
        let options = ConsumerOptions::default()
            .routing_key(routing_key)
            .inter_message_delay(inter_message_delay);
        self.consumer(exchange, queue, options, handler)
            .run(shutdown)
            .await
    }

    /// Starts a consumer loop on its own task.
    pub fn spawn_consumer(
        &self,
        exchange: &str,
        queue: &str,
        options: ConsumerOptions,
        handler: Arc<dyn ConsumerHandler>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        debug!(exchange = exchange, queue = queue, "spawning consumer");
        self.consumer(exchange, queue, options, handler)
            .spawn(shutdown)
    }
}
