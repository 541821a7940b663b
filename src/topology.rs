// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module provides functionality for defining and creating RabbitMQ topology components.
//! The topology includes exchanges, queues, and the bindings between them.
//!
//! The main components are:
//! - `Topology`: a set of definitions installed in order over a channel
//! - `TopologyDeclarator`: declares the exchange/queue/binding a subscription
//!   needs and registers the channel it used

use crate::{
    connection::ConnectionManager,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition, MATCH_ALL_ROUTING_KEY},
    registry::ChannelRegistry,
    transport::{BrokerChannel, SharedChannel},
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Exchanges, queues and bindings to declare together.
///
/// Every declaration is idempotent on the broker, so installing the same
/// topology repeatedly is safe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl Topology {
    pub fn new() -> Topology {
        Topology::default()
    }

    /// The durable topic exchange, durable shared queue and binding a
    /// subscription consumes from.
    pub fn subscription(exchange: &str, queue: &str, routing_key: &str) -> Topology {
        Topology::new()
            .exchange(ExchangeDefinition::durable_topic(exchange))
            .queue(QueueDefinition::durable_shared(queue))
            .queue_binding(
                QueueBinding::new(queue)
                    .exchange(exchange)
                    .routing_key(routing_key),
            )
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology over `channel`: exchanges first, then queues,
    /// then bindings. Stops at the first failure.
    pub async fn install(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            channel.declare_exchange(exch).await?;
            debug!("exchange: {} was created", exch.name);
        }

        for queue in &self.queues {
            channel.declare_queue(queue).await?;
            debug!("queue: {} was created", queue.name);
        }

        for binding in &self.queues_binding {
            channel.bind_queue(binding).await?;
        }

        debug!("topology installed");
        Ok(())
    }
}

/// Declares subscription topology and keeps the channel it was declared on.
pub struct TopologyDeclarator {
    connections: Arc<ConnectionManager>,
    registry: Arc<ChannelRegistry>,
}

impl TopologyDeclarator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        registry: Arc<ChannelRegistry>,
    ) -> TopologyDeclarator {
        TopologyDeclarator {
            connections,
            registry,
        }
    }

    /// Declares `exchange` and `queue` bound with the match-all key `#`.
    pub async fn declare_exchange_and_queue(
        &self,
        exchange: &str,
        queue: &str,
    ) -> Result<SharedChannel, AmqpError> {
        self.declare_exchange_and_queue_with_key(exchange, queue, MATCH_ALL_ROUTING_KEY)
            .await
    }

    /// Declares a durable topic exchange and a durable queue bound to it with
    /// `routing_key`, on a new channel. On success the channel is registered
    /// under `exchange`, replacing any previous entry.
    pub async fn declare_exchange_and_queue_with_key(
        &self,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<SharedChannel, AmqpError> {
        let channel = self.connections.open_channel().await.map_err(|err| {
            warn!(error = err.to_string(), "can't get channel from the broker");
            err
        })?;

        let topology = Topology::subscription(exchange, queue, routing_key);
        if let Err(err) = topology.install(channel.as_ref()).await {
            warn!(
                error = err.to_string(),
                exchange = exchange,
                queue = queue,
                "failure to declare the topology"
            );
            if let Err(close_err) = channel.close().await {
                debug!(error = close_err.to_string(), "failure to close the channel");
            }
            return Err(err);
        }

        self.registry.register(exchange, channel.clone()).await;

        Ok(channel)
    }

    /// Declares only the durable topic `exchange`, on the registry's channel
    /// for it.
    pub async fn declare_exchange(&self, exchange: &str) -> Result<SharedChannel, AmqpError> {
        let channel = self.registry.get_or_create_channel(exchange).await?;

        Topology::new()
            .exchange(ExchangeDefinition::durable_topic(exchange))
            .install(channel.as_ref())
            .await
            .map_err(|err| {
                warn!(
                    error = err.to_string(),
                    exchange = exchange,
                    "failure to declare the exchange"
                );
                err
            })?;

        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    fn declarator(broker: &MemoryBroker) -> (TopologyDeclarator, Arc<ChannelRegistry>) {
        let connections = Arc::new(ConnectionManager::new(
            "memory://",
            Arc::new(broker.connector()),
        ));
        let registry = Arc::new(ChannelRegistry::new(connections.clone()));
        (
            TopologyDeclarator::new(connections, registry.clone()),
            registry,
        )
    }

    #[test]
    fn subscription_topology() {
        let topology = Topology::subscription("backend.notifications", "notifications", "#");

        assert_eq!(
            topology.exchanges,
            vec![ExchangeDefinition::durable_topic("backend.notifications")]
        );
        assert_eq!(
            topology.queues,
            vec![QueueDefinition::durable_shared("notifications")]
        );
        assert_eq!(topology.queues_binding[0].key(), "#");
    }

    #[tokio::test]
    async fn declare_is_idempotent() {
        let broker = MemoryBroker::new();
        let (declarator, registry) = declarator(&broker);

        let first = declarator
            .declare_exchange_and_queue("backend.notifications", "notifications")
            .await
            .unwrap();
        let second = declarator
            .declare_exchange_and_queue("backend.notifications", "notifications")
            .await
            .unwrap();

        assert_eq!(broker.exchange_count(), 1);
        assert_eq!(broker.queue_count(), 1);
        assert_eq!(broker.binding_count(), 1);
        assert_eq!(registry.len().await, 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(
            &registry.get("backend.notifications").await.unwrap(),
            &second
        ));
    }

    #[tokio::test]
    async fn incompatible_redeclaration_conflicts() {
        let broker = MemoryBroker::new();
        let (declarator, _) = declarator(&broker);
        let channel = declarator
            .declare_exchange_and_queue("orders", "billing")
            .await
            .unwrap();

        let err = Topology::new()
            .exchange(ExchangeDefinition::new("orders").fanout())
            .install(channel.as_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::TopologyConflict(_)));
        assert!(broker.exchange("orders").unwrap().is_durable());
    }

    #[tokio::test]
    async fn conflict_is_reported_and_nothing_registered() {
        let broker = MemoryBroker::new();
        let (declarator, registry) = declarator(&broker);
        let channel = registry.get_or_create_channel("setup").await.unwrap();
        channel
            .declare_exchange(&ExchangeDefinition::new("orders").direct())
            .await
            .unwrap();

        let err = declarator
            .declare_exchange_and_queue_with_key("orders", "billing", "orders.created")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AmqpError::TopologyConflict(_)));
        assert!(registry.get("orders").await.is_none());
        assert_eq!(broker.queue_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_broker_fails_declaration() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let (declarator, registry) = declarator(&broker);

        let err = declarator
            .declare_exchange_and_queue("orders", "billing")
            .await
            .err()
            .unwrap();

        assert!(err.is_connection_error());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn exchange_only_declaration_uses_registry_channel() {
        let broker = MemoryBroker::new();
        let (declarator, registry) = declarator(&broker);

        let first = declarator.declare_exchange("events").await.unwrap();
        let second = declarator.declare_exchange("events").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.exchange_count(), 1);
        assert_eq!(broker.queue_count(), 0);
        assert_eq!(registry.len().await, 1);
    }
}
