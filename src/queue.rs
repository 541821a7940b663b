// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions and Bindings
//!
//! Queues buffer messages for consumers; bindings connect a queue to an
//! exchange through a routing-key pattern.

use std::collections::BTreeMap;

/// Routing key that matches every message published to a topic exchange.
pub const MATCH_ALL_ROUTING_KEY: &str = "#";

/// Constant for the argument used to specify message TTL
pub const AMQP_ARGS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the argument used to specify maximum queue length
pub const AMQP_ARGS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the argument used to specify maximum queue size in bytes
pub const AMQP_ARGS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// Supports the standard declaration flags plus the TTL and length limits
/// that RabbitMQ accepts as `x-` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default the queue is non-durable, non-exclusive and kept when unused.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// The durable, shared, never-auto-deleted queue used for subscriptions.
    pub fn durable_shared(name: &str) -> QueueDefinition {
        QueueDefinition::new(name).durable()
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Only checks that the queue exists, without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the message Time-To-Live in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// The `x-` declaration arguments derived from the limits set on the queue.
    pub fn arguments(&self) -> BTreeMap<&'static str, i32> {
        let mut args = BTreeMap::new();

        if let Some(ttl) = self.ttl {
            args.insert(AMQP_ARGS_MESSAGE_TTL, ttl);
        }
        if let Some(max) = self.max_length {
            args.insert(AMQP_ARGS_MAX_LENGTH, max);
        }
        if let Some(max_bytes) = self.max_length_bytes {
            args.insert(AMQP_ARGS_MAX_LENGTH_BYTES, max_bytes);
        }

        args
    }

    /// Whether a redeclaration with `other` would be accepted by the broker.
    pub fn is_compatible_with(&self, other: &QueueDefinition) -> bool {
        if self.passive || other.passive {
            return true;
        }

        self.durable == other.durable
            && self.delete == other.delete
            && self.exclusive == other.exclusive
            && self.arguments() == other.arguments()
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding for the given queue.
    ///
    /// The routing key defaults to `#`; the exchange must be set with
    /// [`QueueBinding::exchange`].
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: MATCH_ALL_ROUTING_KEY.to_owned(),
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_shared_queue_flags() {
        let def = QueueDefinition::durable_shared("notifications");

        assert!(def.durable);
        assert!(!def.delete);
        assert!(!def.exclusive);
        assert!(def.arguments().is_empty());
    }

    #[test]
    fn limits_become_arguments() {
        let def = QueueDefinition::new("q").ttl(1000).max_length(5);
        let args = def.arguments();

        assert_eq!(args.get(AMQP_ARGS_MESSAGE_TTL), Some(&1000));
        assert_eq!(args.get(AMQP_ARGS_MAX_LENGTH), Some(&5));
        assert_eq!(args.get(AMQP_ARGS_MAX_LENGTH_BYTES), None);
    }

    #[test]
    fn binding_defaults_to_match_all() {
        let binding = QueueBinding::new("q").exchange("ex");

        assert_eq!(binding.key(), "#");
        assert_eq!(binding.exchange_name(), "ex");
        assert_eq!(binding.queue_name(), "q");
    }

    #[test]
    fn queue_compatibility() {
        let def = QueueDefinition::durable_shared("q");

        assert!(def.is_compatible_with(&QueueDefinition::durable_shared("q")));
        assert!(!def.is_compatible_with(&QueueDefinition::new("q")));
        assert!(!def.is_compatible_with(&QueueDefinition::durable_shared("q").ttl(10)));
    }
}
