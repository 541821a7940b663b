// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module provides functionality for publishing messages to RabbitMQ exchanges.
//! Payloads are serialized to JSON and published on a channel opened for that
//! single message, which is closed again whatever the outcome. The caller's
//! OpenTelemetry context travels in the message headers.

use crate::{
    connection::ConnectionManager,
    errors::AmqpError,
    otel,
    transport::OutboundMessage,
};
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub use crate::transport::{JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE};

/// Publishes serialized payloads to exchanges.
pub struct RabbitMQPublisher {
    connections: Arc<ConnectionManager>,
}

impl RabbitMQPublisher {
    /// Creates a new RabbitMQ publisher.
    ///
    /// # Returns
    /// An Arc-wrapped RabbitMQPublisher instance for thread-safe sharing
    pub fn new(connections: Arc<ConnectionManager>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { connections })
    }

    /// Publishes `payload` to `exchange`.
    ///
    /// The payload is serialized before any channel is opened, so a payload
    /// that cannot be encoded fails with `SerializationError` without touching
    /// the broker. Publishing is neither mandatory nor immediate: the broker
    /// drops the message when no queue matches `routing_key`.
    pub async fn publish<T>(
        &self,
        ctx: &Context,
        exchange: &str,
        payload: &T,
        routing_key: &str,
        content_type: &str,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|err| {
            error!(error = err.to_string(), "while marshal payload");
            AmqpError::from(err)
        })?;

        let mut headers = BTreeMap::new();
        otel::inject(ctx, &mut headers);

        let msg = OutboundMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            content_type: content_type.to_owned(),
            message_id: Uuid::new_v4().to_string(),
            headers,
            body,
        };

        let channel = self.connections.open_channel().await.map_err(|err| {
            error!(error = err.to_string(), "can't get channel from connection");
            err
        })?;

        let result = channel.publish(&msg).await;

        if let Err(err) = channel.close().await {
            warn!(error = err.to_string(), "failure to close the publish channel");
        }

        match &result {
            Ok(()) => debug!(
                exchange = exchange,
                key = routing_key,
                id = msg.message_id.as_str(),
                "message published"
            ),
            Err(err) => warn!(
                error = err.to_string(),
                exchange = exchange,
                "error publishing message"
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryBroker,
        queue::QueueDefinition,
        transport::{AckMode, Connector},
    };
    use futures_util::StreamExt;
    use std::collections::HashMap;

    fn publisher(broker: &MemoryBroker) -> Arc<RabbitMQPublisher> {
        RabbitMQPublisher::new(Arc::new(ConnectionManager::new(
            "memory://",
            Arc::new(broker.connector()),
        )))
    }

    #[tokio::test]
    async fn channel_is_closed_after_success() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        let channel = broker
            .connector()
            .dial("memory://")
            .await
            .unwrap()
            .create_channel()
            .await
            .unwrap();
        channel
            .declare_queue(&QueueDefinition::durable_shared("jobs"))
            .await
            .unwrap();
        let mut deliveries = channel.consume("jobs", "tag", AckMode::Auto).await.unwrap();

        publisher
            .publish(&Context::new(), "", &"payload", "jobs", JSON_CONTENT_TYPE)
            .await
            .unwrap();

        let delivery = deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.json::<String>().unwrap(), "payload");
        assert_eq!(delivery.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert!(delivery.message_id.is_some());
        assert_eq!(broker.channels_opened(), 2);
        assert_eq!(broker.open_channel_count(), 1);
    }

    #[tokio::test]
    async fn channel_is_closed_after_failure() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);

        let err = publisher
            .publish(&Context::new(), "missing", &1, "", TEXT_CONTENT_TYPE)
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::PublishingError(_)));
        assert_eq!(broker.channels_opened(), 1);
        assert_eq!(broker.open_channel_count(), 0);
    }

    #[tokio::test]
    async fn unserializable_payload_never_reaches_the_broker() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);

        let err = publisher
            .publish(&Context::new(), "ex", &payload, "", TEXT_CONTENT_TYPE)
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::SerializationError(_)));
        assert_eq!(broker.dial_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_broker_is_reported() {
        let broker = MemoryBroker::new();
        broker.set_available(false);

        let err = publisher(&broker)
            .publish(&Context::new(), "ex", &"x", "", TEXT_CONTENT_TYPE)
            .await
            .unwrap_err();

        assert!(err.is_connection_error());
    }
}
