// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Transport
//!
//! `lapin` implementation of the transport traits. Connections are dialed with
//! the configured connection name so they can be told apart in the RabbitMQ
//! management UI.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
    transport::{
        AckMode, Acker, BrokerChannel, BrokerConnection, Connector, Delivery, DeliveryStream,
        OutboundMessage, SharedChannel, SharedConnection,
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ with `lapin`.
pub struct AmqpConnector {
    connection_name: String,
}

impl AmqpConnector {
    pub fn new(connection_name: &str) -> AmqpConnector {
        AmqpConnector {
            connection_name: connection_name.to_owned(),
        }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn dial(&self, uri: &str) -> Result<SharedConnection, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        match Connection::connect(uri, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(Arc::new(AmqpConnection { inner: conn }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn create_channel(&self) -> Result<SharedChannel, AmqpError> {
        match self.inner.create_channel().await {
            Ok(channel) => {
                debug!(channel = channel.id(), "channel created");
                Ok(Arc::new(AmqpChannel { inner: channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}

struct AmqpChannel {
    inner: Channel,
}

/// Maps a declaration failure, singling out PRECONDITION_FAILED which the
/// broker answers when the entity exists with different parameters.
fn declaration_error(err: &lapin::Error, fallback: AmqpError) -> AmqpError {
    match err {
        lapin::Error::ProtocolError(amqp_err)
            if matches!(
                amqp_err.kind(),
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
            ) =>
        {
            AmqpError::TopologyConflict(amqp_err.to_string())
        }
        _ => fallback,
    }
}

fn queue_arguments(def: &QueueDefinition) -> FieldTable {
    let args: BTreeMap<ShortString, AMQPValue> = def
        .arguments()
        .into_iter()
        .map(|(key, value)| {
            (
                ShortString::from(key),
                AMQPValue::LongInt(LongInt::from(value)),
            )
        })
        .collect();

    FieldTable::from(args)
}

fn header_table(headers: &BTreeMap<String, String>) -> FieldTable {
    let table: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .map(|(key, value)| {
            (
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            )
        })
        .collect();

    FieldTable::from(table)
}

fn string_headers(props: &BasicProperties) -> BTreeMap<String, String> {
    let Some(table) = props.headers() else {
        return BTreeMap::new();
    };

    table
        .inner()
        .iter()
        .filter_map(|(key, value)| match value {
            AMQPValue::LongString(value) => std::str::from_utf8(value.as_bytes())
                .ok()
                .map(|value| (key.as_str().to_owned(), value.to_owned())),
            AMQPValue::ShortString(value) => {
                Some((key.as_str().to_owned(), value.as_str().to_owned()))
            }
            _ => None,
        })
        .collect()
}

struct AmqpAcker {
    inner: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.inner
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }
}

fn into_delivery(delivery: lapin::message::Delivery, ack_mode: AckMode) -> Delivery {
    let converted = Delivery {
        body: delivery.data,
        exchange: delivery.exchange.as_str().to_owned(),
        routing_key: delivery.routing_key.as_str().to_owned(),
        content_type: delivery
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_owned()),
        message_id: delivery
            .properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_owned()),
        headers: string_headers(&delivery.properties),
        redelivered: delivery.redelivered,
        acker: None,
    };

    match ack_mode {
        AckMode::Auto => converted,
        AckMode::Manual => converted.with_acker(Arc::new(AmqpAcker {
            inner: delivery.acker,
        })),
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        self.inner
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                declaration_error(&err, AmqpError::DeclareExchangeError(def.name.clone()))
            })
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .inner
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                queue_arguments(def),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(declaration_error(
                    &err,
                    AmqpError::DeclareQueueError(def.name.clone()),
                ))
            }
            Ok(queue) => {
                debug!(
                    messages = queue.message_count(),
                    "queue: {} was created", def.name
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        self.inner
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                )
            })
    }

    async fn publish(&self, msg: &OutboundMessage) -> Result<(), AmqpError> {
        match self
            .inner
            .basic_publish(
                &msg.exchange,
                &msg.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.body,
                BasicProperties::default()
                    .with_content_type(ShortString::from(msg.content_type.clone()))
                    .with_message_id(ShortString::from(msg.message_id.clone()))
                    .with_headers(header_table(&msg.headers)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_mode: AckMode,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: ack_mode == AckMode::Auto,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::ChannelError(err.to_string())
            })?;

        Ok(consumer
            .map(move |result| match result {
                Ok(delivery) => Ok(into_delivery(delivery, ack_mode)),
                Err(err) => Err(AmqpError::ChannelError(err.to_string())),
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        if !self.is_open() {
            return Ok(());
        }

        self.inner
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }
}
