// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Client
//!
//! `AmqpError` covers every failure the client can observe while talking to
//! the broker: dialing, opening channels, declaring topology, publishing and
//! consuming. Handler failures are a separate type, see
//! [`crate::handler::HandlerError`].

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// The broker connection could not be established
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// A channel could not be opened, closed or used on the connection
    #[error("channel failure: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// An exchange or queue already exists with incompatible parameters
    #[error("topology conflict: {0}")]
    TopologyConflict(String),

    /// The payload could not be encoded
    #[error("failure to serialize payload: {0}")]
    SerializationError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// The delivery stream ended
    #[error("delivery stream closed")]
    StreamClosed,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,
}

impl From<serde_json::Error> for AmqpError {
    fn from(err: serde_json::Error) -> Self {
        AmqpError::SerializationError(err.to_string())
    }
}

impl AmqpError {
    /// Whether the error means the connection itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, AmqpError::ConnectionError(_))
    }
}
