// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod amqp;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod memory;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod topology;
pub mod transport;

pub use client::RabbitMQClient;
pub use config::RabbitMQConfigs;
pub use dispatcher::{ConsumerLoop, ConsumerOptions};
pub use errors::AmqpError;
pub use handler::{ConsumerHandler, Disposition, HandlerError};
pub use transport::{AckMode, Delivery};
