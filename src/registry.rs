// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Channel Registry
//!
//! Long-lived channels keyed by exchange name. The consumer declares its
//! topology on a channel, registers it here and later looks it up to start
//! consuming. The map is owned by the client instance and every access goes
//! through its lock.

use crate::{connection::ConnectionManager, errors::AmqpError, transport::SharedChannel};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

pub struct ChannelRegistry {
    connections: Arc<ConnectionManager>,
    channels: Mutex<HashMap<String, SharedChannel>>,
}

impl ChannelRegistry {
    pub fn new(connections: Arc<ConnectionManager>) -> ChannelRegistry {
        ChannelRegistry {
            connections,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the channel registered for `exchange` while it is still open;
    /// otherwise opens a new one and registers it in its place.
    pub async fn get_or_create_channel(&self, exchange: &str) -> Result<SharedChannel, AmqpError> {
        let mut channels = self.channels.lock().await;

        if let Some(channel) = channels.get(exchange) {
            if channel.is_open() {
                return Ok(channel.clone());
            }
            debug!(exchange = exchange, "registered channel is closed, replacing it");
        }

        let channel = self.connections.open_channel().await?;
        channels.insert(exchange.to_owned(), channel.clone());

        Ok(channel)
    }

    /// Records `channel` for `exchange`, returning the entry it replaced.
    pub async fn register(&self, exchange: &str, channel: SharedChannel) -> Option<SharedChannel> {
        debug!(exchange = exchange, "registering channel");
        self.channels
            .lock()
            .await
            .insert(exchange.to_owned(), channel)
    }

    pub async fn get(&self, exchange: &str) -> Option<SharedChannel> {
        self.channels.lock().await.get(exchange).cloned()
    }

    pub async fn remove(&self, exchange: &str) -> Option<SharedChannel> {
        self.channels.lock().await.remove(exchange)
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    fn registry(broker: &MemoryBroker) -> ChannelRegistry {
        ChannelRegistry::new(Arc::new(ConnectionManager::new(
            "memory://",
            Arc::new(broker.connector()),
        )))
    }

    #[tokio::test]
    async fn open_channel_is_reused() {
        let broker = MemoryBroker::new();
        let registry = registry(&broker);

        let first = registry.get_or_create_channel("ex").await.unwrap();
        let second = registry.get_or_create_channel("ex").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.channels_opened(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closed_channel_is_replaced() {
        let broker = MemoryBroker::new();
        let registry = registry(&broker);

        let first = registry.get_or_create_channel("ex").await.unwrap();
        first.close().await.unwrap();
        let second = registry.get_or_create_channel("ex").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_open());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn register_overwrites_the_entry() {
        let broker = MemoryBroker::new();
        let registry = registry(&broker);
        let first = registry.get_or_create_channel("ex").await.unwrap();
        let other = registry.connections.open_channel().await.unwrap();

        let replaced = registry.register("ex", other.clone()).await.unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.get("ex").await.unwrap(), &other));
        assert!(registry.get("missing").await.is_none());
        assert!(registry.remove("ex").await.is_some());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unavailable_broker_leaves_no_entry() {
        let broker = MemoryBroker::new();
        broker.set_available(false);
        let registry = registry(&broker);

        assert!(registry.get_or_create_channel("ex").await.is_err());
        assert!(registry.is_empty().await);
    }
}
