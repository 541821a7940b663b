// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Management
//!
//! The client keeps exactly one broker connection. `ConnectionManager` owns it,
//! checks its liveness before handing it out and replaces it when the broker
//! closed it. Replacement happens under the manager's lock, so consumers that
//! notice a dropped connection at the same time reconnect only once.

use crate::{
    errors::AmqpError,
    transport::{Connector, SharedChannel, SharedConnection},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub struct ConnectionManager {
    uri: String,
    connector: Arc<dyn Connector>,
    current: Mutex<Option<SharedConnection>>,
}

impl ConnectionManager {
    /// Creates a manager that dials `uri` lazily, on the first request for a
    /// connection.
    pub fn new(uri: &str, connector: Arc<dyn Connector>) -> ConnectionManager {
        ConnectionManager {
            uri: uri.to_owned(),
            connector,
            current: Mutex::new(None),
        }
    }

    /// Dials the broker and stores the new connection, replacing any previous
    /// one. A failed dial is returned to the caller and leaves no connection
    /// behind.
    pub async fn connect(&self) -> Result<SharedConnection, AmqpError> {
        let mut current = self.current.lock().await;
        self.dial(&mut current).await
    }

    /// Returns the held connection if it is open, reconnecting otherwise.
    pub async fn ensure_open(&self) -> Result<SharedConnection, AmqpError> {
        let mut current = self.current.lock().await;

        match current.as_ref() {
            Some(conn) if conn.is_open() => return Ok(conn.clone()),
            Some(_) => warn!("amqp connection is closed, reconnecting"),
            None => debug!("no amqp connection yet"),
        }

        self.dial(&mut current).await
    }

    /// Opens a new channel on the (possibly re-established) connection.
    pub async fn open_channel(&self) -> Result<SharedChannel, AmqpError> {
        let conn = self.ensure_open().await?;

        conn.create_channel().await.map_err(|err| {
            error!(error = err.to_string(), "failure to open a channel");
            err
        })
    }

    /// Whether the held connection is open. Never dials.
    pub async fn is_connected(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| conn.is_open())
    }

    async fn dial(
        &self,
        current: &mut Option<SharedConnection>,
    ) -> Result<SharedConnection, AmqpError> {
        debug!("dialing broker...");
        match self.connector.dial(&self.uri).await {
            Ok(conn) => {
                *current = Some(conn.clone());
                debug!("broker connection established");
                Ok(conn)
            }
            Err(err) => {
                *current = None;
                error!(error = err.to_string(), "can't connect to the broker");
                Err(err)
            }
        }
    }
}
