// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! An in-process implementation of the transport traits with RabbitMQ routing
//! semantics: topic/direct/fanout exchanges, durable declaration conflicts,
//! round-robin delivery to consumers and channel closure on channel-level
//! errors. Used by the test suite and for running services without a broker.
//!
//! Headers exchanges route every message to every bound queue; header
//! matching is not modelled.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
    transport::{
        AckMode, Acker, BrokerChannel, BrokerConnection, Connector, Delivery, DeliveryStream,
        OutboundMessage, SharedChannel, SharedConnection,
    },
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Whether `key` matches the topic binding `pattern`.
///
/// Words are separated by `.`; `*` matches exactly one word and `#` matches
/// zero or more words.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    content_type: String,
    message_id: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    redelivered: bool,
}

struct ConsumerSlot {
    channel: u64,
    ack_mode: AckMode,
    tx: mpsc::UnboundedSender<Result<Delivery, AmqpError>>,
}

struct QueueState {
    def: QueueDefinition,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
}

struct ChannelSlot {
    connection: u64,
    open: Arc<AtomicBool>,
}

/// A manual-mode delivery awaiting ack or nack.
struct Unacked {
    channel: u64,
    queue: String,
    message: StoredMessage,
}

struct BrokerState {
    available: bool,
    fail_consume: bool,
    next_id: u64,
    dials: usize,
    channels_opened: usize,
    channels_closed: usize,
    unacked: HashMap<u64, Unacked>,
    exchanges: HashMap<String, ExchangeDefinition>,
    queues: HashMap<String, QueueState>,
    bindings: HashSet<QueueBinding>,
    connections: HashMap<u64, Arc<AtomicBool>>,
    channels: HashMap<u64, ChannelSlot>,
}

impl Default for BrokerState {
    fn default() -> Self {
        BrokerState {
            available: true,
            fail_consume: false,
            next_id: 1,
            dials: 0,
            channels_opened: 0,
            channels_closed: 0,
            unacked: HashMap::new(),
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            bindings: HashSet::new(),
            connections: HashMap::new(),
            channels: HashMap::new(),
        }
    }
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn route(&self, msg: &StoredMessage) -> Vec<String> {
        if msg.exchange.is_empty() {
            if self.queues.contains_key(&msg.routing_key) {
                return vec![msg.routing_key.clone()];
            }
            return vec![];
        }

        let Some(exchange) = self.exchanges.get(&msg.exchange) else {
            return vec![];
        };

        let targets: HashSet<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange_name == msg.exchange)
            .filter(|b| match exchange.kind {
                ExchangeKind::Topic => topic_matches(&b.routing_key, &msg.routing_key),
                ExchangeKind::Direct => b.routing_key == msg.routing_key,
                ExchangeKind::Fanout | ExchangeKind::Headers => true,
            })
            .map(|b| b.queue_name.clone())
            .collect();

        targets.into_iter().collect()
    }
}

/// In-process broker shared by every connection dialed through its connector.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> MemoryBroker {
        MemoryBroker::default()
    }

    /// A connector dialing this broker.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes channel `id`, detaching its consumers and requeueing the
    /// deliveries it left unsettled.
    fn close_channel(&self, state: &mut BrokerState, id: u64) {
        if let Some(slot) = state.channels.remove(&id) {
            slot.open.store(false, Ordering::SeqCst);
            state.channels_closed += 1;
        }
        for queue in state.queues.values_mut() {
            queue.consumers.retain(|c| c.channel != id);
        }

        let mut tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, pending)| pending.channel == id)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        for tag in tags {
            if let Some(pending) = state.unacked.remove(&tag) {
                let mut msg = pending.message;
                msg.redelivered = true;
                self.deliver(state, &pending.queue, msg);
            }
        }
    }

    /// Makes the broker refuse (or accept again) new connections.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Makes every `basic.consume` fail while set.
    pub fn set_fail_consume(&self, fail: bool) {
        self.lock().fail_consume = fail;
    }

    /// Closes every connection and its channels, ending all delivery streams.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        warn!("dropping all connections");

        let channels: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, slot)| state.connections.contains_key(&slot.connection))
            .map(|(id, _)| *id)
            .collect();
        for id in channels {
            self.close_channel(&mut state, id);
        }
        for (_, open) in state.connections.drain() {
            open.store(false, Ordering::SeqCst);
        }
    }

    /// Closes the channels of every consumer attached to `queue`.
    pub fn close_consumers(&self, queue: &str) {
        let mut state = self.lock();
        let channels: Vec<u64> = match state.queues.get(queue) {
            Some(q) => q.consumers.iter().map(|c| c.channel).collect(),
            None => return,
        };
        for id in channels {
            self.close_channel(&mut state, id);
        }
    }

    /// Deletes a queue together with its bindings and consumers.
    pub fn delete_queue(&self, queue: &str) {
        let mut state = self.lock();
        if let Some(q) = state.queues.remove(queue) {
            let channels: Vec<u64> = q.consumers.iter().map(|c| c.channel).collect();
            for id in channels {
                self.close_channel(&mut state, id);
            }
        }
        state.bindings.retain(|b| b.queue_name != queue);
    }

    pub fn dial_count(&self) -> usize {
        self.lock().dials
    }

    pub fn exchange(&self, name: &str) -> Option<ExchangeDefinition> {
        self.lock().exchanges.get(name).cloned()
    }

    pub fn exchange_count(&self) -> usize {
        self.lock().exchanges.len()
    }

    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    pub fn binding_count(&self) -> usize {
        self.lock().bindings.len()
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or_default()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or_default()
    }

    pub fn channels_opened(&self) -> usize {
        self.lock().channels_opened
    }

    pub fn channels_closed(&self) -> usize {
        self.lock().channels_closed
    }

    pub fn open_channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    /// Deliveries handed out in manual-ack mode and not yet settled.
    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    fn deliver(&self, state: &mut BrokerState, queue: &str, msg: StoredMessage) {
        loop {
            let tag = state.next_id();
            let Some(q) = state.queues.get_mut(queue) else {
                return;
            };
            if q.consumers.is_empty() {
                q.ready.push_back(msg);
                return;
            }

            let idx = q.next_consumer % q.consumers.len();
            q.next_consumer = q.next_consumer.wrapping_add(1);
            let ack_mode = q.consumers[idx].ack_mode;
            let channel = q.consumers[idx].channel;

            let mut delivery = Delivery {
                body: msg.body.clone(),
                exchange: msg.exchange.clone(),
                routing_key: msg.routing_key.clone(),
                content_type: Some(msg.content_type.clone()),
                message_id: Some(msg.message_id.clone()),
                headers: msg.headers.clone(),
                redelivered: msg.redelivered,
                acker: None,
            };
            if ack_mode == AckMode::Manual {
                delivery = delivery.with_acker(Arc::new(MemoryAcker {
                    broker: self.clone(),
                    tag,
                }));
            }

            match q.consumers[idx].tx.send(Ok(delivery)) {
                Ok(()) => {
                    if ack_mode == AckMode::Manual {
                        state.unacked.insert(
                            tag,
                            Unacked {
                                channel,
                                queue: queue.to_owned(),
                                message: msg,
                            },
                        );
                    }
                    return;
                }
                Err(_) => {
                    q.consumers.remove(idx);
                }
            }
        }
    }
}

/// Dials a [`MemoryBroker`].
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn dial(&self, uri: &str) -> Result<SharedConnection, AmqpError> {
        let mut state = self.broker.lock();
        state.dials += 1;

        if !state.available {
            warn!(uri = uri, "broker unavailable");
            return Err(AmqpError::ConnectionError("broker unavailable".to_owned()));
        }

        let id = state.next_id();
        let open = Arc::new(AtomicBool::new(true));
        state.connections.insert(id, open.clone());
        debug!(connection = id, "memory connection opened");

        Ok(Arc::new(MemoryConnection {
            id,
            open,
            broker: self.broker.clone(),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    open: Arc<AtomicBool>,
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn create_channel(&self) -> Result<SharedChannel, AmqpError> {
        if !self.is_open() {
            return Err(AmqpError::ChannelError("connection is closed".to_owned()));
        }

        let mut state = self.broker.lock();
        let id = state.next_id();
        let open = Arc::new(AtomicBool::new(true));
        state.channels.insert(
            id,
            ChannelSlot {
                connection: self.id,
                open: open.clone(),
            },
        );
        state.channels_opened += 1;

        Ok(Arc::new(MemoryChannel {
            id,
            connection_open: self.open.clone(),
            open,
            broker: self.broker.clone(),
        }))
    }
}

struct MemoryChannel {
    id: u64,
    connection_open: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    broker: MemoryBroker,
}

impl MemoryChannel {
    fn usable(&self) -> Result<(), AmqpError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(AmqpError::ChannelError(format!(
                "channel {} is closed",
                self.id
            )))
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.usable()?;
        let mut state = self.broker.lock();

        match state.exchanges.get(&def.name) {
            Some(existing) if !existing.is_compatible_with(def) => {
                let reason = format!(
                    "exchange `{}` exists as {} durable={}",
                    def.name, existing.kind, existing.durable
                );
                self.broker.close_channel(&mut state, self.id);
                Err(AmqpError::TopologyConflict(reason))
            }
            Some(_) => Ok(()),
            None if def.passive => {
                self.broker.close_channel(&mut state, self.id);
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            None => {
                state.exchanges.insert(def.name.clone(), def.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.usable()?;
        let mut state = self.broker.lock();

        match state.queues.get(&def.name) {
            Some(existing) if !existing.def.is_compatible_with(def) => {
                self.broker.close_channel(&mut state, self.id);
                Err(AmqpError::TopologyConflict(format!(
                    "queue `{}` exists with different arguments",
                    def.name
                )))
            }
            Some(_) => Ok(()),
            None if def.passive => {
                self.broker.close_channel(&mut state, self.id);
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            None => {
                state.queues.insert(
                    def.name.clone(),
                    QueueState {
                        def: def.clone(),
                        ready: VecDeque::new(),
                        consumers: vec![],
                        next_consumer: 0,
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.usable()?;
        let mut state = self.broker.lock();

        if !state.exchanges.contains_key(&binding.exchange_name)
            || !state.queues.contains_key(&binding.queue_name)
        {
            self.broker.close_channel(&mut state, self.id);
            return Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ));
        }

        state.bindings.insert(binding.clone());
        Ok(())
    }

    async fn publish(&self, msg: &OutboundMessage) -> Result<(), AmqpError> {
        self.usable()?;
        let mut state = self.broker.lock();

        if !msg.exchange.is_empty() && !state.exchanges.contains_key(&msg.exchange) {
            self.broker.close_channel(&mut state, self.id);
            return Err(AmqpError::PublishingError(format!(
                "no exchange `{}`",
                msg.exchange
            )));
        }

        let stored = StoredMessage {
            exchange: msg.exchange.clone(),
            routing_key: msg.routing_key.clone(),
            content_type: msg.content_type.clone(),
            message_id: msg.message_id.clone(),
            headers: msg.headers.clone(),
            body: msg.body.clone(),
            redelivered: false,
        };

        let targets = state.route(&stored);
        if targets.is_empty() {
            debug!(
                exchange = msg.exchange.as_str(),
                key = msg.routing_key.as_str(),
                "message unroutable, dropped"
            );
        }
        for queue in targets {
            self.broker.deliver(&mut state, &queue, stored.clone());
        }

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_mode: AckMode,
    ) -> Result<DeliveryStream, AmqpError> {
        self.usable()?;
        let mut state = self.broker.lock();

        if state.fail_consume {
            return Err(AmqpError::ChannelError("consume refused".to_owned()));
        }
        if !state.queues.contains_key(queue) {
            self.broker.close_channel(&mut state, self.id);
            return Err(AmqpError::ChannelError(format!("no queue `{queue}`")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let backlog: Vec<StoredMessage> = match state.queues.get_mut(queue) {
            Some(q) => {
                q.consumers.push(ConsumerSlot {
                    channel: self.id,
                    ack_mode,
                    tx,
                });
                q.ready.drain(..).collect()
            }
            None => vec![],
        };
        debug!(queue = queue, tag = consumer_tag, "consumer attached");

        for msg in backlog {
            self.broker.deliver(&mut state, queue, msg);
        }

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.broker.lock();
        self.broker.close_channel(&mut state, self.id);
        Ok(())
    }
}

/// Settles one delivery. Fails once the delivery was settled or its channel
/// closed, as the broker no longer knows the delivery tag.
struct MemoryAcker {
    broker: MemoryBroker,
    tag: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        match self.broker.lock().unacked.remove(&self.tag) {
            Some(_) => Ok(()),
            None => Err(AmqpError::AckMessageError),
        }
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        let mut state = self.broker.lock();
        let Some(pending) = state.unacked.remove(&self.tag) else {
            return Err(AmqpError::NackMessageError);
        };

        if requeue {
            let mut msg = pending.message;
            msg.redelivered = true;
            self.broker.deliver(&mut state, &pending.queue, msg);
        }
        Ok(())
    }
}
