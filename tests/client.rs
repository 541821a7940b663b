// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use rabbitmq_client::{
    memory::MemoryBroker, AckMode, ConsumerHandler, ConsumerOptions, Delivery, HandlerError,
    RabbitMQClient,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Notification {
    id: String,
    payload: String,
}

fn client(broker: &MemoryBroker) -> RabbitMQClient {
    RabbitMQClient::with_connector("memory://", Arc::new(broker.connector()))
}

fn forwarding(tx: mpsc::UnboundedSender<Delivery>) -> Arc<dyn ConsumerHandler> {
    Arc::new(move |delivery: &Delivery| -> Result<(), HandlerError> {
        tx.send(delivery.clone())
            .map_err(|_| HandlerError::new("receiver dropped"))
    })
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no delivery in time")
        .expect("handler dropped")
}

async fn wait_for_consumer(broker: &MemoryBroker, queue: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.consumer_count(queue) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consumer never attached");
}

#[tokio::test]
async fn json_round_trip() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let handle = client.spawn_consumer(
        "backend.notifications",
        "notifications.worker",
        ConsumerOptions::default(),
        forwarding(tx),
        shutdown.clone(),
    );
    wait_for_consumer(&broker, "notifications.worker").await;

    let sent = Notification {
        id: "42".to_owned(),
        payload: "hello".to_owned(),
    };
    client
        .send_json_with_key("backend.notifications", &sent, "#")
        .await
        .unwrap();
    client
        .send_json_with_key("backend.notifications", &sent, "user.created")
        .await
        .unwrap();

    let delivery = next(&mut rx).await;
    assert_eq!(delivery.json::<Notification>().unwrap(), sent);
    assert_eq!(delivery.routing_key, "#");
    assert_eq!(delivery.content_type.as_deref(), Some("application/json"));

    let delivery = next(&mut rx).await;
    assert_eq!(delivery.json::<Notification>().unwrap(), sent);
    assert_eq!(delivery.routing_key, "user.created");

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn routing_key_selects_deliveries() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let handle = client.spawn_consumer(
        "orders",
        "orders.created.worker",
        ConsumerOptions::default().routing_key("orders.created"),
        forwarding(tx),
        shutdown.clone(),
    );
    wait_for_consumer(&broker, "orders.created.worker").await;

    client
        .send_with_key("orders", &"deleted", "orders.deleted")
        .await
        .unwrap();
    client
        .send_with_key("orders", &"created", "orders.created")
        .await
        .unwrap();

    let delivery = next(&mut rx).await;
    assert_eq!(delivery.json::<String>().unwrap(), "created");
    assert!(rx.try_recv().is_err());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn publishing_recovers_after_connection_loss() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    client.declare_exchange_and_queue("ex", "q").await;
    client.send("ex", &"before").await.unwrap();

    broker.drop_connections();
    assert!(!client.connections().is_connected().await);

    client.send("ex", &"after").await.unwrap();

    assert_eq!(broker.dial_count(), 2);
    assert_eq!(broker.queue_depth("q"), 2);
    assert!(client.connections().is_connected().await);
}

#[tokio::test]
async fn manual_ack_requeues_failed_deliveries() {
    let broker = MemoryBroker::new();
    let client = client(&broker);
    let attempts = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();

    let seen = attempts.clone();
    let handler = Arc::new(move |delivery: &Delivery| -> Result<(), HandlerError> {
        seen.fetch_add(1, Ordering::SeqCst);
        if !delivery.redelivered {
            return Err(HandlerError::new("not yet").requeue());
        }
        tx.send(delivery.clone())
            .map_err(|_| HandlerError::new("receiver dropped"))
    });

    let handle = client.spawn_consumer(
        "jobs",
        "jobs.worker",
        ConsumerOptions::default().ack_mode(AckMode::Manual),
        handler,
        shutdown.clone(),
    );
    wait_for_consumer(&broker, "jobs.worker").await;

    client.send_with_key("jobs", &"job", "jobs.run").await.unwrap();

    let delivery = next(&mut rx).await;
    assert!(delivery.redelivered);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    shutdown.cancel();
    handle.await.unwrap();
    assert_eq!(broker.unacked_count(), 0);
}
