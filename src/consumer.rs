// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Consumption
//!
//! Processing of a single delivery: open a consumer span from the propagated
//! trace context, run the handler and, for manually acknowledged deliveries,
//! settle the message according to the outcome.

use crate::{
    handler::{ConsumerHandler, Disposition, HandlerError},
    transport::{AckMode, Delivery},
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::borrow::Cow;
use tracing::{debug, error};

/// Runs `handler` for `delivery` and returns its outcome.
///
/// Handler failures never propagate further than this: they are logged and
/// recorded on the span, and in [`AckMode::Manual`] the delivery is nacked
/// with the disposition the handler asked for. Ack/nack failures are logged
/// only; the broker redelivers unsettled messages once the channel closes.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: &Delivery,
    handler: &dyn ConsumerHandler,
    ack_mode: AckMode,
) -> Result<(), HandlerError> {
    let (ctx, mut span) = crate::otel::new_span(&delivery.headers, tracer, queue);

    debug!(
        "received: {} - exchange: {}",
        delivery.routing_key, delivery.exchange,
    );

    let result = handler.exec(&ctx, delivery).await;

    match &result {
        Ok(()) => {
            debug!("message successfully processed");
            span.set_status(Status::Ok);

            if ack_mode == AckMode::Manual {
                if let Err(err) = delivery.ack().await {
                    error!(error = err.to_string(), "error whiling ack msg");
                    span.record_error(&err);
                }
            }
        }
        Err(err) => {
            error!(
                error = err.to_string(),
                queue = queue,
                "error processing message"
            );
            span.record_error(err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });

            if ack_mode == AckMode::Manual {
                let requeue = err.disposition() == Disposition::Requeue;
                if let Err(nack_err) = delivery.nack(requeue).await {
                    error!(error = nack_err.to_string(), "error whiling nack msg");
                    span.record_error(&nack_err);
                }
            }
        }
    }

    span.end();
    result
}
