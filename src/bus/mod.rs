//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Binds the ingress/replay/worker queues to a real AMQP broker via `lapin`.

pub mod replay;

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::message::Envelope;

/// One queue bound to one routing key on the configured exchange.
pub struct Queue {
    amqp_uri: String,
    exchange: String,
    queue_name: String,
    routing_key: String,
    queue_args: FieldTable,
}

impl Queue {
    pub fn new(config: &BusConfig, queue_name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Queue {
            amqp_uri: config.amqp_uri(),
            exchange: config.exchange().clone(),
            queue_name: queue_name.into(),
            routing_key: routing_key.into(),
            queue_args: FieldTable::default(),
        }
    }

    pub fn with_args(mut self, args: FieldTable) -> Self {
        self.queue_args = args;
        self
    }

    async fn connect(&self) -> Result<Connection> {
        Connection::connect(&self.amqp_uri, ConnectionProperties::default())
            .await
            .with_context(|| format!("Connecting to AMQP broker for queue {}", self.queue_name))
    }

    async fn declare_and_bind(&self, channel: &Channel) -> Result<()> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Declaring exchange {}", self.exchange))?;

        channel
            .queue_declare(&self.queue_name, QueueDeclareOptions::default(), self.queue_args.clone())
            .await
            .with_context(|| format!("Declaring queue {}", self.queue_name))?;

        channel
            .queue_bind(
                &self.queue_name,
                &self.exchange,
                &self.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Binding queue {} to routing key {}", self.queue_name, self.routing_key))?;

        Ok(())
    }

    async fn consumer(&self) -> Result<(Connection, Consumer)> {
        let connection = self.connect().await?;
        let channel = connection.create_channel().await.context("Opening AMQP channel")?;
        self.declare_and_bind(&channel).await?;

        let consumer = channel
            .basic_consume(
                &self.queue_name,
                "angora",
                BasicConsumeOptions { no_ack: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Starting consumer on queue {}", self.queue_name))?;

        Ok((connection, consumer))
    }

    /// Consume deliveries until SIGINT, dispatching each to `callback`. The
    /// current in-flight callback is allowed to finish before the consumer
    /// and connection are closed.
    pub async fn listen<F, Fut>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(Envelope) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let (connection, mut consumer) = self.consumer().await?;
        info!(queue = %self.queue_name, "listening");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(queue = %self.queue_name, "received interrupt, shutting down");
                    break;
                }
                next = consumer.next() => {
                    let Some(delivery) = next else { break };
                    let delivery = delivery.context("Receiving AMQP delivery")?;
                    match Envelope::from_json_bytes(&delivery.data) {
                        Ok(envelope) => {
                            if let Err(e) = callback(envelope).await {
                                tracing::error!(error = %e, "callback failed for delivery");
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "could not parse delivery as an envelope"),
                    }
                }
            }
        }

        connection.close(200, "shutting down").await.ok();
        Ok(())
    }

    /// Drain whatever is currently on the queue. An idle queue (nothing
    /// delivered within 2 seconds) is not an error.
    pub async fn clear(&self) -> Result<usize> {
        let (connection, mut consumer) = self.consumer().await?;
        let mut drained = 0usize;

        loop {
            match tokio::time::timeout(Duration::from_secs(2), consumer.next()).await {
                Ok(Some(delivery)) => {
                    delivery.context("Receiving AMQP delivery while draining")?;
                    drained += 1;
                }
                Ok(None) | Err(_) => break,
            }
        }

        debug!(queue = %self.queue_name, drained, "queue drained");
        connection.close(200, "cleared").await.ok();
        Ok(drained)
    }
}

/// A long-lived channel reused by the router/runner steady-state publish
/// path, instead of opening a fresh connection per message.
pub struct BusHandle {
    exchange: String,
    channel: Channel,
    _connection: Connection,
}

impl BusHandle {
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
            .await
            .context("Connecting to AMQP broker")?;
        let channel = connection.create_channel().await.context("Opening AMQP channel")?;
        channel
            .exchange_declare(
                config.exchange(),
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .context("Declaring exchange")?;

        Ok(BusHandle { exchange: config.exchange().clone(), channel, _connection: connection })
    }

    pub async fn publish(&self, envelope: &Envelope, routing_key: &str) -> Result<()> {
        let payload = envelope.to_json_bytes()?;
        self.channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .context("Publishing message")?
            .await
            .context("Waiting for publish confirmation")?;
        Ok(())
    }
}

/// One-shot publish: open a connection, publish, close. Mirrors the
/// original client's per-call `with Connection(...)` block; used by the CLI
/// `send` helper and the HTTP `/send` endpoint, never by the router/runner
/// hot loops.
pub async fn publish_once(config: &BusConfig, envelope: &Envelope, routing_key: &str) -> Result<()> {
    let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
        .await
        .context("Connecting to AMQP broker for one-shot publish")?;
    let channel = connection.create_channel().await.context("Opening AMQP channel")?;
    channel
        .exchange_declare(
            config.exchange(),
            ExchangeKind::Direct,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Declaring exchange")?;

    let payload = envelope.to_json_bytes()?;
    channel
        .basic_publish(
            config.exchange(),
            routing_key,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default(),
        )
        .await
        .context("Publishing message")?
        .await
        .context("Waiting for publish confirmation")?;

    connection.close(200, "one-shot publish complete").await.ok();
    Ok(())
}
