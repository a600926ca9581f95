//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The Trigger Router: consumes the ingress queue, archives every delivery,
//! and fans each one out to every task whose triggers match the incoming
//! message label.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::bus::BusHandle;
use crate::catalog::Catalog;
use crate::config::Configuration;
use crate::db::{self, Pool};
use crate::message::Envelope;

/// The envelope's `queue` field on dispatch: doubles as the runner's initial
/// lifecycle status (see `original_source/listeners/start.py`, where
/// `status = payload["queue"]`), so this must stay the literal word "start".
const START_QUEUE_FIELD: &str = "start";

pub struct Dispatcher {
    catalog: Arc<Catalog>,
    pool: Pool,
    bus: BusHandle,
    exchange: String,
    /// Routing key this dispatcher listens on, used to identify this
    /// router in logs.
    ingress_routing_key: String,
    /// Routing key used for dispatch publishes: the worker queue for the
    /// current host, local hostname by default (spec §4.2).
    worker_routing_key: String,
}

impl Dispatcher {
    pub async fn new(config: &Configuration, catalog: Arc<Catalog>, pool: Pool) -> Result<Self> {
        let bus = BusHandle::connect(config.bus()).await.context("Connecting router's publish channel")?;
        let worker_routing_key = crate::config::local_worker_queue_name()?;
        Ok(Dispatcher {
            catalog,
            pool,
            bus,
            exchange: config.bus().exchange().clone(),
            ingress_routing_key: config.bus().ingress_queue().clone(),
            worker_routing_key,
        })
    }

    /// Archive, then dispatch to every task whose `triggers` contain the
    /// incoming message label. Both steps happen for every delivery; a
    /// dispatch failure for one matched task does not stop the others.
    pub async fn handle(&self, envelope: Envelope) -> Result<()> {
        self.archive(&envelope).await?;

        let matched = self.catalog.get_tasks_by_trigger(&envelope.message);
        if matched.is_empty() {
            warn!(message = %envelope.message, ingress = %self.ingress_routing_key, "no tasks trigger on this message");
            return Ok(());
        }

        for mut task in matched {
            task.overlay_parameters(&envelope.data);
            let payload = match task.as_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(task = %task.name(), error = %e, "could not serialize task for dispatch");
                    continue;
                }
            };

            let outgoing = Envelope::new(self.exchange.clone(), START_QUEUE_FIELD, envelope.message.clone())
                .with_data(payload)
                .with_time_stamp(Utc::now());

            if let Err(e) = self.bus.publish(&outgoing, &self.worker_routing_key).await {
                tracing::error!(task = %task.name(), error = %e, "failed to dispatch task");
            } else {
                info!(task = %task.name(), message = %envelope.message, "dispatched");
            }
        }

        Ok(())
    }

    async fn archive(&self, envelope: &Envelope) -> Result<()> {
        let pool = self.pool.clone();
        let envelope = envelope.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().context("Checking out a database connection")?;
            db::insert_message(&mut connection, &envelope, Utc::now()).map(|_| ())
        })
        .await
        .context("Archiving delivery join error")?
    }
}
