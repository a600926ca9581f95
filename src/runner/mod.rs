//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The Task Runner: consumes the worker queue, enforces the parent-success
//! gate, executes the task's command, and fans success out to `messages` or
//! failure out to the replay queue.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::bus::BusHandle;
use crate::catalog::Task;
use crate::config::Configuration;
use crate::db::{self, Pool};
use crate::message::Envelope;
use crate::status::Status;

const REPLAY_ROUTING_KEY: &str = "replay";

/// The envelope `queue` field a replayed delivery carries: set by
/// `enqueue_replay` and preserved verbatim through the replay queue's
/// dead-letter redelivery, so it is still present when the runner receives
/// the message again (see `original_source/listeners/start.py`, where
/// `status = payload["queue"]`).
const REPLAYED_QUEUE_FIELD: &str = "replay";

/// Whether a worker-queue delivery arrived via the normal dispatch path or
/// was redelivered by the replay queue's dead-letter routing. Derived from
/// the envelope's `queue` field, not from which physical queue the runner
/// happens to be consuming (fresh and replayed deliveries land on the same
/// per-host worker queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOrigin {
    Fresh,
    Replayed,
}

impl DeliveryOrigin {
    fn of(envelope: &Envelope) -> Self {
        if envelope.queue == REPLAYED_QUEUE_FIELD {
            DeliveryOrigin::Replayed
        } else {
            DeliveryOrigin::Fresh
        }
    }

    fn status(self) -> Status {
        match self {
            DeliveryOrigin::Fresh => Status::Start,
            DeliveryOrigin::Replayed => Status::Replay,
        }
    }
}

/// Runs matched tasks with bounded concurrency, reusing one pooled bus
/// connection and one database pool across invocations.
pub struct Runner {
    pool: Pool,
    bus: BusHandle,
    exchange: String,
    /// Routing key of the worker queue this runner consumes, used to
    /// identify this node in error logs.
    worker_routing_key: String,
    /// Routing key of the ingress queue: success fan-out (spec §4.3 step 7)
    /// republishes here so the Trigger Router, bound to this same key,
    /// picks the message back up.
    ingress_routing_key: String,
    semaphore: Arc<Semaphore>,
}

impl Runner {
    pub async fn new(config: &Configuration, pool: Pool, concurrency: usize, worker_routing_key: String) -> Result<Self> {
        let bus = BusHandle::connect(config.bus()).await.context("Connecting runner's publish channel")?;
        Ok(Runner {
            pool,
            bus,
            exchange: config.bus().exchange().clone(),
            worker_routing_key,
            ingress_routing_key: config.bus().ingress_queue().clone(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        })
    }

    /// Archive the delivery synchronously, then spawn the actual run once a
    /// concurrency slot is free. Spawning (rather than awaiting completion
    /// here) is what lets the bus consume loop move on to the next
    /// delivery while up to `concurrency` task invocations run at once.
    pub async fn handle(self: &Arc<Self>, envelope: Envelope) -> Result<()> {
        self.archive(&envelope).await?;

        let trigger = envelope.message.clone();
        let origin = DeliveryOrigin::of(&envelope);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = this.semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            if let Err(e) = run_one(
                this.pool.clone(),
                &this.bus,
                &this.exchange,
                &this.ingress_routing_key,
                envelope,
                trigger,
                origin,
            )
            .await
            {
                tracing::error!(error = %e, queue = %this.worker_routing_key, "task invocation failed");
            }
            drop(permit);
        });

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

async fn run_one(
    pool: Pool,
    bus: &BusHandle,
    exchange: &str,
    ingress_routing_key: &str,
    envelope: Envelope,
    trigger: String,
    origin: DeliveryOrigin,
) -> Result<()> {
    let mut task: Task = serde_json::from_value(envelope.data.clone())
        .context("Deserializing task from delivery payload")?;

    // Exactly one of {start, replay} is written before exactly one of
    // {success, fail} for this invocation (spec invariant 5).
    record_outcome(&pool, &task, &trigger, origin.status()).await?;

    if *task.parent_success() {
        if let Some(failure_reason) = parent_gate_failure(&pool, &task).await? {
            warn!(task = %task.name(), reason = %failure_reason, "parent success check failed");
            record_outcome(&pool, &task, &trigger, Status::Fail).await?;
            append_log_marker(&task, "PARENT SUCCESS CHECK FAILED").await.ok();
            return Ok(());
        }
    }

    let exit_status = execute(&task).await;

    match exit_status {
        Ok(true) => {
            record_outcome(&pool, &task, &trigger, Status::Success).await?;
            for message in task.messages().clone() {
                let outgoing = Envelope::new(exchange.to_string(), ingress_routing_key, message)
                    .with_data(serde_json::Value::Array(
                        task.parameters().iter().cloned().map(serde_json::Value::String).collect(),
                    ))
                    .with_time_stamp(Utc::now());
                if let Err(e) = bus.publish(&outgoing, ingress_routing_key).await {
                    tracing::error!(task = %task.name(), error = %e, "failed to publish success fan-out message");
                }
            }
            info!(task = %task.name(), status = %origin.status(), "task succeeded");
        }
        Ok(false) | Err(_) => {
            if let Err(e) = &exit_status {
                tracing::error!(task = %task.name(), error = %e, "task execution errored");
            }
            record_outcome(&pool, &task, &trigger, Status::Fail).await?;
            enqueue_replay(bus, exchange, &mut task, &trigger).await?;
        }
    }

    Ok(())
}

/// `None` means the gate passes. `Some(reason)` names the failing parent.
async fn parent_gate_failure(pool: &Pool, task: &Task) -> Result<Option<String>> {
    for parent in task.parents() {
        let pool = pool.clone();
        let parent_name = parent.clone();
        let latest = tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().context("Checking out a database connection")?;
            db::get_tasks_latest(&mut connection, Some(&parent_name))
        })
        .await
        .context("Parent status lookup join error")??;

        let status = latest.first().and_then(|row| row.status());
        if status != Some(Status::Success) {
            return Ok(Some(parent.clone()));
        }
    }
    Ok(None)
}

async fn execute(task: &Task) -> Result<bool> {
    let mut args = shell_words::split(task.command()).context("Tokenizing task command")?;
    if args.is_empty() {
        anyhow::bail!("Task '{}' has an empty command", task.name());
    }
    let program = args.remove(0);
    args.extend(task.parameters().iter().cloned());

    let mut command = Command::new(program);
    command.args(args);

    if let Some(log_path) = task.log() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
            .with_context(|| format!("Opening log file {}", log_path.display()))?;
        let stdio = file.into_std().await;
        command.stdout(Stdio::from(stdio.try_clone().context("Cloning log file handle")?));
        command.stderr(Stdio::from(stdio));
    } else {
        command.stdout(Stdio::null());
        command.stderr(Stdio::null());
    }

    let status = command.status().await.with_context(|| format!("Spawning task '{}'", task.name()))?;
    Ok(status.success())
}

async fn append_log_marker(task: &Task, marker: &str) -> Result<()> {
    let Some(log_path) = task.log() else { return Ok(()) };
    let mut file = OpenOptions::new().create(true).append(true).open(log_path).await?;
    file.write_all(format!("{}\n", marker).as_bytes()).await?;
    Ok(())
}

async fn record_outcome(pool: &Pool, task: &Task, trigger: &str, status: Status) -> Result<()> {
    let pool = pool.clone();
    let task_name = task.name().clone();
    let command = task.command().clone();
    let trigger = trigger.to_string();
    let parameters = serde_json::Value::Array(task.parameters().iter().cloned().map(serde_json::Value::String).collect());
    let log = task.log().as_ref().map(|p| p.display().to_string());

    tokio::task::spawn_blocking(move || {
        let mut connection = pool.get().context("Checking out a database connection")?;
        db::insert_task(
            &mut connection,
            &task_name,
            &command,
            &trigger,
            parameters,
            log.as_deref(),
            status,
            Utc::now(),
        )
        .map(|_| ())
    })
    .await
    .context("Recording task outcome join error")?
}

/// Publish the next replay hop carrying the pre-decremented counter, then
/// mutate this invocation's own (about-to-be-dropped) copy. `replay: None`
/// means unlimited retries and always republishes; `Some(0)` stops retrying.
async fn enqueue_replay(bus: &BusHandle, exchange: &str, task: &mut Task, trigger: &str) -> Result<()> {
    match *task.replay() {
        Some(0) => return Ok(()),
        Some(_) | None => {}
    }

    let next_replay = task.decrement_replay();
    let mut outgoing_task = task.clone();
    if let Some(next) = next_replay {
        outgoing_task.set_replay(Some(next));
    }

    let payload = outgoing_task.as_json()?;
    let outgoing = Envelope::new(exchange.to_string(), REPLAY_ROUTING_KEY, trigger.to_string())
        .with_data(payload)
        .with_time_stamp(Utc::now());

    bus.publish(&outgoing, REPLAY_ROUTING_KEY).await.context("Publishing replay message")?;
    task.set_replay(next_replay);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_origin_maps_to_expected_status() {
        assert_eq!(DeliveryOrigin::Fresh.status(), Status::Start);
        assert_eq!(DeliveryOrigin::Replayed.status(), Status::Replay);
    }

    #[test]
    fn delivery_origin_is_derived_from_envelope_queue_field() {
        let fresh = Envelope::new("angora", "start", "t1");
        let replayed = Envelope::new("angora", "replay", "t1");
        assert_eq!(DeliveryOrigin::of(&fresh), DeliveryOrigin::Fresh);
        assert_eq!(DeliveryOrigin::of(&replayed), DeliveryOrigin::Replayed);
    }
}
