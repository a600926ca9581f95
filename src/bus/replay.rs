//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The replay/retry queue: a dead-lettering queue that redelivers to a
//! target worker queue once its per-message TTL expires.

use anyhow::Result;
use lapin::types::{AMQPValue, FieldTable, LongString};

use crate::bus::Queue;
use crate::config::BusConfig;

const REPLAY_QUEUE_NAME: &str = "replay";

/// `routing_key` here is the target worker queue the replay queue dead-letters
/// to after TTL expiry (spec §4.4: "target worker queue, default: local
/// hostname"), not the replay queue's own binding key.
fn replay_queue_args(config: &BusConfig, target_worker_routing_key: &str) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongLongInt(*config.replay_ttl_ms() as i64),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(LongString::from(config.exchange().as_str())),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(LongString::from(target_worker_routing_key)),
    );
    args
}

pub fn replay_queue(config: &BusConfig, target_worker_routing_key: &str) -> Queue {
    Queue::new(config, REPLAY_QUEUE_NAME, REPLAY_QUEUE_NAME)
        .with_args(replay_queue_args(config, target_worker_routing_key))
}

/// "Create" the replay queue: declare it with its TTL/DLX/DLK arguments and
/// immediately drain whatever stale messages are already on it. A fresh
/// declare leaves nothing to drain, so this is a no-op in that case.
pub async fn create_and_clear(config: &BusConfig, routing_key: &str) -> Result<usize> {
    replay_queue(config, routing_key).clear().await
}
