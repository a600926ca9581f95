//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! The message envelope carried over the bus: a fixed key set, validated
//! at construction rather than left as an open map.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable once built. The wire shape:
/// `{"exchange": str, "queue": str, "message": str, "time_stamp": str|null, "data": any}`.
///
/// `routing_key` is not part of the JSON payload — `message` names the
/// routing semantic, while `routing_key` is the bus-level delivery key, and
/// it travels alongside the envelope as a publish argument, not inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub exchange: String,
    pub queue: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>, message: impl Into<String>) -> Self {
        Envelope {
            exchange: exchange.into(),
            queue: queue.into(),
            message: message.into(),
            time_stamp: None,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_time_stamp(mut self, time_stamp: DateTime<Utc>) -> Self {
        self.time_stamp = Some(time_stamp.to_rfc3339());
        self
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(anyhow::Error::from)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let env = Envelope::new("angora", "angora", "t1").with_data(serde_json::json!({"a": 1}));
        let bytes = env.to_json_bytes().unwrap();
        let back = Envelope::from_json_bytes(&bytes).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"{"exchange":"a","queue":"b","message":"c","data":null,"bogus":1}"#;
        assert!(Envelope::from_json_bytes(raw.as_bytes()).is_err());
    }
}
