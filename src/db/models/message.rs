//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use crate::message::Envelope;
use crate::schema::messages;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: i32,
    pub exchange: String,
    pub queue: String,
    pub message: String,
    pub time_stamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessageRow<'a> {
    pub exchange: &'a str,
    pub queue: &'a str,
    pub message: &'a str,
    pub time_stamp: DateTime<Utc>,
    pub data: &'a Value,
}

impl<'a> NewMessageRow<'a> {
    pub fn from_envelope(envelope: &'a Envelope, time_stamp: DateTime<Utc>) -> Self {
        NewMessageRow {
            exchange: &envelope.exchange,
            queue: &envelope.queue,
            message: &envelope.message,
            time_stamp,
            data: &envelope.data,
        }
    }
}
