//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::schema::tasks;
use crate::status::Status;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tasks)]
pub struct TaskRow {
    pub id: i32,
    pub run_date: NaiveDate,
    pub name: String,
    pub command: String,
    pub trigger: String,
    pub parameters: Value,
    pub log: Option<String>,
    pub status: String,
    pub time_stamp: DateTime<Utc>,
}

impl TaskRow {
    pub fn status(&self) -> Option<Status> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow<'a> {
    pub run_date: NaiveDate,
    pub name: &'a str,
    pub command: &'a str,
    pub trigger: &'a str,
    pub parameters: Value,
    pub log: Option<&'a str>,
    pub status: &'a str,
    pub time_stamp: DateTime<Utc>,
}

/// Optional filters over `tasks`, every field an independent `AND` clause
/// applied only when present.
#[derive(Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option)))]
pub struct TaskQueryFilter {
    pub run_date: Option<NaiveDate>,
    pub name: Option<String>,
    pub command: Option<String>,
    pub trigger: Option<String>,
    pub parameters: Option<Value>,
    pub log: Option<String>,
    pub status: Option<String>,
    pub start_datetime: Option<DateTime<Utc>>,
    pub end_datetime: Option<DateTime<Utc>>,
}
