//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

pub mod models;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde_json::Value;

use crate::message::Envelope;
use crate::status::Status;

use models::{MessageRow, NewMessageRow, NewTaskRow, TaskQueryFilter, TaskRow};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type PooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

pub fn build_pool(database_url: &str) -> anyhow::Result<Pool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .build(manager)
        .map_err(anyhow::Error::from)
}

pub fn run_pending_migrations(connection: &mut PgConnection) -> anyhow::Result<()> {
    connection
        .run_pending_migrations(MIGRATIONS)
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("Running pending migrations: {}", e))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Persist one delivery's envelope. Runs inside the same transaction as the
/// `insert_task` call the consumer makes for the same delivery, so a
/// downstream failure rolls both back together.
pub fn insert_message(
    connection: &mut PgConnection,
    envelope: &Envelope,
    time_stamp: DateTime<Utc>,
) -> anyhow::Result<MessageRow> {
    use crate::schema::messages::dsl;

    let new_row = NewMessageRow::from_envelope(envelope, time_stamp);
    diesel::insert_into(dsl::messages)
        .values(&new_row)
        .get_result(connection)
        .map_err(anyhow::Error::from)
}

#[allow(clippy::too_many_arguments)]
pub fn insert_task(
    connection: &mut PgConnection,
    name: &str,
    command: &str,
    trigger: &str,
    parameters: Value,
    log: Option<&str>,
    status: Status,
    time_stamp: DateTime<Utc>,
) -> anyhow::Result<TaskRow> {
    use crate::schema::tasks::dsl;

    let new_row = NewTaskRow {
        run_date: time_stamp.with_timezone(&Local).date_naive(),
        name,
        command,
        trigger,
        parameters,
        log,
        status: status.as_str(),
        time_stamp,
    };

    diesel::insert_into(dsl::tasks)
        .values(&new_row)
        .get_result(connection)
        .map_err(anyhow::Error::from)
}

/// Local civil midnight, converted through the local offset to the UTC
/// instant it represents, never reinterpreted as if it already were UTC
/// (spec §9: never mix local and UTC without an explicit conversion layer).
fn start_of_today_utc() -> DateTime<Utc> {
    let local_midnight = today().and_hms_opt(0, 0, 0).expect("midnight is a valid time");
    Local
        .from_local_datetime(&local_midnight)
        .single()
        .unwrap_or_else(Local::now)
        .with_timezone(&Utc)
}

pub fn get_messages_today(connection: &mut PgConnection) -> anyhow::Result<Vec<MessageRow>> {
    use crate::schema::messages::dsl;

    let start = start_of_today_utc();
    dsl::messages
        .filter(dsl::time_stamp.ge(start))
        .load(connection)
        .map_err(anyhow::Error::from)
}

pub fn get_tasks_today(connection: &mut PgConnection, status: Option<Status>) -> anyhow::Result<Vec<TaskRow>> {
    use crate::schema::tasks::dsl;

    let mut query = dsl::tasks.filter(dsl::run_date.eq(today())).into_boxed();
    if let Some(status) = status {
        query = query.filter(dsl::status.eq(status.as_str()));
    }
    query.load(connection).map_err(anyhow::Error::from)
}

/// Latest row per distinct `name` for today, optionally restricted to one
/// task name.
pub fn get_tasks_latest(connection: &mut PgConnection, name: Option<&str>) -> anyhow::Result<Vec<TaskRow>> {
    use crate::schema::tasks::dsl;

    let mut query = dsl::tasks
        .filter(dsl::run_date.eq(today()))
        .order((dsl::name.asc(), dsl::time_stamp.desc()))
        .into_boxed();
    if let Some(name) = name {
        query = query.filter(dsl::name.eq(name));
    }

    let rows: Vec<TaskRow> = query.load(connection)?;
    let mut latest_by_name = std::collections::BTreeMap::new();
    for row in rows {
        latest_by_name.entry(row.name.clone()).or_insert(row);
    }
    Ok(latest_by_name.into_values().collect())
}

/// Union of every filterable field named for task history lookups.
pub fn get_tasks(connection: &mut PgConnection, filter: &TaskQueryFilter) -> anyhow::Result<Vec<TaskRow>> {
    use crate::schema::tasks::dsl;

    let mut query = dsl::tasks.into_boxed();

    if let Some(run_date) = filter.run_date {
        query = query.filter(dsl::run_date.eq(run_date));
    }
    if let Some(name) = &filter.name {
        query = query.filter(dsl::name.eq(name.clone()));
    }
    if let Some(command) = &filter.command {
        query = query.filter(dsl::command.eq(command.clone()));
    }
    if let Some(trigger) = &filter.trigger {
        query = query.filter(dsl::trigger.eq(trigger.clone()));
    }
    if let Some(parameters) = &filter.parameters {
        query = query.filter(dsl::parameters.eq(parameters.clone()));
    }
    if let Some(log) = &filter.log {
        query = query.filter(dsl::log.eq(log.clone()));
    }
    if let Some(status) = &filter.status {
        query = query.filter(dsl::status.eq(status.clone()));
    }
    if let Some(start) = filter.start_datetime {
        query = query.filter(dsl::time_stamp.ge(start));
    }
    if let Some(end) = filter.end_datetime {
        query = query.filter(dsl::time_stamp.le(end));
    }

    query
        .order(dsl::time_stamp.asc())
        .load(connection)
        .map_err(anyhow::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_query_filter_builder_defaults_to_no_filters() {
        let filter = TaskQueryFilter::builder().build();
        assert!(filter.name.is_none());
        assert!(filter.run_date.is_none());
    }

    #[test]
    fn task_query_filter_builder_sets_named_fields() {
        let filter = TaskQueryFilter::builder().name("daily_report".to_string()).build();
        assert_eq!(filter.name.as_deref(), Some("daily_report"));
    }
}
