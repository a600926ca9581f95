//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

mod api;
mod bus;
mod catalog;
mod cli;
mod config;
mod db;
mod message;
mod router;
mod runner;
mod schema;
mod status;
mod ui;

use std::io::IsTerminal;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::bus::replay;
use crate::bus::Queue;
use crate::cli::{Cli, Command, TasksAction, WebModule};
use crate::config::Configuration;
use crate::runner::Runner;

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let cli = Cli::parse();
    let config = Configuration::load(cli.config.as_deref())?;

    match cli.command {
        Command::Server => run_server(&config).await,
        Command::Client { queue_name } => run_client(&config, queue_name).await,
        Command::Replay { routing_key, ttl } => run_replay(&config, routing_key, ttl).await,
        Command::Initdb => run_initdb(&config).await,
        Command::Worker { concurrency, loglevel, logfile } => run_worker(&config, concurrency, loglevel, logfile).await,
        Command::Web { module, host, port, reload } => run_web(&config, module, host, port, reload).await,
        Command::Send { message, queue, routing_key, params } => run_send(&config, message, queue, routing_key, params).await,
        Command::Tasks { action } => run_tasks(&config, action).await,
        Command::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_tracing(loglevel: &str) {
    let filter = EnvFilter::try_new(loglevel).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stdout().is_terminal())
        .init();
}

async fn run_server(config: &Configuration) -> Result<()> {
    init_tracing("info");
    let pool = db::build_pool(config.database().url())?;
    let catalog = Arc::new(catalog::Catalog::load(config.catalog().pattern().clone())?);
    let dispatcher = Arc::new(router::Dispatcher::new(config, catalog, pool).await?);

    let queue = Queue::new(config.bus(), "angora", "angora");
    queue
        .listen(|envelope| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.handle(envelope).await }
        })
        .await
}

async fn run_client(config: &Configuration, queue_name: Option<String>) -> Result<()> {
    init_tracing("info");
    let queue_name = match queue_name {
        Some(name) => name,
        None => config::local_worker_queue_name()?,
    };

    let pool = db::build_pool(config.database().url())?;
    let runner = Arc::new(Runner::new(config, pool, 1, queue_name.clone()).await?);

    let queue = Queue::new(config.bus(), queue_name.clone(), queue_name);
    queue
        .listen(|envelope| {
            let runner = Arc::clone(&runner);
            async move { runner.handle(envelope).await }
        })
        .await
}

async fn run_replay(config: &Configuration, routing_key: Option<String>, ttl: Option<String>) -> Result<()> {
    init_tracing("info");
    let routing_key = match routing_key {
        Some(rk) => rk,
        None => config::local_worker_queue_name()?,
    };

    let mut bus_config = config.bus().clone();
    if let Some(ttl) = ttl {
        let duration = humantime::parse_duration(&ttl).context("Parsing --ttl")?;
        bus_config.set_replay_ttl_ms(duration.as_millis() as u64);
    }

    let drained = replay::create_and_clear(&bus_config, &routing_key).await?;
    println!("Replay queue declared; drained {} stale message(s)", drained);
    Ok(())
}

async fn run_initdb(config: &Configuration) -> Result<()> {
    use diesel::Connection;

    init_tracing("info");
    let mut connection = diesel::PgConnection::establish(config.database().url())
        .context("Connecting to Postgres to run migrations")?;
    db::run_pending_migrations(&mut connection)?;
    println!("Database initialized");
    Ok(())
}

async fn run_worker(config: &Configuration, concurrency: usize, loglevel: String, logfile: Option<std::path::PathBuf>) -> Result<()> {
    init_tracing(&loglevel);
    if let Some(logfile) = &logfile {
        tracing::info!(path = %logfile.display(), "worker logfile configured but stdout logging stays active");
    }

    let pool = db::build_pool(config.database().url())?;
    let queue_name = config::local_worker_queue_name()?;
    let runner = Arc::new(Runner::new(config, pool, concurrency, queue_name.clone()).await?);

    let queue = Queue::new(config.bus(), queue_name.clone(), queue_name);
    queue
        .listen(|envelope| {
            let runner = Arc::clone(&runner);
            async move { runner.handle(envelope).await }
        })
        .await
}

async fn run_web(config: &Configuration, module: WebModule, host: Option<String>, port: Option<u16>, _reload: bool) -> Result<()> {
    init_tracing("info");
    match module {
        WebModule::App => anyhow::bail!("`angora web app` (the dashboard) is not implemented in this core"),
        WebModule::Api => {}
    }

    let pool = db::build_pool(config.database().url())?;
    let catalog = Arc::new(catalog::Catalog::load(config.catalog().pattern().clone())?);
    let state = api::AppState { catalog, pool, config: Arc::new(config.clone()) };

    let mut http_config = config.http().clone();
    if let Some(host) = host {
        http_config.set_host(host);
    }
    if let Some(port) = port {
        http_config.set_port(port);
    }

    let addr = http_config.socket_addr()?;
    tracing::info!(%addr, "starting HTTP read API");
    let listener = tokio::net::TcpListener::bind(addr).await.context("Binding HTTP listener")?;
    axum::serve(listener, api::router(state)).await.context("Running HTTP server")
}

async fn run_tasks(config: &Configuration, action: TasksAction) -> Result<()> {
    let catalog = catalog::Catalog::load(config.catalog().pattern().clone())?;

    match action {
        TasksAction::List { csv } => {
            let mut tasks = catalog.iterate();
            tasks.sort_by(|a, b| a.name().cmp(b.name()));
            ui::tasks_table(&tasks, csv)
        }
        TasksAction::Children { name } => {
            let tree = catalog.get_child_tree(&name);
            ui::print_tree(&mut std::io::stdout(), &name, &tree)
        }
        TasksAction::Parents { name } => {
            let tree = catalog.get_parent_tree(&name);
            ui::print_tree(&mut std::io::stdout(), &name, &tree)
        }
        TasksAction::History { name, run_date, csv } => {
            let pool = db::build_pool(config.database().url())?;
            let mut connection = pool.get().context("Checking out a database connection")?;

            let mut builder = db::models::TaskQueryFilter::builder();
            if let Some(name) = name {
                builder = builder.name(name);
            }
            if let Some(run_date) = run_date {
                builder = builder.run_date(run_date);
            }
            let filter = builder.build();

            let rows = db::get_tasks(&mut connection, &filter)?;
            ui::tasks_history_table(&rows, csv)
        }
    }
}

async fn run_send(
    config: &Configuration,
    message: String,
    queue: Option<String>,
    routing_key: Option<String>,
    params: Option<String>,
) -> Result<()> {
    let queue = queue.unwrap_or_else(|| config.bus().ingress_queue().clone());
    let routing_key = routing_key.unwrap_or_else(|| config.bus().ingress_queue().clone());
    let data = match params {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
        None => serde_json::Value::Null,
    };

    let envelope = message::Envelope::new(config.bus().exchange().clone(), queue, message).with_data(data);
    bus::publish_once(config.bus(), &envelope, &routing_key).await
}
