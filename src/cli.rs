//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "angora", author, version, about = "Distributed task orchestrator")]
pub struct Cli {
    /// Path to the TOML configuration file. Defaults to the XDG config location.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the Trigger Router, listening on the ingress queue.
    Server,

    /// Start a Task Runner, listening on a worker queue.
    Client {
        /// Name of the worker queue; defaults to the local hostname.
        #[arg(long)]
        queue_name: Option<String>,
    },

    /// Declare the replay queue and drain anything already on it.
    Replay {
        /// Worker queue the replay queue redelivers to; defaults to the local hostname.
        #[arg(long)]
        routing_key: Option<String>,

        /// Queue TTL, e.g. "10min"; defaults to the configured value.
        #[arg(long)]
        ttl: Option<String>,
    },

    /// Create the `messages`/`tasks` tables (runs pending migrations).
    Initdb,

    /// Run pending task invocations with bounded concurrency.
    Worker {
        #[arg(long, default_value_t = 8)]
        concurrency: usize,

        #[arg(long, default_value = "info")]
        loglevel: String,

        #[arg(long)]
        logfile: Option<PathBuf>,
    },

    /// Start an HTTP component.
    Web {
        #[arg(value_enum)]
        module: WebModule,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        reload: bool,
    },

    /// Publish a one-shot message, the CLI counterpart of the HTTP `/send` endpoint.
    Send {
        message: String,

        #[arg(long)]
        queue: Option<String>,

        #[arg(long)]
        routing_key: Option<String>,

        /// JSON payload for the message's `data` field.
        #[arg(long)]
        params: Option<String>,
    },

    /// Inspect the task catalog from the command line, without going
    /// through the HTTP read API.
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },

    /// Print a shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum TasksAction {
    /// List every task in the catalog.
    List {
        /// Format output as CSV instead of an ASCII table.
        #[arg(long)]
        csv: bool,
    },

    /// Show the transitive children of one task, as a tree.
    Children { name: String },

    /// Show the transitive parents of one task, as a tree.
    Parents { name: String },

    /// Show lifecycle rows from the persistence log, the CLI counterpart
    /// of the HTTP `/task/history` endpoint.
    History {
        #[arg(long)]
        name: Option<String>,

        /// Restrict to rows whose run date matches, e.g. "2026-07-28".
        #[arg(long)]
        run_date: Option<chrono::NaiveDate>,

        /// Format output as CSV instead of an ASCII table.
        #[arg(long)]
        csv: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WebModule {
    Api,
    App,
}
