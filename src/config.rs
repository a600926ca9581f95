//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use getset::Getters;
use serde::Deserialize;

/// Runtime configuration for every Angora subcommand.
///
/// Loaded from a TOML file (default resolved via XDG, overridable with
/// `--config`) and layered with `ANGORA_*` environment variables.
#[derive(Debug, Clone, Deserialize, Getters)]
pub struct Configuration {
    #[getset(get = "pub")]
    bus: BusConfig,

    #[getset(get = "pub")]
    database: DatabaseConfig,

    #[getset(get = "pub")]
    catalog: CatalogConfig,

    #[getset(get = "pub")]
    http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize, Getters)]
pub struct BusConfig {
    #[getset(get = "pub")]
    #[serde(default = "default_exchange")]
    exchange: String,

    #[getset(get = "pub")]
    #[serde(default = "default_ingress_queue")]
    ingress_queue: String,

    #[getset(get = "pub")]
    #[serde(default = "default_replay_queue")]
    replay_queue: String,

    #[getset(get = "pub")]
    #[serde(default = "default_host")]
    host: String,

    #[getset(get = "pub")]
    #[serde(default = "default_port")]
    port: u16,

    #[getset(get = "pub")]
    #[serde(default = "default_user")]
    user: String,

    #[getset(get = "pub")]
    #[serde(default = "default_password")]
    password: String,

    /// Message TTL for the replay (dead-lettering) queue, in milliseconds.
    #[getset(get = "pub")]
    #[serde(default = "default_replay_ttl_ms")]
    replay_ttl_ms: u64,
}

impl BusConfig {
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}//",
            self.user, self.password, self.host, self.port
        )
    }

    pub fn set_replay_ttl_ms(&mut self, ttl_ms: u64) {
        self.replay_ttl_ms = ttl_ms;
    }
}

#[derive(Debug, Clone, Deserialize, Getters)]
pub struct DatabaseConfig {
    #[getset(get = "pub")]
    url: String,
}

#[derive(Debug, Clone, Deserialize, Getters)]
pub struct CatalogConfig {
    /// Glob pattern matching every task-definition file, e.g. `./tasks/*.yml`.
    #[getset(get = "pub")]
    pattern: String,
}

#[derive(Debug, Clone, Deserialize, Getters)]
pub struct HttpConfig {
    #[getset(get = "pub")]
    #[serde(default = "default_http_host")]
    host: String,

    #[getset(get = "pub")]
    #[serde(default = "default_http_port")]
    port: u16,
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Parsing HTTP bind address {}:{}", self.host, self.port))
    }

    pub fn set_host(&mut self, host: String) {
        self.host = host;
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }
}

fn default_exchange() -> String {
    String::from("angora")
}
fn default_ingress_queue() -> String {
    String::from("angora")
}
fn default_replay_queue() -> String {
    String::from("replay")
}
fn default_host() -> String {
    String::from("localhost")
}
fn default_port() -> u16 {
    5672
}
fn default_user() -> String {
    String::from("guest")
}
fn default_password() -> String {
    String::from("guest")
}
fn default_replay_ttl_ms() -> u64 {
    600_000
}
fn default_http_host() -> String {
    String::from("127.0.0.1")
}
fn default_http_port() -> u16 {
    55550
}

impl Configuration {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        config::Config::builder()
            .add_source(config::File::from(path.clone()).required(true))
            .add_source(config::Environment::with_prefix("ANGORA").separator("__"))
            .build()
            .with_context(|| format!("Loading configuration from {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("Deserializing configuration from {}", path.display()))
    }
}

fn default_config_path() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix("angora")
        .context("Resolving XDG base directories")?
        .place_config_file("config.toml")
        .context("Resolving default config.toml location")
}

/// Resolve the current node's worker queue name (defaults to the local
/// hostname, the same default the original client used).
pub fn local_worker_queue_name() -> Result<String> {
    hostname()
}

fn hostname() -> Result<String> {
    ::hostname::get()
        .context("Resolving local hostname")?
        .into_string()
        .map_err(|raw| anyhow::anyhow!("Hostname is not valid UTF-8: {:?}", raw))
}
