//! Connection and write configuration.
//!
//! [`ConnectionConfig`] is consumed once by a driver builder when the connection is opened; the
//! mapping engine itself never reads it. [`WriteOptions`] is the per-call `options` argument of
//! save and remove.

use std::time::Duration;

use serde::Deserialize;

use crate::error::MapperResult;

/// Write acknowledgement: a node count or a named tag such as `"majority"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WriteAck {
    Nodes(u32),
    Tag(String),
}

impl Default for WriteAck {
    fn default() -> Self {
        WriteAck::Nodes(1)
    }
}

/// Settings for opening a store connection.
///
/// Keys accept both the snake-case names and the short configuration names (`dbname`, `user`,
/// `writeConcern`, `timeout`, `wTimeout`, `replicaSet`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `host:port`, or a comma separated seed list.
    pub host: String,
    #[serde(alias = "dbname")]
    pub database: String,
    #[serde(alias = "user")]
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "writeConcern", alias = "w")]
    pub write_concern: WriteAck,
    /// Connect timeout in milliseconds, `0` keeps the driver default.
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,
    /// Write-concern timeout in milliseconds, `0` keeps the driver default.
    #[serde(alias = "wTimeout")]
    pub w_timeout_ms: u64,
    #[serde(alias = "replicaSet")]
    pub replica_set: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost:27017".to_string(),
            database: "docmap".to_string(),
            username: None,
            password: None,
            write_concern: WriteAck::default(),
            timeout_ms: 0,
            w_timeout_ms: 0,
            replica_set: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration section, filling unspecified keys with defaults.
    pub fn from_json(value: serde_json::Value) -> MapperResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn write_concern(mut self, ack: WriteAck) -> Self {
        self.write_concern = ack;
        self
    }

    pub fn replica_set(mut self, name: impl Into<String>) -> Self {
        self.replica_set = Some(name.into());
        self
    }

    /// The connection string for [`host`](Self::host).
    pub fn dsn(&self) -> String {
        if self.host.starts_with("mongodb://") || self.host.starts_with("mongodb+srv://") {
            self.host.clone()
        } else {
            format!("mongodb://{}", self.host)
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.w_timeout_ms > 0).then(|| Duration::from_millis(self.w_timeout_ms))
    }
}

/// Per-call write options for save and remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Overrides the connection's write acknowledgement.
    pub ack: Option<WriteAck>,
    /// Write-concern timeout.
    pub timeout: Option<Duration>,
    /// Wait for the journal commit.
    pub journal: Option<bool>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack(mut self, ack: WriteAck) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn journal(mut self, journal: bool) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn is_default(&self) -> bool {
        self == &Self::default()
    }
}
