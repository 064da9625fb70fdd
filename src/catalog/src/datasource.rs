// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which connector implementation serves a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Mysql,
    Postgresql,
    Elasticsearch,
    /// In-process tables, used by tests and demos.
    Memory,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Mysql => "mysql",
            SourceKind::Postgresql => "postgresql",
            SourceKind::Elasticsearch => "elasticsearch",
            SourceKind::Memory => "memory",
        };
        write!(f, "{name}")
    }
}

/// A password or token that must never appear in logs or error output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "******")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "******")
    }
}

impl Serialize for Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("******")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub interval_seconds: u64,
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            timeout_ms: 5_000,
        }
    }
}

/// Data source lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStatus {
    Created,
    Connecting,
    Connected,
    Active,
    Disconnected,
    Failed,
}

impl SourceStatus {
    /// Valid transitions of the source lifecycle; `Failed` is terminal.
    pub fn can_transition_to(&self, next: SourceStatus) -> bool {
        use SourceStatus::*;
        matches!(
            (self, next),
            (Created, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connected, Active)
                | (Active, Disconnected)
                | (Disconnected, Connecting)
                | (Active, Failed)
                | (Disconnected, Failed)
        )
    }
}

/// A registered external system holding rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    /// Opaque unique id, assigned at registration.
    pub id: String,
    /// Unique human key.
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    pub username: String,
    pub password: Secret,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    pub status: SourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: SourceKind,
        url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            url: url.into(),
            username: String::new(),
            password: Secret::default(),
            pool: PoolConfig::default(),
            health_check: HealthCheckConfig::default(),
            status: SourceStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Secret) -> Self {
        self.username = username.into();
        self.password = password;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_masked_everywhere() {
        let source = DataSource::new("ds-1", "orders_db", SourceKind::Mysql, "mysql://h:3306")
            .with_credentials("app", Secret::new("hunter2"));
        let debug = format!("{source:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("******"));

        let json = serde_json::to_string(&source).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_lifecycle_transitions() {
        use SourceStatus::*;
        assert!(Created.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Active.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(!Failed.can_transition_to(Connecting));
        assert!(!Created.can_transition_to(Active));
    }
}
