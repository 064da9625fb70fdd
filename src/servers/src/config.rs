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

//! Declarative server configuration. `${VAR}` references anywhere in the
//! file are substituted from the environment before deserialization, so
//! secrets never live in the file itself.

use std::time::Duration;

use catalog::datasource::{HealthCheckConfig, PoolConfig};
use catalog::{DataSource, Secret, SourceKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{self, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FedSqlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, rename = "datasource")]
    pub datasources: Vec<DataSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Log filter directive, e.g. "info" or "query=debug,info".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            log_level: default_log_level(),
        }
    }
}

fn default_addr() -> String {
    "127.0.0.1:8765".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Properties {
    #[serde(default = "default_max_intermediate_rows")]
    pub max_intermediate_rows: usize,
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u64,
    #[serde(default = "default_fetch_size")]
    pub default_fetch_size: usize,
    #[serde(default = "default_max_concurrent_stages")]
    pub max_concurrent_stages: usize,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            max_intermediate_rows: default_max_intermediate_rows(),
            query_timeout_seconds: default_query_timeout_seconds(),
            default_fetch_size: default_fetch_size(),
            max_concurrent_stages: default_max_concurrent_stages(),
        }
    }
}

fn default_max_intermediate_rows() -> usize {
    100_000
}

fn default_query_timeout_seconds() -> u64 {
    300
}

fn default_fetch_size() -> usize {
    1_000
}

fn default_max_concurrent_stages() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Secret,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

impl Properties {
    pub fn engine_config(&self) -> query::EngineConfig {
        let mut config = query::EngineConfig {
            intermediate_result_limit: self.max_intermediate_rows,
            ..Default::default()
        };
        config.executor.query_timeout = Duration::from_secs(self.query_timeout_seconds);
        config.executor.fetch_size = self.default_fetch_size;
        config.executor.max_concurrent_stages = self.max_concurrent_stages;
        config
    }
}

impl FedSqlConfig {
    pub fn from_toml(raw: &str) -> Result<FedSqlConfig> {
        let substituted = substitute_env(raw)?;
        toml::from_str(&substituted).map_err(|e| {
            error::InvalidConfigSnafu {
                detail: e.to_string(),
            }
            .build()
        })
    }

    pub fn load(path: &str) -> Result<FedSqlConfig> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            error::ReadConfigSnafu {
                path: path.to_string(),
                detail: e.to_string(),
            }
            .build()
        })?;
        Self::from_toml(&raw)
    }

    /// The catalog records for the configured sources; ids are assigned
    /// here.
    pub fn data_sources(&self) -> Result<Vec<DataSource>> {
        let mut out = Vec::with_capacity(self.datasources.len());
        for (index, source) in self.datasources.iter().enumerate() {
            snafu::ensure!(
                !source.name.is_empty(),
                error::InvalidConfigSnafu {
                    detail: format!("datasource #{index} has an empty name"),
                }
            );
            let mut record = DataSource::new(
                format!("ds-{index}"),
                source.name.clone(),
                source.kind,
                source.url.clone(),
            )
            .with_credentials(source.username.clone(), source.password.clone());
            record.pool = source.pool;
            record.health_check = source.health_check;
            out.push(record);
        }
        Ok(out)
    }
}

static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Replace every `${VAR}` with the environment value; a missing variable
/// is a hard configuration error.
fn substitute_env(raw: &str) -> Result<String> {
    let mut missing: Option<String> = None;
    let substituted = ENV_VAR_RE.replace_all(raw, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
                String::new()
            }
        }
    });
    if let Some(name) = missing {
        return error::MissingEnvVarSnafu { name }.fail();
    }
    Ok(substituted.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        addr = "0.0.0.0:9999"

        [properties]
        max_intermediate_rows = 2
        query_timeout_seconds = 60

        [[datasource]]
        name = "orders_db"
        kind = "mysql"
        url = "mysql://db1:3306/orders"
        username = "app"
        password = "${FEDSQL_TEST_DB_PASSWORD}"

        [[datasource]]
        name = "search"
        kind = "elasticsearch"
        url = "http://es:9200"
    "#;

    #[test]
    fn test_parse_with_env_substitution() {
        std::env::set_var("FEDSQL_TEST_DB_PASSWORD", "hunter2");
        let config = FedSqlConfig::from_toml(SAMPLE).unwrap();
        assert_eq!("0.0.0.0:9999", config.server.addr);
        assert_eq!(2, config.properties.max_intermediate_rows);
        assert_eq!(60, config.properties.query_timeout_seconds);

        let sources = config.data_sources().unwrap();
        assert_eq!(2, sources.len());
        assert_eq!("hunter2", sources[0].password.expose());
        assert_eq!(SourceKind::Elasticsearch, sources[1].kind);

        // The secret must not leak through Debug output.
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        std::env::remove_var("FEDSQL_TEST_MISSING_VAR");
        let raw = r#"
            [[datasource]]
            name = "x"
            kind = "mysql"
            url = "mysql://h/db"
            password = "${FEDSQL_TEST_MISSING_VAR}"
        "#;
        let err = FedSqlConfig::from_toml(raw).unwrap_err();
        assert!(matches!(err, error::Error::MissingEnvVar { .. }));
    }

    #[test]
    fn test_defaults() {
        let config = FedSqlConfig::from_toml("").unwrap();
        assert_eq!(100_000, config.properties.max_intermediate_rows);
        assert_eq!(300, config.properties.query_timeout_seconds);
        assert_eq!(1_000, config.properties.default_fetch_size);
        assert_eq!(10, config.properties.max_concurrent_stages);
    }
}
