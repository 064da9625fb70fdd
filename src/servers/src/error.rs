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

use std::any::Any;

use common_error::prelude::{ErrorCompat, ErrorExt, Snafu, StatusCode};
use snafu::Backtrace;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to read config file {}: {}", path, detail))]
    ReadConfig {
        path: String,
        detail: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid configuration: {}", detail))]
    InvalidConfig { detail: String, backtrace: Backtrace },

    #[snafu(display("Environment variable {} referenced in config is not set", name))]
    MissingEnvVar { name: String, backtrace: Backtrace },

    #[snafu(display("Failed to bind server address {}: {}", addr, detail))]
    StartServer {
        addr: String,
        detail: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Connection {} not found", connection_id))]
    ConnectionNotFound {
        connection_id: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Statement {} not found", statement_id))]
    StatementNotFound {
        statement_id: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Statement {} has no SQL to execute", statement_id))]
    EmptyStatement {
        statement_id: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Query failed, source: {}", source))]
    Query {
        #[snafu(backtrace)]
        source: query::error::Error,
    },

    #[snafu(display("Catalog failure, source: {}", source))]
    Catalog {
        #[snafu(backtrace)]
        source: catalog::error::Error,
    },

    #[snafu(display("Connector failure, source: {}", source))]
    Connector {
        #[snafu(backtrace)]
        source: connectors::error::Error,
    },

    #[snafu(display("Row stream failure, source: {}", source))]
    RowStream {
        #[snafu(backtrace)]
        source: common_rows::error::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::ReadConfig { .. }
            | Error::InvalidConfig { .. }
            | Error::MissingEnvVar { .. } => StatusCode::InvalidArguments,
            Error::StartServer { .. } => StatusCode::Internal,
            Error::ConnectionNotFound { .. }
            | Error::StatementNotFound { .. }
            | Error::EmptyStatement { .. } => StatusCode::InvalidArguments,
            Error::Query { source } => source.status_code(),
            Error::Catalog { source } => source.status_code(),
            Error::Connector { source } => source.status_code(),
            Error::RowStream { source } => source.status_code(),
        }
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        ErrorCompat::backtrace(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
