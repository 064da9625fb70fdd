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
    #[snafu(display("Failed to connect to data source {}: {}", source_name, detail))]
    ConnectionRefused {
        source_name: String,
        detail: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Timed out connecting to data source {} after {} ms", source_name, timeout_ms))]
    ConnectionTimeout {
        source_name: String,
        timeout_ms: u64,
        backtrace: Backtrace,
    },

    #[snafu(display("Query failed on data source {}: {}", source_name, detail))]
    QueryExecution {
        source_name: String,
        detail: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Schema discovery failed on data source {}: {}", source_name, detail))]
    Discovery {
        source_name: String,
        detail: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Failed to decode column {} of native type {}: {}",
        column,
        native_type,
        detail
    ))]
    TypeDecode {
        column: String,
        native_type: String,
        detail: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Operation {} is not supported by {} sources", operation, kind))]
    UnsupportedOperation {
        operation: String,
        kind: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Table {}.{} not found in source", schema, table))]
    TableNotFound {
        schema: String,
        table: String,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::ConnectionRefused { .. } | Error::ConnectionTimeout { .. } => {
                StatusCode::SourceUnavailable
            }
            Error::QueryExecution { .. } | Error::TypeDecode { .. } => {
                StatusCode::EngineExecuteQuery
            }
            Error::Discovery { .. } => StatusCode::EngineExecuteQuery,
            Error::UnsupportedOperation { .. } => StatusCode::Unsupported,
            Error::TableNotFound { .. } => StatusCode::TableNotFound,
        }
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        ErrorCompat::backtrace(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for common_rows::error::Error {
    fn from(e: Error) -> Self {
        common_rows::error::Error::external(e)
    }
}
