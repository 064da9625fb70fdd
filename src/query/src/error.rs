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
    #[snafu(display("Failed to parse query, source: {}", source))]
    ParseSql {
        #[snafu(backtrace)]
        source: sql::error::Error,
    },

    #[snafu(display("Unknown table {}", table))]
    TableNotFound { table: String, backtrace: Backtrace },

    #[snafu(display("Unknown column {}", column))]
    ColumnNotFound { column: String, backtrace: Backtrace },

    #[snafu(display("Ambiguous column reference {}", column))]
    AmbiguousColumn { column: String, backtrace: Backtrace },

    #[snafu(display("Type mismatch: {}", detail))]
    TypeMismatch { detail: String, backtrace: Backtrace },

    #[snafu(display(
        "Column {} must appear in the GROUP BY clause or be used in an aggregate function",
        column
    ))]
    NotAggregated { column: String, backtrace: Backtrace },

    #[snafu(display("Aggregate function {} cannot be nested", function))]
    NestedAggregate {
        function: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Set operation inputs differ: left has {} columns, right has {}",
        left,
        right
    ))]
    SetOperationMismatch {
        left: usize,
        right: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Unsupported feature: {}{}", feature, suggestion_text(suggestion)))]
    UnsupportedFeature {
        feature: String,
        suggestion: Option<String>,
        backtrace: Backtrace,
    },

    #[snafu(display("Data source {} not found", name))]
    DataSourceNotFound { name: String, backtrace: Backtrace },

    #[snafu(display("Catalog error, source: {}", source))]
    Catalog {
        #[snafu(backtrace)]
        source: catalog::error::Error,
    },

    #[snafu(display("Connector error, source: {}", source))]
    Connector {
        #[snafu(backtrace)]
        source: connectors::error::Error,
    },

    #[snafu(display("Stage {} failed after {} attempts, source: {}", stage, attempts, source))]
    StageFailed {
        stage: usize,
        attempts: u32,
        #[snafu(backtrace)]
        source: connectors::error::Error,
    },

    #[snafu(display("Execution failed: {}", detail))]
    Execution { detail: String, backtrace: Backtrace },

    #[snafu(display("Failed to read row stream, source: {}", source))]
    RowStream {
        #[snafu(backtrace)]
        source: common_rows::error::Error,
    },

    #[snafu(display("Query {} was cancelled", query_id))]
    Cancelled {
        query_id: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Query {} timed out after {} s", query_id, timeout_seconds))]
    Timeout {
        query_id: String,
        timeout_seconds: u64,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Invalid query state transition from {} to {} for query {}",
        from,
        to,
        query_id
    ))]
    IllegalTransition {
        query_id: String,
        from: String,
        to: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Query {} not found", query_id))]
    QueryNotFound {
        query_id: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Intermediate result limit of {} rows exceeded", limit))]
    LimitExceeded { limit: usize, backtrace: Backtrace },
}

fn suggestion_text(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (hint: {s})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::ParseSql { source } => source.status_code(),
            Error::TableNotFound { .. } => StatusCode::TableNotFound,
            Error::ColumnNotFound { .. }
            | Error::AmbiguousColumn { .. }
            | Error::TypeMismatch { .. }
            | Error::NotAggregated { .. }
            | Error::NestedAggregate { .. }
            | Error::SetOperationMismatch { .. } => StatusCode::InvalidArguments,
            Error::UnsupportedFeature { .. } => StatusCode::Unsupported,
            Error::DataSourceNotFound { .. } => StatusCode::DataSourceNotFound,
            Error::Catalog { source } => source.status_code(),
            Error::Connector { source } => source.status_code(),
            Error::StageFailed { source, .. } => source.status_code(),
            Error::Execution { .. } => StatusCode::EngineExecuteQuery,
            Error::RowStream { source } => source.status_code(),
            Error::Cancelled { .. } | Error::Timeout { .. } => StatusCode::Cancelled,
            Error::IllegalTransition { .. } => StatusCode::IllegalState,
            Error::QueryNotFound { .. } => StatusCode::InvalidArguments,
            Error::LimitExceeded { .. } => StatusCode::RowLimitExceeded,
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
