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
    #[snafu(display("Data source {} already registered", name))]
    DataSourceAlreadyExists { name: String, backtrace: Backtrace },

    #[snafu(display("Data source {} not found", name))]
    DataSourceNotFound { name: String, backtrace: Backtrace },

    #[snafu(display("Schema {} already registered", name))]
    SchemaAlreadyExists { name: String, backtrace: Backtrace },

    #[snafu(display("Schema {} not found", name))]
    SchemaNotFound { name: String, backtrace: Backtrace },

    #[snafu(display("Table {}.{} already registered", schema, table))]
    TableAlreadyExists {
        schema: String,
        table: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Table {}.{} not found", schema, table))]
    TableNotFound {
        schema: String,
        table: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Physical schema {} references unknown data source {}",
        schema,
        data_source_id
    ))]
    DanglingDataSource {
        schema: String,
        data_source_id: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid table definition for {}: {}", table, reason))]
    InvalidTableDef {
        table: String,
        reason: String,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::DataSourceNotFound { .. } => StatusCode::DataSourceNotFound,
            Error::TableNotFound { .. } => StatusCode::TableNotFound,
            Error::SchemaNotFound { .. } => StatusCode::InvalidArguments,
            Error::DataSourceAlreadyExists { .. }
            | Error::SchemaAlreadyExists { .. }
            | Error::TableAlreadyExists { .. }
            | Error::DanglingDataSource { .. }
            | Error::InvalidTableDef { .. } => StatusCode::InvalidArguments,
        }
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        ErrorCompat::backtrace(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
