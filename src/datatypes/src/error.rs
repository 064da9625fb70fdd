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
    #[snafu(display("Failed to convert value {} to type {}", value, target))]
    Conversion {
        value: String,
        target: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Type mismatch, expected {}, actual {}", expected, actual))]
    TypeMismatch {
        expected: String,
        actual: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Unknown data type name: {}", name))]
    UnknownDataType { name: String, backtrace: Backtrace },

    #[snafu(display("Column {} not found in schema", name))]
    ColumnNotFound { name: String, backtrace: Backtrace },

    #[snafu(display("Duplicate column {} in schema", name))]
    DuplicateColumn { name: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidArguments
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        ErrorCompat::backtrace(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
