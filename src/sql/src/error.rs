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
    #[snafu(display(
        "Failed to parse SQL at line {} column {}: {}\n{}",
        line,
        column,
        msg,
        snippet
    ))]
    Syntax {
        line: u64,
        column: u64,
        msg: String,
        /// The offending source line with a caret under the column.
        snippet: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Expected exactly one statement, found {}", count))]
    MultipleStatements { count: usize, backtrace: Backtrace },

    #[snafu(display("Empty SQL text"))]
    EmptyStatement { backtrace: Backtrace },

    #[snafu(display("Unknown dialect: {}", name))]
    UnknownDialect { name: String, backtrace: Backtrace },

    #[snafu(display("Unsupported statement: {}", kind))]
    UnsupportedStatement { kind: String, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Syntax { .. }
            | Error::MultipleStatements { .. }
            | Error::EmptyStatement { .. } => StatusCode::InvalidSyntax,
            Error::UnknownDialect { .. } => StatusCode::InvalidArguments,
            Error::UnsupportedStatement { .. } => StatusCode::Unsupported,
        }
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        ErrorCompat::backtrace(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
