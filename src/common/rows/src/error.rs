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

use common_error::prelude::{BoxedError, ErrorCompat, ErrorExt, Snafu, StatusCode};
use snafu::Backtrace;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("External error, source: {}", source))]
    External {
        #[snafu(backtrace)]
        source: BoxedError,
    },

    #[snafu(display("Failed to poll row stream, source: {}", source))]
    PollStream {
        #[snafu(backtrace)]
        source: BoxedError,
    },

    #[snafu(display("Row stream producer dropped before completion"))]
    ProducerGone { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an arbitrary engine error so it can flow through a row stream
    /// without the stream type enumerating every upstream error enum.
    pub fn external<E: ErrorExt + Send + Sync + 'static>(source: E) -> Self {
        Error::External {
            source: BoxedError::new(source),
        }
    }
}

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::External { source } | Error::PollStream { source } => source.status_code(),
            Error::ProducerGone { .. } => StatusCode::Internal,
        }
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        ErrorCompat::backtrace(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
