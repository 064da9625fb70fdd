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
use std::fmt;

use snafu::Backtrace;

use crate::status_code::StatusCode;

/// Extension trait implemented by every error enum in the workspace.
pub trait ErrorExt: std::error::Error {
    /// The status code of this error.
    fn status_code(&self) -> StatusCode {
        StatusCode::Unknown
    }

    /// The backtrace captured where the error was first constructed, if any.
    fn backtrace_opt(&self) -> Option<&Backtrace>;

    /// Cast to [`Any`] so callers can downcast to the concrete error type.
    fn as_any(&self) -> &dyn Any;
}

/// A type-erased error that still carries its [`StatusCode`].
///
/// Used where an error crosses a crate boundary whose `Error` enum should
/// not enumerate every upstream error type.
pub struct BoxedError {
    inner: Box<dyn ErrorExt + Send + Sync>,
}

impl BoxedError {
    pub fn new<E: ErrorExt + Send + Sync + 'static>(err: E) -> Self {
        Self {
            inner: Box::new(err),
        }
    }
}

impl fmt::Debug for BoxedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.inner)
    }
}

impl fmt::Display for BoxedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for BoxedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl ErrorExt for BoxedError {
    fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        self.inner.backtrace_opt()
    }

    fn as_any(&self) -> &dyn Any {
        self.inner.as_any()
    }
}

// Allow `BoxedError` to be used as a snafu source field.
impl snafu::ErrorCompat for BoxedError {
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace_opt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockError;

    #[test]
    fn test_boxed_error_keeps_status_code() {
        let err = BoxedError::new(MockError::new(StatusCode::TableNotFound));
        assert_eq!(StatusCode::TableNotFound, err.status_code());
        assert!(err.as_any().downcast_ref::<MockError>().is_some());
    }
}
