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

//! A minimal error for exercising error plumbing in tests.

use std::any::Any;
use std::fmt;

use snafu::Backtrace;

use crate::ext::ErrorExt;
use crate::status_code::StatusCode;

#[derive(Debug)]
pub struct MockError {
    pub code: StatusCode,
}

impl MockError {
    pub fn new(code: StatusCode) -> Self {
        Self { code }
    }
}

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

impl std::error::Error for MockError {}

impl ErrorExt for MockError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn backtrace_opt(&self) -> Option<&Backtrace> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
