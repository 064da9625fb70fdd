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

use std::fmt;

/// Common status codes shared by every error in the engine.
///
/// Each code has a stable string form that is carried on the wire, so
/// renaming a variant is a breaking protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Unknown error from an external system.
    Unknown,
    /// The engine reached a state it considers impossible.
    Unexpected,
    /// Internal engine failure that is not the client's fault.
    Internal,
    /// Malformed SQL text.
    InvalidSyntax,
    /// Semantically invalid request (unknown identifier, type mismatch, ...).
    InvalidArguments,
    /// The target dialect or connector cannot express the request.
    Unsupported,
    /// Invalid lifecycle transition.
    IllegalState,
    /// The query was cancelled by the client or by the global timeout.
    Cancelled,
    /// A referenced table does not exist in the catalog.
    TableNotFound,
    /// A referenced data source does not exist in the registry.
    DataSourceNotFound,
    /// The intermediate result limit was surpassed.
    RowLimitExceeded,
    /// A data source could not be reached; safe to retry.
    SourceUnavailable,
    /// A data source or operator failed while executing.
    EngineExecuteQuery,
}

impl StatusCode {
    /// Stable wire representation of this code.
    pub fn as_code_str(&self) -> &'static str {
        match self {
            StatusCode::Unknown => "Unknown",
            StatusCode::Unexpected => "Unexpected",
            StatusCode::Internal => "Internal",
            StatusCode::InvalidSyntax => "ParseError",
            StatusCode::InvalidArguments => "ValidationError",
            StatusCode::Unsupported => "UnsupportedFeature",
            StatusCode::IllegalState => "IllegalState",
            StatusCode::Cancelled => "Cancelled",
            StatusCode::TableNotFound => "TableNotFound",
            StatusCode::DataSourceNotFound => "DataSourceNotFound",
            StatusCode::RowLimitExceeded => "LimitExceeded",
            StatusCode::SourceUnavailable => "ConnUnavailable",
            StatusCode::EngineExecuteQuery => "ExecError",
        }
    }

    /// Whether a failed stage with this code may be re-attempted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StatusCode::SourceUnavailable)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_codes() {
        assert!(StatusCode::SourceUnavailable.is_retryable());
        assert!(!StatusCode::EngineExecuteQuery.is_retryable());
        assert!(!StatusCode::Cancelled.is_retryable());
    }

    #[test]
    fn test_code_str_is_stable() {
        assert_eq!("ParseError", StatusCode::InvalidSyntax.as_code_str());
        assert_eq!("LimitExceeded", StatusCode::RowLimitExceeded.as_code_str());
        assert_eq!(
            "ConnUnavailable",
            StatusCode::SourceUnavailable.as_code_str()
        );
    }
}
