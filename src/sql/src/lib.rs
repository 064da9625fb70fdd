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

//! SQL text handling: dialects, parsing, and the statement surface the
//! engine accepts. The grammar itself comes from the `sqlparser` crate;
//! this crate owns dialect capabilities and error reporting.

pub mod dialect;
pub mod error;
pub mod parser;
pub mod statements;

/// Re-export of the AST the parser produces, so downstream crates name one
/// source of truth.
pub mod ast {
    pub use sqlparser::ast::*;
}
