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

//! The universal type system every data source maps into. Per-connector
//! mappings reduce native column types to [`data_type::ConcreteDataType`]
//! and native cell values to [`value::Value`].

pub mod data_type;
pub mod error;
pub mod schema;
pub mod value;

pub mod prelude {
    pub use crate::data_type::ConcreteDataType;
    pub use crate::schema::{ColumnSchema, Schema, SchemaRef};
    pub use crate::value::{KeyValue, Value};
}
