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
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::OptionExt;

use crate::error::{self, Result};

/// The universal data types. Every connector reduces its native column
/// types onto this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcreteDataType {
    String,
    Integer,
    Long,
    Double,
    Boolean,
    Date,
    Timestamp,
    Binary,
    Json,
    Array,
}

impl ConcreteDataType {
    pub fn name(&self) -> &'static str {
        match self {
            ConcreteDataType::String => "string",
            ConcreteDataType::Integer => "integer",
            ConcreteDataType::Long => "long",
            ConcreteDataType::Double => "double",
            ConcreteDataType::Boolean => "boolean",
            ConcreteDataType::Date => "date",
            ConcreteDataType::Timestamp => "timestamp",
            ConcreteDataType::Binary => "binary",
            ConcreteDataType::Json => "json",
            ConcreteDataType::Array => "array",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ConcreteDataType::Integer | ConcreteDataType::Long | ConcreteDataType::Double
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ConcreteDataType::Date | ConcreteDataType::Timestamp)
    }

    /// Whether values of `self` and `other` can be compared with the
    /// ordinary comparison operators.
    pub fn is_comparable_to(&self, other: &ConcreteDataType) -> bool {
        self == other
            || (self.is_numeric() && other.is_numeric())
            || (self.is_temporal() && other.is_temporal())
    }

    /// The widest type of two comparable types; `None` when incomparable.
    pub fn common_super_type(a: ConcreteDataType, b: ConcreteDataType) -> Option<ConcreteDataType> {
        use ConcreteDataType::*;
        if a == b {
            return Some(a);
        }
        match (a, b) {
            (Integer, Long) | (Long, Integer) => Some(Long),
            (Integer, Double) | (Double, Integer) => Some(Double),
            (Long, Double) | (Double, Long) => Some(Double),
            (Date, Timestamp) | (Timestamp, Date) => Some(Timestamp),
            _ => None,
        }
    }

    /// Rough per-value width in bytes, used by the cost model.
    pub fn average_width(&self) -> usize {
        match self {
            ConcreteDataType::Boolean => 1,
            ConcreteDataType::Integer | ConcreteDataType::Date => 4,
            ConcreteDataType::Long | ConcreteDataType::Double | ConcreteDataType::Timestamp => 8,
            ConcreteDataType::String => 32,
            ConcreteDataType::Binary => 64,
            ConcreteDataType::Json | ConcreteDataType::Array => 128,
        }
    }
}

impl fmt::Display for ConcreteDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ConcreteDataType {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let t = match s.to_ascii_lowercase().as_str() {
            "string" | "varchar" | "char" | "text" => Some(ConcreteDataType::String),
            "integer" | "int" => Some(ConcreteDataType::Integer),
            "long" | "bigint" => Some(ConcreteDataType::Long),
            "double" | "float" | "decimal" => Some(ConcreteDataType::Double),
            "boolean" | "bool" => Some(ConcreteDataType::Boolean),
            "date" => Some(ConcreteDataType::Date),
            "timestamp" | "datetime" => Some(ConcreteDataType::Timestamp),
            "binary" | "blob" | "bytea" => Some(ConcreteDataType::Binary),
            "json" => Some(ConcreteDataType::Json),
            "array" => Some(ConcreteDataType::Array),
            _ => None,
        };
        t.context(error::UnknownDataTypeSnafu { name: s })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_super_type_ladder() {
        use ConcreteDataType::*;
        assert_eq!(Some(Long), ConcreteDataType::common_super_type(Integer, Long));
        assert_eq!(
            Some(Double),
            ConcreteDataType::common_super_type(Long, Double)
        );
        assert_eq!(
            Some(Timestamp),
            ConcreteDataType::common_super_type(Date, Timestamp)
        );
        assert_eq!(None, ConcreteDataType::common_super_type(String, Long));
    }

    #[test]
    fn test_parse_native_aliases() {
        assert_eq!(
            ConcreteDataType::Long,
            "BIGINT".parse::<ConcreteDataType>().unwrap()
        );
        assert_eq!(
            ConcreteDataType::String,
            "varchar".parse::<ConcreteDataType>().unwrap()
        );
        assert!("geometry".parse::<ConcreteDataType>().is_err());
    }
}
