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

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    Dialect as SpDialect, GenericDialect, HiveDialect, MsSqlDialect, MySqlDialect,
    PostgreSqlDialect,
};

use crate::error::{self, Error};

/// A SQL dialect recognized by the engine.
///
/// This type is the API for operations with dialect-specific behavior:
/// identifier quoting, pagination syntax, literal conventions and the
/// grammar used for parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mysql,
    Postgresql,
    Oracle,
    Sqlserver,
    Hive,
    #[default]
    Standard,
}

/// How a dialect expresses "skip m rows, return at most n".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// `LIMIT n OFFSET m` (mysql, postgresql, hive, standard).
    LimitOffset,
    /// `OFFSET m ROWS FETCH FIRST n ROWS ONLY` (oracle 12c+).
    FetchFirst,
    /// `TOP n` for the no-offset case, `OFFSET m ROWS FETCH NEXT n ROWS
    /// ONLY` otherwise; both require an ORDER BY for the offset form
    /// (sqlserver).
    TopOrFetch,
}

impl Dialect {
    pub fn all() -> &'static [Dialect] {
        &[
            Dialect::Mysql,
            Dialect::Postgresql,
            Dialect::Oracle,
            Dialect::Sqlserver,
            Dialect::Hive,
            Dialect::Standard,
        ]
    }

    /// The grammar used to parse text in this dialect. Oracle has no
    /// dedicated grammar in `sqlparser`; the generic grammar accepts its
    /// shared surface.
    pub fn sqlparser_dialect(&self) -> Box<dyn SpDialect> {
        match self {
            Dialect::Mysql => Box::new(MySqlDialect {}),
            Dialect::Postgresql => Box::new(PostgreSqlDialect {}),
            Dialect::Sqlserver => Box::new(MsSqlDialect {}),
            Dialect::Hive => Box::new(HiveDialect {}),
            Dialect::Oracle | Dialect::Standard => Box::new(GenericDialect {}),
        }
    }

    /// Opening/closing characters for quoted identifiers.
    pub const fn quote_chars(&self) -> (char, char) {
        match self {
            Dialect::Mysql | Dialect::Hive => ('`', '`'),
            Dialect::Sqlserver => ('[', ']'),
            Dialect::Postgresql | Dialect::Oracle | Dialect::Standard => ('"', '"'),
        }
    }

    /// Quote an identifier, escaping embedded closing quotes by doubling.
    pub fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.quote_chars();
        let escaped = name.replace(close, &format!("{close}{close}"));
        format!("{open}{escaped}{close}")
    }

    /// Whether unquoted identifiers fold to lower case (postgresql, hive)
    /// or keep their case (the rest treat them case-insensitively and we
    /// preserve the written form).
    pub fn folds_unquoted_to_lowercase(&self) -> bool {
        matches!(self, Dialect::Postgresql | Dialect::Hive)
    }

    pub const fn pagination(&self) -> Pagination {
        match self {
            Dialect::Oracle => Pagination::FetchFirst,
            Dialect::Sqlserver => Pagination::TopOrFetch,
            _ => Pagination::LimitOffset,
        }
    }

    /// Boolean literal rendering; dialects without a boolean type get 1/0.
    pub const fn boolean_literal(&self, value: bool) -> &'static str {
        match self {
            Dialect::Oracle | Dialect::Sqlserver => {
                if value {
                    "1"
                } else {
                    "0"
                }
            }
            _ => {
                if value {
                    "TRUE"
                } else {
                    "FALSE"
                }
            }
        }
    }

    /// String concatenation: operator or CONCAT function.
    pub const fn concat_operator(&self) -> Option<&'static str> {
        match self {
            Dialect::Mysql | Dialect::Hive => None, // CONCAT(a, b)
            Dialect::Sqlserver => Some("+"),
            Dialect::Postgresql | Dialect::Oracle | Dialect::Standard => Some("||"),
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgresql => "postgresql",
            Dialect::Oracle => "oracle",
            Dialect::Sqlserver => "sqlserver",
            Dialect::Hive => "hive",
            Dialect::Standard => "standard",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(input: &str) -> Result<Dialect, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::Mysql),
            "postgresql" | "postgres" => Ok(Dialect::Postgresql),
            "oracle" => Ok(Dialect::Oracle),
            "sqlserver" | "mssql" => Ok(Dialect::Sqlserver),
            "hive" => Ok(Dialect::Hive),
            "standard" | "ansi" => Ok(Dialect::Standard),
            _ => error::UnknownDialectSnafu { name: input }.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!("`order`", Dialect::Mysql.quote_identifier("order"));
        assert_eq!("[select]", Dialect::Sqlserver.quote_identifier("select"));
        assert_eq!("\"a\"\"b\"", Dialect::Postgresql.quote_identifier("a\"b"));
    }

    #[test]
    fn test_dialect_tokens_round_trip() {
        for dialect in Dialect::all() {
            assert_eq!(*dialect, dialect.to_string().parse::<Dialect>().unwrap());
        }
        assert_eq!(Dialect::Postgresql, "postgres".parse::<Dialect>().unwrap());
        assert!("mongodb".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_boolean_literals() {
        assert_eq!("1", Dialect::Oracle.boolean_literal(true));
        assert_eq!("TRUE", Dialect::Mysql.boolean_literal(true));
        assert_eq!("0", Dialect::Sqlserver.boolean_literal(false));
    }
}
