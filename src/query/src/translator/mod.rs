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

//! Renders SQL text in a target dialect, from two inputs: a plan subtree
//! (per-stage pushdown SQL) or raw SQL text (the standalone translate
//! operation). Dialect-specific corners live here: identifier quoting,
//! pagination, literal conventions and function spellings.

mod ast;
mod plan;

use datatypes::prelude::Value;
use sql::dialect::{Dialect, Pagination};

use crate::error::{self, Result};

pub use self::ast::translate;
pub use self::plan::render_plan;

/// Render a literal value in the target dialect.
pub(crate) fn render_literal(dialect: Dialect, value: &Value) -> Result<String> {
    let rendered = match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => dialect.boolean_literal(*b).to_string(),
        Value::String(s) => quote_string(s),
        Value::Integer(_) | Value::Long(_) | Value::Double(_) => value.to_string(),
        Value::Date(d) => match dialect {
            Dialect::Oracle => format!("DATE '{d}'"),
            _ => format!("'{d}'"),
        },
        Value::Timestamp(t) => match dialect {
            Dialect::Oracle => {
                format!("TIMESTAMP '{}'", t.format("%Y-%m-%d %H:%M:%S%.f"))
            }
            _ => format!("'{}'", t.format("%Y-%m-%d %H:%M:%S%.f")),
        },
        Value::Binary(b) => match dialect {
            Dialect::Postgresql => format!("'\\x{}'", hex_encode(b)),
            _ => format!("X'{}'", hex_encode(b)),
        },
        Value::Json(_) | Value::Array(_) => {
            return error::UnsupportedFeatureSnafu {
                feature: format!("{} literal", value.data_type().unwrap().name()),
                suggestion: None,
            }
            .fail();
        }
    };
    Ok(rendered)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a function call with the target dialect's spelling. The name is
/// the canonical (upper-case) form the planner produces.
pub(crate) fn render_function(
    dialect: Dialect,
    name: &str,
    args: Vec<String>,
) -> Result<String> {
    let joined = args.join(", ");
    let rendered = match name {
        "COALESCE" => format!("COALESCE({joined})"),
        "CONCAT" => match dialect.concat_operator() {
            None => format!("CONCAT({joined})"),
            Some(op) => {
                if args.len() >= 2 {
                    args.join(&format!(" {op} "))
                } else {
                    format!("CONCAT({joined})")
                }
            }
        },
        "DATE_FORMAT" => render_date_format(dialect, args)?,
        "LENGTH" => match dialect {
            Dialect::Sqlserver => format!("LEN({joined})"),
            _ => format!("LENGTH({joined})"),
        },
        // Composite constructors exist only in the hive surface.
        "ARRAY" | "MAP" | "NAMED_STRUCT" => match dialect {
            Dialect::Hive => format!("{}({joined})", name.to_ascii_lowercase()),
            _ => {
                return error::UnsupportedFeatureSnafu {
                    feature: format!("{name} constructor in dialect {dialect}"),
                    suggestion: Some("composite constructors require the hive dialect".into()),
                }
                .fail();
            }
        },
        other => format!("{other}({joined})"),
    };
    Ok(rendered)
}

/// DATE_FORMAT carries a `%`-style pattern canonically; targets using
/// Oracle-style patterns get it converted.
fn render_date_format(dialect: Dialect, mut args: Vec<String>) -> Result<String> {
    if args.len() != 2 {
        return error::UnsupportedFeatureSnafu {
            feature: format!("DATE_FORMAT with {} arguments", args.len()),
            suggestion: None,
        }
        .fail();
    }
    let rendered = match dialect {
        Dialect::Mysql => format!("DATE_FORMAT({}, {})", args[0], args[1]),
        Dialect::Hive => format!("date_format({}, {})", args[0], args[1]),
        Dialect::Postgresql | Dialect::Oracle => {
            let pattern = std::mem::take(&mut args[1]);
            format!("TO_CHAR({}, {})", args[0], percent_to_oracle(&pattern))
        }
        Dialect::Sqlserver => format!("FORMAT({}, {})", args[0], args[1]),
        Dialect::Standard => format!("DATETIME_FORMAT({}, {})", args[0], args[1]),
    };
    Ok(rendered)
}

/// `%Y-%m-%d %H:%i:%s` -> `YYYY-MM-DD HH24:MI:SS`, applied to a quoted
/// pattern literal. Non-literal patterns pass through untouched.
pub(crate) fn percent_to_oracle(pattern: &str) -> String {
    if !pattern.starts_with('\'') {
        return pattern.to_string();
    }
    pattern
        .replace("%Y", "YYYY")
        .replace("%y", "YY")
        .replace("%m", "MM")
        .replace("%d", "DD")
        .replace("%H", "HH24")
        .replace("%i", "MI")
        .replace("%M", "MI")
        .replace("%s", "SS")
        .replace("%S", "SS")
}

/// The reverse conversion, used when translating Oracle-style sources to
/// `%`-style targets.
pub(crate) fn oracle_to_percent(pattern: &str) -> String {
    if !pattern.starts_with('\'') {
        return pattern.to_string();
    }
    pattern
        .replace("HH24", "%H")
        .replace("YYYY", "%Y")
        .replace("MM", "%m")
        .replace("DD", "%d")
        .replace("MI", "%i")
        .replace("SS", "%s")
}

/// Assemble the trailing pagination clause. `order_by_present` matters
/// for sqlserver, whose OFFSET form requires an ORDER BY.
pub(crate) fn pagination_clause(
    dialect: Dialect,
    skip: usize,
    fetch: Option<usize>,
    order_by_present: bool,
) -> Result<String> {
    let mut out = String::new();
    match dialect.pagination() {
        Pagination::LimitOffset => {
            if let Some(fetch) = fetch {
                out.push_str(&format!(" LIMIT {fetch}"));
            }
            if skip > 0 {
                out.push_str(&format!(" OFFSET {skip}"));
            }
        }
        Pagination::FetchFirst => {
            if skip > 0 {
                out.push_str(&format!(" OFFSET {skip} ROWS"));
            }
            if let Some(fetch) = fetch {
                out.push_str(&format!(" FETCH FIRST {fetch} ROWS ONLY"));
            }
        }
        Pagination::TopOrFetch => {
            // With no offset the caller renders TOP n in the projection
            // instead; the OFFSET form requires an ORDER BY.
            if skip > 0 {
                if !order_by_present {
                    return error::UnsupportedFeatureSnafu {
                        feature: "OFFSET pagination without ORDER BY in dialect sqlserver"
                            .to_string(),
                        suggestion: Some("add an ORDER BY clause".into()),
                    }
                    .fail();
                }
                out.push_str(&format!(" OFFSET {skip} ROWS"));
                if let Some(fetch) = fetch {
                    out.push_str(&format!(" FETCH NEXT {fetch} ROWS ONLY"));
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals_per_dialect() {
        assert_eq!(
            "1",
            render_literal(Dialect::Oracle, &Value::Boolean(true)).unwrap()
        );
        assert_eq!(
            "TRUE",
            render_literal(Dialect::Postgresql, &Value::Boolean(true)).unwrap()
        );
        assert_eq!(
            "'O''Brien'",
            render_literal(Dialect::Mysql, &Value::from("O'Brien")).unwrap()
        );
    }

    #[test]
    fn test_date_format_conversion() {
        let rendered = render_function(
            Dialect::Oracle,
            "DATE_FORMAT",
            vec!["ts".into(), "'%Y-%m-%d'".into()],
        )
        .unwrap();
        assert_eq!("TO_CHAR(ts, 'YYYY-MM-DD')", rendered);

        let rendered = render_function(
            Dialect::Mysql,
            "DATE_FORMAT",
            vec!["ts".into(), "'%Y-%m-%d'".into()],
        )
        .unwrap();
        assert_eq!("DATE_FORMAT(ts, '%Y-%m-%d')", rendered);
    }

    #[test]
    fn test_concat_styles() {
        assert_eq!(
            "a || b",
            render_function(Dialect::Postgresql, "CONCAT", vec!["a".into(), "b".into()])
                .unwrap()
        );
        assert_eq!(
            "CONCAT(a, b)",
            render_function(Dialect::Mysql, "CONCAT", vec!["a".into(), "b".into()]).unwrap()
        );
    }

    #[test]
    fn test_hive_composites_gated() {
        assert!(render_function(Dialect::Hive, "ARRAY", vec!["1".into()]).is_ok());
        assert!(render_function(Dialect::Mysql, "NAMED_STRUCT", vec![]).is_err());
    }

    #[test]
    fn test_pagination_forms() {
        assert_eq!(
            " LIMIT 10",
            pagination_clause(Dialect::Mysql, 0, Some(10), false).unwrap()
        );
        assert_eq!(
            " FETCH FIRST 10 ROWS ONLY",
            pagination_clause(Dialect::Oracle, 0, Some(10), false).unwrap()
        );
        assert_eq!(
            " OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY",
            pagination_clause(Dialect::Sqlserver, 5, Some(10), true).unwrap()
        );
        assert!(pagination_clause(Dialect::Sqlserver, 5, Some(10), false).is_err());
    }
}
