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

//! Scalar and aggregate expressions over plan rows. Column references are
//! resolved to positions in the input row type at planning time; the name
//! and relation are kept for rendering back to SQL.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use datatypes::prelude::{ConcreteDataType, Value};

use crate::plan::LogicalPlan;

/// A resolved reference to a column of the input row.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub index: usize,
    pub name: String,
    pub relation: Option<String>,
    pub data_type: ConcreteDataType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Concat,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn sql_symbol(&self) -> &'static str {
        match self {
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Concat => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negative(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Like {
        negated: bool,
        expr: Box<Expr>,
        pattern: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        negated: bool,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// A scalar function call with a canonical upper-case name.
    Function { name: String, args: Vec<Expr> },
    Cast {
        expr: Box<Expr>,
        to: ConcreteDataType,
    },
    /// `expr [NOT] IN (subquery)`; flattened to a semi/anti join by the
    /// subquery-rewrite rule.
    InSubquery {
        expr: Box<Expr>,
        subquery: Arc<LogicalPlan>,
        negated: bool,
    },
    /// `[NOT] EXISTS (subquery)`; flattened where safe. Equality
    /// correlation extracted by the planner is carried as pairs of
    /// (outer-scope expr, subquery-output expr).
    Exists {
        subquery: Arc<LogicalPlan>,
        correlated_on: Vec<(Expr, Expr)>,
        negated: bool,
    },
}

impl Expr {
    pub fn column(
        index: usize,
        name: impl Into<String>,
        data_type: ConcreteDataType,
        nullable: bool,
    ) -> Expr {
        Expr::Column(ColumnRef {
            index,
            name: name.into(),
            relation: None,
            data_type,
            nullable,
        })
    }

    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self),
            op: BinaryOp::And,
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: Expr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self),
            op: BinaryOp::Eq,
            right: Box::new(other),
        }
    }

    /// The output type of this expression.
    pub fn data_type(&self) -> ConcreteDataType {
        match self {
            Expr::Column(c) => c.data_type,
            Expr::Literal(v) => v.data_type().unwrap_or(ConcreteDataType::String),
            Expr::BinaryOp { left, op, right } => {
                if op.is_comparison() || op.is_logical() {
                    ConcreteDataType::Boolean
                } else if *op == BinaryOp::Concat {
                    ConcreteDataType::String
                } else if *op == BinaryOp::Divide {
                    ConcreteDataType::Double
                } else {
                    ConcreteDataType::common_super_type(left.data_type(), right.data_type())
                        .unwrap_or(ConcreteDataType::Double)
                }
            }
            Expr::Not(_)
            | Expr::IsNull(_)
            | Expr::IsNotNull(_)
            | Expr::Like { .. }
            | Expr::InList { .. }
            | Expr::Between { .. }
            | Expr::InSubquery { .. }
            | Expr::Exists { .. } => ConcreteDataType::Boolean,
            Expr::Negative(inner) => inner.data_type(),
            Expr::Function { name, args } => match name.as_str() {
                "UPPER" | "LOWER" | "CONCAT" | "TRIM" | "SUBSTRING" | "DATE_FORMAT" => {
                    ConcreteDataType::String
                }
                "ABS" | "ROUND" => args
                    .first()
                    .map(|a| a.data_type())
                    .unwrap_or(ConcreteDataType::Double),
                "COALESCE" => args
                    .first()
                    .map(|a| a.data_type())
                    .unwrap_or(ConcreteDataType::String),
                "LENGTH" | "CHAR_LENGTH" => ConcreteDataType::Long,
                _ => ConcreteDataType::String,
            },
            Expr::Cast { to, .. } => *to,
        }
    }

    pub fn nullable(&self) -> bool {
        match self {
            Expr::Column(c) => c.nullable,
            Expr::Literal(v) => v.is_null(),
            Expr::IsNull(_) | Expr::IsNotNull(_) | Expr::Exists { .. } => false,
            Expr::BinaryOp { left, right, .. } => left.nullable() || right.nullable(),
            Expr::Not(inner) | Expr::Negative(inner) | Expr::Cast { expr: inner, .. } => {
                inner.nullable()
            }
            Expr::Like { expr, pattern, .. } => expr.nullable() || pattern.nullable(),
            Expr::InList { expr, .. } | Expr::InSubquery { expr, .. } => expr.nullable(),
            Expr::Between {
                expr, low, high, ..
            } => expr.nullable() || low.nullable() || high.nullable(),
            Expr::Function { args, .. } => args.iter().any(|a| a.nullable()),
        }
    }

    /// Indices of input columns this expression reads.
    pub fn referenced_columns(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<usize>) {
        match self {
            Expr::Column(c) => {
                out.insert(c.index);
            }
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Not(inner)
            | Expr::Negative(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::Cast { expr: inner, .. } => inner.collect_columns(out),
            Expr::Like { expr, pattern, .. } => {
                expr.collect_columns(out);
                pattern.collect_columns(out);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(out);
                for item in list {
                    item.collect_columns(out);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.collect_columns(out);
                }
            }
            Expr::InSubquery { expr, .. } => expr.collect_columns(out),
            Expr::Exists { correlated_on, .. } => {
                for (outer, _) in correlated_on {
                    outer.collect_columns(out);
                }
            }
        }
    }

    /// Whether this expression contains a subquery and so cannot be pushed
    /// or evaluated directly.
    pub fn contains_subquery(&self) -> bool {
        match self {
            Expr::InSubquery { .. } | Expr::Exists { .. } => true,
            Expr::Column(_) | Expr::Literal(_) => false,
            Expr::BinaryOp { left, right, .. } => {
                left.contains_subquery() || right.contains_subquery()
            }
            Expr::Not(inner)
            | Expr::Negative(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::Cast { expr: inner, .. } => inner.contains_subquery(),
            Expr::Like { expr, pattern, .. } => {
                expr.contains_subquery() || pattern.contains_subquery()
            }
            Expr::InList { expr, list, .. } => {
                expr.contains_subquery() || list.iter().any(|e| e.contains_subquery())
            }
            Expr::Between {
                expr, low, high, ..
            } => expr.contains_subquery() || low.contains_subquery() || high.contains_subquery(),
            Expr::Function { args, .. } => args.iter().any(|a| a.contains_subquery()),
        }
    }

    /// Rewrite column indices through `mapping` (old index -> new index).
    /// Returns `None` when a referenced column has no mapping.
    pub fn remap_columns(&self, mapping: &dyn Fn(usize) -> Option<usize>) -> Option<Expr> {
        let rewritten = match self {
            Expr::Column(c) => Expr::Column(ColumnRef {
                index: mapping(c.index)?,
                ..c.clone()
            }),
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: Box::new(left.remap_columns(mapping)?),
                op: *op,
                right: Box::new(right.remap_columns(mapping)?),
            },
            Expr::Not(inner) => Expr::Not(Box::new(inner.remap_columns(mapping)?)),
            Expr::Negative(inner) => Expr::Negative(Box::new(inner.remap_columns(mapping)?)),
            Expr::IsNull(inner) => Expr::IsNull(Box::new(inner.remap_columns(mapping)?)),
            Expr::IsNotNull(inner) => Expr::IsNotNull(Box::new(inner.remap_columns(mapping)?)),
            Expr::Like {
                negated,
                expr,
                pattern,
            } => Expr::Like {
                negated: *negated,
                expr: Box::new(expr.remap_columns(mapping)?),
                pattern: Box::new(pattern.remap_columns(mapping)?),
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: Box::new(expr.remap_columns(mapping)?),
                list: list
                    .iter()
                    .map(|e| e.remap_columns(mapping))
                    .collect::<Option<Vec<_>>>()?,
                negated: *negated,
            },
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => Expr::Between {
                expr: Box::new(expr.remap_columns(mapping)?),
                negated: *negated,
                low: Box::new(low.remap_columns(mapping)?),
                high: Box::new(high.remap_columns(mapping)?),
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|e| e.remap_columns(mapping))
                    .collect::<Option<Vec<_>>>()?,
            },
            Expr::Cast { expr, to } => Expr::Cast {
                expr: Box::new(expr.remap_columns(mapping)?),
                to: *to,
            },
            // Subquery expressions are never relocated.
            Expr::InSubquery { .. } | Expr::Exists { .. } => return None,
        };
        Some(rewritten)
    }

    /// A display name for an unaliased projection of this expression.
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column(c) => c.name.clone(),
            Expr::Function { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.output_name()).collect();
                format!("{}({})", name.to_ascii_lowercase(), rendered.join(", "))
            }
            Expr::Literal(v) => v.to_string(),
            other => format!("{other}").to_ascii_lowercase(),
        }
    }
}

/// Split a predicate into its AND-conjuncts.
pub fn split_conjunction(expr: &Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    collect_conjuncts(expr, &mut out);
    out
}

fn collect_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOp::And,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        other => out.push(other.clone()),
    }
}

/// Join conjuncts back with AND; `None` for the empty set.
pub fn conjoin(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts.into_iter().reduce(Expr::and)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Avg => "AVG",
        }
    }

    pub fn parse(name: &str) -> Option<AggregateFunc> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunc::Count),
            "SUM" => Some(AggregateFunc::Sum),
            "MIN" => Some(AggregateFunc::Min),
            "MAX" => Some(AggregateFunc::Max),
            "AVG" => Some(AggregateFunc::Avg),
            _ => None,
        }
    }

    /// Whether the aggregate decomposes into a local partial and a global
    /// final form.
    pub fn is_splittable(&self) -> bool {
        // All five split; AVG splits into SUM and COUNT.
        true
    }

    pub fn output_type(&self, arg_type: Option<ConcreteDataType>) -> ConcreteDataType {
        match self {
            AggregateFunc::Count => ConcreteDataType::Long,
            AggregateFunc::Avg => ConcreteDataType::Double,
            AggregateFunc::Sum => match arg_type {
                Some(t) if t.is_numeric() => {
                    if t == ConcreteDataType::Double {
                        ConcreteDataType::Double
                    } else {
                        ConcreteDataType::Long
                    }
                }
                _ => ConcreteDataType::Double,
            },
            AggregateFunc::Min | AggregateFunc::Max => {
                arg_type.unwrap_or(ConcreteDataType::String)
            }
        }
    }
}

/// One aggregate call in an [`crate::plan::Aggregate`] node.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub func: AggregateFunc,
    /// `None` is `COUNT(*)`.
    pub arg: Option<Expr>,
    pub distinct: bool,
    pub alias: String,
}

impl AggregateExpr {
    pub fn output_type(&self) -> ConcreteDataType {
        self.func
            .output_type(self.arg.as_ref().map(|a| a.data_type()))
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortExpr {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => match &c.relation {
                Some(rel) => write!(f, "{}.{}", rel, c.name),
                None => write!(f, "{}", c.name),
            },
            Expr::Literal(Value::String(s)) => write!(f, "'{s}'"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { left, op, right } => {
                write!(f, "{} {} {}", left, op.sql_symbol(), right)
            }
            Expr::Not(inner) => write!(f, "NOT {inner}"),
            Expr::Negative(inner) => write!(f, "-{inner}"),
            Expr::IsNull(inner) => write!(f, "{inner} IS NULL"),
            Expr::IsNotNull(inner) => write!(f, "{inner} IS NOT NULL"),
            Expr::Like {
                negated,
                expr,
                pattern,
            } => write!(
                f,
                "{expr} {}LIKE {pattern}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let rendered: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{expr} {}IN ({})",
                    if *negated { "NOT " } else { "" },
                    rendered.join(", ")
                )
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => write!(
                f,
                "{expr} {}BETWEEN {low} AND {high}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Function { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{name}({})", rendered.join(", "))
            }
            Expr::Cast { expr, to } => write!(f, "CAST({expr} AS {to})"),
            Expr::InSubquery { expr, negated, .. } => write!(
                f,
                "{expr} {}IN (<subquery>)",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Exists { negated, .. } => {
                write!(f, "{}EXISTS (<subquery>)", if *negated { "NOT " } else { "" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_conjoin() {
        let a = Expr::column(0, "a", ConcreteDataType::Integer, false);
        let b = Expr::column(1, "b", ConcreteDataType::Integer, false);
        let pred = a
            .clone()
            .eq(Expr::literal(1))
            .and(b.clone().eq(Expr::literal(2)));
        let conjuncts = split_conjunction(&pred);
        assert_eq!(2, conjuncts.len());
        assert_eq!(Some(pred), conjoin(conjuncts));
    }

    #[test]
    fn test_referenced_columns() {
        let expr = Expr::column(2, "x", ConcreteDataType::Integer, false)
            .eq(Expr::column(5, "y", ConcreteDataType::Integer, false));
        assert_eq!(vec![2, 5], expr.referenced_columns().into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_remap_columns() {
        let expr = Expr::column(3, "x", ConcreteDataType::Integer, false).eq(Expr::literal(7));
        let remapped = expr.remap_columns(&|i| if i == 3 { Some(0) } else { None }).unwrap();
        assert_eq!(vec![0], remapped.referenced_columns().into_iter().collect::<Vec<_>>());
        assert!(expr.remap_columns(&|_| None).is_none());
    }

    #[test]
    fn test_aggregate_output_types() {
        assert_eq!(
            ConcreteDataType::Long,
            AggregateFunc::Count.output_type(None)
        );
        assert_eq!(
            ConcreteDataType::Long,
            AggregateFunc::Sum.output_type(Some(ConcreteDataType::Integer))
        );
        assert_eq!(
            ConcreteDataType::Double,
            AggregateFunc::Sum.output_type(Some(ConcreteDataType::Double))
        );
    }
}
