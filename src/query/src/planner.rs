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

//! Lowers a validated statement into the logical plan. Name resolution
//! and type checking happen here: every column reference is resolved to a
//! position against a catalog snapshot, operator signatures are checked,
//! and aggregate/group and set-operation shapes are validated.

use std::sync::Arc;

use catalog::CatalogState;
use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema, SchemaRef, Value};
use sql::ast;
use sql::dialect::Dialect;

use crate::error::{self, Result};
use crate::expr::{
    conjoin, AggregateExpr, AggregateFunc, BinaryOp, ColumnRef, Expr, SortExpr,
};
use crate::plan::{
    aggregate_schema, join_schema, Aggregate, AggregateMode, Filter, Join, JoinType, Limit,
    LogicalPlan, PlanRef, Project, Sort, TableScan, Union,
};

/// Plans one query against a pinned catalog snapshot.
pub struct Planner<'a> {
    catalog: &'a CatalogState,
    dialect: Dialect,
}

/// The row type visible to expression resolution at some point of the
/// plan, together with the outer scope for correlated subqueries.
struct Scope<'a> {
    schema: SchemaRef,
    outer: Option<&'a Scope<'a>>,
}

impl Scope<'_> {
    fn local(schema: SchemaRef) -> Scope<'static> {
        Scope {
            schema,
            outer: None,
        }
    }
}

/// Where a name resolved: the current scope or the enclosing one.
enum Resolved {
    Local(ColumnRef),
    Outer(ColumnRef),
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a CatalogState, dialect: Dialect) -> Self {
        Self { catalog, dialect }
    }

    pub fn plan_query(&self, query: &ast::Query) -> Result<PlanRef> {
        let scope = Scope::local(Arc::new(Schema::new(vec![])));
        self.plan_query_in_scope(query, &scope)
    }

    fn plan_query_in_scope(&self, query: &ast::Query, outer: &Scope<'_>) -> Result<PlanRef> {
        if query.with.is_some() {
            return unsupported("WITH common table expressions", None);
        }

        let (mut plan, order_by_below) =
            self.plan_set_expr(&query.body, &query.order_by, outer)?;

        if let Some(order_by) = order_by_below {
            plan = Arc::new(LogicalPlan::Sort(Sort {
                exprs: order_by,
                fetch: None,
                input: plan,
            }));
        }

        let skip = match &query.offset {
            Some(offset) => const_usize(&offset.value)?,
            None => 0,
        };
        let fetch = query.limit.as_ref().map(const_usize).transpose()?;
        if skip > 0 || fetch.is_some() {
            plan = Arc::new(LogicalPlan::Limit(Limit {
                skip,
                fetch,
                input: plan,
            }));
        }
        Ok(plan)
    }

    /// Plans the query body. Returns the plan and, when ORDER BY could not
    /// be applied inside (set operations resolve it against the output),
    /// nothing; ORDER BY is otherwise folded in here.
    fn plan_set_expr(
        &self,
        body: &ast::SetExpr,
        order_by: &[ast::OrderByExpr],
        outer: &Scope<'_>,
    ) -> Result<(PlanRef, Option<Vec<SortExpr>>)> {
        match body {
            ast::SetExpr::Select(select) => {
                let plan = self.plan_select(select, order_by, outer)?;
                Ok((plan, None))
            }
            ast::SetExpr::Query(inner) => {
                let plan = self.plan_query_in_scope(inner, outer)?;
                let sort = self.require_output_order_by(order_by, &plan)?;
                Ok((plan, sort))
            }
            ast::SetExpr::SetOperation {
                op: ast::SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => {
                let (left_plan, _) = self.plan_set_expr(left, &[], outer)?;
                let (right_plan, _) = self.plan_set_expr(right, &[], outer)?;
                let plan = self.plan_union(left_plan, right_plan, set_quantifier)?;
                let sort = self.require_output_order_by(order_by, &plan)?;
                Ok((plan, sort))
            }
            ast::SetExpr::SetOperation { op, .. } => {
                unsupported(&format!("set operation {op}"), None)
            }
            other => unsupported(&format!("query body {other}"), None),
        }
    }

    fn plan_union(
        &self,
        left: PlanRef,
        right: PlanRef,
        quantifier: &ast::SetQuantifier,
    ) -> Result<PlanRef> {
        let left_schema = left.schema();
        let right_schema = right.schema();
        if left_schema.num_columns() != right_schema.num_columns() {
            return error::SetOperationMismatchSnafu {
                left: left_schema.num_columns(),
                right: right_schema.num_columns(),
            }
            .fail();
        }
        let mut columns = Vec::with_capacity(left_schema.num_columns());
        for (l, r) in left_schema
            .column_schemas()
            .iter()
            .zip(right_schema.column_schemas())
        {
            let data_type = ConcreteDataType::common_super_type(l.data_type, r.data_type)
                .ok_or_else(|| {
                    error::TypeMismatchSnafu {
                        detail: format!(
                            "UNION column {} has incompatible types {} and {}",
                            l.name, l.data_type, r.data_type
                        ),
                    }
                    .build()
                })?;
            columns.push(ColumnSchema::new(
                l.name.clone(),
                data_type,
                l.nullable || r.nullable,
            ));
        }
        let schema = Arc::new(Schema::new(columns));
        let mut plan: PlanRef = Arc::new(LogicalPlan::Union(Union {
            inputs: vec![left, right],
            schema: schema.clone(),
        }));

        // Plain UNION deduplicates: group by every output column.
        let distinct = matches!(
            quantifier,
            ast::SetQuantifier::Distinct | ast::SetQuantifier::None
        );
        if distinct {
            let group_exprs: Vec<(Expr, String)> = schema
                .column_schemas()
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    (
                        Expr::Column(ColumnRef {
                            index: i,
                            name: c.name.clone(),
                            relation: c.relation.clone(),
                            data_type: c.data_type,
                            nullable: c.nullable,
                        }),
                        c.name.clone(),
                    )
                })
                .collect();
            let agg_schema = Arc::new(aggregate_schema(&group_exprs, &[], AggregateMode::Complete));
            plan = Arc::new(LogicalPlan::Aggregate(Aggregate {
                input: plan,
                group_exprs,
                aggregates: vec![],
                mode: AggregateMode::Complete,
                splittable: false,
                schema: agg_schema,
            }));
        }
        Ok(plan)
    }

    fn plan_select(
        &self,
        select: &ast::Select,
        order_by: &[ast::OrderByExpr],
        outer: &Scope<'_>,
    ) -> Result<PlanRef> {
        if select.from.is_empty() {
            return unsupported("SELECT without FROM", None);
        }

        // FROM clause: relations joined left to right.
        let mut plan = self.plan_table_with_joins(&select.from[0], outer)?;
        for extra in &select.from[1..] {
            let right = self.plan_table_with_joins(extra, outer)?;
            plan = cross_join(plan, right);
        }

        // WHERE.
        let input_scope = Scope {
            schema: plan.schema(),
            outer: if outer.schema.num_columns() == 0 {
                None
            } else {
                Some(outer)
            },
        };
        if let Some(predicate) = &select.selection {
            let resolved = self.resolve_expr(predicate, &input_scope, true)?;
            require_boolean(&resolved, "WHERE")?;
            let always_empty = matches!(resolved, Expr::Literal(Value::Boolean(false)));
            plan = Arc::new(LogicalPlan::Filter(Filter {
                predicate: resolved,
                input: plan,
                always_empty,
            }));
        }

        // Aggregation.
        let group_by = group_by_exprs(select)?;
        let aggregate_calls = collect_aggregate_calls(select)?;
        let has_aggregate = !group_by.is_empty() || !aggregate_calls.is_empty();

        if has_aggregate {
            self.plan_aggregate_select(select, plan, group_by, aggregate_calls, order_by)
        } else {
            self.plan_plain_select(select, plan, order_by)
        }
    }

    fn plan_plain_select(
        &self,
        select: &ast::Select,
        input: PlanRef,
        order_by: &[ast::OrderByExpr],
    ) -> Result<PlanRef> {
        let input_schema = input.schema();
        let scope = Scope::local(input_schema.clone());

        let projections = self.resolve_projection(select, &scope)?;

        // ORDER BY may reference projected aliases or any input column;
        // input-level keys sort below the projection.
        let mut output_columns = Vec::with_capacity(projections.len());
        for (expr, name) in &projections {
            output_columns.push(ColumnSchema::new(name.clone(), expr.data_type(), expr.nullable()));
        }
        let output_schema = Arc::new(Schema::new(output_columns));

        let mut plan = input;
        let mut sort_above: Option<Vec<SortExpr>> = None;
        if !order_by.is_empty() {
            match self.resolve_order_by_output(order_by, &output_schema)? {
                Some(keys) => sort_above = Some(keys),
                None => {
                    let keys = self.resolve_order_by_scope(order_by, &scope)?;
                    plan = Arc::new(LogicalPlan::Sort(Sort {
                        exprs: keys,
                        fetch: None,
                        input: plan,
                    }));
                }
            }
        }

        let is_trivial = projections.len() == input_schema.num_columns()
            && projections.iter().enumerate().all(|(i, (expr, name))| {
                matches!(expr, Expr::Column(c) if c.index == i)
                    && input_schema.column_schema(i).name == *name
            });
        if !is_trivial {
            plan = Arc::new(LogicalPlan::Project(Project {
                exprs: projections,
                input: plan,
                schema: output_schema,
            }));
        }

        if let Some(keys) = sort_above {
            plan = Arc::new(LogicalPlan::Sort(Sort {
                exprs: keys,
                fetch: None,
                input: plan,
            }));
        }

        if select.distinct.is_some() {
            plan = distinct_over(plan);
        }
        Ok(plan)
    }

    fn plan_aggregate_select(
        &self,
        select: &ast::Select,
        input: PlanRef,
        group_by: Vec<ast::Expr>,
        aggregate_calls: Vec<ast::Function>,
        order_by: &[ast::OrderByExpr],
    ) -> Result<PlanRef> {
        let scope = Scope::local(input.schema());

        // Resolve group keys against the aggregate input.
        let mut group_exprs = Vec::with_capacity(group_by.len());
        for g in &group_by {
            let resolved = self.resolve_expr(g, &scope, false)?;
            let name = projection_name(g, &resolved);
            group_exprs.push((resolved, name));
        }

        // Resolve aggregate calls.
        let mut aggregates = Vec::with_capacity(aggregate_calls.len());
        for call in &aggregate_calls {
            aggregates.push(self.resolve_aggregate_call(call, &scope)?);
        }

        let agg_schema = Arc::new(aggregate_schema(
            &group_exprs,
            &aggregates,
            AggregateMode::Complete,
        ));
        let mut plan: PlanRef = Arc::new(LogicalPlan::Aggregate(Aggregate {
            input,
            group_exprs: group_exprs.clone(),
            aggregates: aggregates.clone(),
            mode: AggregateMode::Complete,
            splittable: false,
            schema: agg_schema.clone(),
        }));

        // Everything above the aggregate resolves against its output:
        // group keys by position, aggregate calls by matching.
        let rewriter = AggregateRewriter {
            planner: self,
            group_by: &group_by,
            aggregate_calls: &aggregate_calls,
            agg_schema: &agg_schema,
            input_scope: Scope::local(plan.schema()),
        };

        if let Some(having) = &select.having {
            let resolved = rewriter.rewrite(having)?;
            require_boolean(&resolved, "HAVING")?;
            plan = Arc::new(LogicalPlan::Filter(Filter {
                predicate: resolved,
                input: plan,
                always_empty: false,
            }));
        }

        let mut projections = Vec::new();
        for item in &select.projection {
            let (expr, alias) = projection_item(item)?;
            let resolved = rewriter.rewrite(expr)?;
            let name = alias.unwrap_or_else(|| projection_name(expr, &resolved));
            projections.push((resolved, name));
        }
        let mut output_columns = Vec::with_capacity(projections.len());
        for (expr, name) in &projections {
            output_columns.push(ColumnSchema::new(name.clone(), expr.data_type(), expr.nullable()));
        }
        let output_schema = Arc::new(Schema::new(output_columns));
        plan = Arc::new(LogicalPlan::Project(Project {
            exprs: projections,
            input: plan,
            schema: output_schema.clone(),
        }));

        if !order_by.is_empty() {
            let keys = self
                .resolve_order_by_output(order_by, &output_schema)?
                .ok_or_else(|| {
                    error::ColumnNotFoundSnafu {
                        column: "ORDER BY key not in aggregate output".to_string(),
                    }
                    .build()
                })?;
            plan = Arc::new(LogicalPlan::Sort(Sort {
                exprs: keys,
                fetch: None,
                input: plan,
            }));
        }

        if select.distinct.is_some() {
            plan = distinct_over(plan);
        }
        Ok(plan)
    }

    fn resolve_projection(
        &self,
        select: &ast::Select,
        scope: &Scope<'_>,
    ) -> Result<Vec<(Expr, String)>> {
        let mut out = Vec::new();
        for item in &select.projection {
            match item {
                ast::SelectItem::Wildcard(_) => {
                    for (i, column) in scope.schema.column_schemas().iter().enumerate() {
                        out.push((
                            Expr::Column(ColumnRef {
                                index: i,
                                name: column.name.clone(),
                                relation: column.relation.clone(),
                                data_type: column.data_type,
                                nullable: column.nullable,
                            }),
                            column.name.clone(),
                        ));
                    }
                }
                ast::SelectItem::QualifiedWildcard(name, _) => {
                    let relation = name
                        .0
                        .last()
                        .map(|i| i.value.clone())
                        .unwrap_or_default();
                    let mut matched = false;
                    for (i, column) in scope.schema.column_schemas().iter().enumerate() {
                        if column
                            .relation
                            .as_deref()
                            .is_some_and(|r| r.eq_ignore_ascii_case(&relation))
                        {
                            matched = true;
                            out.push((
                                Expr::Column(ColumnRef {
                                    index: i,
                                    name: column.name.clone(),
                                    relation: column.relation.clone(),
                                    data_type: column.data_type,
                                    nullable: column.nullable,
                                }),
                                column.name.clone(),
                            ));
                        }
                    }
                    if !matched {
                        return error::TableNotFoundSnafu { table: relation }.fail();
                    }
                }
                _ => {
                    let (expr, alias) = projection_item(item)?;
                    let resolved = self.resolve_expr(expr, scope, false)?;
                    let name = alias.unwrap_or_else(|| projection_name(expr, &resolved));
                    out.push((resolved, name));
                }
            }
        }
        Ok(out)
    }

    fn plan_table_with_joins(
        &self,
        table: &ast::TableWithJoins,
        outer: &Scope<'_>,
    ) -> Result<PlanRef> {
        let mut plan = self.plan_table_factor(&table.relation, outer)?;
        for join in &table.joins {
            let right = self.plan_table_factor(&join.relation, outer)?;
            plan = self.plan_join(plan, right, &join.join_operator)?;
        }
        Ok(plan)
    }

    fn plan_join(
        &self,
        left: PlanRef,
        right: PlanRef,
        operator: &ast::JoinOperator,
    ) -> Result<PlanRef> {
        use ast::JoinOperator as Op;
        let (join_type, constraint) = match operator {
            Op::Inner(c) => (JoinType::Inner, Some(c)),
            Op::LeftOuter(c) => (JoinType::Left, Some(c)),
            Op::RightOuter(c) => (JoinType::Right, Some(c)),
            Op::FullOuter(c) => (JoinType::Full, Some(c)),
            Op::CrossJoin => (JoinType::Inner, None),
            other => {
                return unsupported(&format!("join operator {other:?}"), None);
            }
        };

        let left_schema = left.schema();
        let right_schema = right.schema();
        let combined = Arc::new(join_schema(&left_schema, &right_schema, JoinType::Inner));
        let schema = Arc::new(join_schema(&left_schema, &right_schema, join_type));

        let (on, filter) = match constraint {
            None | Some(ast::JoinConstraint::None) => (vec![], None),
            Some(ast::JoinConstraint::On(expr)) => {
                let scope = Scope::local(combined.clone());
                let resolved = self.resolve_expr(expr, &scope, false)?;
                require_boolean(&resolved, "JOIN ON")?;
                split_join_condition(resolved, left_schema.num_columns())
            }
            Some(ast::JoinConstraint::Using(columns)) => {
                let mut on = Vec::with_capacity(columns.len());
                for column in columns {
                    let left_index =
                        left_schema.index_of(&column.value).ok_or_else(|| {
                            error::ColumnNotFoundSnafu {
                                column: column.value.clone(),
                            }
                            .build()
                        })?;
                    let right_index =
                        right_schema.index_of(&column.value).ok_or_else(|| {
                            error::ColumnNotFoundSnafu {
                                column: column.value.clone(),
                            }
                            .build()
                        })?;
                    on.push((
                        column_ref(&left_schema, left_index),
                        column_ref(&right_schema, right_index),
                    ));
                }
                (on, None)
            }
            Some(ast::JoinConstraint::Natural) => {
                return unsupported("NATURAL JOIN", Some("spell out the join keys with ON"));
            }
        };

        Ok(Arc::new(LogicalPlan::Join(Join {
            left,
            right,
            join_type,
            on,
            filter,
            schema,
        })))
    }

    fn plan_table_factor(
        &self,
        factor: &ast::TableFactor,
        outer: &Scope<'_>,
    ) -> Result<PlanRef> {
        match factor {
            ast::TableFactor::Table { name, alias, .. } => {
                let (schema_name, table_name) = object_name_parts(name)?;
                let (schema_meta, table_meta) = self
                    .catalog
                    .resolve_table(schema_name.as_deref(), &table_name)
                    .ok_or_else(|| {
                        error::TableNotFoundSnafu {
                            table: name.to_string(),
                        }
                        .build()
                    })?;
                let source = self
                    .catalog
                    .source_of_schema(&schema_meta)
                    .ok_or_else(|| {
                        error::DataSourceNotFoundSnafu {
                            name: schema_meta
                                .data_source_id
                                .clone()
                                .unwrap_or_else(|| schema_meta.name.clone()),
                        }
                        .build()
                    })?;

                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .unwrap_or_else(|| table_meta.name.clone());
                let table_schema = Arc::new(Schema::new(
                    table_meta
                        .columns
                        .iter()
                        .map(|c| {
                            ColumnSchema::new(c.name.clone(), c.data_type, c.nullable)
                                .with_relation(alias.clone())
                        })
                        .collect(),
                ));
                Ok(Arc::new(LogicalPlan::TableScan(TableScan {
                    source_id: source.id.clone(),
                    source_name: source.name.clone(),
                    source_kind: source.kind,
                    schema_name: schema_meta.name.clone(),
                    table_name: table_meta.name.clone(),
                    alias,
                    table_schema,
                    projection: None,
                    filters: vec![],
                    fetch: None,
                })))
            }
            ast::TableFactor::Derived {
                subquery, alias, ..
            } => {
                let inner = self.plan_query_in_scope(subquery, outer)?;
                let alias = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .ok_or_else(|| {
                        error::UnsupportedFeatureSnafu {
                            feature: "derived table without alias".to_string(),
                            suggestion: Some("add an alias: (...) AS t".to_string()),
                        }
                        .build()
                    })?;
                Ok(alias_outputs(inner, &alias))
            }
            ast::TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.plan_table_with_joins(table_with_joins, outer),
            other => unsupported(&format!("table factor {other}"), None),
        }
    }

    fn resolve_aggregate_call(
        &self,
        call: &ast::Function,
        scope: &Scope<'_>,
    ) -> Result<AggregateExpr> {
        let name = call.name.to_string().to_ascii_uppercase();
        let func = AggregateFunc::parse(&name).ok_or_else(|| {
            error::UnsupportedFeatureSnafu {
                feature: format!("aggregate function {name}"),
                suggestion: None,
            }
            .build()
        })?;
        let distinct = call.distinct;

        let mut arg = None;
        for fn_arg in &call.args {
            match fn_arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => {}
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                    let resolved = self.resolve_expr(e, scope, false)?;
                    if contains_aggregate(e) {
                        return error::NestedAggregateSnafu { function: name }.fail();
                    }
                    if matches!(func, AggregateFunc::Sum | AggregateFunc::Avg)
                        && !resolved.data_type().is_numeric()
                    {
                        return error::TypeMismatchSnafu {
                            detail: format!(
                                "{} requires a numeric argument, got {}",
                                func.name(),
                                resolved.data_type()
                            ),
                        }
                        .fail();
                    }
                    arg = Some(resolved);
                }
                other => {
                    return unsupported(&format!("aggregate argument {other}"), None);
                }
            }
        }
        if arg.is_none() && func != AggregateFunc::Count {
            return error::TypeMismatchSnafu {
                detail: format!("{} requires an argument", func.name()),
            }
            .fail();
        }

        Ok(AggregateExpr {
            func,
            arg,
            distinct,
            alias: aggregate_alias(call),
        })
    }

    fn resolve_order_by_output(
        &self,
        order_by: &[ast::OrderByExpr],
        output: &SchemaRef,
    ) -> Result<Option<Vec<SortExpr>>> {
        if order_by.is_empty() {
            return Ok(None);
        }
        let mut keys = Vec::with_capacity(order_by.len());
        for item in order_by {
            let index = match &item.expr {
                ast::Expr::Value(ast::Value::Number(n, _)) => {
                    let position: usize = n.parse().map_err(|_| {
                        error::ColumnNotFoundSnafu { column: n.clone() }.build()
                    })?;
                    if position == 0 || position > output.num_columns() {
                        return error::ColumnNotFoundSnafu {
                            column: format!("ORDER BY position {position}"),
                        }
                        .fail();
                    }
                    position - 1
                }
                ast::Expr::Identifier(ident) => match output.index_of(&ident.value) {
                    Some(index) => index,
                    None => return Ok(None),
                },
                ast::Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
                    match output.index_of_qualified(&parts[0].value, &parts[1].value) {
                        Some(index) => index,
                        None => return Ok(None),
                    }
                }
                _ => return Ok(None),
            };
            keys.push(SortExpr {
                expr: column_ref(output, index),
                ascending: item.asc.unwrap_or(true),
                nulls_first: item.nulls_first.unwrap_or(true),
            });
        }
        Ok(Some(keys))
    }

    /// ORDER BY over a set operation or nested query resolves against the
    /// output columns only; anything else is an error, not a silent drop.
    fn require_output_order_by(
        &self,
        order_by: &[ast::OrderByExpr],
        plan: &PlanRef,
    ) -> Result<Option<Vec<SortExpr>>> {
        if order_by.is_empty() {
            return Ok(None);
        }
        match self.resolve_order_by_output(order_by, &plan.schema())? {
            Some(keys) => Ok(Some(keys)),
            None => error::ColumnNotFoundSnafu {
                column: "ORDER BY key not in the output columns".to_string(),
            }
            .fail(),
        }
    }

    fn resolve_order_by_scope(
        &self,
        order_by: &[ast::OrderByExpr],
        scope: &Scope<'_>,
    ) -> Result<Vec<SortExpr>> {
        let mut keys = Vec::with_capacity(order_by.len());
        for item in order_by {
            let expr = self.resolve_expr(&item.expr, scope, false)?;
            keys.push(SortExpr {
                expr,
                ascending: item.asc.unwrap_or(true),
                nulls_first: item.nulls_first.unwrap_or(true),
            });
        }
        Ok(keys)
    }

    fn resolve_name(&self, scope: &Scope<'_>, parts: &[ast::Ident]) -> Result<Resolved> {
        let resolve_in = |schema: &SchemaRef| -> Result<Option<usize>> {
            match parts {
                [column] => {
                    if schema.is_ambiguous(&column.value) {
                        return error::AmbiguousColumnSnafu {
                            column: column.value.clone(),
                        }
                        .fail();
                    }
                    Ok(schema.index_of(&column.value))
                }
                [relation, column] => {
                    Ok(schema.index_of_qualified(&relation.value, &column.value))
                }
                _ => Ok(None),
            }
        };

        if let Some(index) = resolve_in(&scope.schema)? {
            return Ok(Resolved::Local(unqualified(&scope.schema, index)));
        }
        if let Some(outer) = scope.outer {
            if let Some(index) = resolve_in(&outer.schema)? {
                return Ok(Resolved::Outer(unqualified(&outer.schema, index)));
            }
        }
        let name = parts
            .iter()
            .map(|p| p.value.clone())
            .collect::<Vec<_>>()
            .join(".");
        error::ColumnNotFoundSnafu { column: name }.fail()
    }

    /// Resolve an AST expression against a scope. `allow_subquery` permits
    /// IN/EXISTS subqueries (WHERE position only).
    fn resolve_expr(
        &self,
        expr: &ast::Expr,
        scope: &Scope<'_>,
        allow_subquery: bool,
    ) -> Result<Expr> {
        use ast::Expr as E;
        let resolved = match expr {
            E::Identifier(ident) => match self.resolve_name(scope, &[ident.clone()])? {
                Resolved::Local(c) => Expr::Column(c),
                Resolved::Outer(c) => return correlated_unsupported(&c.name),
            },
            E::CompoundIdentifier(parts) => match self.resolve_name(scope, parts)? {
                Resolved::Local(c) => Expr::Column(c),
                Resolved::Outer(c) => return correlated_unsupported(&c.name),
            },
            E::Value(v) => Expr::Literal(literal_value(v)?),
            E::TypedString { data_type, value } => {
                self.resolve_typed_string(data_type, value)?
            }
            E::Nested(inner) => self.resolve_expr(inner, scope, allow_subquery)?,
            E::UnaryOp { op, expr } => {
                let inner = self.resolve_expr(expr, scope, allow_subquery)?;
                match op {
                    ast::UnaryOperator::Not => {
                        require_boolean(&inner, "NOT")?;
                        Expr::Not(Box::new(inner))
                    }
                    ast::UnaryOperator::Minus => {
                        if !inner.data_type().is_numeric() {
                            return error::TypeMismatchSnafu {
                                detail: format!("cannot negate {}", inner.data_type()),
                            }
                            .fail();
                        }
                        Expr::Negative(Box::new(inner))
                    }
                    ast::UnaryOperator::Plus => inner,
                    other => {
                        return unsupported(&format!("unary operator {other}"), None);
                    }
                }
            }
            E::IsNull(inner) => {
                Expr::IsNull(Box::new(self.resolve_expr(inner, scope, false)?))
            }
            E::IsNotNull(inner) => {
                Expr::IsNotNull(Box::new(self.resolve_expr(inner, scope, false)?))
            }
            E::BinaryOp { left, op, right } => {
                let left = self.resolve_expr(left, scope, allow_subquery)?;
                let right = self.resolve_expr(right, scope, allow_subquery)?;
                self.resolve_binary(left, op, right)?
            }
            E::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let expr = self.resolve_expr(expr, scope, false)?;
                let pattern = self.resolve_expr(pattern, scope, false)?;
                if expr.data_type() != ConcreteDataType::String {
                    return error::TypeMismatchSnafu {
                        detail: format!("LIKE requires a string, got {}", expr.data_type()),
                    }
                    .fail();
                }
                Expr::Like {
                    negated: *negated,
                    expr: Box::new(expr),
                    pattern: Box::new(pattern),
                }
            }
            E::InList {
                expr,
                list,
                negated,
            } => {
                let target = self.resolve_expr(expr, scope, false)?;
                let mut resolved = Vec::with_capacity(list.len());
                for item in list {
                    let item = self.resolve_expr(item, scope, false)?;
                    check_comparable(&target, &item, "IN")?;
                    resolved.push(item);
                }
                Expr::InList {
                    expr: Box::new(target),
                    list: resolved,
                    negated: *negated,
                }
            }
            E::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let target = self.resolve_expr(expr, scope, false)?;
                let low = self.resolve_expr(low, scope, false)?;
                let high = self.resolve_expr(high, scope, false)?;
                check_comparable(&target, &low, "BETWEEN")?;
                check_comparable(&target, &high, "BETWEEN")?;
                Expr::Between {
                    expr: Box::new(target),
                    negated: *negated,
                    low: Box::new(low),
                    high: Box::new(high),
                }
            }
            E::Cast {
                expr, data_type, ..
            } => Expr::Cast {
                expr: Box::new(self.resolve_expr(expr, scope, false)?),
                to: sql_type_to_concrete(data_type)?,
            },
            E::Function(f) => {
                let name = f.name.to_string().to_ascii_uppercase();
                if AggregateFunc::parse(&name).is_some() {
                    return error::NotAggregatedSnafu {
                        column: format!("aggregate {name} outside aggregate context"),
                    }
                    .fail();
                }
                let canonical = canonical_function_name(&name);
                let mut args = Vec::new();
                for arg in &f.args {
                    if let ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) = arg {
                        args.push(self.resolve_expr(e, scope, false)?);
                    }
                }
                Expr::Function {
                    name: canonical.to_string(),
                    args,
                }
            }
            E::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                if !allow_subquery {
                    return unsupported("subquery in this position", None);
                }
                let target = self.resolve_expr(expr, scope, false)?;
                let plan = self.plan_query_in_scope(subquery, &Scope::local(scope.schema.clone()))?;
                if plan.schema().num_columns() != 1 {
                    return error::TypeMismatchSnafu {
                        detail: "IN subquery must return exactly one column".to_string(),
                    }
                    .fail();
                }
                Expr::InSubquery {
                    expr: Box::new(target),
                    subquery: plan,
                    negated: *negated,
                }
            }
            E::Exists { subquery, negated } => {
                if !allow_subquery {
                    return unsupported("subquery in this position", None);
                }
                self.plan_exists(subquery, scope, *negated)?
            }
            other => {
                return unsupported(&format!("expression {other}"), None);
            }
        };
        Ok(fold_constants(resolved))
    }

    fn resolve_typed_string(&self, data_type: &ast::DataType, value: &str) -> Result<Expr> {
        let target = sql_type_to_concrete(data_type)?;
        let literal = match target {
            ConcreteDataType::Date => chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| {
                    error::TypeMismatchSnafu {
                        detail: format!("bad DATE literal {value}: {e}"),
                    }
                    .build()
                })?,
            ConcreteDataType::Timestamp => {
                chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
                    .map(Value::Timestamp)
                    .map_err(|e| {
                        error::TypeMismatchSnafu {
                            detail: format!("bad TIMESTAMP literal {value}: {e}"),
                        }
                        .build()
                    })?
            }
            _ => Value::String(value.to_string()),
        };
        Ok(Expr::Literal(literal))
    }

    fn resolve_binary(
        &self,
        left: Expr,
        op: &ast::BinaryOperator,
        right: Expr,
    ) -> Result<Expr> {
        use ast::BinaryOperator as AstOp;
        let op = match op {
            AstOp::And => BinaryOp::And,
            AstOp::Or => BinaryOp::Or,
            AstOp::Eq => BinaryOp::Eq,
            AstOp::NotEq => BinaryOp::NotEq,
            AstOp::Lt => BinaryOp::Lt,
            AstOp::LtEq => BinaryOp::LtEq,
            AstOp::Gt => BinaryOp::Gt,
            AstOp::GtEq => BinaryOp::GtEq,
            AstOp::Plus => BinaryOp::Plus,
            AstOp::Minus => BinaryOp::Minus,
            AstOp::Multiply => BinaryOp::Multiply,
            AstOp::Divide => BinaryOp::Divide,
            AstOp::Modulo => BinaryOp::Modulo,
            AstOp::StringConcat => BinaryOp::Concat,
            other => {
                return unsupported(&format!("operator {other}"), None);
            }
        };

        if op.is_logical() {
            require_boolean(&left, op.sql_symbol())?;
            require_boolean(&right, op.sql_symbol())?;
        } else if op.is_comparison() {
            check_comparable(&left, &right, op.sql_symbol())?;
        } else if op == BinaryOp::Concat {
            // Accepted for any operand; rendered per dialect.
        } else {
            let both_numeric = left.data_type().is_numeric() && right.data_type().is_numeric();
            if !both_numeric {
                return error::TypeMismatchSnafu {
                    detail: format!(
                        "operator {} requires numeric operands, got {} and {}",
                        op.sql_symbol(),
                        left.data_type(),
                        right.data_type()
                    ),
                }
                .fail();
            }
        }

        Ok(Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    /// Plan an EXISTS subquery, extracting top-level equality correlation
    /// against the outer scope into join pairs.
    fn plan_exists(
        &self,
        subquery: &ast::Query,
        scope: &Scope<'_>,
        negated: bool,
    ) -> Result<Expr> {
        let ast::SetExpr::Select(select) = subquery.body.as_ref() else {
            return unsupported("EXISTS over a non-SELECT body", None);
        };

        // Plan the subquery FROM to get the inner scope.
        if select.from.is_empty() {
            return unsupported("EXISTS without FROM", None);
        }
        let mut inner_plan = self.plan_table_with_joins(&select.from[0], scope)?;
        for extra in &select.from[1..] {
            let right = self.plan_table_with_joins(extra, scope)?;
            inner_plan = cross_join(inner_plan, right);
        }
        let inner_schema = inner_plan.schema();
        let inner_scope = Scope::local(inner_schema.clone());

        // Split the inner WHERE into correlated equality conjuncts and
        // purely local ones.
        let mut correlated: Vec<(Expr, Expr)> = Vec::new();
        let mut local = Vec::new();
        if let Some(selection) = &select.selection {
            for conjunct in split_ast_conjuncts(selection) {
                match self.classify_correlation(&conjunct, &inner_scope, scope)? {
                    Some(pair) => correlated.push(pair),
                    None => {
                        local.push(self.resolve_expr(&conjunct, &inner_scope, false)?);
                    }
                }
            }
        }
        if let Some(predicate) = conjoin(local) {
            inner_plan = Arc::new(LogicalPlan::Filter(Filter {
                predicate,
                input: inner_plan,
                always_empty: false,
            }));
        }

        // EXISTS ignores the projection; project just the inner halves of
        // the correlation so the rewrite rule can join on positions.
        let mut exprs = Vec::new();
        let mut remapped_pairs = Vec::new();
        for (index, (outer_expr, inner_expr)) in correlated.into_iter().enumerate() {
            let name = format!("corr_{index}");
            exprs.push((inner_expr.clone(), name.clone()));
            remapped_pairs.push((
                outer_expr,
                Expr::Column(ColumnRef {
                    index,
                    name,
                    relation: None,
                    data_type: inner_expr.data_type(),
                    nullable: inner_expr.nullable(),
                }),
            ));
        }
        let projected: PlanRef = if exprs.is_empty() {
            inner_plan
        } else {
            let schema = Arc::new(Schema::new(
                exprs
                    .iter()
                    .map(|(e, n)| ColumnSchema::new(n.clone(), e.data_type(), e.nullable()))
                    .collect(),
            ));
            Arc::new(LogicalPlan::Project(Project {
                exprs,
                input: inner_plan,
                schema,
            }))
        };

        Ok(Expr::Exists {
            subquery: projected,
            correlated_on: remapped_pairs,
            negated,
        })
    }

    /// If `conjunct` is `inner_col = outer_col` (either side order),
    /// return the (outer, inner) expression pair.
    fn classify_correlation(
        &self,
        conjunct: &ast::Expr,
        inner: &Scope<'_>,
        outer: &Scope<'_>,
    ) -> Result<Option<(Expr, Expr)>> {
        let ast::Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } = conjunct
        else {
            return Ok(None);
        };
        let sides = [(left, right), (right, left)];
        for (a, b) in sides {
            let a_inner = self.try_resolve_column(a, inner);
            let b_outer = self.try_resolve_column(b, outer);
            if let (Some(inner_col), Some(outer_col)) = (a_inner, b_outer) {
                // Only treat it as correlation when the inner side does not
                // also resolve in the outer scope ambiguity-free.
                if self.try_resolve_column(a, outer).is_none() {
                    return Ok(Some((Expr::Column(outer_col), Expr::Column(inner_col))));
                }
            }
        }
        Ok(None)
    }

    fn try_resolve_column(&self, expr: &ast::Expr, scope: &Scope<'_>) -> Option<ColumnRef> {
        let parts: Vec<ast::Ident> = match expr {
            ast::Expr::Identifier(ident) => vec![ident.clone()],
            ast::Expr::CompoundIdentifier(parts) => parts.clone(),
            _ => return None,
        };
        let bare = Scope::local(scope.schema.clone());
        match self.resolve_name(&bare, &parts) {
            Ok(Resolved::Local(c)) => Some(c),
            _ => None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

fn unqualified(schema: &SchemaRef, index: usize) -> ColumnRef {
    column_ref_inner(schema, index)
}

fn column_ref(schema: &SchemaRef, index: usize) -> Expr {
    Expr::Column(column_ref_inner(schema, index))
}

fn column_ref_inner(schema: &SchemaRef, index: usize) -> ColumnRef {
    let column = schema.column_schema(index);
    ColumnRef {
        index,
        name: column.name.clone(),
        relation: column.relation.clone(),
        data_type: column.data_type,
        nullable: column.nullable,
    }
}

fn cross_join(left: PlanRef, right: PlanRef) -> PlanRef {
    let schema = Arc::new(join_schema(
        &left.schema(),
        &right.schema(),
        JoinType::Inner,
    ));
    Arc::new(LogicalPlan::Join(Join {
        left,
        right,
        join_type: JoinType::Inner,
        on: vec![],
        filter: None,
        schema,
    }))
}

/// Wrap a plan so its output columns carry `alias` as their relation.
fn alias_outputs(plan: PlanRef, alias: &str) -> PlanRef {
    let schema = plan.schema();
    let exprs: Vec<(Expr, String)> = schema
        .column_schemas()
        .iter()
        .enumerate()
        .map(|(i, c)| {
            (
                Expr::Column(ColumnRef {
                    index: i,
                    name: c.name.clone(),
                    relation: c.relation.clone(),
                    data_type: c.data_type,
                    nullable: c.nullable,
                }),
                c.name.clone(),
            )
        })
        .collect();
    let aliased = Arc::new(Schema::new(
        schema
            .column_schemas()
            .iter()
            .map(|c| {
                ColumnSchema::new(c.name.clone(), c.data_type, c.nullable).with_relation(alias)
            })
            .collect(),
    ));
    Arc::new(LogicalPlan::Project(Project {
        exprs,
        input: plan,
        schema: aliased,
    }))
}

/// DISTINCT is an aggregate grouping on every output column.
fn distinct_over(plan: PlanRef) -> PlanRef {
    let schema = plan.schema();
    let group_exprs: Vec<(Expr, String)> = schema
        .column_schemas()
        .iter()
        .enumerate()
        .map(|(i, c)| (column_ref(&schema, i), c.name.clone()))
        .collect();
    let agg_schema = Arc::new(aggregate_schema(&group_exprs, &[], AggregateMode::Complete));
    Arc::new(LogicalPlan::Aggregate(Aggregate {
        input: plan,
        group_exprs,
        aggregates: vec![],
        mode: AggregateMode::Complete,
        splittable: false,
        schema: agg_schema,
    }))
}

fn group_by_exprs(select: &ast::Select) -> Result<Vec<ast::Expr>> {
    match &select.group_by {
        ast::GroupByExpr::Expressions(exprs) => Ok(exprs.clone()),
        ast::GroupByExpr::All => unsupported("GROUP BY ALL", None),
    }
}

/// All aggregate calls appearing in the projection, HAVING or ORDER BY,
/// deduplicated by their rendered form.
fn collect_aggregate_calls(select: &ast::Select) -> Result<Vec<ast::Function>> {
    let mut calls: Vec<ast::Function> = Vec::new();
    let mut visit = |expr: &ast::Expr| collect_aggregates_in(expr, &mut calls);
    for item in &select.projection {
        if let Some(expr) = match item {
            ast::SelectItem::UnnamedExpr(e) => Some(e),
            ast::SelectItem::ExprWithAlias { expr, .. } => Some(expr),
            _ => None,
        } {
            visit(expr);
        }
    }
    if let Some(having) = &select.having {
        visit(having);
    }
    Ok(calls)
}

fn collect_aggregates_in(expr: &ast::Expr, out: &mut Vec<ast::Function>) {
    use ast::Expr as E;
    match expr {
        E::Function(f) => {
            if AggregateFunc::parse(&f.name.to_string()).is_some() {
                if !out.iter().any(|existing| existing == f) {
                    out.push(f.clone());
                }
            } else {
                for arg in &f.args {
                    if let ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) = arg {
                        collect_aggregates_in(e, out);
                    }
                }
            }
        }
        E::BinaryOp { left, right, .. } => {
            collect_aggregates_in(left, out);
            collect_aggregates_in(right, out);
        }
        E::UnaryOp { expr, .. }
        | E::Nested(expr)
        | E::IsNull(expr)
        | E::IsNotNull(expr)
        | E::Cast { expr, .. } => collect_aggregates_in(expr, out),
        E::Between {
            expr, low, high, ..
        } => {
            collect_aggregates_in(expr, out);
            collect_aggregates_in(low, out);
            collect_aggregates_in(high, out);
        }
        E::InList { expr, list, .. } => {
            collect_aggregates_in(expr, out);
            for item in list {
                collect_aggregates_in(item, out);
            }
        }
        _ => {}
    }
}

fn contains_aggregate(expr: &ast::Expr) -> bool {
    let mut calls = Vec::new();
    collect_aggregates_in(expr, &mut calls);
    !calls.is_empty()
}

/// Rewrites post-aggregation expressions: group keys and aggregate calls
/// become column references into the aggregate output.
struct AggregateRewriter<'a> {
    planner: &'a Planner<'a>,
    group_by: &'a [ast::Expr],
    aggregate_calls: &'a [ast::Function],
    agg_schema: &'a SchemaRef,
    input_scope: Scope<'a>,
}

impl AggregateRewriter<'_> {
    fn rewrite(&self, expr: &ast::Expr) -> Result<Expr> {
        // A group key expression maps to its output position.
        if let Some(position) = self.group_by.iter().position(|g| g == expr) {
            return Ok(column_ref(self.agg_schema, position));
        }
        // An aggregate call maps to its output column.
        if let ast::Expr::Function(f) = expr {
            if AggregateFunc::parse(&f.name.to_string()).is_some() {
                let position = self
                    .aggregate_calls
                    .iter()
                    .position(|c| c == f)
                    .ok_or_else(|| {
                        error::NestedAggregateSnafu {
                            function: f.name.to_string(),
                        }
                        .build()
                    })?;
                let index = self.group_by.len() + position;
                return Ok(column_ref(self.agg_schema, index));
            }
        }
        // Otherwise recurse; bare columns at this point are invalid.
        use ast::Expr as E;
        match expr {
            E::Identifier(_) | E::CompoundIdentifier(_) => {
                // Group keys that are bare columns were handled above.
                match self.planner.resolve_expr(expr, &self.input_scope, false) {
                    Ok(_) => error::NotAggregatedSnafu {
                        column: expr.to_string(),
                    }
                    .fail(),
                    Err(e) => Err(e),
                }
            }
            E::Value(_) => self.planner.resolve_expr(expr, &self.input_scope, false),
            E::Nested(inner) => self.rewrite(inner),
            E::UnaryOp { op, expr } => {
                let rewritten = self.rewrite(expr)?;
                match op {
                    ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(rewritten))),
                    ast::UnaryOperator::Minus => Ok(Expr::Negative(Box::new(rewritten))),
                    ast::UnaryOperator::Plus => Ok(rewritten),
                    other => unsupported(&format!("unary operator {other}"), None),
                }
            }
            E::BinaryOp { left, op, right } => {
                let left = self.rewrite(left)?;
                let right = self.rewrite(right)?;
                self.planner.resolve_binary(left, op, right)
            }
            E::IsNull(inner) => Ok(Expr::IsNull(Box::new(self.rewrite(inner)?))),
            E::IsNotNull(inner) => Ok(Expr::IsNotNull(Box::new(self.rewrite(inner)?))),
            E::Cast {
                expr, data_type, ..
            } => Ok(Expr::Cast {
                expr: Box::new(self.rewrite(expr)?),
                to: sql_type_to_concrete(data_type)?,
            }),
            E::Function(f) => {
                let mut args = Vec::new();
                for arg in &f.args {
                    if let ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) = arg {
                        args.push(self.rewrite(e)?);
                    }
                }
                Ok(Expr::Function {
                    name: canonical_function_name(&f.name.to_string().to_ascii_uppercase())
                        .to_string(),
                    args,
                })
            }
            other => unsupported(&format!("expression {other} after aggregation"), None),
        }
    }
}

fn projection_item(item: &ast::SelectItem) -> Result<(&ast::Expr, Option<String>)> {
    match item {
        ast::SelectItem::UnnamedExpr(expr) => Ok((expr, None)),
        ast::SelectItem::ExprWithAlias { expr, alias } => Ok((expr, Some(alias.value.clone()))),
        other => unsupported(&format!("projection item {other}"), None),
    }
}

fn projection_name(ast_expr: &ast::Expr, resolved: &Expr) -> String {
    match ast_expr {
        ast::Expr::Identifier(ident) => ident.value.clone(),
        ast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_else(|| resolved.output_name()),
        _ => resolved.output_name(),
    }
}

fn aggregate_alias(call: &ast::Function) -> String {
    call.to_string().to_ascii_lowercase()
}

fn object_name_parts(name: &ast::ObjectName) -> Result<(Option<String>, String)> {
    match name.0.as_slice() {
        [table] => Ok((None, table.value.clone())),
        [schema, table] => Ok((Some(schema.value.clone()), table.value.clone())),
        _ => unsupported(&format!("table name {name}"), Some("use schema.table")),
    }
}

fn literal_value(v: &ast::Value) -> Result<Value> {
    let value = match v {
        ast::Value::Number(n, _) => {
            if n.contains('.') || n.contains('e') || n.contains('E') {
                Value::Double(n.parse::<f64>().map_err(|e| {
                    error::TypeMismatchSnafu {
                        detail: format!("bad numeric literal {n}: {e}"),
                    }
                    .build()
                })?)
            } else if let Ok(small) = n.parse::<i32>() {
                Value::Integer(small)
            } else {
                Value::Long(n.parse::<i64>().map_err(|e| {
                    error::TypeMismatchSnafu {
                        detail: format!("bad numeric literal {n}: {e}"),
                    }
                    .build()
                })?)
            }
        }
        ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
            Value::String(s.clone())
        }
        ast::Value::Boolean(b) => Value::Boolean(*b),
        ast::Value::Null => Value::Null,
        other => {
            return unsupported(&format!("literal {other}"), None);
        }
    };
    Ok(value)
}

fn sql_type_to_concrete(data_type: &ast::DataType) -> Result<ConcreteDataType> {
    use ast::DataType as T;
    let concrete = match data_type {
        T::Char(_) | T::Varchar(_) | T::Text | T::String => ConcreteDataType::String,
        T::TinyInt(_) | T::SmallInt(_) | T::Int(_) | T::Integer(_) => ConcreteDataType::Integer,
        T::BigInt(_) => ConcreteDataType::Long,
        T::Float(_) | T::Double | T::DoublePrecision | T::Real | T::Decimal(_) => {
            ConcreteDataType::Double
        }
        T::Boolean => ConcreteDataType::Boolean,
        T::Date => ConcreteDataType::Date,
        T::Timestamp(_, _) | T::Datetime(_) => ConcreteDataType::Timestamp,
        T::Binary(_) | T::Varbinary(_) | T::Blob(_) | T::Bytea => ConcreteDataType::Binary,
        T::JSON => ConcreteDataType::Json,
        T::Array(_) => ConcreteDataType::Array,
        other => {
            return unsupported(&format!("data type {other}"), None);
        }
    };
    Ok(concrete)
}

/// Canonical internal function names; dialect-specific spellings collapse
/// here and the translator re-renders per target.
fn canonical_function_name(upper: &str) -> &str {
    match upper {
        "NVL" | "IFNULL" => "COALESCE",
        "LEN" => "LENGTH",
        "TO_CHAR" => "DATE_FORMAT",
        other => other,
    }
}

fn split_ast_conjuncts(expr: &ast::Expr) -> Vec<ast::Expr> {
    let mut out = Vec::new();
    fn walk(expr: &ast::Expr, out: &mut Vec<ast::Expr>) {
        match expr {
            ast::Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                walk(left, out);
                walk(right, out);
            }
            ast::Expr::Nested(inner) => walk(inner, out),
            other => out.push(other.clone()),
        }
    }
    walk(expr, &mut out);
    out
}

/// Split a resolved join condition (over the combined schema) into equi
/// pairs and a residual filter.
fn split_join_condition(
    condition: Expr,
    left_columns: usize,
) -> (Vec<(Expr, Expr)>, Option<Expr>) {
    let mut on = Vec::new();
    let mut residual = Vec::new();
    for conjunct in crate::expr::split_conjunction(&condition) {
        if let Expr::BinaryOp {
            left,
            op: BinaryOp::Eq,
            right,
        } = &conjunct
        {
            let left_cols = left.referenced_columns();
            let right_cols = right.referenced_columns();
            let all_left = |cols: &std::collections::BTreeSet<usize>| {
                !cols.is_empty() && cols.iter().all(|i| *i < left_columns)
            };
            let all_right = |cols: &std::collections::BTreeSet<usize>| {
                !cols.is_empty() && cols.iter().all(|i| *i >= left_columns)
            };
            let to_right = |e: &Expr| {
                e.remap_columns(&|i| {
                    if i >= left_columns {
                        Some(i - left_columns)
                    } else {
                        None
                    }
                })
            };
            if all_left(&left_cols) && all_right(&right_cols) {
                if let Some(right_side) = to_right(right) {
                    on.push(((**left).clone(), right_side));
                    continue;
                }
            } else if all_left(&right_cols) && all_right(&left_cols) {
                if let Some(left_side) = to_right(left) {
                    on.push(((**right).clone(), left_side));
                    continue;
                }
            }
        }
        residual.push(conjunct);
    }
    (on, conjoin(residual))
}

fn check_comparable(left: &Expr, right: &Expr, context: &str) -> Result<()> {
    let (l, r) = (left.data_type(), right.data_type());
    // Null literals compare with anything.
    let left_null = matches!(left, Expr::Literal(Value::Null));
    let right_null = matches!(right, Expr::Literal(Value::Null));
    // String literals compared against temporal columns are coerced by
    // the sources, so they pass validation.
    let temporal_string = (l.is_temporal() && r == ConcreteDataType::String)
        || (r.is_temporal() && l == ConcreteDataType::String);
    if left_null || right_null || l.is_comparable_to(&r) || temporal_string {
        Ok(())
    } else {
        error::TypeMismatchSnafu {
            detail: format!("{context} cannot compare {l} with {r}"),
        }
        .fail()
    }
}

fn require_boolean(expr: &Expr, context: &str) -> Result<()> {
    if expr.data_type() == ConcreteDataType::Boolean {
        Ok(())
    } else {
        error::TypeMismatchSnafu {
            detail: format!("{context} requires a boolean, got {}", expr.data_type()),
        }
        .fail()
    }
}

/// Minimal constant folding: comparisons and logic over two literals.
fn fold_constants(expr: Expr) -> Expr {
    if let Expr::BinaryOp { left, op, right } = &expr {
        if let (Expr::Literal(l), Expr::Literal(r)) = (left.as_ref(), right.as_ref()) {
            if op.is_comparison() && !l.is_null() && !r.is_null() {
                let ordering = l.compare(r);
                let result = match op {
                    BinaryOp::Eq => ordering == std::cmp::Ordering::Equal,
                    BinaryOp::NotEq => ordering != std::cmp::Ordering::Equal,
                    BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                    BinaryOp::LtEq => ordering != std::cmp::Ordering::Greater,
                    BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                    BinaryOp::GtEq => ordering != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                return Expr::Literal(Value::Boolean(result));
            }
        }
    }
    expr
}

fn const_usize(expr: &ast::Expr) -> Result<usize> {
    match expr {
        ast::Expr::Value(ast::Value::Number(n, _)) => n.parse::<usize>().map_err(|e| {
            error::TypeMismatchSnafu {
                detail: format!("bad LIMIT/OFFSET literal {n}: {e}"),
            }
            .build()
        }),
        other => unsupported(&format!("non-literal LIMIT/OFFSET {other}"), None),
    }
}

fn unsupported<T>(feature: &str, suggestion: Option<&str>) -> Result<T> {
    error::UnsupportedFeatureSnafu {
        feature: feature.to_string(),
        suggestion: suggestion.map(|s| s.to_string()),
    }
    .fail()
}

fn correlated_unsupported<T>(column: &str) -> Result<T> {
    unsupported(
        &format!("correlated reference to outer column {column}"),
        Some("only equality-correlated EXISTS subqueries are supported"),
    )
}
