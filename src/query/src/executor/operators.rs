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

//! The federation operators, each a pull-based row stream: construction
//! opens the operator, polling drives it, dropping closes it and every
//! child under it. The hash-join build and the sort buffer are the only
//! materialization points; both consume quota-bounded inputs.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_stream::try_stream;
use common_rows::adapter::RowStreamAdapter;
use common_rows::{EmptyRowStream, Row, SendableRowStream};
use datatypes::prelude::{KeyValue, SchemaRef, Value};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{self, Result};
use crate::executor::eval::{evaluate, evaluate_predicate};
use crate::executor::quota::RowQuotaRef;
use crate::executor::ExecutionContext;
use crate::expr::{AggregateExpr, AggregateFunc, Expr, SortExpr};
use crate::physical::{PhysicalOperator, StageId};
use crate::plan::{AggregateMode, JoinType};

/// Assemble the operator pipeline over the per-stage input streams. Each
/// stage stream is consumed by exactly one `StageInput`.
pub(crate) fn build_operator(
    op: &PhysicalOperator,
    stage_streams: &mut HashMap<StageId, SendableRowStream>,
    quota: Option<&RowQuotaRef>,
    token: &CancellationToken,
    ctx: &Arc<ExecutionContext>,
) -> Result<SendableRowStream> {
    match op {
        PhysicalOperator::StageInput { stage, schema } => {
            let stream = stage_streams.remove(stage).ok_or_else(|| {
                error::ExecutionSnafu {
                    detail: format!("stage {stage} stream consumed twice"),
                }
                .build()
            })?;
            Ok(stage_input(
                schema.clone(),
                stream,
                quota.cloned(),
                token.clone(),
                ctx.clone(),
            ))
        }
        PhysicalOperator::Filter { predicate, input } => {
            let child = build_operator(input, stage_streams, quota, token, ctx)?;
            Ok(filter_stream(child, predicate.clone()))
        }
        PhysicalOperator::Project {
            exprs,
            schema,
            input,
        } => {
            let child = build_operator(input, stage_streams, quota, token, ctx)?;
            Ok(project_stream(child, schema.clone(), exprs.clone()))
        }
        PhysicalOperator::HashJoin {
            join_type,
            on,
            filter,
            schema,
            build_left,
            left,
            right,
        } => {
            let left_width = left.schema().num_columns();
            let right_width = right.schema().num_columns();
            let left_stream = build_operator(left, stage_streams, quota, token, ctx)?;
            let right_stream = build_operator(right, stage_streams, quota, token, ctx)?;
            Ok(hash_join_stream(HashJoinParams {
                schema: schema.clone(),
                join_type: *join_type,
                on: on.clone(),
                filter: filter.clone(),
                build_left: *build_left,
                left_width,
                right_width,
                left: left_stream,
                right: right_stream,
            }))
        }
        PhysicalOperator::Aggregate {
            mode,
            group_count,
            group_exprs,
            aggregates,
            schema,
            input,
        } => {
            let child = build_operator(input, stage_streams, quota, token, ctx)?;
            Ok(aggregate_stream(
                child,
                schema.clone(),
                *mode,
                *group_count,
                group_exprs.clone(),
                aggregates.clone(),
            ))
        }
        PhysicalOperator::Sort {
            exprs,
            fetch,
            input,
        } => {
            let child = build_operator(input, stage_streams, quota, token, ctx)?;
            Ok(sort_stream(child, exprs.clone(), *fetch))
        }
        PhysicalOperator::Limit { skip, fetch, input } => {
            let child = build_operator(input, stage_streams, quota, token, ctx)?;
            Ok(limit_stream(child, *skip, *fetch))
        }
        PhysicalOperator::Union { schema, inputs } => {
            let mut children = Vec::with_capacity(inputs.len());
            for input in inputs {
                children.push(build_operator(input, stage_streams, quota, token, ctx)?);
            }
            Ok(union_stream(schema.clone(), children))
        }
        PhysicalOperator::Empty { schema } => {
            Ok(Box::pin(EmptyRowStream::new(schema.clone())))
        }
    }
}

/// Wraps a stage stream: observes cancellation, charges the intermediate
/// quota, and truncates cleanly on overflow.
fn stage_input(
    schema: SchemaRef,
    mut stream: SendableRowStream,
    quota: Option<RowQuotaRef>,
    token: CancellationToken,
    ctx: Arc<ExecutionContext>,
) -> SendableRowStream {
    let out = try_stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                next = stream.next() => next,
            };
            if token.is_cancelled() {
                Err(cancelled(&ctx))?;
            }
            let Some(row) = next else { break };
            let row = row?;
            if let Some(quota) = &quota {
                if !quota.try_charge() {
                    ctx.mark_truncated(quota.limit());
                    break;
                }
            }
            yield row;
        }
    };
    Box::pin(RowStreamAdapter::new(schema, Box::pin(out)))
}

fn cancelled(ctx: &ExecutionContext) -> common_rows::error::Error {
    common_rows::error::Error::external(
        error::CancelledSnafu {
            query_id: ctx.query_id.to_string(),
        }
        .build(),
    )
}

fn to_row_error(e: crate::error::Error) -> common_rows::error::Error {
    common_rows::error::Error::external(e)
}

fn filter_stream(mut input: SendableRowStream, predicate: Expr) -> SendableRowStream {
    let schema = input.schema();
    let out = try_stream! {
        while let Some(row) = input.next().await {
            let row = row?;
            if evaluate_predicate(&predicate, &row).map_err(to_row_error)? {
                yield row;
            }
        }
    };
    Box::pin(RowStreamAdapter::new(schema, Box::pin(out)))
}

fn project_stream(
    mut input: SendableRowStream,
    schema: SchemaRef,
    exprs: Vec<(Expr, String)>,
) -> SendableRowStream {
    let out_schema = schema.clone();
    let out = try_stream! {
        while let Some(row) = input.next().await {
            let row = row?;
            let mut values = Vec::with_capacity(exprs.len());
            for (expr, _) in &exprs {
                values.push(evaluate(expr, &row).map_err(to_row_error)?);
            }
            yield Row::new(values);
        }
    };
    Box::pin(RowStreamAdapter::new(out_schema, Box::pin(out)))
}

struct HashJoinParams {
    schema: SchemaRef,
    join_type: JoinType,
    on: Vec<(Expr, Expr)>,
    filter: Option<Expr>,
    build_left: bool,
    left_width: usize,
    right_width: usize,
    left: SendableRowStream,
    right: SendableRowStream,
}

/// Group key: per-column normalized key, `None` per null column. A key
/// containing any null never matches (join keys), but grouping treats
/// null as its own group.
type JoinKey = Vec<KeyValue>;

fn join_key(exprs: &[Expr], row: &Row) -> Result<Option<JoinKey>> {
    let mut key = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match evaluate(expr, row)?.as_key() {
            Some(k) => key.push(k),
            // Null keys never join.
            None => return Ok(None),
        }
    }
    Ok(Some(key))
}

fn hash_join_stream(params: HashJoinParams) -> SendableRowStream {
    let HashJoinParams {
        schema,
        join_type,
        on,
        filter,
        build_left,
        left_width,
        right_width,
        left,
        right,
    } = params;
    let out_schema = schema.clone();

    let out = try_stream! {
        let (mut build, mut probe, probe_is_left) = if build_left {
            (left, right, false)
        } else {
            (right, left, true)
        };
        let (build_keys, probe_keys): (Vec<Expr>, Vec<Expr>) = if build_left {
            (
                on.iter().map(|(l, _)| l.clone()).collect(),
                on.iter().map(|(_, r)| r.clone()).collect(),
            )
        } else {
            (
                on.iter().map(|(_, r)| r.clone()).collect(),
                on.iter().map(|(l, _)| l.clone()).collect(),
            )
        };

        // Build phase: materialize the (smaller) build input. The probe
        // side cannot start until this completes.
        let mut build_rows: Vec<Row> = Vec::new();
        let mut matched: Vec<bool> = Vec::new();
        let mut table: HashMap<JoinKey, Vec<usize>> = HashMap::new();
        let mut null_key_build: Vec<usize> = Vec::new();
        while let Some(row) = build.next().await {
            let row = row?;
            let index = build_rows.len();
            match join_key(&build_keys, &row).map_err(to_row_error)? {
                Some(key) => table.entry(key).or_default().push(index),
                None => null_key_build.push(index),
            }
            build_rows.push(row);
            matched.push(false);
        }

        let preserve_probe = match join_type {
            JoinType::Full => true,
            JoinType::Left => probe_is_left,
            JoinType::Right => !probe_is_left,
            _ => false,
        };
        let preserve_build = match join_type {
            JoinType::Full => true,
            JoinType::Left => !probe_is_left,
            JoinType::Right => probe_is_left,
            _ => false,
        };
        let semi_or_anti = matches!(join_type, JoinType::LeftSemi | JoinType::LeftAnti);

        // Probe phase.
        while let Some(row) = probe.next().await {
            let probe_row = row?;
            let key = join_key(&probe_keys, &probe_row).map_err(to_row_error)?;
            let candidates = key.and_then(|k| table.get(&k));

            let mut any_match = false;
            if let Some(candidates) = candidates {
                for build_index in candidates {
                    let build_row = &build_rows[*build_index];
                    let combined = combine(
                        &probe_row,
                        build_row,
                        probe_is_left,
                        semi_or_anti,
                    );
                    if let Some(residual) = &filter {
                        if !evaluate_predicate(residual, &combined)
                            .map_err(to_row_error)?
                        {
                            continue;
                        }
                    }
                    any_match = true;
                    matched[*build_index] = true;
                    match join_type {
                        JoinType::LeftSemi => {
                            yield probe_row.clone();
                            break;
                        }
                        JoinType::LeftAnti => break,
                        _ => yield combined,
                    }
                }
            }

            if !any_match {
                if join_type == JoinType::LeftAnti {
                    yield probe_row;
                } else if preserve_probe {
                    yield null_extend(
                        &probe_row,
                        probe_is_left,
                        left_width,
                        right_width,
                    );
                }
            }
        }

        // Emit unmatched build rows for the outer variants that preserve
        // the build side: exactly one null-extended row each.
        if preserve_build {
            for (index, row) in build_rows.iter().enumerate() {
                if !matched[index] {
                    yield null_extend(row, !probe_is_left, left_width, right_width);
                }
            }
            for index in null_key_build {
                if !matched[index] {
                    yield null_extend(
                        &build_rows[index],
                        !probe_is_left,
                        left_width,
                        right_width,
                    );
                }
            }
        }
    };
    Box::pin(RowStreamAdapter::new(out_schema, Box::pin(out)))
}

/// Combine probe and build rows in left-right output order.
fn combine(probe: &Row, build: &Row, probe_is_left: bool, semi_or_anti: bool) -> Row {
    if semi_or_anti {
        return probe.clone();
    }
    let mut values;
    if probe_is_left {
        values = probe.values().to_vec();
        values.extend_from_slice(build.values());
    } else {
        values = build.values().to_vec();
        values.extend_from_slice(probe.values());
    }
    Row::new(values)
}

/// A row from one side with nulls for the other side.
fn null_extend(row: &Row, row_is_left: bool, left_width: usize, right_width: usize) -> Row {
    let mut values = Vec::with_capacity(left_width + right_width);
    if row_is_left {
        values.extend_from_slice(row.values());
        values.extend(std::iter::repeat(Value::Null).take(right_width));
    } else {
        values.extend(std::iter::repeat(Value::Null).take(left_width));
        values.extend_from_slice(row.values());
    }
    Row::new(values)
}

/// Group key for aggregation: null is its own group.
type GroupKey = Vec<Option<KeyValue>>;

fn aggregate_stream(
    mut input: SendableRowStream,
    schema: SchemaRef,
    mode: AggregateMode,
    group_count: usize,
    group_exprs: Vec<Expr>,
    aggregates: Vec<AggregateExpr>,
) -> SendableRowStream {
    let out_schema = schema.clone();
    let out = try_stream! {
        let mut groups: HashMap<GroupKey, (Vec<Value>, Vec<Accumulator>)> = HashMap::new();

        while let Some(row) = input.next().await {
            let row = row?;
            let mut key = Vec::with_capacity(group_exprs.len());
            let mut key_values = Vec::with_capacity(group_exprs.len());
            for expr in &group_exprs {
                let value = evaluate(expr, &row).map_err(to_row_error)?;
                key.push(value.as_key());
                key_values.push(value);
            }
            let entry = groups.entry(key).or_insert_with(|| {
                (key_values.clone(), new_accumulators(&aggregates))
            });

            match mode {
                AggregateMode::Final => {
                    // Partial layout: group columns, then per-aggregate
                    // state columns (AVG carries two).
                    let mut offset = group_count;
                    for (i, aggregate) in aggregates.iter().enumerate() {
                        let width = partial_width(aggregate.func);
                        let state = &row.values()[offset..offset + width];
                        entry.1[i].merge(state);
                        offset += width;
                    }
                }
                _ => {
                    for (i, aggregate) in aggregates.iter().enumerate() {
                        let value = match &aggregate.arg {
                            Some(arg) => Some(evaluate(arg, &row).map_err(to_row_error)?),
                            None => None,
                        };
                        entry.1[i].update(value.as_ref());
                    }
                }
            }
        }

        // A global aggregate over zero rows still yields one row.
        if groups.is_empty() && group_exprs.is_empty() {
            groups.insert(Vec::new(), (Vec::new(), new_accumulators(&aggregates)));
        }

        for (_, (key_values, accumulators)) in groups {
            let mut values = key_values;
            for accumulator in accumulators {
                values.extend(accumulator.finalize(mode));
            }
            yield Row::new(values);
        }
    };
    Box::pin(RowStreamAdapter::new(out_schema, Box::pin(out)))
}

fn partial_width(func: AggregateFunc) -> usize {
    match func {
        AggregateFunc::Avg => 2,
        _ => 1,
    }
}

fn new_accumulators(aggregates: &[AggregateExpr]) -> Vec<Accumulator> {
    aggregates.iter().map(Accumulator::new).collect()
}

/// Per-function state implementing both the complete form and the
/// partial/final split: `update` consumes input values, `merge` combines
/// partial states, `finalize` emits the output (two columns for a
/// partial AVG).
enum Accumulator {
    Count(i64),
    Sum { sum: f64, any: bool, integral: bool },
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: i64 },
}

impl Accumulator {
    fn new(aggregate: &AggregateExpr) -> Self {
        match aggregate.func {
            AggregateFunc::Count => Accumulator::Count(0),
            AggregateFunc::Sum => {
                let integral = aggregate
                    .arg
                    .as_ref()
                    .map(|a| {
                        matches!(
                            a.data_type(),
                            datatypes::prelude::ConcreteDataType::Integer
                                | datatypes::prelude::ConcreteDataType::Long
                        )
                    })
                    .unwrap_or(false);
                Accumulator::Sum {
                    sum: 0.0,
                    any: false,
                    integral,
                }
            }
            AggregateFunc::Min => Accumulator::Min(None),
            AggregateFunc::Max => Accumulator::Max(None),
            AggregateFunc::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
        }
    }

    fn update(&mut self, value: Option<&Value>) {
        match self {
            Accumulator::Count(count) => {
                // COUNT(*) counts rows, COUNT(x) counts non-null values.
                match value {
                    None => *count += 1,
                    Some(v) if !v.is_null() => *count += 1,
                    _ => {}
                }
            }
            Accumulator::Sum { sum, any, .. } => {
                if let Some(v) = value.and_then(|v| v.as_f64()) {
                    *sum += v;
                    *any = true;
                }
            }
            Accumulator::Min(current) => {
                if let Some(v) = value {
                    if !v.is_null()
                        && current
                            .as_ref()
                            .map(|c| v.compare(c) == Ordering::Less)
                            .unwrap_or(true)
                    {
                        *current = Some(v.clone());
                    }
                }
            }
            Accumulator::Max(current) => {
                if let Some(v) = value {
                    if !v.is_null()
                        && current
                            .as_ref()
                            .map(|c| v.compare(c) == Ordering::Greater)
                            .unwrap_or(true)
                    {
                        *current = Some(v.clone());
                    }
                }
            }
            Accumulator::Avg { sum, count } => {
                if let Some(v) = value.and_then(|v| v.as_f64()) {
                    *sum += v;
                    *count += 1;
                }
            }
        }
    }

    /// Combine one partial state (the columns a pushed partial aggregate
    /// shipped for this function).
    fn merge(&mut self, state: &[Value]) {
        match self {
            Accumulator::Count(count) => {
                if let Some(v) = state.first().and_then(|v| v.as_i64()) {
                    *count += v;
                }
            }
            Accumulator::Sum { sum, any, .. } => {
                if let Some(v) = state.first().and_then(|v| v.as_f64()) {
                    *sum += v;
                    *any = true;
                }
            }
            Accumulator::Min(_) | Accumulator::Max(_) => {
                self.update(state.first());
            }
            Accumulator::Avg { sum, count } => {
                if let Some(v) = state.first().and_then(|v| v.as_f64()) {
                    *sum += v;
                }
                if let Some(v) = state.get(1).and_then(|v| v.as_i64()) {
                    *count += v;
                }
            }
        }
    }

    fn finalize(self, mode: AggregateMode) -> Vec<Value> {
        match self {
            Accumulator::Count(count) => vec![Value::Long(count)],
            Accumulator::Sum { sum, any, integral } => {
                if !any {
                    vec![Value::Null]
                } else if integral {
                    vec![Value::Long(sum as i64)]
                } else {
                    vec![Value::Double(sum)]
                }
            }
            Accumulator::Min(value) | Accumulator::Max(value) => {
                vec![value.unwrap_or(Value::Null)]
            }
            Accumulator::Avg { sum, count } => match mode {
                // The partial half ships sum and count separately.
                AggregateMode::Partial => {
                    vec![Value::Double(sum), Value::Long(count)]
                }
                _ => {
                    if count == 0 {
                        vec![Value::Null]
                    } else {
                        vec![Value::Double(sum / count as f64)]
                    }
                }
            },
        }
    }
}

fn sort_stream(
    mut input: SendableRowStream,
    keys: Vec<SortExpr>,
    fetch: Option<usize>,
) -> SendableRowStream {
    let schema = input.schema();
    let out = try_stream! {
        let mut rows: Vec<(Vec<Value>, Row)> = Vec::new();
        while let Some(row) = input.next().await {
            let row = row?;
            let mut key = Vec::with_capacity(keys.len());
            for sort_key in &keys {
                key.push(evaluate(&sort_key.expr, &row).map_err(to_row_error)?);
            }
            rows.push((key, row));
        }

        rows.sort_by(|(a, _), (b, _)| {
            for (i, sort_key) in keys.iter().enumerate() {
                let ordering = compare_sort_values(
                    &a[i],
                    &b[i],
                    sort_key.nulls_first,
                );
                let ordering = if sort_key.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        if let Some(fetch) = fetch {
            rows.truncate(fetch);
        }
        for (_, row) in rows {
            yield row;
        }
    };
    Box::pin(RowStreamAdapter::new(schema, Box::pin(out)))
}

fn compare_sort_values(a: &Value, b: &Value, nulls_first: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            if nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => a.compare(b),
    }
}

fn limit_stream(
    mut input: SendableRowStream,
    skip: usize,
    fetch: Option<usize>,
) -> SendableRowStream {
    let schema = input.schema();
    let out = try_stream! {
        let mut skipped = 0;
        let mut emitted = 0;
        while let Some(row) = input.next().await {
            let row = row?;
            if skipped < skip {
                skipped += 1;
                continue;
            }
            if let Some(fetch) = fetch {
                if emitted >= fetch {
                    break;
                }
            }
            emitted += 1;
            yield row;
        }
    };
    Box::pin(RowStreamAdapter::new(schema, Box::pin(out)))
}

fn union_stream(schema: SchemaRef, inputs: Vec<SendableRowStream>) -> SendableRowStream {
    let out = try_stream! {
        for mut input in inputs {
            while let Some(row) = input.next().await {
                yield row?;
            }
        }
    };
    Box::pin(RowStreamAdapter::new(schema, Box::pin(out)))
}

#[cfg(test)]
mod tests {
    use datatypes::prelude::ConcreteDataType;

    use super::*;

    fn agg(func: AggregateFunc) -> AggregateExpr {
        AggregateExpr {
            func,
            arg: Some(Expr::column(0, "v", ConcreteDataType::Double, true)),
            distinct: false,
            alias: format!("{}(v)", func.name().to_ascii_lowercase()),
        }
    }

    /// Splitting over arbitrary partitions must equal aggregating the
    /// concatenation: `final(partials) == complete(all)`.
    #[test]
    fn test_split_equals_complete_for_every_function() {
        let values: Vec<f64> = vec![3.0, -1.5, 8.0, 0.0, 12.25, 7.0, -4.0];
        let partitions: Vec<&[f64]> = vec![&values[0..2], &values[2..2], &values[2..5], &values[5..]];

        for func in [
            AggregateFunc::Count,
            AggregateFunc::Sum,
            AggregateFunc::Min,
            AggregateFunc::Max,
            AggregateFunc::Avg,
        ] {
            let spec = agg(func);

            let mut complete = Accumulator::new(&spec);
            for v in &values {
                complete.update(Some(&Value::Double(*v)));
            }
            let expected = complete.finalize(AggregateMode::Complete);

            let mut global = Accumulator::new(&spec);
            for partition in &partitions {
                let mut local = Accumulator::new(&spec);
                for v in *partition {
                    local.update(Some(&Value::Double(*v)));
                }
                let state = local.finalize(AggregateMode::Partial);
                global.merge(&state);
            }
            let combined = global.finalize(AggregateMode::Final);

            match (&expected[0], &combined[0]) {
                (Value::Double(a), Value::Double(b)) => {
                    assert!((a - b).abs() < 1e-9, "{func:?}: {a} vs {b}")
                }
                (a, b) => assert_eq!(a, b, "{func:?}"),
            }
        }
    }

    #[test]
    fn test_count_star_counts_nulls_and_count_column_does_not() {
        let spec = AggregateExpr {
            func: AggregateFunc::Count,
            arg: None,
            distinct: false,
            alias: "count(*)".to_string(),
        };
        let mut star = Accumulator::new(&spec);
        star.update(None);
        star.update(None);
        assert_eq!(vec![Value::Long(2)], star.finalize(AggregateMode::Complete));

        let mut by_column = Accumulator::new(&agg(AggregateFunc::Count));
        by_column.update(Some(&Value::Null));
        by_column.update(Some(&Value::Double(1.0)));
        assert_eq!(
            vec![Value::Long(1)],
            by_column.finalize(AggregateMode::Complete)
        );
    }

    #[test]
    fn test_null_join_keys_never_match() {
        let keys = vec![Expr::column(0, "k", ConcreteDataType::Integer, true)];
        let row = Row::new(vec![Value::Null]);
        assert_eq!(None, join_key(&keys, &row).unwrap());
    }

    #[test]
    fn test_sort_null_ordering() {
        assert_eq!(
            Ordering::Less,
            compare_sort_values(&Value::Null, &Value::Integer(1), true)
        );
        assert_eq!(
            Ordering::Greater,
            compare_sort_values(&Value::Null, &Value::Integer(1), false)
        );
    }
}
