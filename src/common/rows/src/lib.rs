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

//! Row containers and the pull-based row stream every operator and
//! connector speaks. A stream is the async rendition of the Volcano
//! iterator: construction opens it, polling advances it, dropping closes
//! it and releases whatever session or buffer backs it.

pub mod adapter;
pub mod error;
pub mod util;

use std::pin::Pin;
use std::task::{Context, Poll};

use datatypes::prelude::{SchemaRef, Value};
pub use futures::Stream;

use crate::error::Result;

/// A fixed-arity tuple of universal values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// A stream of rows that knows its row type.
pub trait RowStream: Stream<Item = Result<Row>> {
    fn schema(&self) -> SchemaRef;
}

pub type SendableRowStream = Pin<Box<dyn RowStream + Send>>;

/// A stream with no rows, used for always-empty plans.
pub struct EmptyRowStream {
    schema: SchemaRef,
}

impl EmptyRowStream {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }
}

impl RowStream for EmptyRowStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl Stream for EmptyRowStream {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(None)
    }
}

/// A stream over rows already in memory.
pub struct MemoryRowStream {
    schema: SchemaRef,
    rows: std::vec::IntoIter<Row>,
}

impl MemoryRowStream {
    pub fn new(schema: SchemaRef, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows: rows.into_iter(),
        }
    }
}

impl RowStream for MemoryRowStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl Stream for MemoryRowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.rows.next().map(Ok))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

/// A stream fed by a bounded channel; the producer blocks when the
/// consumer lags, which is the executor's back-pressure mechanism.
pub struct ChannelRowStream {
    schema: SchemaRef,
    receiver: tokio::sync::mpsc::Receiver<Result<Row>>,
}

impl ChannelRowStream {
    /// Returns the producer half and the stream. `capacity` bounds the
    /// number of in-flight rows.
    pub fn new(
        schema: SchemaRef,
        capacity: usize,
    ) -> (tokio::sync::mpsc::Sender<Result<Row>>, Self) {
        let (sender, receiver) = tokio::sync::mpsc::channel(capacity.max(1));
        (sender, Self { schema, receiver })
    }
}

impl RowStream for ChannelRowStream {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl Stream for ChannelRowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema};

    use super::*;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![ColumnSchema::new(
            "n",
            ConcreteDataType::Integer,
            false,
        )]))
    }

    #[tokio::test]
    async fn test_memory_stream_yields_all_rows() {
        let rows = vec![
            Row::from(vec![Value::Integer(1)]),
            Row::from(vec![Value::Integer(2)]),
        ];
        let stream = MemoryRowStream::new(schema(), rows.clone());
        let collected = util::collect(Box::pin(stream)).await.unwrap();
        assert_eq!(rows, collected);
    }

    #[tokio::test]
    async fn test_channel_stream_backpressure_capacity() {
        let (sender, stream) = ChannelRowStream::new(schema(), 1);
        sender
            .send(Ok(Row::from(vec![Value::Integer(1)])))
            .await
            .unwrap();
        // A second send would park until the consumer drains one row.
        assert!(sender
            .try_send(Ok(Row::from(vec![Value::Integer(2)])))
            .is_err());
        drop(sender);
        let collected = util::collect(Box::pin(stream)).await.unwrap();
        assert_eq!(1, collected.len());
    }
}
