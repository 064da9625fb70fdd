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

use std::pin::Pin;
use std::task::{Context, Poll};

use datatypes::prelude::SchemaRef;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::error::Result;
use crate::{Row, RowStream};

/// Attach a schema to any boxed row stream. Operators built with
/// `async-stream` generators produce anonymous streams; this adapter makes
/// them a [`RowStream`].
pub struct RowStreamAdapter {
    schema: SchemaRef,
    inner: BoxStream<'static, Result<Row>>,
}

impl RowStreamAdapter {
    pub fn new(schema: SchemaRef, inner: BoxStream<'static, Result<Row>>) -> Self {
        Self { schema, inner }
    }
}

impl RowStream for RowStreamAdapter {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl Stream for RowStreamAdapter {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
